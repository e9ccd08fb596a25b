//! Peak extraction from the objective.

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::common::Array2;

/// Candidate spike: objective index, best unit and its objective value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub unit: usize,
    pub value: f32,
}

/// Best value and unit at every objective index. Ties keep the lower unit.
///
/// Units with `active[u] == false` never win an index.
pub fn best_per_index(values: &Array2<f32>, active: &[bool]) -> Vec<(f32, usize)> {
    let (n_units, len) = values.shape();
    debug_assert_eq!(active.len(), n_units);
    (0..len)
        .into_par_iter()
        .map(|n| {
            let mut best = (f32::NEG_INFINITY, 0);
            for u in (0..n_units).filter(|&u| active[u]) {
                let v = values[(u, n)];
                if v > best.0 {
                    best = (v, u);
                }
            }
            best
        })
        .collect()
}

/// Accepted peaks of one search iteration, ordered by index.
///
/// A peak is the maximum of the per-index best values over a max-pool window of
/// `lockout` samples (`±lockout / 2`), exceeds `threshold` and lies strictly inside
/// `(lockout, len − lockout)`. Remaining candidates are accepted greedily by
/// descending value, rejecting any candidate closer than `lockout` to an already
/// accepted one.
pub fn find_peaks(
    values: &Array2<f32>,
    active: &[bool],
    threshold: f32,
    lockout: usize,
) -> Vec<Peak> {
    let len = values.cols();
    if values.rows() == 0 || len <= 2 * lockout + 1 {
        return Vec::new();
    }

    let best = best_per_index(values, active);
    let half = lockout / 2;
    let lo = lockout + 1;
    let hi = len - lockout;

    let mut candidates: Vec<Peak> = (lo..hi)
        .into_par_iter()
        .filter_map(|n| {
            let (value, unit) = best[n];
            if value <= threshold {
                return None;
            }
            let window = &best[n - half..=n + half];
            window
                .iter()
                .all(|&(other, _)| other <= value)
                .then_some(Peak {
                    index: n,
                    unit,
                    value,
                })
        })
        .collect();

    candidates.sort_by(|a, b| b.value.total_cmp(&a.value).then(a.index.cmp(&b.index)));

    let mut taken = BTreeSet::new();
    let mut accepted = Vec::new();
    for peak in candidates {
        let from = (peak.index + 1).saturating_sub(lockout);
        let to = peak.index + lockout;
        if taken.range(from..to).next().is_some() {
            continue;
        }
        taken.insert(peak.index);
        accepted.push(peak);
    }

    accepted.sort_by_key(|p| p.index);
    accepted
}
