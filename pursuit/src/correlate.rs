//! Shifted projection and full cross-correlation.
//!
//! Both the objective and the pairwise kernels are matched-filter responses of a
//! unit's low-rank factors against a multichannel signal. They share this code so
//! the two stay in the same time frame.

use crate::common::Array2;
use crate::compress::UnitFactors;

/// Project `data` (`channels × N`) through the spatial components of `factors`.
///
/// `out` is `rank × N` with `out[r, m] = Σ_c spatial[c, r] · data[c, m + s_c]`, where
/// `s_c` is the channel's signed alignment shift. Samples outside `data` read as zero.
pub fn project_shifted(data: &Array2<f32>, factors: &UnitFactors, out: &mut Array2<f32>) {
    let n_samples = data.cols();
    debug_assert_eq!(out.shape(), (factors.rank(), n_samples));

    out.as_mut_slice().fill(0.0);
    for &c in &factors.visible {
        let shift = factors.raw_shifts[c] as i64;
        let row = data.row(c);
        // Output range where m + shift lands inside the signal.
        let lo = (-shift).clamp(0, n_samples as i64) as usize;
        let hi = (n_samples as i64 - shift).clamp(0, n_samples as i64) as usize;
        if lo >= hi {
            continue;
        }
        let src_lo = (lo as i64 + shift) as usize;
        let src = &row[src_lo..src_lo + (hi - lo)];

        for r in 0..factors.rank() {
            let weight = factors.spatial[(c, r)];
            if weight == 0.0 {
                continue;
            }
            for (value, &x) in out.row_mut(r)[lo..hi].iter_mut().zip(src) {
                *value += weight * x;
            }
        }
    }
}

/// Accumulate the full cross-correlation of `signal` with `kernel` into `out`.
///
/// `out[n] += Σ_y kernel[y] · signal[n − (K − 1) + y]` for `n ∈ [0, N + K − 1)`,
/// where `K = kernel.len()` and `N = signal.len()`.
pub fn correlate_full_add(signal: &[f32], kernel: &[f32], out: &mut [f32]) {
    let n = signal.len() as i64;
    let k = kernel.len() as i64;
    debug_assert_eq!(out.len() as i64, (n + k - 1).max(0));

    for (idx, value) in out.iter_mut().enumerate() {
        let start = idx as i64 - (k - 1);
        let y_lo = (-start).max(0);
        let y_hi = k.min(n - start);
        if y_lo >= y_hi {
            continue;
        }
        let taps = &kernel[y_lo as usize..y_hi as usize];
        let samples = &signal[(start + y_lo) as usize..(start + y_hi) as usize];
        *value += taps
            .iter()
            .zip(samples)
            .map(|(&a, &b)| a * b)
            .sum::<f32>();
    }
}

/// Matched-filter score of one unit against `data`.
///
/// Writes `score[n] = Σ_c Σ_x R[c, x] · data[c, n − (L − 1) + x + s_c]` into `out`
/// (length `N + L − 1`), where `R` is the aligned reconstruction.
pub fn matched_filter(data: &Array2<f32>, factors: &UnitFactors, out: &mut [f32]) {
    out.fill(0.0);
    if factors.is_degenerate() {
        return;
    }

    let mut projected = Array2::new_default(factors.rank(), data.cols());
    project_shifted(data, factors, &mut projected);
    for r in 0..factors.rank() {
        correlate_full_add(projected.row(r), factors.temporal.row(r), out);
    }
}
