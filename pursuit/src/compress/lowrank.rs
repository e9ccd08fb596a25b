//! Fixed-rank spatial/temporal factorization of aligned templates.

use nalgebra::{DMatrix, SVD};

use crate::common::Array2;

/// Rank-`R` factors of a `visible × L` aligned waveform.
#[derive(Debug, Clone)]
pub(crate) struct LowRank {
    /// `visible × R`, singular values folded in.
    pub spatial: Array2<f32>,
    /// `R × L`, orthonormal rows (or aligned channel rows for the identity encoding).
    pub temporal: Array2<f32>,
}

/// Factorize `aligned` (`visible × L`) into `spatial · temporal` with `rank` components.
///
/// When the waveform has no more channels than `rank`, the identity encoding is used:
/// spatial column `k` selects visible channel `k` and temporal row `k` is that channel.
/// The reconstruction is then exact.
pub(crate) fn factorize(aligned: &Array2<f32>, rank: usize) -> LowRank {
    let (n_visible, len) = aligned.shape();
    if n_visible <= rank {
        return identity(aligned, rank);
    }

    let matrix = DMatrix::from_fn(n_visible, len, |r, c| aligned[(r, c)] as f64);
    let svd = SVD::new(matrix, true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        tracing::warn!(
            visible = n_visible,
            samples = len,
            "SVD did not produce singular vectors, using zero factors"
        );
        return LowRank {
            spatial: Array2::new_default(n_visible, rank),
            temporal: Array2::new_default(rank, len),
        };
    };

    // Largest singular values first.
    let sigma = &svd.singular_values;
    let mut order: Vec<usize> = (0..sigma.len()).collect();
    order.sort_by(|&a, &b| sigma[b].total_cmp(&sigma[a]));

    let mut spatial = Array2::new_default(n_visible, rank);
    let mut temporal = Array2::new_default(rank, len);
    for (k, &component) in order.iter().take(rank).enumerate() {
        let s = sigma[component];
        for c in 0..n_visible {
            spatial[(c, k)] = (u[(c, component)] * s) as f32;
        }
        for (t, value) in temporal.row_mut(k).iter_mut().enumerate() {
            *value = v_t[(component, t)] as f32;
        }
    }

    LowRank { spatial, temporal }
}

fn identity(aligned: &Array2<f32>, rank: usize) -> LowRank {
    let (n_visible, len) = aligned.shape();
    let mut spatial = Array2::new_default(n_visible, rank);
    let mut temporal = Array2::new_default(rank, len);
    for k in 0..n_visible {
        spatial[(k, k)] = 1.0;
        temporal.row_mut(k).copy_from_slice(aligned.row(k));
    }
    LowRank { spatial, temporal }
}

impl LowRank {
    /// `spatial · temporal` (`visible × L`).
    pub fn reconstruct(&self) -> Array2<f32> {
        let n_visible = self.spatial.rows();
        let (rank, len) = self.temporal.shape();
        let mut out = Array2::new_default(n_visible, len);
        for c in 0..n_visible {
            let row = out.row_mut(c);
            for k in 0..rank {
                let weight = self.spatial[(c, k)];
                if weight == 0.0 {
                    continue;
                }
                for (value, &basis) in row.iter_mut().zip(self.temporal.row(k)) {
                    *value += weight * basis;
                }
            }
        }
        out
    }
}
