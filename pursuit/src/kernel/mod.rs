//! Pairwise cross-template kernels.
//!
//! For every overlapping ordered pair `(i, j)` the kernel `K_ij[k]` is the matched
//! filter response of unit `j` to an isolated, unit-amplitude spike of unit `i`,
//! indexed so that lag `k` corresponds to objective index `n = q + k` for a spike
//! whose padded template starts at `q`. All kernels are then re-padded so that
//! every self kernel peaks at the common index `global_offset`.

mod spline;

#[cfg(test)]
mod tests;

pub use spline::{ShiftedEval, SplineBank, b3, eval, fit_coefficients};

use crate::common::{Array2, argmax};
use crate::compress::CompressedTemplates;
use crate::correlate::matched_filter;
use crate::error::{Error, Result};

/// Zero-padded, peak-aligned kernels for all overlapping pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBank {
    /// Ordered pairs `(i, j)`, row-major in `i`.
    pairs: Vec<(usize, usize)>,
    /// Per unit `i`: `(j, pair index)` for every overlapping `j`.
    partners: Vec<Vec<(usize, usize)>>,
    /// `pairs × len`.
    kernels: Array2<f32>,
    /// Index of the self-correlation peak of each unit in the unpadded kernel.
    self_peaks: Vec<usize>,
    global_offset: usize,
}

impl KernelBank {
    /// Assemble a bank from already padded kernels.
    pub fn from_parts(
        n_units: usize,
        pairs: Vec<(usize, usize)>,
        kernels: Array2<f32>,
        self_peaks: Vec<usize>,
    ) -> Result<Self> {
        if kernels.rows() != pairs.len() || self_peaks.len() != n_units {
            return Err(Error::ShapeMismatch {
                what: "kernel bank",
                expected: vec![pairs.len(), n_units],
                actual: vec![kernels.rows(), self_peaks.len()],
            });
        }
        let mut partners = vec![Vec::new(); n_units];
        for (pair, &(i, j)) in pairs.iter().enumerate() {
            if i >= n_units || j >= n_units {
                return Err(Error::InvalidTemplates(format!(
                    "kernel pair ({}, {}) out of range for {} units",
                    i, j, n_units
                )));
            }
            partners[i].push((j, pair));
        }
        let global_offset = self_peaks.iter().copied().max().unwrap_or(0);
        Ok(Self {
            pairs,
            partners,
            kernels,
            self_peaks,
            global_offset,
        })
    }

    pub fn n_units(&self) -> usize {
        self.partners.len()
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    /// `(j, pair index)` for every unit `j` overlapping `i`.
    pub fn partners(&self, i: usize) -> &[(usize, usize)] {
        &self.partners[i]
    }

    pub fn pair_index(&self, i: usize, j: usize) -> Option<usize> {
        self.partners[i]
            .iter()
            .find(|&&(partner, _)| partner == j)
            .map(|&(_, pair)| pair)
    }

    pub fn kernel(&self, pair: usize) -> &[f32] {
        self.kernels.row(pair)
    }

    pub fn kernels(&self) -> &Array2<f32> {
        &self.kernels
    }

    pub fn self_peaks(&self) -> &[usize] {
        &self.self_peaks
    }

    /// Common index of every self-correlation peak in the padded kernels.
    pub fn global_offset(&self) -> usize {
        self.global_offset
    }

    /// Padded kernel length.
    pub fn len(&self) -> usize {
        self.kernels.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Raw kernel `K_ij` (length `2L - 1`) for spike unit `i` observed through unit `j`.
pub fn pair_kernel(compressed: &CompressedTemplates, i: usize, j: usize) -> Vec<f32> {
    let padded_len = compressed.padded_len();
    let kernel_len = 2 * padded_len - 1;
    let spike = &compressed.units[i];
    let observer = &compressed.units[j];
    if spike.is_degenerate() || observer.is_degenerate() {
        return vec![0.0; kernel_len];
    }

    // Unit i's reconstruction in the recording frame, with room for alignment shifts.
    let margin = compressed
        .units
        .iter()
        .flat_map(|u| u.raw_shifts.iter())
        .map(|s| s.unsigned_abs() as usize)
        .max()
        .unwrap_or(0);
    let recon = spike.reconstruction();
    let mut signal = Array2::new_default(compressed.n_channels, padded_len + 2 * margin);
    for &c in &spike.visible {
        let start = (margin as i64 + spike.raw_shifts[c] as i64) as usize;
        signal.row_mut(c)[start..start + padded_len].copy_from_slice(recon.row(c));
    }

    let mut response = vec![0.0f32; signal.cols() + padded_len - 1];
    matched_filter(&signal, observer, &mut response);
    response[margin..margin + kernel_len].to_vec()
}

/// Compute kernels for every overlapping pair and align their self peaks.
pub fn build_kernel_bank(
    compressed: &CompressedTemplates,
    max_concurrent: usize,
) -> Result<KernelBank> {
    let n_units = compressed.n_units();
    let padded_len = compressed.padded_len();
    let pairs = compressed.overlap_pairs();

    let raw = common::parallel::par_map_limited(&pairs, max_concurrent, |&(i, j)| {
        pair_kernel(compressed, i, j)
    });

    // Degenerate units peak at zero lag by convention.
    let self_peaks: Vec<usize> = (0..n_units)
        .map(|u| {
            let pair = pairs.iter().position(|&p| p == (u, u));
            match pair {
                Some(p) if !compressed.units[u].is_degenerate() => {
                    argmax(&raw[p]).unwrap_or(padded_len - 1)
                }
                _ => padded_len - 1,
            }
        })
        .collect();

    let global_offset = self_peaks.iter().copied().max().unwrap_or(padded_len - 1);
    let min_peak = self_peaks.iter().copied().min().unwrap_or(padded_len - 1);
    let bank_len = 2 * padded_len - 1 + global_offset - min_peak;

    let mut kernels = Array2::new_default(pairs.len(), bank_len);
    for (p, &(i, _)) in pairs.iter().enumerate() {
        let start = global_offset - self_peaks[i];
        kernels.row_mut(p)[start..start + raw[p].len()].copy_from_slice(&raw[p]);
    }

    tracing::info!(
        units = n_units,
        pairs = pairs.len(),
        global_offset,
        kernel_len = bank_len,
        "Built kernel bank"
    );

    KernelBank::from_parts(n_units, pairs, kernels, self_peaks)
}
