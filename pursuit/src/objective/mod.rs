//! Matched-filter objective for one chunk.
//!
//! Row `u` at index `n` scores unit `u` with its padded template starting at chunk
//! sample `n - (L - 1)`:
//!
//! ```text
//! objective[u, n] = 2 · score[u, n] − norm[u]
//! ```
//!
//! which is the reduction in squared residual achieved by subtracting the unit's
//! reconstruction at that position. The frame is identical for every unit, so rows
//! are computed independently and in parallel.


use std::time::Instant;

use rayon::prelude::*;

use crate::common::Array2;
use crate::compress::CompressedTemplates;
use crate::correlate::matched_filter;
use crate::error::{Error, Result};

/// Dense `units × (N + L − 1)` objective array, owned by the search loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    values: Array2<f32>,
    padded_len: usize,
    pad: usize,
}

impl Objective {
    /// Build the objective of `data` (`channels × N`).
    pub fn build(data: &Array2<f32>, compressed: &CompressedTemplates) -> Result<Self> {
        if data.rows() != compressed.n_channels {
            return Err(Error::ShapeMismatch {
                what: "chunk channels",
                expected: vec![compressed.n_channels],
                actual: vec![data.rows()],
            });
        }

        let start = Instant::now();
        let padded_len = compressed.padded_len();
        let len = data.cols() + padded_len - 1;
        let mut values = Array2::new_default(compressed.n_units(), len);

        values.par_rows_mut().for_each(|(u, row)| {
            let factors = &compressed.units[u];
            matched_filter(data, factors, row);
            for v in row.iter_mut() {
                *v = 2.0 * *v - factors.norm;
            }
        });

        tracing::debug!(
            units = compressed.n_units(),
            samples = data.cols(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built objective"
        );

        Ok(Self {
            values,
            padded_len,
            pad: compressed.pad,
        })
    }

    /// Wrap precomputed values in the frame of `compressed`.
    pub fn from_values(values: Array2<f32>, compressed: &CompressedTemplates) -> Self {
        Self {
            values,
            padded_len: compressed.padded_len(),
            pad: compressed.pad,
        }
    }

    pub fn n_units(&self) -> usize {
        self.values.rows()
    }

    /// Number of objective samples (`N + L − 1`).
    pub fn len(&self) -> usize {
        self.values.cols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.cols() == 0
    }

    pub fn row(&self, unit: usize) -> &[f32] {
        self.values.row(unit)
    }

    pub fn row_mut(&mut self, unit: usize) -> &mut [f32] {
        self.values.row_mut(unit)
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array2<f32> {
        &mut self.values
    }

    pub fn into_values(self) -> Array2<f32> {
        self.values
    }

    /// Chunk sample where the raw template of a spike at objective `index` starts.
    pub fn spike_time(&self, index: usize) -> i64 {
        index as i64 - (self.padded_len as i64 - 1) + self.pad as i64
    }

    /// Inverse of [`Objective::spike_time`].
    pub fn index_of(&self, time: i64) -> i64 {
        time + (self.padded_len as i64 - 1) - self.pad as i64
    }
}
