//! Batched kernel subtraction and refractory suppression.

use rayon::prelude::*;

use super::Detection;
use crate::kernel::{KernelBank, ShiftedEval, SplineBank};
use crate::objective::Objective;

/// Whether a spike's modelled contribution is removed from or added back to the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Subtract,
    Restore,
}

impl Direction {
    fn sign(self) -> f32 {
        match self {
            Direction::Subtract => -1.0,
            Direction::Restore => 1.0,
        }
    }
}

/// Apply the kernels of all `detections` to every overlapping unit row.
///
/// For spike `(i, n, x, a)` and each `j` overlapping `i`:
/// `objective[j, n − G + k] ∓= scale · a · S_ij(k − x)`.
/// Each row is updated by exactly one task, so the batch is order independent.
pub fn apply_kernels(
    objective: &mut Objective,
    detections: &[Detection],
    bank: &KernelBank,
    splines: &SplineBank,
    scale: f32,
    direction: Direction,
) {
    if detections.is_empty() {
        return;
    }
    let sign = direction.sign();
    let global_offset = bank.global_offset() as i64;
    let evals: Vec<ShiftedEval> = detections
        .iter()
        .map(|d| ShiftedEval::new(d.shift))
        .collect();

    objective
        .values_mut()
        .par_rows_mut()
        .for_each(|(j, row)| {
            let row_len = row.len() as i64;
            for (detection, eval) in detections.iter().zip(&evals) {
                let Some(pair) = bank.pair_index(detection.unit, j) else {
                    continue;
                };
                let coeffs = splines.pair(pair);
                let kernel_len = splines.len() as i64;
                let start = detection.index as i64 - global_offset;
                let k_lo = (-start).max(0);
                let k_hi = kernel_len.min(row_len - start);
                let weight = sign * scale * detection.amplitude;
                for k in k_lo..k_hi {
                    row[(start + k) as usize] += weight * eval.value(coeffs, k as usize);
                }
            }
        });
}

/// Push the spike's own unit row down by `fill` within `±radius` of each detection.
///
/// Restoring adds exactly the same amount back.
pub fn apply_refractory(
    objective: &mut Objective,
    detections: &[Detection],
    radius: usize,
    fill: f32,
    direction: Direction,
) {
    let delta = direction.sign() * fill;
    for detection in detections {
        let row = objective.row_mut(detection.unit);
        let lo = detection.index.saturating_sub(radius);
        let hi = (detection.index + radius + 1).min(row.len());
        for v in &mut row[lo..hi] {
            *v += delta;
        }
    }
}
