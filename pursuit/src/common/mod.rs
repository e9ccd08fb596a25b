//! Common utilities for pursuit.

mod array2;

pub use array2::Array2;

use rayon::prelude::*;

/// Multiplier for number of chunks relative to CPU threads.
const CHUNKS_PER_THREAD: usize = 2;

/// Rows per parallel chunk so that `rows` splits into roughly `threads * 2` chunks.
#[inline]
pub fn rows_per_chunk(rows: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (rows / num_chunks).max(1)
}

/// Peak-to-peak amplitude of a 1-D signal. Zero for an empty slice.
#[inline]
pub fn ptp(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    max - min
}

/// Sum of squares computed in parallel chunks.
pub fn parallel_energy(values: &[f32]) -> f64 {
    const CHUNK_SIZE: usize = 4096;
    values
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| chunk.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>())
        .sum()
}

/// Index of the first maximum. `None` for an empty slice.
#[inline]
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptp() {
        assert_eq!(ptp(&[]), 0.0);
        assert_eq!(ptp(&[3.0]), 0.0);
        assert!((ptp(&[1.0, -2.5, 4.0, 0.0]) - 6.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[-5.0, -1.0, -7.0]), Some(1));
    }

    #[test]
    fn test_parallel_energy() {
        let values: Vec<f32> = (0..10_000).map(|i| (i % 7) as f32 - 3.0).collect();
        let expected: f64 = values.iter().map(|&v| (v as f64).powi(2)).sum();
        assert!((parallel_energy(&values) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_rows_per_chunk_minimum() {
        assert_eq!(rows_per_chunk(0), 1);
        assert!(rows_per_chunk(1_000) >= 1);
    }
}
