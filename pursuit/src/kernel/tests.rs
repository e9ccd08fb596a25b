use super::*;
use crate::compress::compress;
use crate::testing::{linear_geometry, synthetic_templates, test_config};

fn bank_for(n_units: usize, n_channels: usize) -> (CompressedTemplates, KernelBank) {
    let templates = synthetic_templates(n_units, n_channels, 40);
    let compressed = compress(&templates, &linear_geometry(n_channels), &test_config()).unwrap();
    let bank = build_kernel_bank(&compressed, 4).unwrap();
    (compressed, bank)
}

// ============================================================================
// Kernel bank
// ============================================================================

#[test]
fn test_self_peaks_align_to_global_offset() {
    let (compressed, bank) = bank_for(4, 12);
    let g = bank.global_offset();

    for u in 0..compressed.n_units() {
        let pair = bank.pair_index(u, u).unwrap();
        let kernel = bank.kernel(pair);
        assert_eq!(
            crate::common::argmax(kernel),
            Some(g),
            "unit {} self kernel must peak at the global offset",
            u
        );
        let norm = compressed.units[u].norm;
        assert!(
            (kernel[g] - norm).abs() <= 1e-3 * norm,
            "unit {}: K_ii(G) = {}, norm = {}",
            u,
            kernel[g],
            norm
        );
    }
}

#[test]
fn test_bank_shape() {
    let (compressed, bank) = bank_for(3, 10);
    let padded_len = compressed.padded_len();
    let min_peak = *bank.self_peaks().iter().min().unwrap();
    assert_eq!(
        bank.len(),
        2 * padded_len - 1 + bank.global_offset() - min_peak
    );
    assert_eq!(bank.pairs().len(), compressed.overlap_pairs().len());
    for (i, j) in compressed.overlap_pairs() {
        assert!(bank.pair_index(i, j).is_some());
    }
}

#[test]
fn test_pair_kernels_are_time_reversed() {
    let (compressed, _) = bank_for(3, 8);
    let padded_len = compressed.padded_len();
    for (i, j) in compressed.overlap_pairs() {
        let k_ij = pair_kernel(&compressed, i, j);
        let k_ji = pair_kernel(&compressed, j, i);
        let scale = compressed.units[i].norm.max(compressed.units[j].norm);
        for k in 0..2 * padded_len - 1 {
            let mirrored = k_ji[2 * padded_len - 2 - k];
            assert!(
                (k_ij[k] - mirrored).abs() <= 1e-3 * scale,
                "pair ({}, {}) lag {}: {} vs {}",
                i,
                j,
                k,
                k_ij[k],
                mirrored
            );
        }
    }
}

#[test]
fn test_non_overlapping_units_have_no_kernel() {
    let (compressed, bank) = bank_for(5, 20);
    assert!(!compressed.overlap[(0, 4)]);
    assert_eq!(bank.pair_index(0, 4), None);
}

#[test]
fn test_from_parts_rejects_bad_shape() {
    let kernels = Array2::new_default(2, 5);
    let result = KernelBank::from_parts(2, vec![(0, 0)], kernels, vec![1, 1]);
    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
}

// ============================================================================
// Splines
// ============================================================================

#[test]
fn test_b3_partition_of_unity() {
    for step in 0..10 {
        let f = step as f32 / 10.0;
        let sum: f32 = (-1..=2).map(|m| b3(f - m as f32)).sum();
        assert!((sum - 1.0).abs() < 1e-6, "f={}", f);
    }
}

#[test]
fn test_spline_interpolates_samples() {
    let curve: Vec<f32> = (0..50)
        .map(|t| (t as f32 * 0.3).sin() * 10.0 + t as f32 * 0.1)
        .collect();
    let coeffs = fit_coefficients(&curve, 7, 3);
    assert_eq!(coeffs.len(), curve.len() + 2);

    for (t, &expected) in curve.iter().enumerate() {
        let value = eval(&coeffs, t as f32);
        assert!(
            (value - expected).abs() < 1e-3,
            "sample {}: {} vs {}",
            t,
            value,
            expected
        );
    }
}

#[test]
fn test_spline_between_samples_is_smooth() {
    let curve: Vec<f32> = (0..64).map(|t| (t as f32 * 0.2).cos()).collect();
    let coeffs = fit_coefficients(&curve, 7, 3);
    for t in 5..58 {
        let x = t as f32 + 0.5;
        let expected = (x * 0.2).cos();
        assert!((eval(&coeffs, x) - expected).abs() < 2e-3, "x={}", x);
    }
}

#[test]
fn test_spline_is_zero_outside_support() {
    let curve = vec![1.0; 10];
    let coeffs = fit_coefficients(&curve, 7, 3);
    assert_eq!(eval(&coeffs, -0.5), 0.0);
    assert_eq!(eval(&coeffs, 9.5), 0.0);
    assert_eq!(eval(&coeffs, 12.0), 0.0);
    assert!((eval(&coeffs, 9.0) - 1.0).abs() < 1e-5);
}

#[test]
fn test_shifted_eval_matches_direct_eval() {
    let curve: Vec<f32> = (0..30).map(|t| ((t as f32) - 15.0).powi(2) * -0.1).collect();
    let coeffs = fit_coefficients(&curve, 7, 3);
    for shift in [-0.75f32, -0.2, 0.0, 0.4, 1.0] {
        let shifted = ShiftedEval::new(shift);
        for k in 0..32 {
            let direct = eval(&coeffs, k as f32 - shift);
            let fast = shifted.value(&coeffs, k);
            assert!(
                (direct - fast).abs() < 1e-4,
                "shift {} k {}: {} vs {}",
                shift,
                k,
                direct,
                fast
            );
        }
    }
}

#[test]
fn test_spline_bank_fit() {
    let (_, bank) = bank_for(2, 8);
    let splines = SplineBank::fit(bank.kernels(), 7, 3);
    assert_eq!(splines.n_pairs(), bank.pairs().len());
    assert_eq!(splines.len(), bank.len());

    let g = bank.global_offset();
    let pair = bank.pair_index(0, 0).unwrap();
    let peak = eval(splines.pair(pair), g as f32);
    assert!((peak - bank.kernel(pair)[g]).abs() <= 1e-3 * bank.kernel(pair)[g].abs());
}
