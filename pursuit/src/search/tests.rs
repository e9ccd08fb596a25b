use rand::prelude::*;

use super::*;
use crate::common::Array2;
use crate::compress::compress;
use crate::config::Scd;
use crate::kernel::build_kernel_bank;
use crate::templates::TemplateSet;
use crate::testing::{
    footprint_template, init_tracing, inject, linear_geometry, synthetic_templates, test_config,
};

struct Model {
    compressed: CompressedTemplates,
    kernels: KernelBank,
    splines: SplineBank,
}

fn model(templates: &TemplateSet, config: &Config) -> Model {
    let compressed = compress(
        templates,
        &linear_geometry(templates.n_channels()),
        config,
    )
    .unwrap();
    let kernels = build_kernel_bank(&compressed, config.max_concurrent_units).unwrap();
    let splines = SplineBank::fit(kernels.kernels(), config.spline_prepad, config.spline_postpad);
    Model {
        compressed,
        kernels,
        splines,
    }
}

fn run(model: &Model, config: &Config, data: &Array2<f32>) -> SearchOutcome {
    let ctx = SearchContext {
        compressed: &model.compressed,
        kernels: &model.kernels,
        splines: &model.splines,
        config,
    };
    let objective = Objective::build(data, &model.compressed).unwrap();
    GreedySearch::new(ctx, objective).run().unwrap()
}

fn max_abs(values: &[f32]) -> f32 {
    values.iter().fold(0.0f32, |m, v| m.max(v.abs()))
}

// ============================================================================
// Peak extraction
// ============================================================================

#[test]
fn test_best_per_index_prefers_lower_unit_on_tie() {
    let values = Array2::new(2, 3, vec![1.0, 5.0, 2.0, 1.0, 4.0, 3.0]);
    assert_eq!(
        best_per_index(&values, &[true, true]),
        vec![(1.0, 0), (5.0, 0), (3.0, 1)]
    );
}

#[test]
fn test_best_per_index_skips_inactive_units() {
    let values = Array2::new(2, 3, vec![-4.0, -5.0, -2.0, 0.0, 0.0, 0.0]);
    assert_eq!(
        best_per_index(&values, &[true, false]),
        vec![(-4.0, 0), (-5.0, 0), (-2.0, 0)]
    );
}

#[test]
fn test_find_peaks_threshold_and_edges() {
    let mut values = Array2::new_filled(2, 100, -1.0);
    values[(0, 3)] = 50.0; // inside the left edge window
    values[(1, 40)] = 30.0;
    values[(0, 60)] = 5.0; // below threshold
    values[(1, 95)] = 80.0; // inside the right edge window

    let peaks = find_peaks(&values, &[true; 2], 10.0, 5);
    assert_eq!(
        peaks,
        vec![Peak {
            index: 40,
            unit: 1,
            value: 30.0
        }]
    );
}

#[test]
fn test_find_peaks_exclusive_within_lockout() {
    let mut rng = StdRng::seed_from_u64(17);
    let values = Array2::new(
        3,
        2000,
        (0..6000).map(|_| rng.random_range(-50.0f32..100.0)).collect(),
    );
    let lockout = 25;
    let peaks = find_peaks(&values, &[true; 3], 20.0, lockout);

    assert!(!peaks.is_empty());
    for pair in peaks.windows(2) {
        assert!(
            pair[1].index - pair[0].index >= lockout,
            "peaks at {} and {} closer than lockout",
            pair[0].index,
            pair[1].index
        );
    }
    for peak in &peaks {
        assert!(peak.value > 20.0);
        assert!(peak.index > lockout && peak.index < 2000 - lockout);
    }
}

#[test]
fn test_find_peaks_keeps_larger_of_close_pair() {
    let mut values = Array2::new_filled(1, 200, 0.0);
    values[(0, 100)] = 40.0;
    values[(0, 108)] = 60.0;
    let peaks = find_peaks(&values, &[true], 10.0, 10);
    assert_eq!(peaks.len(), 1);
    assert_eq!(peaks[0].index, 108);
}

#[test]
fn test_find_peaks_ignores_distant_flank() {
    // A small peak at 100 and a large one at 132 with a wide rising flank that
    // still exceeds the small peak 29 samples after it.
    let lockout = 29;
    let mut values = Array2::new_filled(1, 300, 0.0);
    for n in 0..300 {
        let small = 40.0 - 2.0 * (n as f32 - 100.0).abs();
        let large = 120.0 - 10.0 * (n as f32 - 132.0).abs();
        values[(0, n)] = small.max(large).max(0.0);
    }
    assert!(values[(0, 100 + lockout)] > values[(0, 100)]);

    let peaks = find_peaks(&values, &[true], 10.0, lockout);
    let indices: Vec<usize> = peaks.iter().map(|p| p.index).collect();
    assert_eq!(indices, vec![100, 132]);
}

// ============================================================================
// Amplitude
// ============================================================================

#[test]
fn test_amplitude_recovers_scale_and_clamps() {
    let fit = AmplitudeFit::Enabled {
        ptp_threshold: 5.0,
        max_diff: 0.3,
    };
    // peak = (2a - 1) * norm
    assert!((amplitude(&fit, 1.2 * 100.0, 100.0, 10.0) - 1.1).abs() < 1e-6);
    assert!((amplitude(&fit, 5.0 * 100.0, 100.0, 10.0) - 1.3).abs() < 1e-6);
    assert!((amplitude(&fit, -100.0, 100.0, 10.0) - 0.7).abs() < 1e-6);
    // Small units and zero norms keep unit amplitude.
    assert_eq!(amplitude(&fit, 120.0, 100.0, 2.0), 1.0);
    assert_eq!(amplitude(&fit, 120.0, 0.0, 10.0), 1.0);
    assert_eq!(amplitude(&AmplitudeFit::Disabled, 120.0, 100.0, 10.0), 1.0);
}

// ============================================================================
// Subtraction
// ============================================================================

#[test]
fn test_subtract_then_restore_is_identity() {
    let templates = synthetic_templates(3, 10, 40);
    let config = test_config();
    let model = model(&templates, &config);

    let mut data = Array2::new_default(10, 500);
    inject(&mut data, &templates, 1, 150, 1.0);
    crate::testing::add_noise(&mut data, 1.0, 3);
    let mut objective = Objective::build(&data, &model.compressed).unwrap();
    let before = objective.clone();

    let detections = vec![
        Detection {
            index: objective.index_of(150) as usize,
            unit: 1,
            shift: 0.3,
            amplitude: 1.1,
        },
        Detection {
            index: objective.index_of(320) as usize,
            unit: 2,
            shift: -0.6,
            amplitude: 0.9,
        },
    ];

    apply_kernels(&mut objective, &detections, &model.kernels, &model.splines, 2.0, Direction::Subtract);
    apply_refractory(&mut objective, &detections, 20, 1e4, Direction::Subtract);
    assert_ne!(objective, before);

    apply_refractory(&mut objective, &detections, 20, 1e4, Direction::Restore);
    apply_kernels(&mut objective, &detections, &model.kernels, &model.splines, 2.0, Direction::Restore);

    let scale = max_abs(before.values().as_slice());
    for (a, b) in objective.values().as_slice().iter().zip(before.values().as_slice()) {
        assert!((a - b).abs() <= 1e-4 * scale, "{} vs {}", a, b);
    }
}

#[test]
fn test_subtraction_removes_reconstructed_spike() {
    let templates = synthetic_templates(3, 8, 40);
    let config = test_config();
    let model = model(&templates, &config);
    let compressed = &model.compressed;

    // Recording-frame reconstruction of unit 0 with its padded start at q.
    let q = 120;
    let factors = &compressed.units[0];
    let recon = factors.reconstruction();
    let mut data = Array2::new_default(8, 400);
    for &c in &factors.visible {
        let start = (q as i64 + factors.raw_shifts[c] as i64) as usize;
        for (y, &v) in recon.row(c).iter().enumerate() {
            data[(c, start + y)] += v;
        }
    }

    let mut objective = Objective::build(&data, compressed).unwrap();
    let index = q + model.kernels.self_peaks()[0];
    let detection = Detection {
        index,
        unit: 0,
        shift: 0.0,
        amplitude: 1.0,
    };
    apply_kernels(&mut objective, &[detection], &model.kernels, &model.splines, 2.0, Direction::Subtract);

    // What remains equals the objective of an empty chunk: −norm everywhere.
    for j in compressed.overlapping(0) {
        let norm = compressed.units[j].norm;
        for (n, &v) in objective.row(j).iter().enumerate() {
            assert!(
                (v + norm).abs() <= 2e-3 * compressed.units[0].norm.max(norm),
                "unit {} index {}: {} vs {}",
                j,
                n,
                v,
                -norm
            );
        }
    }
}

// ============================================================================
// Search loop
// ============================================================================

#[test]
fn test_search_finds_isolated_spikes() {
    init_tracing();
    let templates = synthetic_templates(4, 12, 40);
    let config = test_config();
    let model = model(&templates, &config);

    let mut data = Array2::new_default(12, 900);
    inject(&mut data, &templates, 1, 100, 1.0);
    inject(&mut data, &templates, 3, 450, 1.0);
    inject(&mut data, &templates, 0, 700, 1.0);

    let outcome = run(&model, &config, &data);
    let spikes = outcome.spikes.spikes();
    assert_eq!(spikes.len(), 3, "spikes: {:?}", spikes);
    for (spike, (unit, time)) in spikes.iter().zip([(1, 100), (3, 450), (0, 700)]) {
        assert_eq!(spike.unit, unit);
        assert!((spike.time - time).abs() <= 1, "time {} vs {}", spike.time, time);
        assert!(spike.shift.abs() <= config.max_subsample_shift);
        assert_eq!(spike.amplitude, 1.0);
    }
    assert_eq!(outcome.stats.rescans, 0);
}

#[test]
fn test_search_on_empty_chunk() {
    let templates = synthetic_templates(2, 8, 40);
    let config = test_config();
    let model = model(&templates, &config);

    let outcome = run(&model, &config, &Array2::new_default(8, 300));
    assert!(outcome.spikes.is_empty());
    assert_eq!(outcome.stats.iterations, 0);
}

#[test]
fn test_search_respects_iteration_cap() {
    let templates = synthetic_templates(3, 10, 40);
    let config = Config {
        max_iterations: 1,
        ..test_config()
    };
    let model = model(&templates, &config);

    // Two spikes closer than the lockout window need two iterations.
    let mut data = Array2::new_default(10, 600);
    inject(&mut data, &templates, 0, 200, 1.0);
    inject(&mut data, &templates, 2, 215, 1.0);

    let outcome = run(&model, &config, &data);
    assert_eq!(outcome.stats.iterations, 1);
    assert!(outcome.stats.hit_iteration_cap);
    assert_eq!(outcome.spikes.len(), 1);
}

#[test]
fn test_spikes_just_over_lockout_apart_share_an_iteration() {
    let templates = synthetic_templates(3, 10, 40);
    let config = Config {
        max_iterations: 1,
        ..test_config()
    };
    let model = model(&templates, &config);
    let gap = model.compressed.lockout() as i64 + 5;

    let mut data = Array2::new_default(10, 600);
    inject(&mut data, &templates, 0, 200, 1.0);
    inject(&mut data, &templates, 2, 200 + gap, 3.0);

    let outcome = run(&model, &config, &data);
    let spikes = outcome.spikes.spikes();
    assert_eq!(outcome.stats.iterations, 1);
    assert_eq!(spikes.len(), 2, "spikes: {:?}", spikes);
    assert_eq!(spikes[0].unit, 0);
    assert_eq!(spikes[1].unit, 2);
    assert!((spikes[0].time - 200).abs() <= 1);
    assert!((spikes[1].time - (200 + gap)).abs() <= 1);
}

#[test]
fn test_degenerate_unit_never_detected() {
    let loud = footprint_template(4, 30, 1, 20.0, 1.5, 0.0);
    let silent = Array2::new_default(4, 30);
    let templates = TemplateSet::from_units(&[loud, silent]).unwrap();
    let config = Config {
        threshold: -1.0,
        max_iterations: 50,
        ..test_config()
    };
    let model = model(&templates, &config);
    assert!(model.compressed.units[1].is_degenerate());

    // The silent unit's objective row is 0 everywhere, above the threshold.
    let outcome = run(&model, &config, &Array2::new_default(4, 400));
    assert!(
        outcome.spikes.iter().all(|s| s.unit != 1),
        "spikes: {:?}",
        outcome.spikes.spikes()
    );
    assert!(outcome.spikes.is_empty());
}

#[test]
fn test_amplitude_fit_on_scaled_spike() {
    let templates = synthetic_templates(2, 8, 40);
    let config = Config {
        amplitude_fit: AmplitudeFit::Enabled {
            ptp_threshold: 0.0,
            max_diff: 0.3,
        },
        ..test_config()
    };
    let model = model(&templates, &config);

    let mut data = Array2::new_default(8, 400);
    inject(&mut data, &templates, 0, 150, 1.15);
    let outcome = run(&model, &config, &data);

    assert_eq!(outcome.spikes.len(), 1);
    let amplitude = outcome.spikes.spikes()[0].amplitude;
    assert!((amplitude - 1.15).abs() < 0.05, "amplitude {}", amplitude);
}

#[test]
fn test_rescan_replaces_slot() {
    init_tracing();
    let templates = synthetic_templates(2, 8, 40);
    let config = Config {
        scd: Scd::Enabled {
            iterations: 1,
            stages: 2,
        },
        ..test_config()
    };
    let model = model(&templates, &config);

    let mut data = Array2::new_default(8, 400);
    inject(&mut data, &templates, 1, 180, 1.0);
    let outcome = run(&model, &config, &data);

    // Iteration 0 finds the spike, iteration 1 reinjects and re-finds it,
    // iteration 2 finds nothing.
    assert_eq!(outcome.stats.rescans, 1);
    assert_eq!(outcome.stats.iterations, 2);
    assert_eq!(outcome.spikes.len(), 1);
    assert_eq!(outcome.spikes.spikes()[0].unit, 1);
    assert!((outcome.spikes.spikes()[0].time - 180).abs() <= 1);
}

#[test]
fn test_spike_train_csv() {
    let train = SpikeTrain::new(vec![
        Spike {
            time: 40,
            unit: 2,
            shift: -0.25,
            amplitude: 1.0,
        },
        Spike {
            time: 10,
            unit: 0,
            shift: 0.5,
            amplitude: 0.9,
        },
    ])
    .offset(1000);
    assert_eq!(train.times(), vec![1010, 1040]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spikes.csv");
    train.write_csv(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "time,unit,shift,amplitude");
    assert_eq!(lines[1], "1010,0,0.5,0.9");
    assert_eq!(lines[2], "1040,2,-0.25,1");
}
