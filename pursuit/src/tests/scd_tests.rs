use crate::common::Array2;
use crate::config::{Config, Scd};
use crate::engine::Deconvolver;
use crate::reader::InMemoryRecording;
use crate::search::SpikeTrain;
use crate::testing::{inject, linear_geometry, synthetic_templates, test_config};

use super::residual_energy;

const N_CHANNELS: usize = 6;
const N_TIME: usize = 30;

fn run(data: &Array2<f32>, scd: Scd) -> (SpikeTrain, usize) {
    let config = Config {
        rank: 4,
        refractory_ms: 1.5,
        scd,
        ..test_config()
    };
    let mut engine = Deconvolver::new(
        config,
        synthetic_templates(3, N_CHANNELS, N_TIME),
        linear_geometry(N_CHANNELS),
    )
    .unwrap();
    let reader = InMemoryRecording::new(data.clone(), data.cols(), 100);
    let output = engine.run_chunk(&reader, 0).unwrap();
    (output.absolute_spikes(), output.stats.rescans)
}

#[test]
fn test_scd_does_not_increase_residual() {
    let templates = synthetic_templates(3, N_CHANNELS, N_TIME);
    let mut data = Array2::new_default(N_CHANNELS, 4000);
    // Overlapping spikes of different units.
    inject(&mut data, &templates, 0, 1000, 1.0);
    inject(&mut data, &templates, 1, 1012, 1.0);
    // Competing spikes of one unit inside its refractory window.
    inject(&mut data, &templates, 2, 2500, 1.0);
    inject(&mut data, &templates, 2, 2515, 0.9);
    inject(&mut data, &templates, 1, 3300, 1.0);

    let (plain, plain_rescans) = run(&data, Scd::Disabled);
    let (revised, rescans) = run(
        &data,
        Scd::Enabled {
            iterations: 1,
            stages: 2,
        },
    );
    assert_eq!(plain_rescans, 0);
    assert!(rescans >= 1);

    let plain_energy = residual_energy(&data, &templates, &plain);
    let revised_energy = residual_energy(&data, &templates, &revised);
    assert!(
        revised_energy <= plain_energy * 1.001 + 1e-3,
        "residual with reinjection {} > without {}",
        revised_energy,
        plain_energy
    );
}

#[test]
fn test_scd_keeps_isolated_detections() {
    let templates = synthetic_templates(3, N_CHANNELS, N_TIME);
    let mut data = Array2::new_default(N_CHANNELS, 3000);
    for (k, time) in [400i64, 1100, 1900, 2600].into_iter().enumerate() {
        inject(&mut data, &templates, k % 3, time, 1.0);
    }

    let (plain, _) = run(&data, Scd::Disabled);
    let (revised, rescans) = run(
        &data,
        Scd::Enabled {
            iterations: 1,
            stages: 3,
        },
    );
    assert_eq!(rescans, 1);
    assert_eq!(plain.len(), 4);
    assert_eq!(plain.times(), revised.times());
    assert_eq!(plain.units(), revised.units());
}
