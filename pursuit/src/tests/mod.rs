mod scd_tests;

use crate::common::Array2;
use crate::search::SpikeTrain;
use crate::templates::TemplateSet;
use crate::testing::inject;

/// Squared energy left after removing every spike's raw template from `data`.
///
/// Spike times are absolute sample indices of `data`.
fn residual_energy(data: &Array2<f32>, templates: &TemplateSet, spikes: &SpikeTrain) -> f64 {
    let mut residual = data.clone();
    for spike in spikes.iter() {
        inject(&mut residual, templates, spike.unit, spike.time, -spike.amplitude);
    }
    crate::common::parallel_energy(residual.as_slice())
}
