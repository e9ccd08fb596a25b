//! Synthetic fixtures for tests and benchmarks.

#![allow(dead_code)]

use crate::common::Array2;
use crate::config::Config;
use crate::geometry::ChannelGeometry;
use crate::templates::TemplateSet;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Biphasic extracellular spike: a negative trough at `center` followed by a
/// slower positive rebound. Trough depth equals `amplitude`.
pub fn spike_waveform(n_time: usize, center: f32, width: f32, amplitude: f32) -> Vec<f32> {
    (0..n_time)
        .map(|t| {
            let x = t as f32 - center;
            let trough = (-(x / width).powi(2)).exp();
            let rebound = 0.35 * (-((x - 2.5 * width) / (2.0 * width)).powi(2)).exp();
            amplitude * (rebound - trough)
        })
        .collect()
}

/// Template whose footprint decays with distance from `center_channel`.
///
/// Each channel away from the centre is delayed by `delay_per_channel` samples,
/// which gives the alignment step something to recover.
pub fn footprint_template(
    n_channels: usize,
    n_time: usize,
    center_channel: usize,
    amplitude: f32,
    width: f32,
    delay_per_channel: f32,
) -> Array2<f32> {
    let mut out = Array2::new_default(n_channels, n_time);
    let peak = n_time as f32 * 0.4;
    for c in 0..n_channels {
        let distance = (c as f32 - center_channel as f32).abs();
        let gain = (-0.5 * distance * distance).exp();
        let wave = spike_waveform(
            n_time,
            peak + distance * delay_per_channel,
            width,
            amplitude * gain,
        );
        out.row_mut(c).copy_from_slice(&wave);
    }
    out
}

/// `n_units` templates spread along a linear probe.
pub fn synthetic_templates(n_units: usize, n_channels: usize, n_time: usize) -> TemplateSet {
    let units: Vec<Array2<f32>> = (0..n_units)
        .map(|u| {
            let center = if n_units > 1 {
                u * (n_channels - 1) / (n_units - 1)
            } else {
                n_channels / 2
            };
            footprint_template(
                n_channels,
                n_time,
                center,
                12.0 + 3.0 * u as f32,
                1.5 + 0.4 * (u % 3) as f32,
                0.5,
            )
        })
        .collect();
    TemplateSet::from_units(&units).unwrap_or_else(|e| panic!("synthetic templates: {}", e))
}

/// Linear probe with 20 µm pitch.
pub fn linear_geometry(n_channels: usize) -> ChannelGeometry {
    ChannelGeometry::linear(n_channels, 20.0)
}

/// Add `amplitude · template(unit)` to `data` with the raw template starting at `start`.
///
/// Samples falling outside `data` are dropped.
pub fn inject(data: &mut Array2<f32>, templates: &TemplateSet, unit: usize, start: i64, amplitude: f32) {
    let n_samples = data.cols() as i64;
    for c in 0..templates.n_channels() {
        let wave = templates.unit_channel(unit, c);
        let row = data.row_mut(c);
        for (t, &v) in wave.iter().enumerate() {
            let idx = start + t as i64;
            if (0..n_samples).contains(&idx) {
                row[idx as usize] += amplitude * v;
            }
        }
    }
}

/// Deterministic pseudo-random noise in `[-scale, scale]` (xorshift).
pub fn add_noise(data: &mut Array2<f32>, scale: f32, seed: u64) {
    let mut state = seed.max(1);
    for value in data.as_mut_slice() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let unit = (state >> 11) as f32 / (1u64 << 53) as f32;
        *value += scale * (2.0 * unit - 1.0);
    }
}

/// Config with a small alignment window and pad, suited to short synthetic templates.
pub fn test_config() -> Config {
    Config {
        align_jitter: 4,
        template_pad: 4,
        rank: 3,
        threshold: 20.0,
        max_concurrent_units: 4,
        ..Config::default()
    }
}
