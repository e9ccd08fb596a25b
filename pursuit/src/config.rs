//! Configuration types for deconvolution.
//!
//! This module defines the flat [`Config`] struct and associated enums used by
//! the template compressor, kernel encoder and greedy search loop. All
//! parameters are grouped by comments into logical sections.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Enums
// ============================================================================

/// Per-spike amplitude estimation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeFit {
    /// Every spike gets amplitude 1.
    #[default]
    Disabled,
    /// Estimate amplitude from the interpolated objective peak.
    Enabled {
        /// Only units whose largest channel peak-to-peak exceeds this are fitted.
        ptp_threshold: f32,
        /// Amplitude is clamped to `[1 - max_diff, 1 + max_diff]`.
        max_diff: f32,
    },
}

impl AmplitudeFit {
    pub fn validate(&self) {
        if let Self::Enabled {
            ptp_threshold,
            max_diff,
        } = self
        {
            assert!(
                *ptp_threshold >= 0.0,
                "amplitude ptp_threshold must be non-negative, got {}",
                ptp_threshold
            );
            assert!(
                *max_diff >= 0.0 && *max_diff < 1.0,
                "amplitude max_diff must be in [0, 1), got {}",
                max_diff
            );
        }
    }
}

/// Periodic reinjection of accepted spikes to revise earlier assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scd {
    #[default]
    Disabled,
    Enabled {
        /// Length of both the normal and the rescan half of one cycle.
        iterations: usize,
        /// Number of rescan cycles.
        stages: usize,
    },
}

impl Scd {
    pub fn validate(&self) {
        if let Self::Enabled { iterations, stages } = self {
            assert!(*iterations > 0, "scd iterations must be > 0");
            assert!(*stages > 0, "scd stages must be > 0");
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

/// Tracking of observed peak-to-peak amplitudes for template updates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftTracking {
    #[default]
    Disabled,
    Enabled {
        /// Accepted deviation as a fraction of the template ptp.
        max_percent: f32,
        /// Lower bound on the accepted deviation.
        min_diff: f32,
    },
}

impl DriftTracking {
    pub fn validate(&self) {
        if let Self::Enabled {
            max_percent,
            min_diff,
        } = self
        {
            assert!(
                *max_percent >= 0.0,
                "drift max_percent must be non-negative, got {}",
                max_percent
            );
            assert!(
                *min_diff >= 0.0,
                "drift min_diff must be non-negative, got {}",
                min_diff
            );
        }
    }
}

// ============================================================================
// Deconvolution Configuration
// ============================================================================

/// Configuration for the deconvolution engine.
///
/// Single flat struct with all parameters grouped by pipeline stage.
/// Missing fields in a config file fall back to [`Config::default`].
///
/// # Example
///
/// ```rust,ignore
/// use pursuit::Config;
///
/// let mut config = Config::thorough();
/// config.threshold = 30.0;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -- Template compression --
    /// Number of retained singular components per template.
    pub rank: usize,
    /// Integer alignment search window, in samples, on each side.
    pub align_jitter: usize,
    /// Zero padding added to each side of every template. Must be >= `align_jitter`.
    pub template_pad: usize,
    /// Weak-channel peak-to-peak threshold for visibility.
    pub vis_threshold: f32,
    /// Strong-channel peak-to-peak threshold for visibility.
    pub vis_strong_threshold: f32,
    /// Channels closer than this (and not co-located) are spatial neighbours.
    pub neighbor_distance: f32,

    // -- Kernel encoding --
    /// Symmetric padding before each kernel curve for the spline fit.
    pub spline_prepad: usize,
    /// Symmetric padding after each kernel curve for the spline fit.
    pub spline_postpad: usize,

    // -- Detection --
    /// Objective value a peak must exceed to be accepted.
    pub threshold: f32,
    /// Recording sampling rate in Hz.
    pub sampling_rate: f32,
    /// Refractory half-window in milliseconds.
    pub refractory_ms: f32,
    /// Suppress the spike's own unit row around each accepted spike.
    pub refractory_fill: bool,
    /// Magnitude of the refractory sentinel.
    pub fill_value: f32,
    /// Estimate fractional spike timing from a 3-point quadratic fit.
    pub subsample_shift: bool,
    /// Fractional shifts are clamped to `[-max_subsample_shift, max_subsample_shift]`.
    pub max_subsample_shift: f32,
    /// Per-spike amplitude estimation.
    pub amplitude_fit: AmplitudeFit,

    // -- Search loop --
    /// Reinjection schedule.
    pub scd: Scd,
    /// Maximum greedy iterations per chunk.
    pub max_iterations: usize,
    /// Global scale applied to subtracted kernels (objective is `2·score − norm`).
    pub template_scaling: f32,

    // -- Resources --
    /// Upper bound on units or unit pairs processed concurrently.
    pub max_concurrent_units: usize,
    /// Samples per processing chunk.
    pub chunk_len: usize,
    /// Edge buffer read on both sides of every chunk. Should exceed the template length.
    pub chunk_buffer: usize,

    // -- Template drift --
    /// Observed peak-to-peak tracking.
    pub drift_tracking: DriftTracking,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Template compression
            rank: 5,
            align_jitter: 20,
            template_pad: 20,
            vis_threshold: 0.5,
            vis_strong_threshold: 1.0,
            neighbor_distance: 70.0,

            // Kernel encoding
            spline_prepad: 7,
            spline_postpad: 3,

            // Detection
            threshold: 50.0,
            sampling_rate: 20_000.0,
            refractory_ms: 1.0,
            refractory_fill: true,
            fill_value: 1e4,
            subsample_shift: true,
            max_subsample_shift: 1.0,
            amplitude_fit: AmplitudeFit::Disabled,

            // Search loop
            scd: Scd::Disabled,
            max_iterations: 1000,
            template_scaling: 2.0,

            // Resources
            max_concurrent_units: 64,
            chunk_len: 600_000,
            chunk_buffer: 200,

            // Template drift
            drift_tracking: DriftTracking::Disabled,
        }
    }
}

impl Config {
    /// Single greedy pass: no reinjection, unit amplitudes.
    pub fn fast() -> Self {
        Self {
            scd: Scd::Disabled,
            amplitude_fit: AmplitudeFit::Disabled,
            max_iterations: 200,
            ..Default::default()
        }
    }

    /// Amplitude fitting and several reinjection cycles.
    pub fn thorough() -> Self {
        Self {
            scd: Scd::Enabled {
                iterations: 10,
                stages: 3,
            },
            amplitude_fit: AmplitudeFit::Enabled {
                ptp_threshold: 0.0,
                max_diff: 0.3,
            },
            ..Default::default()
        }
    }

    /// Load a YAML or JSON config. Fields not present keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = common::SerdeFormat::from_file_name(&path.to_string_lossy())
            .map_err(common::SerdeFormatError::from)?;
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = common::deserialize(&text, format)?;
        Ok(config)
    }

    /// Write as YAML or JSON, chosen by the file extension.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = common::SerdeFormat::from_file_name(&path.to_string_lossy())
            .map_err(common::SerdeFormatError::from)?;
        let text = common::serialize(self, format)?;
        std::fs::write(path, text).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Refractory half-window in samples.
    pub fn refractory_samples(&self) -> usize {
        (self.sampling_rate / 1000.0 * self.refractory_ms).round() as usize
    }

    /// Validate the configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.rank > 0, "rank must be > 0");
        assert!(
            self.template_pad >= self.align_jitter,
            "template_pad ({}) must be >= align_jitter ({})",
            self.template_pad,
            self.align_jitter
        );
        assert!(
            self.vis_threshold >= 0.0,
            "vis_threshold must be non-negative, got {}",
            self.vis_threshold
        );
        assert!(
            self.vis_strong_threshold >= self.vis_threshold,
            "vis_strong_threshold ({}) must be >= vis_threshold ({})",
            self.vis_strong_threshold,
            self.vis_threshold
        );
        assert!(
            self.neighbor_distance >= 0.0,
            "neighbor_distance must be non-negative, got {}",
            self.neighbor_distance
        );
        assert!(self.spline_prepad >= 1, "spline_prepad must be >= 1");
        assert!(self.spline_postpad >= 1, "spline_postpad must be >= 1");
        assert!(
            self.sampling_rate > 0.0,
            "sampling_rate must be positive, got {}",
            self.sampling_rate
        );
        assert!(
            self.refractory_ms >= 0.0,
            "refractory_ms must be non-negative, got {}",
            self.refractory_ms
        );
        assert!(
            self.fill_value > 0.0,
            "fill_value must be positive, got {}",
            self.fill_value
        );
        assert!(
            self.max_subsample_shift > 0.0 && self.max_subsample_shift <= 1.0,
            "max_subsample_shift must be in (0, 1], got {}",
            self.max_subsample_shift
        );
        assert!(self.max_iterations > 0, "max_iterations must be > 0");
        assert!(
            self.template_scaling > 0.0,
            "template_scaling must be positive, got {}",
            self.template_scaling
        );
        assert!(
            self.max_concurrent_units > 0,
            "max_concurrent_units must be > 0"
        );
        assert!(self.chunk_len > 0, "chunk_len must be > 0");
        self.amplitude_fit.validate();
        self.scd.validate();
        self.drift_tracking.validate();
    }
}
