//! Pursuit - greedy matching-pursuit spike deconvolution.
//!
//! A multichannel recording is explained as a sparse sum of time-shifted,
//! amplitude-scaled template waveforms plus residual noise:
//! - Template compression into low-rank spatial/temporal factors
//! - Pairwise cross-template kernels with cubic spline interpolation
//! - Per-chunk matched-filter objective
//! - Greedy peak search with sub-sample timing, batched subtraction and
//!   periodic reinjection of earlier assignments
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pursuit::{BinaryRecording, ChannelGeometry, Config, Deconvolver, TemplateSet};
//!
//! let config = Config::from_file("deconv.yaml")?;
//! let templates = TemplateSet::from_file("templates.bin")?;
//! let geometry = ChannelGeometry::from_file("geometry.txt")?;
//! let reader = BinaryRecording::open("recording.bin", geometry.n_channels(), config.chunk_len, config.chunk_buffer)?;
//!
//! let mut engine = Deconvolver::new(config, templates, geometry)?;
//! let outputs = engine.run(&reader)?;
//! pursuit::merge_outputs(&outputs).write_csv("spike_train.csv")?;
//! ```

pub mod batch;
pub mod cache;
pub(crate) mod common;
pub mod compress;
mod config;
pub mod correlate;
pub mod drift;
mod engine;
mod error;
mod geometry;
pub mod kernel;
pub mod objective;
pub mod reader;
pub mod search;
mod templates;

pub mod testing;

#[cfg(test)]
mod tests;

#[cfg(feature = "bench")]
pub mod bench;

// ============================================================================
// Core types
// ============================================================================

pub use crate::common::Array2;
pub use error::{Error, Result};
pub use geometry::ChannelGeometry;
pub use templates::TemplateSet;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{AmplitudeFit, Config, DriftTracking, Scd};

// ============================================================================
// Model
// ============================================================================

pub use compress::{CompressedTemplates, UnitFactors, compress};
pub use kernel::{KernelBank, SplineBank, build_kernel_bank};
pub use objective::Objective;

// ============================================================================
// Search
// ============================================================================

pub use search::{
    // Loop
    GreedySearch,
    SearchContext,
    SearchOutcome,
    SearchStats,
    // Results
    Spike,
    SpikeTrain,
};

// ============================================================================
// Engine and I/O
// ============================================================================

pub use batch::BatchMode;
pub use cache::ArtifactCache;
pub use drift::PtpDrift;
pub use engine::{ChunkOutput, DeconvModel, Deconvolver, ProgressFn, merge_outputs, model_hash};
pub use reader::{BinaryRecording, ChunkReader, InMemoryRecording, RawChunk};
