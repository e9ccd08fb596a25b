//! Chunk-by-chunk deconvolution of a recording.
//!
//! [`Deconvolver`] owns the template dictionary and the derived [`DeconvModel`].
//! The model is built (or loaded from an [`ArtifactCache`]) on first use and reused
//! for every chunk until [`Deconvolver::update_templates`] replaces the dictionary.
//! Chunks are processed strictly in sequence; all parallelism lives inside the
//! model build, the objective build and the batched subtraction.

mod model;


pub use model::{DeconvModel, model_hash};

use std::sync::Arc;
use std::time::Instant;

use common::SharedFn;

use crate::cache::ArtifactCache;
use crate::config::{Config, DriftTracking};
use crate::drift::{DriftLimits, PtpDrift};
use crate::error::{Error, Result};
use crate::geometry::ChannelGeometry;
use crate::objective::Objective;
use crate::reader::ChunkReader;
use crate::search::{GreedySearch, SearchStats, SpikeTrain};
use crate::templates::TemplateSet;

/// Called after every chunk with `(chunks_done, chunks_total)`.
pub type ProgressFn = SharedFn<dyn Fn(usize, usize) + Send + Sync>;

/// Result of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub chunk_id: usize,
    /// Spikes whose start lies in the chunk proper, in chunk-relative time
    /// (column of the buffered chunk data).
    pub spikes: SpikeTrain,
    /// Absolute sample of chunk-relative time 0.
    pub sample_offset: i64,
    /// Observed peak-to-peak amplitudes, when drift tracking is enabled.
    pub drift: Option<PtpDrift>,
    pub stats: SearchStats,
}

impl ChunkOutput {
    /// Spikes in absolute recording time.
    pub fn absolute_spikes(&self) -> SpikeTrain {
        self.spikes.clone().offset(self.sample_offset)
    }
}

/// Concatenate chunk outputs into one absolute-time spike train.
pub fn merge_outputs(outputs: &[ChunkOutput]) -> SpikeTrain {
    let mut train = SpikeTrain::default();
    for output in outputs {
        train.extend(output.absolute_spikes());
    }
    train
}

/// Greedy deconvolution engine for one template dictionary at a time.
#[derive(Debug)]
pub struct Deconvolver {
    config: Config,
    templates: TemplateSet,
    geometry: ChannelGeometry,
    cache: Option<ArtifactCache>,
    progress: ProgressFn,
    model: Option<Arc<DeconvModel>>,
}

impl Deconvolver {
    /// # Panics
    ///
    /// Panics if `config` is invalid (see [`Config::validate`]).
    pub fn new(config: Config, templates: TemplateSet, geometry: ChannelGeometry) -> Result<Self> {
        config.validate();
        check_geometry(&templates, &geometry)?;
        Ok(Self {
            config,
            templates,
            geometry,
            cache: None,
            progress: SharedFn::None,
            model: None,
        })
    }

    /// Persist and reuse model artifacts in `cache`.
    pub fn with_cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Replace the template dictionary. The model is rebuilt on the next chunk.
    pub fn update_templates(&mut self, templates: TemplateSet) -> Result<()> {
        check_geometry(&templates, &self.geometry)?;
        tracing::info!(
            units = templates.n_units(),
            previous_units = self.templates.n_units(),
            "Templates updated, model invalidated"
        );
        self.templates = templates;
        self.model = None;
        Ok(())
    }

    /// Model for `chunk_id`: the in-memory one, a cached one, or a fresh build.
    pub fn prepare(&mut self, chunk_id: usize) -> Result<Arc<DeconvModel>> {
        if let Some(model) = &self.model {
            return Ok(Arc::clone(model));
        }

        let start = Instant::now();
        let model = match &self.cache {
            Some(cache) => self.load_or_build(cache, chunk_id)?,
            None => DeconvModel::build(&self.templates, &self.geometry, &self.config)?,
        };
        tracing::info!(
            chunk = chunk_id,
            units = model.compressed.n_units(),
            pairs = model.kernels.pairs().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model ready"
        );

        let model = Arc::new(model);
        self.model = Some(Arc::clone(&model));
        Ok(model)
    }

    fn load_or_build(&self, cache: &ArtifactCache, chunk_id: usize) -> Result<DeconvModel> {
        let hash = model_hash(&self.templates, &self.geometry, &self.config);
        match DeconvModel::load(cache, chunk_id, hash, &self.templates, &self.config) {
            Ok(Some(model)) => {
                tracing::info!(chunk = chunk_id, "Loaded model from cache");
                return Ok(model);
            }
            Ok(None) => {
                tracing::debug!(chunk = chunk_id, "No cached model");
            }
            Err(e @ Error::MalformedArtifact { .. }) => {
                tracing::warn!(chunk = chunk_id, error = %e, "Invalid cached model, recomputing");
            }
            Err(e) => return Err(e),
        }

        let model = DeconvModel::build(&self.templates, &self.geometry, &self.config)?;
        model.store(cache, chunk_id, hash)?;
        Ok(model)
    }

    /// Deconvolve one chunk of `reader`.
    pub fn run_chunk<R: ChunkReader + ?Sized>(
        &mut self,
        reader: &R,
        chunk_id: usize,
    ) -> Result<ChunkOutput> {
        if reader.n_channels() != self.templates.n_channels() {
            return Err(Error::ShapeMismatch {
                what: "recording channels",
                expected: vec![self.templates.n_channels()],
                actual: vec![reader.n_channels()],
            });
        }

        let model = self.prepare(chunk_id)?;
        let start = Instant::now();
        let chunk = reader.read_chunk(chunk_id, true)?;
        let objective = Objective::build(&chunk.data, &model.compressed)?;
        let outcome = GreedySearch::new(model.search_context(&self.config), objective).run()?;

        let mut spikes = outcome.spikes;
        spikes.retain_times(chunk.core.start as i64..chunk.core.end as i64);

        let drift = match self.config.drift_tracking {
            DriftTracking::Enabled {
                max_percent,
                min_diff,
            } => Some(PtpDrift::measure(
                &self.templates,
                &model.compressed.visibility,
                &chunk.data,
                &spikes,
                DriftLimits {
                    max_percent,
                    min_diff,
                },
            )),
            DriftTracking::Disabled => None,
        };

        tracing::info!(
            chunk = chunk_id,
            sample_offset = chunk.sample_offset,
            spikes = spikes.len(),
            iterations = outcome.stats.iterations,
            rescans = outcome.stats.rescans,
            hit_iteration_cap = outcome.stats.hit_iteration_cap,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chunk deconvolved"
        );
        if outcome.stats.hit_iteration_cap {
            tracing::warn!(
                chunk = chunk_id,
                max_iterations = self.config.max_iterations,
                "Search stopped at the iteration cap"
            );
        }

        let stats = SearchStats {
            spikes: spikes.len(),
            ..outcome.stats
        };
        Ok(ChunkOutput {
            chunk_id,
            spikes,
            sample_offset: chunk.sample_offset,
            drift,
            stats,
        })
    }

    /// Deconvolve every chunk in order.
    pub fn run<R: ChunkReader + ?Sized>(&mut self, reader: &R) -> Result<Vec<ChunkOutput>> {
        let n_chunks = reader.n_chunks();
        let start = Instant::now();
        let mut outputs = Vec::with_capacity(n_chunks);
        for chunk_id in 0..n_chunks {
            outputs.push(self.run_chunk(reader, chunk_id)?);
            if let Some(progress) = self.progress.as_ref() {
                progress(chunk_id + 1, n_chunks);
            }
        }

        tracing::info!(
            chunks = n_chunks,
            spikes = outputs.iter().map(|o| o.spikes.len()).sum::<usize>(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Recording deconvolved"
        );
        Ok(outputs)
    }
}

fn check_geometry(templates: &TemplateSet, geometry: &ChannelGeometry) -> Result<()> {
    if templates.n_channels() != geometry.n_channels() {
        return Err(Error::GeometryMismatch {
            channels: templates.n_channels(),
            geometry: geometry.n_channels(),
        });
    }
    Ok(())
}
