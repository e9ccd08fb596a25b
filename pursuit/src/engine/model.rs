//! Template-derived model shared by every chunk, and its cached form.

use std::hash::Hasher;

use crate::cache::{ArtifactCache, ArtifactKind, Section, exact};
use crate::common::Array2;
use crate::compress::{CompressedTemplates, UnitFactors, compress};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::ChannelGeometry;
use crate::kernel::{KernelBank, SplineBank, build_kernel_bank};
use crate::search::SearchContext;
use crate::templates::TemplateSet;

/// Compressed templates with their kernel and spline banks.
#[derive(Debug, Clone, PartialEq)]
pub struct DeconvModel {
    pub compressed: CompressedTemplates,
    pub kernels: KernelBank,
    pub splines: SplineBank,
}

impl DeconvModel {
    pub fn build(
        templates: &TemplateSet,
        geometry: &ChannelGeometry,
        config: &Config,
    ) -> Result<Self> {
        let compressed = compress(templates, geometry, config)?;
        let kernels = build_kernel_bank(&compressed, config.max_concurrent_units)?;
        let splines = SplineBank::fit(
            kernels.kernels(),
            config.spline_prepad,
            config.spline_postpad,
        );
        Ok(Self {
            compressed,
            kernels,
            splines,
        })
    }

    pub fn search_context<'a>(&'a self, config: &'a Config) -> SearchContext<'a> {
        SearchContext {
            compressed: &self.compressed,
            kernels: &self.kernels,
            splines: &self.splines,
            config,
        }
    }

    /// Write all three artifacts for `chunk`.
    pub fn store(&self, cache: &ArtifactCache, chunk: usize, hash: u64) -> Result<()> {
        cache.store(ArtifactKind::Factors, chunk, hash, &self.factor_sections())?;
        cache.store(ArtifactKind::Kernels, chunk, hash, &self.kernel_sections())?;
        cache.store(
            ArtifactKind::Splines,
            chunk,
            hash,
            &[Section::from_array2(&self.splines.coeffs)],
        )
    }

    /// Read the artifacts of `chunk`.
    ///
    /// `Ok(None)` if any artifact is missing; [`Error::MalformedArtifact`] if one
    /// exists but does not describe a model for `templates` under `config`.
    pub fn load(
        cache: &ArtifactCache,
        chunk: usize,
        hash: u64,
        templates: &TemplateSet,
        config: &Config,
    ) -> Result<Option<Self>> {
        let (n_units, n_channels) = (templates.n_units(), templates.n_channels());
        let rank = config.rank;
        let padded_len = templates.n_time() + 2 * config.template_pad;

        let factor_shapes = [
            exact(&[n_units, n_channels]),
            exact(&[n_units, n_units]),
            exact(&[n_units, n_channels]),
            exact(&[n_units, n_channels, rank]),
            exact(&[n_units, rank, padded_len]),
            exact(&[n_units]),
            exact(&[n_units]),
        ];
        let Some(sections) = cache.load(ArtifactKind::Factors, chunk, hash, &factor_shapes)?
        else {
            return Ok(None);
        };
        let compressed = compressed_from_sections(sections, templates, config);

        let pairs = compressed.overlap_pairs();
        let kernel_shapes = [
            exact(&[pairs.len(), 2]),
            exact(&[n_units]),
            vec![Some(pairs.len()), None],
        ];
        let Some(sections) = cache.load(ArtifactKind::Kernels, chunk, hash, &kernel_shapes)?
        else {
            return Ok(None);
        };
        let malformed = |reason: &str| Error::MalformedArtifact {
            path: cache.path(ArtifactKind::Kernels, chunk),
            reason: reason.to_string(),
        };
        let [stored_pairs, self_peaks, kernels]: [Section; 3] = sections
            .try_into()
            .map_err(|_| malformed("unexpected section count"))?;

        let stored_pairs: Vec<(usize, usize)> = stored_pairs
            .data
            .chunks_exact(2)
            .map(|p| (p[0] as usize, p[1] as usize))
            .collect();
        if stored_pairs != pairs {
            return Err(malformed("pairs do not match the overlap graph"));
        }
        let kernel_len = 2 * padded_len - 1;
        let self_peaks: Vec<usize> = self_peaks
            .data
            .iter()
            .map(|&v| {
                (v >= 0.0 && v.fract() == 0.0 && (v as usize) < kernel_len)
                    .then_some(v as usize)
                    .ok_or_else(|| malformed("self peak out of range"))
            })
            .collect::<Result<_>>()?;
        let spread = match (self_peaks.iter().max(), self_peaks.iter().min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        };
        let kernels = kernels
            .into_array2()
            .ok_or_else(|| malformed("kernels are not two-dimensional"))?;
        if kernels.cols() != kernel_len + spread {
            return Err(malformed("kernel length does not match self peaks"));
        }
        let kernels = KernelBank::from_parts(n_units, pairs, kernels, self_peaks)?;

        let spline_shapes = [exact(&[kernels.pairs().len(), kernels.len() + 2])];
        let Some(sections) = cache.load(ArtifactKind::Splines, chunk, hash, &spline_shapes)?
        else {
            return Ok(None);
        };
        let coeffs = sections
            .into_iter()
            .next()
            .and_then(Section::into_array2)
            .ok_or_else(|| Error::MalformedArtifact {
                path: cache.path(ArtifactKind::Splines, chunk),
                reason: "missing coefficients".to_string(),
            })?;

        Ok(Some(Self {
            compressed,
            kernels,
            splines: SplineBank { coeffs },
        }))
    }

    fn factor_sections(&self) -> Vec<Section> {
        let compressed = &self.compressed;
        let flag = |b: &bool| if *b { 1.0 } else { 0.0 };
        let units = &compressed.units;

        vec![
            Section::new(
                vec![compressed.n_units(), compressed.n_channels],
                compressed.visibility.as_slice().iter().map(flag).collect(),
            ),
            Section::new(
                vec![compressed.n_units(), compressed.n_units()],
                compressed.overlap.as_slice().iter().map(flag).collect(),
            ),
            Section::new(
                vec![compressed.n_units(), compressed.n_channels],
                units
                    .iter()
                    .flat_map(|u| u.raw_shifts.iter().map(|&s| s as f32))
                    .collect(),
            ),
            Section::new(
                vec![compressed.n_units(), compressed.n_channels, compressed.rank],
                units
                    .iter()
                    .flat_map(|u| u.spatial.as_slice().iter().copied())
                    .collect(),
            ),
            Section::new(
                vec![compressed.n_units(), compressed.rank, compressed.padded_len()],
                units
                    .iter()
                    .flat_map(|u| u.temporal.as_slice().iter().copied())
                    .collect(),
            ),
            Section::from_values(units.iter().map(|u| u.norm)),
            Section::from_values(compressed.max_ptp.iter().copied()),
        ]
    }

    fn kernel_sections(&self) -> Vec<Section> {
        let pairs = self.kernels.pairs();
        vec![
            Section::new(
                vec![pairs.len(), 2],
                pairs
                    .iter()
                    .flat_map(|&(i, j)| [i as f32, j as f32])
                    .collect(),
            ),
            Section::from_values(self.kernels.self_peaks().iter().map(|&p| p as f32)),
            Section::from_array2(self.kernels.kernels()),
        ]
    }
}

/// Inverse of `factor_sections`. Shapes were validated by the cache.
fn compressed_from_sections(
    sections: Vec<Section>,
    templates: &TemplateSet,
    config: &Config,
) -> CompressedTemplates {
    let (n_units, n_channels) = (templates.n_units(), templates.n_channels());
    let rank = config.rank;
    let padded_len = templates.n_time() + 2 * config.template_pad;
    let mut sections = sections.into_iter().map(|s| s.data);
    let mut next = || sections.next().unwrap_or_default();

    let to_mask = |data: Vec<f32>, cols: usize| {
        Array2::new(n_units, cols, data.into_iter().map(|v| v != 0.0).collect())
    };
    let visibility = to_mask(next(), n_channels);
    let overlap = to_mask(next(), n_units);
    let raw_shifts = next();
    let spatial = next();
    let temporal = next();
    let norms = next();
    let max_ptp = next();

    let units = (0..n_units)
        .map(|u| {
            let slice = |data: &[f32], size: usize| data[u * size..(u + 1) * size].to_vec();
            UnitFactors {
                visible: (0..n_channels).filter(|&c| visibility[(u, c)]).collect(),
                raw_shifts: raw_shifts[u * n_channels..(u + 1) * n_channels]
                    .iter()
                    .map(|&s| s as i32)
                    .collect(),
                spatial: Array2::new(n_channels, rank, slice(&spatial, n_channels * rank)),
                temporal: Array2::new(rank, padded_len, slice(&temporal, rank * padded_len)),
                norm: norms[u],
            }
        })
        .collect();

    CompressedTemplates {
        units,
        visibility,
        overlap,
        max_ptp,
        n_channels,
        raw_len: templates.n_time(),
        pad: config.template_pad,
        rank,
    }
}

/// Version key for cached artifacts: template content plus everything that shapes the model.
pub fn model_hash(templates: &TemplateSet, geometry: &ChannelGeometry, config: &Config) -> u64 {
    let mut hasher = common::FnvHasher::new();
    hasher.write_u64(templates.content_hash());
    for c in 0..geometry.n_channels() {
        hasher.write_f32s(&geometry.position(c));
    }
    for value in [
        config.rank,
        config.align_jitter,
        config.template_pad,
        config.spline_prepad,
        config.spline_postpad,
    ] {
        hasher.write_u64(value as u64);
    }
    hasher.write_f32s(&[
        config.vis_threshold,
        config.vis_strong_threshold,
        config.neighbor_distance,
    ]);
    hasher.finish()
}
