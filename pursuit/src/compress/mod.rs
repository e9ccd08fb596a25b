//! Template compression: visibility, channel alignment and low-rank factorization.
//!
//! Every template is zero-padded by `template_pad` samples on both sides, its visible
//! channels are aligned to the channel with the largest peak-to-peak amplitude, and
//! the aligned waveform is reduced to `rank` spatial/temporal components.
//!
//! # Frames
//!
//! With raw length `T` and pad `p`, the padded length is `L = T + 2p`. Factors live
//! in the *aligned* frame: the aligned waveform of channel `c` is
//! `A[c, x] = raw_c[x - p + s_c]` where `s_c` is the signed raw shift. Projecting a
//! signal onto a unit therefore reads channel `c` at offset `+s_c`, which undoes the
//! alignment without mutating the signal.

mod align;
mod lowrank;
mod visibility;


pub use align::{best_shift, pad_and_shift};
pub use visibility::{overlap_graph, visibility};

use crate::common::{Array2, parallel_energy};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::ChannelGeometry;
use crate::templates::TemplateSet;

/// Low-rank encoding of a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFactors {
    /// Visible channel indices, ascending.
    pub visible: Vec<usize>,
    /// Signed alignment shift per channel, zero on invisible channels.
    pub raw_shifts: Vec<i32>,
    /// Spatial components (`channels × rank`), zero rows on invisible channels.
    pub spatial: Array2<f32>,
    /// Temporal components (`rank × L`).
    pub temporal: Array2<f32>,
    /// Squared L2 energy of the reconstruction.
    pub norm: f32,
}

impl UnitFactors {
    /// A unit without visible channels. Its objective and kernels are identically zero.
    pub fn is_degenerate(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.spatial.cols()
    }

    /// Smallest alignment shift over visible channels.
    pub fn origin(&self) -> i32 {
        self.visible
            .iter()
            .map(|&c| self.raw_shifts[c])
            .min()
            .unwrap_or(0)
    }

    /// Non-negative alignment shifts (`raw_shift - origin`), zero on invisible channels.
    pub fn shifts(&self) -> Vec<usize> {
        let origin = self.origin();
        let mut shifts = vec![0; self.raw_shifts.len()];
        for &c in &self.visible {
            shifts[c] = (self.raw_shifts[c] - origin) as usize;
        }
        shifts
    }

    /// Reconstruction in the aligned frame (`channels × L`).
    pub fn reconstruction(&self) -> Array2<f32> {
        let n_channels = self.spatial.rows();
        let (rank, len) = self.temporal.shape();
        let mut out = Array2::new_default(n_channels, len);
        for &c in &self.visible {
            let row = out.row_mut(c);
            for k in 0..rank {
                let weight = self.spatial[(c, k)];
                if weight == 0.0 {
                    continue;
                }
                for (value, &basis) in row.iter_mut().zip(self.temporal.row(k)) {
                    *value += weight * basis;
                }
            }
        }
        out
    }
}

/// Output of [`compress`]: per-unit factors plus the shared graphs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedTemplates {
    pub units: Vec<UnitFactors>,
    /// `units × channels`.
    pub visibility: Array2<bool>,
    /// `units × units`, symmetric with a set diagonal.
    pub overlap: Array2<bool>,
    /// Largest channel peak-to-peak amplitude per unit.
    pub max_ptp: Vec<f32>,
    pub n_channels: usize,
    /// Raw template length `T`.
    pub raw_len: usize,
    /// Zero padding `p` on each side.
    pub pad: usize,
    pub rank: usize,
}

impl CompressedTemplates {
    pub fn n_units(&self) -> usize {
        self.units.len()
    }

    /// Padded template length `L = T + 2p`.
    pub fn padded_len(&self) -> usize {
        self.raw_len + 2 * self.pad
    }

    /// Minimum separation between peaks of one search iteration (`T - 1`).
    pub fn lockout(&self) -> usize {
        self.raw_len - 1
    }

    pub fn norms(&self) -> Vec<f32> {
        self.units.iter().map(|u| u.norm).collect()
    }

    /// Units overlapping `unit`, including itself.
    pub fn overlapping(&self, unit: usize) -> impl Iterator<Item = usize> + '_ {
        self.overlap
            .row(unit)
            .iter()
            .enumerate()
            .filter_map(|(j, &edge)| edge.then_some(j))
    }

    /// All ordered overlapping pairs `(i, j)`, row-major.
    pub fn overlap_pairs(&self) -> Vec<(usize, usize)> {
        (0..self.n_units())
            .flat_map(|i| self.overlapping(i).map(move |j| (i, j)))
            .collect()
    }
}

/// Compress a template set.
///
/// Units without visible channels are kept as degenerate zero encodings.
pub fn compress(
    templates: &TemplateSet,
    geometry: &ChannelGeometry,
    config: &Config,
) -> Result<CompressedTemplates> {
    if geometry.n_channels() != templates.n_channels() {
        return Err(Error::GeometryMismatch {
            channels: templates.n_channels(),
            geometry: geometry.n_channels(),
        });
    }

    let n_channels = templates.n_channels();
    let ptp = templates.ptp();
    let neighbors = geometry.neighbors(config.neighbor_distance);
    let visible_mask = visibility(
        &ptp,
        &neighbors,
        config.vis_threshold,
        config.vis_strong_threshold,
    );
    let overlap = overlap_graph(&visible_mask);

    let units = common::parallel::par_map_range_limited(
        templates.n_units(),
        config.max_concurrent_units,
        |u| {
            let visible: Vec<usize> = (0..n_channels)
                .filter(|&c| visible_mask[(u, c)])
                .collect();
            compress_unit(templates, u, ptp.row(u), visible, config)
        },
    );

    let max_ptp: Vec<f32> = ptp
        .iter_rows()
        .map(|row| row.iter().copied().fold(0.0, f32::max))
        .collect();

    let degenerate = units.iter().filter(|u| u.is_degenerate()).count();
    let mean_visible = if units.is_empty() {
        0.0
    } else {
        units.iter().map(|u| u.visible.len()).sum::<usize>() as f32 / units.len() as f32
    };
    tracing::info!(
        units = units.len(),
        degenerate,
        mean_visible,
        rank = config.rank,
        "Compressed templates"
    );

    Ok(CompressedTemplates {
        units,
        visibility: visible_mask,
        overlap,
        max_ptp,
        n_channels,
        raw_len: templates.n_time(),
        pad: config.template_pad,
        rank: config.rank,
    })
}

fn compress_unit(
    templates: &TemplateSet,
    unit: usize,
    ptp: &[f32],
    visible: Vec<usize>,
    config: &Config,
) -> UnitFactors {
    let n_channels = templates.n_channels();
    let padded_len = templates.n_time() + 2 * config.template_pad;
    let rank = config.rank;

    let Some(&reference) = visible
        .iter()
        .max_by(|&&a, &&b| ptp[a].total_cmp(&ptp[b]).then(b.cmp(&a)))
    else {
        return UnitFactors {
            visible,
            raw_shifts: vec![0; n_channels],
            spatial: Array2::new_default(n_channels, rank),
            temporal: Array2::new_default(rank, padded_len),
            norm: 0.0,
        };
    };

    let reference_wave = templates.unit_channel(unit, reference);
    let mut raw_shifts = vec![0i32; n_channels];
    let mut aligned = Array2::new_default(visible.len(), padded_len);
    for (k, &c) in visible.iter().enumerate() {
        let wave = templates.unit_channel(unit, c);
        let shift = best_shift(reference_wave, wave, config.align_jitter);
        raw_shifts[c] = shift;
        pad_and_shift(wave, config.template_pad, shift, aligned.row_mut(k));
    }

    let factors = lowrank::factorize(&aligned, rank);
    let norm = parallel_energy(factors.reconstruct().as_slice()) as f32;

    let mut spatial = Array2::new_default(n_channels, rank);
    for (k, &c) in visible.iter().enumerate() {
        spatial.row_mut(c).copy_from_slice(factors.spatial.row(k));
    }

    UnitFactors {
        visible,
        raw_shifts,
        spatial,
        temporal: factors.temporal,
        norm,
    }
}
