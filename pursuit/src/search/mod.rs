//! Greedy matching-pursuit search over a chunk objective.
//!
//! The loop is a small state machine:
//!
//! ```text
//! Searching ──peaks──▶ Subtracting ──▶ Searching | ScdInjecting
//!     │                                                │
//!     └──no peaks / iteration cap──▶ Terminated ◀──────┘ (via Searching)
//! ```
//!
//! Every normal iteration appends one ledger slot. A rescan iteration first restores
//! the contribution of one earlier slot, searches again and overwrites that slot with
//! what it found, which lets early greedy choices be revised.

mod ledger;
mod peaks;
mod quadratic;
mod schedule;
mod subtract;

#[cfg(test)]
mod tests;

pub use ledger::SpikeLedger;
pub use peaks::{Peak, best_per_index, find_peaks};
pub use quadratic::{QuadraticPeak, fit_vertex};
pub use schedule::{ScdSchedule, Step};
pub use subtract::{Direction, apply_kernels, apply_refractory};

use std::path::Path;

use crate::compress::CompressedTemplates;
use crate::config::{AmplitudeFit, Config};
use crate::error::{Error, Result};
use crate::kernel::{KernelBank, SplineBank};
use crate::objective::Objective;

/// A spike in objective coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Objective index of the peak.
    pub index: usize,
    pub unit: usize,
    /// Fractional offset of the true maximum, in samples.
    pub shift: f32,
    pub amplitude: f32,
}

/// A detected spike in chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spike {
    /// Sample where the raw template starts (chunk-relative unless offset).
    pub time: i64,
    pub unit: usize,
    pub shift: f32,
    pub amplitude: f32,
}

/// Spikes ordered by time, then unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeTrain {
    spikes: Vec<Spike>,
}

impl SpikeTrain {
    pub fn new(mut spikes: Vec<Spike>) -> Self {
        spikes.sort_by(|a, b| a.time.cmp(&b.time).then(a.unit.cmp(&b.unit)));
        Self { spikes }
    }

    pub fn len(&self) -> usize {
        self.spikes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    pub fn spikes(&self) -> &[Spike] {
        &self.spikes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Spike> {
        self.spikes.iter()
    }

    pub fn times(&self) -> Vec<i64> {
        self.spikes.iter().map(|s| s.time).collect()
    }

    pub fn units(&self) -> Vec<usize> {
        self.spikes.iter().map(|s| s.unit).collect()
    }

    pub fn shifts(&self) -> Vec<f32> {
        self.spikes.iter().map(|s| s.shift).collect()
    }

    pub fn amplitudes(&self) -> Vec<f32> {
        self.spikes.iter().map(|s| s.amplitude).collect()
    }

    /// Keep spikes whose time lies in `range`.
    pub fn retain_times(&mut self, range: std::ops::Range<i64>) {
        self.spikes.retain(|s| range.contains(&s.time));
    }

    /// Shift every time by `offset`.
    pub fn offset(mut self, offset: i64) -> Self {
        for spike in &mut self.spikes {
            spike.time += offset;
        }
        self
    }

    pub fn extend(&mut self, other: SpikeTrain) {
        self.spikes.extend(other.spikes);
        self.spikes
            .sort_by(|a, b| a.time.cmp(&b.time).then(a.unit.cmp(&b.unit)));
    }

    /// Write `time,unit,shift,amplitude` rows with a header line.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        use std::io::Write;

        let path = path.as_ref();
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::create(path).map_err(io_err)?;
        let mut writer = std::io::BufWriter::new(file);
        writeln!(writer, "time,unit,shift,amplitude").map_err(io_err)?;
        for s in &self.spikes {
            writeln!(writer, "{},{},{},{}", s.time, s.unit, s.shift, s.amplitude)
                .map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }
}

/// Read-only model shared by every iteration of a chunk.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub compressed: &'a CompressedTemplates,
    pub kernels: &'a KernelBank,
    pub splines: &'a SplineBank,
    pub config: &'a Config,
}

/// Loop states.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchState {
    Searching,
    Subtracting(Vec<Detection>),
    ScdInjecting { slot: usize },
    Terminated,
}

/// Counters describing one search run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Iterations executed, normal and rescan.
    pub iterations: usize,
    pub rescans: usize,
    /// Spikes in the final train.
    pub spikes: usize,
    /// True if the loop stopped at `max_iterations`.
    pub hit_iteration_cap: bool,
}

/// Result of [`GreedySearch::run`].
#[derive(Debug)]
pub struct SearchOutcome {
    pub spikes: SpikeTrain,
    pub stats: SearchStats,
    /// Objective after all subtractions.
    pub residual: Objective,
}

/// Greedy search owning the objective of one chunk.
#[derive(Debug)]
pub struct GreedySearch<'a> {
    ctx: SearchContext<'a>,
    objective: Objective,
    /// Units allowed to win a peak; degenerate units are excluded.
    active: Vec<bool>,
    ledger: SpikeLedger,
    schedule: Option<ScdSchedule>,
    iteration: usize,
    /// Slot being rescanned, set between reinjection and subtraction.
    rescan_slot: Option<usize>,
    stats: SearchStats,
}

impl<'a> GreedySearch<'a> {
    pub fn new(ctx: SearchContext<'a>, objective: Objective) -> Self {
        Self {
            ledger: SpikeLedger::new(ctx.config.max_iterations),
            schedule: ScdSchedule::from_config(&ctx.config.scd),
            active: ctx
                .compressed
                .units
                .iter()
                .map(|u| !u.is_degenerate())
                .collect(),
            ctx,
            objective,
            iteration: 0,
            rescan_slot: None,
            stats: SearchStats::default(),
        }
    }

    /// Run until no peak qualifies or the iteration cap is reached.
    pub fn run(mut self) -> Result<SearchOutcome> {
        let mut state = self.next_state();
        while state != SearchState::Terminated {
            state = self.step(state)?;
        }

        let mut stats = self.stats;
        let objective = self.objective;
        let spikes = SpikeTrain::new(
            self.ledger
                .into_detections()
                .into_iter()
                .map(|d| Spike {
                    time: objective.spike_time(d.index),
                    unit: d.unit,
                    shift: d.shift,
                    amplitude: d.amplitude,
                })
                .collect(),
        );
        stats.spikes = spikes.len();

        Ok(SearchOutcome {
            spikes,
            stats,
            residual: objective,
        })
    }

    fn step(&mut self, state: SearchState) -> Result<SearchState> {
        match state {
            SearchState::Searching => {
                if self.iteration >= self.ctx.config.max_iterations {
                    self.stats.hit_iteration_cap = true;
                    return Ok(SearchState::Terminated);
                }
                let detections = self.detect();
                tracing::debug!(
                    iteration = self.iteration,
                    peaks = detections.len(),
                    rescan = self.rescan_slot.is_some(),
                    "Search iteration"
                );
                if detections.is_empty() {
                    // A rescan that finds nothing empties its slot.
                    if let Some(slot) = self.rescan_slot.take() {
                        self.ledger.replace(slot, Vec::new());
                    }
                    return Ok(SearchState::Terminated);
                }
                Ok(SearchState::Subtracting(detections))
            }
            SearchState::Subtracting(detections) => {
                self.remove(&detections, Direction::Subtract);
                match self.rescan_slot.take() {
                    Some(slot) => {
                        self.ledger.replace(slot, detections);
                    }
                    None => {
                        self.ledger.push(detections)?;
                    }
                }
                self.iteration += 1;
                self.stats.iterations = self.iteration;
                Ok(self.next_state())
            }
            SearchState::ScdInjecting { slot } => {
                let detections = self.ledger.slot(slot).map(<[Detection]>::to_vec);
                if let Some(detections) = detections {
                    tracing::debug!(
                        iteration = self.iteration,
                        slot,
                        spikes = detections.len(),
                        "Reinjecting spikes"
                    );
                    self.remove(&detections, Direction::Restore);
                }
                self.rescan_slot = Some(slot);
                self.stats.rescans += 1;
                Ok(SearchState::Searching)
            }
            SearchState::Terminated => Ok(SearchState::Terminated),
        }
    }

    fn next_state(&self) -> SearchState {
        match self.schedule {
            Some(schedule) => match schedule.step(self.iteration, self.ledger.len()) {
                Step::Rescan { slot } => SearchState::ScdInjecting { slot },
                Step::Normal => SearchState::Searching,
            },
            None => SearchState::Searching,
        }
    }

    /// Subtract (or restore) kernels, then refractory suppression.
    fn remove(&mut self, detections: &[Detection], direction: Direction) {
        let config = self.ctx.config;
        apply_kernels(
            &mut self.objective,
            detections,
            self.ctx.kernels,
            self.ctx.splines,
            config.template_scaling,
            direction,
        );
        if config.refractory_fill {
            apply_refractory(
                &mut self.objective,
                detections,
                config.refractory_samples(),
                config.fill_value,
                direction,
            );
        }
    }

    /// Peaks of the current objective with sub-sample shift and amplitude.
    fn detect(&self) -> Vec<Detection> {
        let config = self.ctx.config;
        let compressed = self.ctx.compressed;
        let peaks = find_peaks(
            self.objective.values(),
            &self.active,
            config.threshold,
            compressed.lockout(),
        );

        peaks
            .into_iter()
            .map(|peak| {
                let row = self.objective.row(peak.unit);
                let refined = if config.subsample_shift {
                    fit_vertex(
                        row[peak.index - 1],
                        row[peak.index],
                        row[peak.index + 1],
                        config.max_subsample_shift,
                    )
                } else {
                    QuadraticPeak {
                        shift: 0.0,
                        value: peak.value,
                    }
                };
                Detection {
                    index: peak.index,
                    unit: peak.unit,
                    shift: refined.shift,
                    amplitude: amplitude(
                        &config.amplitude_fit,
                        refined.value,
                        compressed.units[peak.unit].norm,
                        compressed.max_ptp[peak.unit],
                    ),
                }
            })
            .collect()
    }
}

/// Amplitude scale of a spike whose refined objective peak is `peak`.
///
/// For data `a · template` the objective peaks at `(2a − 1) · norm`, so the scale
/// is recovered as `(peak / norm + 1) / 2`.
pub fn amplitude(fit: &AmplitudeFit, peak: f32, norm: f32, max_ptp: f32) -> f32 {
    match *fit {
        AmplitudeFit::Enabled {
            ptp_threshold,
            max_diff,
        } if max_ptp > ptp_threshold && norm > 0.0 => {
            (0.5 * (peak / norm + 1.0)).clamp(1.0 - max_diff, 1.0 + max_diff)
        }
        _ => 1.0,
    }
}
