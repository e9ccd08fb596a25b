//! Batch processing strategies over a whole recording.
//!
//! Each [`BatchMode`] maps to one strategy function. Batches are read through the
//! [`ChunkReader`] and handed to the callback in parallel; results come back in
//! channel-major, then time order.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use rayon::prelude::*;

use crate::common::Array2;
use crate::error::{Error, Result};
use crate::reader::ChunkReader;

/// How a recording is split into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Every channel in a single batch spanning the whole recording.
    SingleChannelOneBatch,
    /// Every channel separately, split into time batches.
    SingleChannel,
    /// All channels together, split into time batches.
    #[default]
    MultiChannel,
}

impl BatchMode {
    pub const ALL: [BatchMode; 3] = [
        BatchMode::SingleChannelOneBatch,
        BatchMode::SingleChannel,
        BatchMode::MultiChannel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BatchMode::SingleChannelOneBatch => "single_channel_one_batch",
            BatchMode::SingleChannel => "single_channel",
            BatchMode::MultiChannel => "multi_channel",
        }
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BatchMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown batch mode '{}', expected one of: single_channel_one_batch, single_channel, multi_channel",
                    s
                ))
            })
    }
}

/// A rectangular piece of the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub channels: Range<usize>,
    /// Absolute sample of `data` column 0.
    pub start: usize,
    /// `channels.len() × samples`.
    pub data: Array2<f32>,
}

/// Apply `f` to every batch of `reader` using the strategy selected by `mode`.
///
/// `batch_len` bounds the samples per batch for the time-split strategies.
pub fn process<R, T, F>(mode: BatchMode, reader: &R, batch_len: usize, f: F) -> Result<Vec<T>>
where
    R: ChunkReader + ?Sized,
    T: Send,
    F: Fn(&Batch) -> T + Sync,
{
    tracing::debug!(mode = %mode, batch_len, "Processing recording in batches");
    match mode {
        BatchMode::SingleChannelOneBatch => single_channel_one_batch(reader, f),
        BatchMode::SingleChannel => single_channel(reader, batch_len, f),
        BatchMode::MultiChannel => multi_channel(reader, batch_len, f),
    }
}

pub fn single_channel_one_batch<R, T, F>(reader: &R, f: F) -> Result<Vec<T>>
where
    R: ChunkReader + ?Sized,
    T: Send,
    F: Fn(&Batch) -> T + Sync,
{
    let n_samples = reader.n_samples();
    let jobs: Vec<(Range<usize>, Range<usize>)> = (0..reader.n_channels())
        .map(|c| (c..c + 1, 0..n_samples))
        .collect();
    run_jobs(reader, &jobs, f)
}

pub fn single_channel<R, T, F>(reader: &R, batch_len: usize, f: F) -> Result<Vec<T>>
where
    R: ChunkReader + ?Sized,
    T: Send,
    F: Fn(&Batch) -> T + Sync,
{
    let windows = time_windows(reader.n_samples(), batch_len);
    let jobs: Vec<(Range<usize>, Range<usize>)> = (0..reader.n_channels())
        .flat_map(|c| windows.iter().map(move |w| (c..c + 1, w.clone())))
        .collect();
    run_jobs(reader, &jobs, f)
}

pub fn multi_channel<R, T, F>(reader: &R, batch_len: usize, f: F) -> Result<Vec<T>>
where
    R: ChunkReader + ?Sized,
    T: Send,
    F: Fn(&Batch) -> T + Sync,
{
    let n_channels = reader.n_channels();
    let jobs: Vec<(Range<usize>, Range<usize>)> = time_windows(reader.n_samples(), batch_len)
        .into_iter()
        .map(|w| (0..n_channels, w))
        .collect();
    run_jobs(reader, &jobs, f)
}

fn time_windows(n_samples: usize, batch_len: usize) -> Vec<Range<usize>> {
    assert!(batch_len > 0, "batch_len must be > 0");
    (0..n_samples)
        .step_by(batch_len)
        .map(|start| start..(start + batch_len).min(n_samples))
        .collect()
}

fn run_jobs<R, T, F>(reader: &R, jobs: &[(Range<usize>, Range<usize>)], f: F) -> Result<Vec<T>>
where
    R: ChunkReader + ?Sized,
    T: Send,
    F: Fn(&Batch) -> T + Sync,
{
    jobs.par_iter()
        .map(|(channels, window)| {
            let data = reader.read_channels(channels.clone(), window.start as i64, window.len())?;
            Ok(f(&Batch {
                channels: channels.clone(),
                start: window.start,
                data,
            }))
        })
        .collect()
}

/// Sum of squares per channel, accumulated batch by batch.
pub fn channel_energy<R>(mode: BatchMode, reader: &R, batch_len: usize) -> Result<Vec<f64>>
where
    R: ChunkReader + ?Sized,
{
    let partial = process(mode, reader, batch_len, |batch| {
        let energies: Vec<f64> = batch
            .data
            .iter_rows()
            .map(|row| row.iter().map(|&v| (v as f64) * (v as f64)).sum())
            .collect();
        (batch.channels.clone(), energies)
    })?;

    let mut energy = vec![0.0f64; reader.n_channels()];
    for (channels, energies) in partial {
        for (c, e) in channels.zip(energies) {
            energy[c] += e;
        }
    }
    Ok(energy)
}
