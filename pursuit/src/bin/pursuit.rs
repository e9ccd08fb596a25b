//! Deconvolve a recording and write its spike train.
//!
//! # Usage
//!
//! ```bash
//! pursuit <config.yaml> <templates.bin> <geometry.txt> <recording.bin> <out_dir> [batch_mode]
//! ```
//!
//! The output directory receives `spike_train.csv` (`time,unit,shift,amplitude`,
//! absolute sample times) and, when drift tracking is enabled, `ptp_drift.csv`
//! (`unit,channel,average,count`). Model artifacts are cached in `<out_dir>/cache`.
//! The effective configuration is written back as `<out_dir>/config.yaml`.
//! `batch_mode` selects how per-channel signal energy is scanned before deconvolution
//! (`single_channel_one_batch`, `single_channel` or `multi_channel`, the default).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use common::SharedFn;
use pursuit::{
    ArtifactCache, BatchMode, BinaryRecording, ChannelGeometry, ChunkReader, Config, Deconvolver,
    PtpDrift, TemplateSet, merge_outputs,
};

const USAGE: &str =
    "usage: pursuit <config.yaml> <templates.bin> <geometry.txt> <recording.bin> <out_dir> [batch_mode]";

fn main() -> anyhow::Result<()> {
    common::log_setup::setup_logging("info", Path::new("logs"), "pursuit");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !(5..=6).contains(&args.len()) {
        bail!(USAGE);
    }
    let [config_path, templates_path, geometry_path, recording_path, out_dir] =
        [0, 1, 2, 3, 4].map(|i| PathBuf::from(&args[i]));
    let batch_mode: BatchMode = match args.get(5) {
        Some(mode) => mode.parse()?,
        None => BatchMode::default(),
    };

    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let templates = TemplateSet::from_file(&templates_path).context("loading templates")?;
    let geometry = ChannelGeometry::from_file(&geometry_path).context("loading geometry")?;
    let reader = BinaryRecording::open(
        &recording_path,
        geometry.n_channels(),
        config.chunk_len,
        config.chunk_buffer,
    )
    .context("opening recording")?;

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    config
        .to_file(out_dir.join("config.yaml"))
        .context("writing effective config")?;

    let energy = pursuit::batch::channel_energy(batch_mode, &reader, config.chunk_len)
        .context("scanning recording")?;
    let n_samples = reader.n_samples().max(1) as f64;
    let rms: Vec<f64> = energy.iter().map(|e| (e / n_samples).sqrt()).collect();
    tracing::info!(
        mode = %batch_mode,
        min_rms = rms.iter().copied().fold(f64::INFINITY, f64::min),
        max_rms = rms.iter().copied().fold(0.0, f64::max),
        "Channel RMS"
    );

    let progress: pursuit::ProgressFn = SharedFn::new(Arc::new(|done: usize, total: usize| {
        tracing::info!(done, total, "Progress");
    }));
    let cache = ArtifactCache::new(out_dir.join("cache")).context("opening cache")?;
    let mut engine = Deconvolver::new(config, templates, geometry)?
        .with_cache(cache)
        .with_progress(progress);

    let start = Instant::now();
    let outputs = engine.run(&reader).context("deconvolving recording")?;
    let train = merge_outputs(&outputs);

    let spikes_path = out_dir.join("spike_train.csv");
    train.write_csv(&spikes_path)?;

    let mut drift: Option<PtpDrift> = None;
    for chunk_drift in outputs.iter().filter_map(|o| o.drift.as_ref()) {
        match drift.as_mut() {
            Some(total) => total.merge(chunk_drift),
            None => drift = Some(chunk_drift.clone()),
        }
    }
    if let Some(drift) = &drift {
        write_drift(&out_dir.join("ptp_drift.csv"), drift)?;
    }

    tracing::info!(
        spikes = train.len(),
        chunks = outputs.len(),
        elapsed_s = start.elapsed().as_secs_f32(),
        path = %spikes_path.display(),
        "Wrote spike train"
    );
    Ok(())
}

fn write_drift(path: &Path, drift: &PtpDrift) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    writeln!(writer, "unit,channel,average,count")?;
    let (n_units, n_channels) = drift.average.shape();
    for u in 0..n_units {
        for c in 0..n_channels {
            let count = drift.counts[(u, c)];
            if count > 0 {
                writeln!(writer, "{},{},{},{}", u, c, drift.average[(u, c)], count)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
