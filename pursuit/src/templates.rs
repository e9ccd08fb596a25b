//! Template dictionary.
//!
//! Templates are stored unit-major (`units × channels × time`). The on-disk
//! format is channel-major (`channels × time × units`) as produced by the
//! clustering stage:
//!
//! - 12-byte header: `u32` channels, `u32` time samples, `u32` units (little-endian)
//! - `channels * time * units` little-endian `f32` values, units varying fastest

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;

use crate::common::{Array2, ptp};
use crate::error::{Error, Result};

const HEADER_LEN: usize = 3 * size_of::<u32>();

/// Immutable set of unit templates sharing channel count and length.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSet {
    n_units: usize,
    n_channels: usize,
    n_time: usize,
    data: Vec<f32>,
}

impl TemplateSet {
    /// Build from unit-major data (`units × channels × time`).
    pub fn new(n_units: usize, n_channels: usize, n_time: usize, data: Vec<f32>) -> Result<Self> {
        if n_channels == 0 || n_time < 2 {
            return Err(Error::InvalidTemplates(format!(
                "templates need at least one channel and two samples, got {} channels x {} samples",
                n_channels, n_time
            )));
        }
        let expected = n_units * n_channels * n_time;
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                what: "templates",
                expected: vec![n_units, n_channels, n_time],
                actual: vec![data.len()],
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidTemplates(
                "templates contain non-finite values".to_string(),
            ));
        }
        Ok(Self {
            n_units,
            n_channels,
            n_time,
            data,
        })
    }

    /// Build from per-unit `channels × time` arrays.
    pub fn from_units(units: &[Array2<f32>]) -> Result<Self> {
        let Some(first) = units.first() else {
            return Err(Error::InvalidTemplates("no templates given".to_string()));
        };
        let (n_channels, n_time) = first.shape();
        let mut data = Vec::with_capacity(units.len() * n_channels * n_time);
        for unit in units {
            if unit.shape() != (n_channels, n_time) {
                return Err(Error::ShapeMismatch {
                    what: "template",
                    expected: vec![n_channels, n_time],
                    actual: vec![unit.rows(), unit.cols()],
                });
            }
            data.extend_from_slice(unit.as_slice());
        }
        Self::new(units.len(), n_channels, n_time, data)
    }

    /// Build from channel-major data (`channels × time × units`).
    pub fn from_channel_major(
        n_channels: usize,
        n_time: usize,
        n_units: usize,
        data: &[f32],
    ) -> Result<Self> {
        if data.len() != n_channels * n_time * n_units {
            return Err(Error::ShapeMismatch {
                what: "templates",
                expected: vec![n_channels, n_time, n_units],
                actual: vec![data.len()],
            });
        }
        let mut out = vec![0.0f32; data.len()];
        out.par_chunks_mut((n_channels * n_time).max(1))
            .enumerate()
            .for_each(|(u, unit)| {
                for c in 0..n_channels {
                    for t in 0..n_time {
                        unit[c * n_time + t] = data[(c * n_time + t) * n_units + u];
                    }
                }
            });
        Self::new(n_units, n_channels, n_time, out)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidTemplates(format!(
                "'{}' is too short for a template header",
                path.display()
            )));
        }
        let dim = |i: usize| {
            let b = &bytes[i * 4..i * 4 + 4];
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
        };
        let (n_channels, n_time, n_units) = (dim(0), dim(1), dim(2));
        let values: Vec<f32> = bytes[HEADER_LEN..]
            .chunks_exact(size_of::<f32>())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let set = Self::from_channel_major(n_channels, n_time, n_units, &values)?;
        tracing::info!(
            path = %path.display(),
            units = n_units,
            channels = n_channels,
            samples = n_time,
            "Loaded templates"
        );
        Ok(set)
    }

    /// Write in the channel-major file format read by [`TemplateSet::from_file`].
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        for dim in [self.n_channels, self.n_time, self.n_units] {
            writer
                .write_all(&(dim as u32).to_le_bytes())
                .map_err(io_err)?;
        }
        for c in 0..self.n_channels {
            for t in 0..self.n_time {
                for u in 0..self.n_units {
                    let v = self.unit_channel(u, c)[t];
                    writer.write_all(&v.to_le_bytes()).map_err(io_err)?;
                }
            }
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    pub fn n_units(&self) -> usize {
        self.n_units
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_time(&self) -> usize {
        self.n_time
    }

    /// Unit waveform as a flat `channels × time` slice.
    pub fn unit(&self, unit: usize) -> &[f32] {
        let size = self.n_channels * self.n_time;
        &self.data[unit * size..(unit + 1) * size]
    }

    pub fn unit_channel(&self, unit: usize, channel: usize) -> &[f32] {
        let start = channel * self.n_time;
        &self.unit(unit)[start..start + self.n_time]
    }

    pub fn unit_array(&self, unit: usize) -> Array2<f32> {
        Array2::new(self.n_channels, self.n_time, self.unit(unit).to_vec())
    }

    /// Peak-to-peak amplitude per unit and channel (`units × channels`).
    pub fn ptp(&self) -> Array2<f32> {
        let mut out = Array2::new_default(self.n_units, self.n_channels);
        out.par_rows_mut().for_each(|(u, row)| {
            for (c, value) in row.iter_mut().enumerate() {
                *value = ptp(self.unit_channel(u, c));
            }
        });
        out
    }

    /// Stable content hash, used as the template-set version for cached artifacts.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = common::FnvHasher::new();
        hasher.write_u64(self.n_units as u64);
        hasher.write_u64(self.n_channels as u64);
        hasher.write_u64(self.n_time as u64);
        hasher.write_f32s(&self.data);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> TemplateSet {
        let data: Vec<f32> = (0..2 * 3 * 4).map(|i| i as f32 * 0.5 - 3.0).collect();
        TemplateSet::new(2, 3, 4, data).unwrap()
    }

    #[test]
    fn test_shape_is_validated() {
        let result = TemplateSet::new(2, 3, 4, vec![0.0; 10]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        let result = TemplateSet::new(1, 1, 1, vec![0.0]);
        assert!(matches!(result, Err(Error::InvalidTemplates(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        let result = TemplateSet::new(1, 1, 2, vec![0.0, f32::NAN]);
        assert!(matches!(result, Err(Error::InvalidTemplates(_))));
    }

    #[test]
    fn test_channel_major_conversion() {
        // 2 channels, 3 samples, 2 units; value encodes (c, t, u).
        let mut data = Vec::new();
        for c in 0..2 {
            for t in 0..3 {
                for u in 0..2 {
                    data.push((c * 100 + t * 10 + u) as f32);
                }
            }
        }
        let set = TemplateSet::from_channel_major(2, 3, 2, &data).unwrap();
        assert_eq!(set.unit_channel(1, 0), &[1.0, 11.0, 21.0]);
        assert_eq!(set.unit_channel(0, 1), &[100.0, 110.0, 120.0]);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.bin");
        let set = sample_set();
        set.write_file(&path).unwrap();

        let loaded = TemplateSet::from_file(&path).unwrap();
        assert_eq!(loaded, set);
        assert_eq!(loaded.content_hash(), set.content_hash());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.bin");
        std::fs::write(&path, [1u8, 0, 0]).unwrap();
        assert!(TemplateSet::from_file(&path).is_err());
    }

    #[test]
    fn test_ptp_and_hash() {
        let set = sample_set();
        let ptp = set.ptp();
        assert_eq!(ptp.shape(), (2, 3));
        assert!((ptp[(0, 0)] - 1.5).abs() < 1e-6);

        let mut data = set.unit(0).to_vec();
        data.extend_from_slice(set.unit(1));
        data[5] += 1.0;
        let changed = TemplateSet::new(2, 3, 4, data).unwrap();
        assert_ne!(changed.content_hash(), set.content_hash());
    }
}
