//! Persisted model artifacts.
//!
//! Compressed factors, the kernel bank and the spline bank are written per chunk
//! index so a restarted run can skip recomputation.
//!
//! File naming: `{artifact}_{chunk:06}.bin` (e.g. `kernels_000003.bin`).
//!
//! Layout (little-endian):
//! - 8-byte magic `PRSTCACH`
//! - `u32` format version
//! - `u64` model hash (templates plus the parameters that shape the model)
//! - `u32` section count
//! - per section: `u32` ndim, `ndim × u64` dims, `product(dims) × f32` payload
//!
//! Anything that does not match (magic, version, hash, section count, dims,
//! truncation, trailing bytes) is reported as malformed and recomputed by the caller.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::common::Array2;
use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"PRSTCACH";
pub const FORMAT_VERSION: u32 = 1;

/// Expected section shape. `None` accepts any extent along that axis.
pub type Shape = Vec<Option<usize>>;

/// Shape with every extent fixed.
pub fn exact(dims: &[usize]) -> Shape {
    dims.iter().copied().map(Some).collect()
}

/// Cached artifact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Factors,
    Kernels,
    Splines,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Factors,
        ArtifactKind::Kernels,
        ArtifactKind::Splines,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Factors => "factors",
            ArtifactKind::Kernels => "kernels",
            ArtifactKind::Splines => "splines",
        }
    }
}

/// One n-dimensional f32 array of an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

impl Section {
    pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Self {
        assert_eq!(
            dims.iter().product::<usize>(),
            data.len(),
            "Section data length must match its dims"
        );
        Self { dims, data }
    }

    pub fn from_array2(array: &Array2<f32>) -> Self {
        Self::new(vec![array.rows(), array.cols()], array.as_slice().to_vec())
    }

    pub fn from_values(values: impl IntoIterator<Item = f32>) -> Self {
        let data: Vec<f32> = values.into_iter().collect();
        Self::new(vec![data.len()], data)
    }

    /// View a 2-D section as an array. `None` for other ranks.
    pub fn into_array2(self) -> Option<Array2<f32>> {
        match self.dims[..] {
            [rows, cols] => Some(Array2::new(rows, cols, self.data)),
            _ => None,
        }
    }
}

/// Directory of cached artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Open (creating if needed) a cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| Error::CacheIo {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: ArtifactKind, chunk: usize) -> PathBuf {
        self.dir.join(format!("{}_{:06}.bin", kind.name(), chunk))
    }

    /// Write an artifact, replacing any existing file.
    pub fn store(
        &self,
        kind: ArtifactKind,
        chunk: usize,
        hash: u64,
        sections: &[Section],
    ) -> Result<()> {
        let path = self.path(kind, chunk);
        let io_err = |source| Error::CacheIo {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC).map_err(io_err)?;
        writer
            .write_all(&FORMAT_VERSION.to_le_bytes())
            .map_err(io_err)?;
        writer.write_all(&hash.to_le_bytes()).map_err(io_err)?;
        writer
            .write_all(&(sections.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        for section in sections {
            writer
                .write_all(&(section.dims.len() as u32).to_le_bytes())
                .map_err(io_err)?;
            for &dim in &section.dims {
                writer
                    .write_all(&(dim as u64).to_le_bytes())
                    .map_err(io_err)?;
            }
            if cfg!(target_endian = "little") {
                writer
                    .write_all(bytemuck::cast_slice(&section.data))
                    .map_err(io_err)?;
            } else {
                for v in &section.data {
                    writer.write_all(&v.to_le_bytes()).map_err(io_err)?;
                }
            }
        }
        writer.flush().map_err(io_err)?;

        tracing::debug!(
            path = %path.display(),
            artifact = kind.name(),
            chunk,
            sections = sections.len(),
            "Stored cached artifact"
        );
        Ok(())
    }

    /// Read an artifact. `Ok(None)` when the file does not exist.
    ///
    /// `expected` gives the shape of every section; any mismatch is
    /// [`Error::MalformedArtifact`].
    pub fn load(
        &self,
        kind: ArtifactKind,
        chunk: usize,
        hash: u64,
        expected: &[Shape],
    ) -> Result<Option<Vec<Section>>> {
        let path = self.path(kind, chunk);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::CacheIo { path, source }),
        };
        // SAFETY: the cache directory is owned by this process for the run; files are
        // only replaced through `store`, never modified while mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| Error::CacheIo {
            path: path.clone(),
            source,
        })?;

        parse(&mmap, hash, expected)
            .map(Some)
            .map_err(|reason| Error::MalformedArtifact { path, reason })
    }

    /// Delete every artifact of `chunk`.
    pub fn remove(&self, chunk: usize) -> Result<()> {
        for kind in ArtifactKind::ALL {
            let path = self.path(kind, chunk);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(Error::CacheIo { path, source }),
            }
        }
        Ok(())
    }
}

/// Little-endian cursor over an artifact file.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| format!("truncated at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> std::result::Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> std::result::Result<u64, String> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

fn parse(
    bytes: &[u8],
    hash: u64,
    expected: &[Shape],
) -> std::result::Result<Vec<Section>, String> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(MAGIC.len())? != MAGIC {
        return Err("bad magic".to_string());
    }
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(format!(
            "format version {} (expected {})",
            version, FORMAT_VERSION
        ));
    }
    let stored_hash = reader.u64()?;
    if stored_hash != hash {
        return Err(format!(
            "model hash {:016x} (expected {:016x})",
            stored_hash, hash
        ));
    }
    let count = reader.u32()? as usize;
    if count != expected.len() {
        return Err(format!(
            "{} sections (expected {})",
            count,
            expected.len()
        ));
    }

    let mut sections = Vec::with_capacity(count);
    for (index, shape) in expected.iter().enumerate() {
        let ndim = reader.u32()? as usize;
        if ndim != shape.len() {
            return Err(format!(
                "section {} has {} dims (expected {})",
                index,
                ndim,
                shape.len()
            ));
        }
        let mut dims = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            dims.push(reader.u64()? as usize);
        }
        let matches = dims
            .iter()
            .zip(shape)
            .all(|(&dim, want)| want.is_none_or(|w| w == dim));
        if !matches {
            return Err(format!(
                "section {} shape {:?} (expected {:?})",
                index, dims, shape
            ));
        }
        let len = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .and_then(|n| n.checked_mul(size_of::<f32>()))
            .ok_or_else(|| format!("section {} shape {:?} overflows", index, dims))?;
        let payload = reader.take(len)?;
        let data = payload
            .chunks_exact(size_of::<f32>())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        sections.push(Section { dims, data });
    }

    if reader.pos != bytes.len() {
        return Err(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        ));
    }
    Ok(sections)
}
