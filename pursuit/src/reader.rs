//! Raw signal access.
//!
//! The engine only sees recordings through [`ChunkReader`]: fixed-length chunks
//! with an optional edge buffer on both sides. Samples outside the recording are
//! zero-filled, so the first chunk's buffer starts at a negative offset.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::common::Array2;
use crate::error::{Error, Result};

/// One chunk of raw signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    /// `channels × samples`, including the edge buffer when requested.
    pub data: Array2<f32>,
    /// Absolute sample index of `data` column 0. Negative inside the leading buffer.
    pub sample_offset: i64,
    /// Columns of `data` that belong to the chunk proper.
    pub core: Range<usize>,
}

/// Chunked, read-only access to a multichannel recording.
pub trait ChunkReader: Sync {
    fn n_channels(&self) -> usize;

    fn n_samples(&self) -> usize;

    /// Samples per chunk, excluding the buffer. The last chunk may be shorter.
    fn chunk_len(&self) -> usize;

    /// Edge buffer on each side of a chunk.
    fn buffer(&self) -> usize;

    /// Read `len` samples of `channels` starting at absolute sample `start`.
    ///
    /// Samples outside `0..n_samples` are zero.
    fn read_channels(&self, channels: Range<usize>, start: i64, len: usize) -> Result<Array2<f32>>;

    fn n_chunks(&self) -> usize {
        self.n_samples().div_ceil(self.chunk_len().max(1))
    }

    fn read_samples(&self, start: i64, len: usize) -> Result<Array2<f32>> {
        self.read_channels(0..self.n_channels(), start, len)
    }

    fn read_chunk(&self, chunk_id: usize, with_buffer: bool) -> Result<RawChunk> {
        let n_chunks = self.n_chunks();
        if chunk_id >= n_chunks {
            return Err(Error::ChunkOutOfRange {
                chunk: chunk_id,
                n_chunks,
            });
        }
        let core_start = chunk_id * self.chunk_len();
        let core_len = self.chunk_len().min(self.n_samples() - core_start);
        let buffer = if with_buffer { self.buffer() } else { 0 };

        let sample_offset = core_start as i64 - buffer as i64;
        let data = self.read_samples(sample_offset, core_len + 2 * buffer)?;
        Ok(RawChunk {
            data,
            sample_offset,
            core: buffer..buffer + core_len,
        })
    }
}

/// Copy `src[start..start + dst.len()]` into `dst`, zero-filling out-of-range samples.
fn copy_window(src: &[f32], start: i64, dst: &mut [f32]) {
    let n = src.len() as i64;
    let lo = start.clamp(0, n);
    let hi = (start + dst.len() as i64).clamp(0, n);
    dst.fill(0.0);
    if lo < hi {
        let offset = (lo - start) as usize;
        dst[offset..offset + (hi - lo) as usize].copy_from_slice(&src[lo as usize..hi as usize]);
    }
}

fn check_channels(channels: &Range<usize>, n_channels: usize) -> Result<()> {
    if channels.start > channels.end || channels.end > n_channels {
        return Err(Error::ShapeMismatch {
            what: "channel range",
            expected: vec![n_channels],
            actual: vec![channels.start, channels.end],
        });
    }
    Ok(())
}

// ============================================================================
// In-memory recording
// ============================================================================

/// Recording held in memory as `channels × samples`.
#[derive(Debug, Clone)]
pub struct InMemoryRecording {
    data: Array2<f32>,
    chunk_len: usize,
    buffer: usize,
}

impl InMemoryRecording {
    pub fn new(data: Array2<f32>, chunk_len: usize, buffer: usize) -> Self {
        assert!(chunk_len > 0, "chunk_len must be > 0");
        Self {
            data,
            chunk_len,
            buffer,
        }
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }
}

impl ChunkReader for InMemoryRecording {
    fn n_channels(&self) -> usize {
        self.data.rows()
    }

    fn n_samples(&self) -> usize {
        self.data.cols()
    }

    fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    fn buffer(&self) -> usize {
        self.buffer
    }

    fn read_channels(&self, channels: Range<usize>, start: i64, len: usize) -> Result<Array2<f32>> {
        check_channels(&channels, self.n_channels())?;
        let mut out = Array2::new_default(channels.len(), len);
        for (row, c) in channels.enumerate() {
            copy_window(self.data.row(c), start, out.row_mut(row));
        }
        Ok(out)
    }
}

// ============================================================================
// Binary recording
// ============================================================================

/// Memory-mapped little-endian `f32` recording in time-major ("long") layout:
/// all channels of sample 0, then all channels of sample 1, and so on.
#[derive(Debug)]
pub struct BinaryRecording {
    path: PathBuf,
    mmap: Mmap,
    n_channels: usize,
    n_samples: usize,
    chunk_len: usize,
    buffer: usize,
}

impl BinaryRecording {
    pub fn open(
        path: impl AsRef<Path>,
        n_channels: usize,
        chunk_len: usize,
        buffer: usize,
    ) -> Result<Self> {
        assert!(n_channels > 0, "n_channels must be > 0");
        assert!(chunk_len > 0, "chunk_len must be > 0");

        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        // SAFETY: recordings are treated as immutable input for the lifetime of the reader.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        let frame = n_channels * size_of::<f32>();
        if mmap.len() % frame != 0 {
            return Err(Error::ShapeMismatch {
                what: "recording bytes",
                expected: vec![frame],
                actual: vec![mmap.len()],
            });
        }
        let n_samples = mmap.len() / frame;
        tracing::info!(
            path = %path.display(),
            channels = n_channels,
            samples = n_samples,
            chunk_len,
            "Opened recording"
        );

        Ok(Self {
            path,
            mmap,
            n_channels,
            n_samples,
            chunk_len,
            buffer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` (`channels × samples`) in the layout read by [`BinaryRecording::open`].
    pub fn write(path: impl AsRef<Path>, data: &Array2<f32>) -> Result<()> {
        let path = path.as_ref();
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let interleaved = data.transposed();
        for v in interleaved.as_slice() {
            writer.write_all(&v.to_le_bytes()).map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    #[inline]
    fn sample(&self, t: usize, c: usize) -> f32 {
        let at = (t * self.n_channels + c) * size_of::<f32>();
        let b = &self.mmap[at..at + size_of::<f32>()];
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

impl ChunkReader for BinaryRecording {
    fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn n_samples(&self) -> usize {
        self.n_samples
    }

    fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    fn buffer(&self) -> usize {
        self.buffer
    }

    fn read_channels(&self, channels: Range<usize>, start: i64, len: usize) -> Result<Array2<f32>> {
        check_channels(&channels, self.n_channels)?;
        let mut out = Array2::new_default(channels.len(), len);
        let lo = start.clamp(0, self.n_samples as i64) as usize;
        let hi = (start + len as i64).clamp(0, self.n_samples as i64) as usize;
        for t in lo..hi {
            let col = (t as i64 - start) as usize;
            for (row, c) in channels.clone().enumerate() {
                out[(row, col)] = self.sample(t, c);
            }
        }
        Ok(out)
    }
}
