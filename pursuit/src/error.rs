//! Error types for the deconvolution engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing templates, reading chunks or running deconvolution.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache I/O failed for '{path}': {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed cached artifact '{path}': {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid templates: {0}")]
    InvalidTemplates(String),

    #[error("Geometry has {geometry} channels but templates have {channels}")]
    GeometryMismatch { channels: usize, geometry: usize },

    #[error("Chunk {chunk} out of range (recording has {n_chunks} chunks)")]
    ChunkOutOfRange { chunk: usize, n_chunks: usize },

    #[error("Spike ledger is full ({capacity} iterations)")]
    LedgerFull { capacity: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration")]
    Format(#[from] common::SerdeFormatError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_message() {
        let err = Error::Io {
            path: PathBuf::from("/data/templates.bin"),
            source: io::Error::new(io::ErrorKind::NotFound, "file not found"),
        };
        assert!(err.to_string().contains("/data/templates.bin"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = Error::ShapeMismatch {
            what: "kernel bank",
            expected: vec![3, 3, 121],
            actual: vec![3, 2, 121],
        };
        let msg = err.to_string();
        assert!(msg.contains("kernel bank"));
        assert!(msg.contains("[3, 3, 121]"));
        assert!(msg.contains("[3, 2, 121]"));
    }

    #[test]
    fn test_chunk_out_of_range_message() {
        let err = Error::ChunkOutOfRange {
            chunk: 7,
            n_chunks: 4,
        };
        assert_eq!(
            err.to_string(),
            "Chunk 7 out of range (recording has 4 chunks)"
        );
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as StdError;

        let err = Error::CacheIo {
            path: PathBuf::from("/tmp/cache/kernels_000000.bin"),
            source: io::Error::other("disk full"),
        };
        assert!(err.source().is_some());
    }
}
