//! Vector index error types.

use std::path::PathBuf;
use thiserror::Error;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{what} count mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid index configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("index snapshot not found: {path}")]
    NotFound { path: PathBuf },

    #[error("index snapshot is empty: {path}")]
    EmptySnapshot { path: PathBuf },

    #[error("index snapshot is invalid: {reason}")]
    Snapshot { reason: String },

    #[error("index I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
