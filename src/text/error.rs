//! Tokenizer error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("tokenizer file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read tokenizer: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tokenizer file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("tokenizer is corrupt: {reason}")]
    Corrupt { reason: String },
}
