use std::path::PathBuf;
use thiserror::Error;

use crate::text::TokenizerError;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("checkpoint not found at path: {path}")]
    CheckpointNotFound { path: PathBuf },

    #[error("failed to load model: {reason}")]
    LoadFailed { reason: String },

    #[error("failed to save checkpoint: {reason}")]
    SaveFailed { reason: String },

    #[error("checkpoint kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: String, found: String },

    #[error("{device} device unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("model inference failed: {reason}")]
    InferenceFailed { reason: String },

    #[error("invalid model configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
}

impl From<candle_core::Error> for ModelError {
    fn from(err: candle_core::Error) -> Self {
        ModelError::InferenceFailed {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        ModelError::LoadFailed {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::LoadFailed {
            reason: format!("invalid checkpoint metadata: {err}"),
        }
    }
}
