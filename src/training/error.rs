use std::path::PathBuf;
use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("dataset not found at path: {path}")]
    DatasetNotFound { path: PathBuf },

    #[error("dataset {what} is empty")]
    EmptyDataset { what: &'static str },

    #[error("invalid training configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

pub type TrainingResult<T> = Result<T, TrainingError>;
