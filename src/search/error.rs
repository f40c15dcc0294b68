use thiserror::Error;

use crate::index::IndexError;
use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ModelError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("no index has been built or loaded")]
    IndexNotReady,

    #[error("embedder dimension {embedder} does not match index dimension {index}")]
    DimensionMismatch { embedder: usize, index: usize },
}
