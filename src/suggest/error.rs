use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("word '{word}' is not in the vocabulary")]
    WordNotInVocab { word: String },

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl From<candle_core::Error> for SuggestError {
    fn from(err: candle_core::Error) -> Self {
        SuggestError::Model(err.into())
    }
}
