//! Checkpoint directories.
//!
//! ```text
//! <dir>/config.json          kind, vocab_size, model_config
//! <dir>/tokenizer.json       vocabulary
//! <dir>/model.safetensors    weights
//! <dir>/training_state.json  optional epoch/loss/timestamp
//! ```

use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ModelError;
use crate::text::TextTokenizer;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TRAINING_STATE_FILE: &str = "training_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    ItemDescLm,
    SentenceEncoder,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointKind::ItemDescLm => write!(f, "item_desc_lm"),
            CheckpointKind::SentenceEncoder => write!(f, "sentence_encoder"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CheckpointConfig<C> {
    kind: CheckpointKind,
    vocab_size: usize,
    model_config: C,
}

/// Progress recorded alongside a training checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub loss: f32,
    pub saved_at: DateTime<Utc>,
}

impl TrainingState {
    pub fn now(epoch: usize, loss: f32) -> Self {
        Self {
            epoch,
            loss,
            saved_at: Utc::now(),
        }
    }
}

/// Writes a complete checkpoint directory (created if missing).
pub fn save<C: Serialize>(
    dir: &Path,
    kind: CheckpointKind,
    model_config: &C,
    tokenizer: &TextTokenizer,
    varmap: &VarMap,
    state: Option<&TrainingState>,
) -> Result<(), ModelError> {
    fs::create_dir_all(dir).map_err(|e| ModelError::SaveFailed {
        reason: format!("cannot create {}: {e}", dir.display()),
    })?;

    let config = CheckpointConfig {
        kind,
        vocab_size: tokenizer.len(),
        model_config,
    };
    let json = serde_json::to_vec_pretty(&config).map_err(|e| ModelError::SaveFailed {
        reason: e.to_string(),
    })?;
    fs::write(dir.join(CONFIG_FILE), json).map_err(|e| ModelError::SaveFailed {
        reason: e.to_string(),
    })?;

    tokenizer.save(dir.join(TOKENIZER_FILE))?;

    varmap
        .save(dir.join(WEIGHTS_FILE))
        .map_err(|e| ModelError::SaveFailed {
            reason: e.to_string(),
        })?;

    if let Some(state) = state {
        let json = serde_json::to_vec_pretty(state).map_err(|e| ModelError::SaveFailed {
            reason: e.to_string(),
        })?;
        fs::write(dir.join(TRAINING_STATE_FILE), json).map_err(|e| ModelError::SaveFailed {
            reason: e.to_string(),
        })?;
    }

    info!(path = %dir.display(), kind = %kind, "Checkpoint saved");
    Ok(())
}

/// Everything needed to rebuild a model from a checkpoint directory.
pub struct LoadedCheckpoint<'a, C> {
    pub model_config: C,
    pub tokenizer: TextTokenizer,
    pub vb: VarBuilder<'a>,
}

/// Opens a checkpoint directory, checking its kind and vocabulary size.
pub fn open<C: DeserializeOwned>(
    dir: &Path,
    expected: CheckpointKind,
    device: &Device,
) -> Result<LoadedCheckpoint<'static, C>, ModelError> {
    if !dir.is_dir() {
        return Err(ModelError::CheckpointNotFound {
            path: dir.to_path_buf(),
        });
    }

    let weights = dir.join(WEIGHTS_FILE);
    for required in [dir.join(CONFIG_FILE), dir.join(TOKENIZER_FILE), weights.clone()] {
        if !required.is_file() {
            return Err(ModelError::CheckpointNotFound { path: required });
        }
    }

    let config: CheckpointConfig<C> = serde_json::from_slice(&fs::read(dir.join(CONFIG_FILE))?)?;
    if config.kind != expected {
        return Err(ModelError::KindMismatch {
            expected: expected.to_string(),
            found: config.kind.to_string(),
        });
    }

    let tokenizer = TextTokenizer::load(dir.join(TOKENIZER_FILE))?;
    if tokenizer.len() != config.vocab_size {
        return Err(ModelError::LoadFailed {
            reason: format!(
                "tokenizer has {} tokens but checkpoint expects {}",
                tokenizer.len(),
                config.vocab_size
            ),
        });
    }

    // SAFETY: checkpoint files are written once and not modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };

    Ok(LoadedCheckpoint {
        model_config: config.model_config,
        tokenizer,
        vb,
    })
}

/// Reads `training_state.json` if present.
pub fn read_training_state(dir: &Path) -> Result<Option<TrainingState>, ModelError> {
    let path = dir.join(TRAINING_STATE_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
}
