//! Lightweight autoregressive language model for item titles and descriptions.

use std::path::Path;

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{Embedding, Init, Linear, VarBuilder, VarMap};
use tracing::info;

use super::checkpoint::{self, CheckpointKind, TrainingState};
use super::config::LmConfig;
use super::error::ModelError;
use super::layers::{TransformerEncoder, attention_mask};
use crate::generation::NextTokenLogits;
use crate::text::TextTokenizer;

pub(super) const EMBED_INIT_RANGE: f64 = 0.1;

/// Token embedding + learned positions + causal encoder stack + vocabulary head.
pub struct ItemDescLm {
    token_embedding: Embedding,
    position_embedding: Embedding,
    encoder: TransformerEncoder,
    output: Linear,
    config: LmConfig,
    device: Device,
}

impl std::fmt::Debug for ItemDescLm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDescLm")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish()
    }
}

impl ItemDescLm {
    pub fn new(config: LmConfig, vb: VarBuilder) -> Result<Self, ModelError> {
        config.validate()?;
        let d = config.stack.d_model;
        let uniform = Init::Uniform {
            lo: -EMBED_INIT_RANGE,
            up: EMBED_INIT_RANGE,
        };

        let token_weights = vb
            .pp("token_embedding")
            .get_with_hints((config.vocab_size, d), "weight", uniform)?;
        let position_weights = vb.pp("position_embedding").get_with_hints(
            (config.max_seq_length, d),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        let encoder = TransformerEncoder::new(&config.stack, vb.pp("encoder"))?;
        let head_weight = vb
            .pp("output")
            .get_with_hints((config.vocab_size, d), "weight", uniform)?;
        let head_bias = vb
            .pp("output")
            .get_with_hints(config.vocab_size, "bias", Init::Const(0.0))?;

        Ok(Self {
            token_embedding: Embedding::new(token_weights, d),
            position_embedding: Embedding::new(position_weights, d),
            encoder,
            output: Linear::new(head_weight, Some(head_bias)),
            config,
            device: vb.device().clone(),
        })
    }

    /// Freshly initialised weights, registered in the returned [`VarMap`].
    pub fn init(config: LmConfig, device: &Device) -> Result<(Self, VarMap), ModelError> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    /// Loads a model and its tokenizer from a checkpoint directory.
    pub fn load(dir: &Path, device: &Device) -> Result<(Self, TextTokenizer), ModelError> {
        let loaded = checkpoint::open::<LmConfig>(dir, CheckpointKind::ItemDescLm, device)?;
        if loaded.model_config.vocab_size != loaded.tokenizer.len() {
            return Err(ModelError::LoadFailed {
                reason: format!(
                    "model vocab_size {} does not match tokenizer size {}",
                    loaded.model_config.vocab_size,
                    loaded.tokenizer.len()
                ),
            });
        }
        let model = Self::new(loaded.model_config, loaded.vb)?;
        info!(
            path = %dir.display(),
            vocab_size = model.config.vocab_size,
            d_model = model.config.stack.d_model,
            num_layers = model.config.stack.num_layers,
            "Language model loaded"
        );
        Ok((model, loaded.tokenizer))
    }

    /// Writes weights, config and tokenizer to `dir`.
    pub fn save(
        &self,
        dir: &Path,
        tokenizer: &TextTokenizer,
        varmap: &VarMap,
        state: Option<&TrainingState>,
    ) -> Result<(), ModelError> {
        checkpoint::save(
            dir,
            CheckpointKind::ItemDescLm,
            &self.config,
            tokenizer,
            varmap,
            state,
        )
    }

    /// `input_ids`: `[batch, len]` u32. Returns `[batch, len, vocab]` logits.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        key_padding: Option<&[Vec<bool>]>,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let (batch, len) = input_ids.dims2()?;
        let scale = (self.config.stack.d_model as f64).sqrt();

        let tokens = (self.token_embedding.forward(input_ids)? * scale)?;
        let positions = Tensor::arange(0u32, len as u32, &self.device)?;
        let positions = self.position_embedding.forward(&positions)?.unsqueeze(0)?;
        let x = tokens.broadcast_add(&positions)?;

        let mask = attention_mask(batch, len, true, key_padding, &self.device)?;
        let hidden = self.encoder.forward(&x, mask.as_ref(), train)?;
        self.output.forward(&hidden)
    }

    /// The `[vocab, d_model]` token embedding matrix.
    pub fn token_embeddings(&self) -> &Tensor {
        self.token_embedding.embeddings()
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl NextTokenLogits for ItemDescLm {
    fn max_seq_length(&self) -> usize {
        self.config.max_seq_length
    }

    fn next_token_logits(&self, window: &[u32]) -> Result<Vec<f32>, ModelError> {
        if window.is_empty() || window.len() > self.config.max_seq_length {
            return Err(ModelError::InferenceFailed {
                reason: format!(
                    "window length {} outside 1..={}",
                    window.len(),
                    self.config.max_seq_length
                ),
            });
        }
        let ids = Tensor::new(window, &self.device)?.unsqueeze(0)?;
        let logits = self.forward(&ids, None, false)?;
        let last = logits.i((0, window.len() - 1))?;
        Ok(last.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }
}
