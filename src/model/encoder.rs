//! Sentence encoder producing L2-normalised text embeddings.

use std::path::Path;

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{Dropout, Embedding, Init, Linear, VarBuilder, VarMap};
use tracing::{debug, info};

use super::checkpoint::{self, CheckpointKind, TrainingState};
use super::config::{EncoderConfig, PoolingStrategy};
use super::error::ModelError;
use super::layers::{
    TransformerEncoder, attention_mask, keep_mask, l2_normalize, pad_batch, sinusoidal_positions,
};
use super::lm::EMBED_INIT_RANGE;
use crate::constants::{L2_NORM_EPS, UNK_ID};
use crate::text::{EncodeOptions, TextTokenizer};

const MASKED_MAX_FILL: f64 = -1e9;

pub struct SentenceEncoder {
    token_embedding: Embedding,
    positions: Tensor,
    encoder: TransformerEncoder,
    projection: Linear,
    dropout: Dropout,
    config: EncoderConfig,
    device: Device,
}

impl std::fmt::Debug for SentenceEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentenceEncoder")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish()
    }
}

impl SentenceEncoder {
    pub fn new(config: EncoderConfig, vb: VarBuilder) -> Result<Self, ModelError> {
        config.validate()?;
        let d = config.stack.d_model;
        let device = vb.device().clone();

        let uniform = Init::Uniform {
            lo: -EMBED_INIT_RANGE,
            up: EMBED_INIT_RANGE,
        };

        let token_weights = vb
            .pp("token_embedding")
            .get_with_hints((config.vocab_size, d), "weight", uniform)?;
        let projection_weight = vb
            .pp("projection")
            .get_with_hints((d, d), "weight", uniform)?;
        let projection_bias = vb
            .pp("projection")
            .get_with_hints(d, "bias", Init::Const(0.0))?;

        Ok(Self {
            token_embedding: Embedding::new(token_weights, d),
            positions: sinusoidal_positions(config.max_seq_length, d, &device)?,
            encoder: TransformerEncoder::new(&config.stack, vb.pp("encoder"))?,
            projection: Linear::new(projection_weight, Some(projection_bias)),
            dropout: Dropout::new(config.stack.dropout),
            config,
            device,
        })
    }

    pub fn init(config: EncoderConfig, device: &Device) -> Result<(Self, VarMap), ModelError> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    pub fn load(dir: &Path, device: &Device) -> Result<(Self, TextTokenizer), ModelError> {
        let loaded =
            checkpoint::open::<EncoderConfig>(dir, CheckpointKind::SentenceEncoder, device)?;
        let model = Self::new(loaded.model_config, loaded.vb)?;
        info!(
            path = %dir.display(),
            embedding_dim = model.embedding_dim(),
            pooling = ?model.config.pooling,
            "Sentence encoder loaded"
        );
        Ok((model, loaded.tokenizer))
    }

    pub fn save(
        &self,
        dir: &Path,
        tokenizer: &TextTokenizer,
        varmap: &VarMap,
        state: Option<&TrainingState>,
    ) -> Result<(), ModelError> {
        checkpoint::save(
            dir,
            CheckpointKind::SentenceEncoder,
            &self.config,
            tokenizer,
            varmap,
            state,
        )
    }

    /// `input_ids`: `[batch, len]`, `padding`: per-position padding flags.
    ///
    /// Returns `[batch, d_model]` unit vectors.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        padding: &[Vec<bool>],
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let (batch, len) = input_ids.dims2()?;
        let scale = (self.config.stack.d_model as f64).sqrt();

        let tokens = (self.token_embedding.forward(input_ids)? * scale)?;
        let positions = self.positions.narrow(0, 0, len)?.unsqueeze(0)?;
        let x = tokens.broadcast_add(&positions)?;

        let mask = attention_mask(batch, len, false, Some(padding), &self.device)?;
        let hidden = self.encoder.forward(&x, mask.as_ref(), train)?;

        let pooled = self.pool(&hidden, padding)?;
        let projected = self.projection.forward(&pooled)?.relu()?;
        let projected = self.dropout.forward(&projected, train)?;
        l2_normalize(&projected, L2_NORM_EPS)
    }

    fn pool(&self, hidden: &Tensor, padding: &[Vec<bool>]) -> candle_core::Result<Tensor> {
        match self.config.pooling {
            PoolingStrategy::Cls => hidden.i((.., 0))?.contiguous(),
            PoolingStrategy::Mean => {
                let keep = keep_mask(padding, &self.device)?;
                let summed = hidden.broadcast_mul(&keep)?.sum(1)?;
                let counts = keep.sum(1)?.maximum(1e-6f32)?;
                summed.broadcast_div(&counts)
            }
            PoolingStrategy::Max => {
                let keep = keep_mask(padding, &self.device)?;
                let fill = ((keep - 1.0)? * -MASKED_MAX_FILL)?;
                hidden.broadcast_add(&fill)?.max(1)
            }
        }
    }

    /// Encodes already-tokenised sequences (truncated to `max_seq_length`).
    pub fn encode_ids(&self, sequences: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, ModelError> {
        if sequences.is_empty() {
            return Ok(Vec::new());
        }
        let clipped: Vec<Vec<u32>> = sequences
            .iter()
            .map(|seq| {
                if seq.is_empty() {
                    vec![UNK_ID]
                } else {
                    seq.iter().copied().take(self.config.max_seq_length).collect()
                }
            })
            .collect();
        let (ids, padding) = pad_batch(&clipped, &self.device)?;
        let embeddings = self.forward(&ids, &padding, false)?;
        Ok(embeddings.to_vec2::<f32>()?)
    }

    /// Tokenises and encodes texts in batches of `batch_size`.
    pub fn encode_texts(
        &self,
        tokenizer: &TextTokenizer,
        texts: &[&str],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, ModelError> {
        let batch_size = batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            let sequences: Vec<Vec<u32>> = chunk
                .iter()
                .map(|text| tokenizer.encode(text, EncodeOptions::plain()))
                .collect();
            out.extend(self.encode_ids(&sequences)?);
        }
        debug!(count = out.len(), "Encoded texts");
        Ok(out)
    }

    pub fn embedding_dim(&self) -> usize {
        self.config.embedding_dim()
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Cosine similarity between two texts.
    pub fn similarity(
        &self,
        tokenizer: &TextTokenizer,
        a: &str,
        b: &str,
    ) -> Result<f32, ModelError> {
        let vectors = self.encode_texts(tokenizer, &[a, b], 2)?;
        Ok(vectors[0].iter().zip(&vectors[1]).map(|(x, y)| x * y).sum())
    }
}
