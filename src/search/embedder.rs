//! Text embedders used by the search engine.

use std::path::Path;

use candle_core::Device;
use tracing::debug;

use crate::constants::DEFAULT_ENCODE_BATCH_SIZE;
use crate::hashing::hash_to_u64;
use crate::model::{ModelError, SentenceEncoder};
use crate::text::TextTokenizer;

/// Turns texts into fixed-size embeddings.
pub trait TextEmbedder: Send + Sync {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError>;

    fn embedding_dim(&self) -> usize;

    /// `true` for deterministic test embedders.
    fn is_stub(&self) -> bool {
        false
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| ModelError::InferenceFailed {
                reason: "embedder returned no vector".to_string(),
            })
    }
}

impl<T: TextEmbedder + ?Sized> TextEmbedder for Box<T> {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
        (**self).embed_batch(texts)
    }

    fn embedding_dim(&self) -> usize {
        (**self).embedding_dim()
    }

    fn is_stub(&self) -> bool {
        (**self).is_stub()
    }
}

/// Trained [`SentenceEncoder`] paired with its tokenizer.
#[derive(Debug)]
pub struct EncoderEmbedder {
    encoder: SentenceEncoder,
    tokenizer: TextTokenizer,
    batch_size: usize,
}

impl EncoderEmbedder {
    pub fn new(encoder: SentenceEncoder, tokenizer: TextTokenizer) -> Self {
        Self {
            encoder,
            tokenizer,
            batch_size: DEFAULT_ENCODE_BATCH_SIZE,
        }
    }

    pub fn load(dir: &Path, device: &Device) -> Result<Self, ModelError> {
        let (encoder, tokenizer) = SentenceEncoder::load(dir, device)?;
        Ok(Self::new(encoder, tokenizer))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn encoder(&self) -> &SentenceEncoder {
        &self.encoder
    }

    pub fn tokenizer(&self) -> &TextTokenizer {
        &self.tokenizer
    }
}

impl TextEmbedder for EncoderEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
        self.encoder
            .encode_texts(&self.tokenizer, texts, self.batch_size)
    }

    fn embedding_dim(&self) -> usize {
        self.encoder.embedding_dim()
    }
}

/// Deterministic hash-seeded unit vectors. Equal texts map to equal vectors.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dimension: usize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut state = hash_to_u64(text.as_bytes());
        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 32) as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }
        embedding
    }
}

impl TextEmbedder for StubEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
        debug!(count = texts.len(), "Generating stub embeddings");
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn embedding_dim(&self) -> usize {
        self.dimension
    }

    fn is_stub(&self) -> bool {
        true
    }
}
