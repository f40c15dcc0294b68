//! Model hyper-parameters (serialised into checkpoint `config.json`).

use serde::{Deserialize, Serialize};

use super::error::ModelError;

/// How token states are reduced to one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// Mean over non-padding positions.
    #[default]
    Mean,
    /// First position.
    Cls,
    /// Element-wise max over non-padding positions.
    Max,
}

impl std::str::FromStr for PoolingStrategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "cls" => Ok(Self::Cls),
            "max" => Ok(Self::Max),
            other => Err(ModelError::InvalidConfig {
                reason: format!("unknown pooling strategy '{other}'"),
            }),
        }
    }
}

/// Shared transformer-encoder stack dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub d_model: usize,
    pub nhead: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
    pub dropout: f32,
}

impl StackConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.d_model == 0 || self.nhead == 0 || self.num_layers == 0 || self.dim_feedforward == 0
        {
            return Err(ModelError::InvalidConfig {
                reason: "d_model, nhead, num_layers and dim_feedforward must be non-zero"
                    .to_string(),
            });
        }
        if !self.d_model.is_multiple_of(self.nhead) {
            return Err(ModelError::InvalidConfig {
                reason: format!(
                    "d_model ({}) must be divisible by nhead ({})",
                    self.d_model, self.nhead
                ),
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig {
                reason: format!("dropout must be in [0, 1), got {}", self.dropout),
            });
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.nhead
    }
}

/// Item-description language model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    pub vocab_size: usize,
    #[serde(flatten)]
    pub stack: StackConfig,
    pub max_seq_length: usize,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            stack: StackConfig {
                d_model: 256,
                nhead: 8,
                num_layers: 4,
                dim_feedforward: 512,
                dropout: 0.1,
            },
            max_seq_length: 128,
        }
    }
}

impl LmConfig {
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        self.stack.validate()?;
        if self.vocab_size == 0 || self.max_seq_length < 3 {
            return Err(ModelError::InvalidConfig {
                reason: "vocab_size must be non-zero and max_seq_length at least 3".to_string(),
            });
        }
        Ok(())
    }
}

/// Sentence encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub vocab_size: usize,
    #[serde(flatten)]
    pub stack: StackConfig,
    pub max_seq_length: usize,
    pub pooling: PoolingStrategy,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            stack: StackConfig {
                d_model: 256,
                nhead: 4,
                num_layers: 2,
                dim_feedforward: 512,
                dropout: 0.1,
            },
            max_seq_length: 128,
            pooling: PoolingStrategy::Mean,
        }
    }
}

impl EncoderConfig {
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingStrategy) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        self.stack.validate()?;
        if self.vocab_size == 0 || self.max_seq_length == 0 {
            return Err(ModelError::InvalidConfig {
                reason: "vocab_size and max_seq_length must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Output embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.stack.d_model
    }
}
