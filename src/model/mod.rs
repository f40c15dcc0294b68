//! Transformer models built on candle.
//!
//! - [`ItemDescLm`]: causal language model used for description generation and suggestions.
//! - [`SentenceEncoder`]: pooled, L2-normalised sentence embeddings for semantic search.
//!
//! Both are persisted as checkpoint directories (see [`checkpoint`]).

pub mod checkpoint;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod layers;
pub mod lm;


pub use checkpoint::{CheckpointKind, TrainingState};
pub use config::{EncoderConfig, LmConfig, PoolingStrategy, StackConfig};
pub use device::{device_label, select_device};
pub use encoder::SentenceEncoder;
pub use error::ModelError;
pub use lm::ItemDescLm;
