//! ShopMind library crate (used by the CLI, the server and integration tests).
//!
//! # Public API Surface
//!
//! ## Text & Models
//! - [`TextTokenizer`] - Mixed CJK/Latin tokenizer with special tokens
//! - [`ItemDescLm`], [`LmConfig`] - Decoder-only item-description language model
//! - [`SentenceEncoder`], [`EncoderConfig`] - Pooled transformer sentence encoder
//!
//! ## Generation & Suggestions
//! - [`GenerationConfig`], [`generate_text`] - Temperature / top-k sampling
//! - [`SuggestionEngine`], [`SuggestParams`] - Search-box suggestions
//! - [`KeywordExtractor`] - Keyword and bigram post-processing
//! - [`WordAssociation`] - Embedding neighbours, associations, completions
//!
//! ## Training
//! - [`train_lm`], [`TrainLmConfig`] - Next-token training
//! - [`train_encoder`], [`TrainEncoderConfig`] - Contrastive training
//!
//! ## Search
//! - [`VectorIndex`], [`IndexKind`] - Flat and IVF cosine indexes
//! - [`SemanticSearchEngine`], [`TextEmbedder`] - Embed, index and query texts
//!
//! ## Test/Mock Support
//! [`generation::ScriptedLogits`] is available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod config;
pub mod constants;
pub mod generation;
pub mod hashing;
pub mod index;
pub mod model;
pub mod search;
pub mod suggest;
pub mod text;
pub mod training;

pub use config::{ConfigError, ServiceConfig};
pub use generation::{Generation, GenerationConfig, NextTokenLogits, generate, generate_text};
pub use hashing::{hash_fields, hash_to_u64};
pub use index::{IndexError, IndexKind, IndexStats, Metadata, SearchHit, VectorIndex};
pub use model::{
    EncoderConfig, ItemDescLm, LmConfig, ModelError, PoolingStrategy, SentenceEncoder,
    StackConfig, device_label, select_device,
};
pub use search::{
    EncoderEmbedder, SearchError, SemanticSearchEngine, StubEmbedder, TextEmbedder,
};
pub use suggest::{
    KeywordExtractor, PostprocessOptions, SuggestCache, SuggestError, SuggestParams,
    SuggestionEngine, WordAssociation,
};
pub use text::{DecodeOptions, EncodeOptions, TextTokenizer, TokenizerError};
pub use training::{
    ContrastiveObjective, TrainEncoderConfig, TrainLmConfig, TrainReport, TrainingError,
    train_encoder, train_lm,
};
