//! Datasets, objectives and training loops for both models.
//!
//! - [`train_lm`]: next-token training of [`crate::model::ItemDescLm`] on
//!   `title<TAB>description` data.
//! - [`train_encoder`]: contrastive training of [`crate::model::SentenceEncoder`].
//!
//! Both use AdamW with cosine annealing and write checkpoint directories as they go.

pub mod clip;
pub mod dataset;
pub mod encoder_trainer;
pub mod error;
pub mod lm_trainer;
pub mod loss;
pub mod schedule;

#[cfg(test)]
mod tests;

pub use dataset::{ContrastiveDataset, ItemDescDataset, LmExample, augment_text, synthetic_corpus};
pub use encoder_trainer::{ContrastiveObjective, TrainEncoderConfig, evaluate, train_encoder};
pub use error::{TrainingError, TrainingResult};
pub use lm_trainer::{TrainLmConfig, TrainReport, train_lm};
pub use schedule::CosineAnnealing;
