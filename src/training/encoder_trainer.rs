//! Contrastive training for [`SentenceEncoder`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dataset::{ContrastiveDataset, read_texts, shuffled_batches, synthetic_corpus};
use super::error::{TrainingError, TrainingResult};
use super::lm_trainer::TrainReport;
use super::loss::{cosine_embedding_loss, info_nce_loss};
use super::schedule::CosineAnnealing;
use crate::model::{EncoderConfig, PoolingStrategy, SentenceEncoder, StackConfig, TrainingState};
use crate::text::TextTokenizer;

pub const FINAL_CHECKPOINT: &str = "sentence_encoder_final";

pub const PROBE_SENTENCES: [&str; 5] = [
    "机器学习需要数据",
    "深度学习模型",
    "自然语言处理技术",
    "人工智能应用",
    "神经网络训练",
];

pub fn epoch_checkpoint_name(epoch: usize) -> String {
    format!("sentence_encoder_epoch_{epoch}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContrastiveObjective {
    /// `1 − cos(anchor, positive)` per pair.
    #[default]
    Cosine,
    /// Supervised InfoNCE over anchors and positives together.
    InfoNce { temperature: f64 },
}

impl ContrastiveObjective {
    pub const DEFAULT_TEMPERATURE: f64 = 0.05;

    pub fn info_nce() -> Self {
        Self::InfoNce {
            temperature: Self::DEFAULT_TEMPERATURE,
        }
    }
}

impl FromStr for ContrastiveObjective {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "info_nce" | "info-nce" | "infonce" => Ok(Self::info_nce()),
            other => Err(TrainingError::InvalidConfig {
                reason: format!("unknown objective '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainEncoderConfig {
    pub output_dir: PathBuf,
    /// One text per line. A synthetic corpus is generated when absent.
    pub texts_path: Option<PathBuf>,
    pub synthetic_size: usize,
    pub vocab_size: usize,
    pub max_length: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub stack: StackConfig,
    pub pooling: PoolingStrategy,
    pub objective: ContrastiveObjective,
    pub augment: bool,
    /// Save `sentence_encoder_epoch_{n}` every this many epochs; `0` disables.
    pub checkpoint_every: usize,
    pub seed: u64,
}

impl TrainEncoderConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            texts_path: None,
            synthetic_size: 2_000,
            vocab_size: 5_000,
            max_length: 64,
            batch_size: 32,
            epochs: 10,
            learning_rate: 1e-4,
            weight_decay: 0.01,
            stack: StackConfig {
                d_model: 256,
                nhead: 8,
                num_layers: 3,
                dim_feedforward: 1024,
                dropout: 0.1,
            },
            pooling: PoolingStrategy::Mean,
            objective: ContrastiveObjective::Cosine,
            augment: true,
            checkpoint_every: 2,
            seed: 42,
        }
    }

    pub fn with_texts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.texts_path = Some(path.into());
        self
    }

    pub fn with_synthetic_size(mut self, size: usize) -> Self {
        self.synthetic_size = size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_objective(mut self, objective: ContrastiveObjective) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.batch_size == 0 || self.epochs == 0 || self.max_length == 0 {
            return Err(TrainingError::InvalidConfig {
                reason: "batch_size, epochs and max_length must be non-zero".to_string(),
            });
        }
        if let ContrastiveObjective::InfoNce { temperature } = self.objective
            && (temperature.is_nan() || temperature <= 0.0)
        {
            return Err(TrainingError::InvalidConfig {
                reason: format!("InfoNCE temperature must be positive, got {temperature}"),
            });
        }
        self.stack.validate()?;
        Ok(())
    }
}

fn batch_loss(
    objective: ContrastiveObjective,
    anchors: &Tensor,
    positives: &Tensor,
    labels: &[usize],
) -> candle_core::Result<Tensor> {
    match objective {
        ContrastiveObjective::Cosine => cosine_embedding_loss(anchors, positives),
        ContrastiveObjective::InfoNce { temperature } => {
            let joined = Tensor::cat(&[anchors, positives], 0)?;
            let doubled: Vec<usize> = labels.iter().chain(labels).copied().collect();
            info_nce_loss(&joined, &doubled, temperature)
        }
    }
}

/// Trains a sentence encoder and writes periodic and final checkpoints.
pub fn train_encoder(config: &TrainEncoderConfig, device: &Device) -> TrainingResult<TrainReport> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let texts = match &config.texts_path {
        Some(path) => read_texts(path)?,
        None => synthetic_corpus(config.synthetic_size, &mut rng),
    };
    if texts.is_empty() {
        return Err(TrainingError::EmptyDataset { what: "texts" });
    }

    let mut tokenizer = TextTokenizer::new(config.vocab_size);
    tokenizer.build_vocab(&texts);
    info!(texts = texts.len(), vocab = tokenizer.len(), "Vocabulary built");

    let dataset = ContrastiveDataset::new(texts, config.max_length, config.augment);
    let model_config = EncoderConfig::default()
        .with_vocab_size(tokenizer.len())
        .with_max_seq_length(config.max_length)
        .with_stack(config.stack)
        .with_pooling(config.pooling);
    let (encoder, varmap) = SentenceEncoder::init(model_config, device)?;

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        },
    )?;
    let steps_per_epoch = dataset.len().div_ceil(config.batch_size);
    let schedule = CosineAnnealing::new(config.learning_rate, steps_per_epoch * config.epochs);
    info!(
        samples = dataset.len(),
        objective = ?config.objective,
        batch_size = config.batch_size,
        epochs = config.epochs,
        "Starting encoder training"
    );

    let mut step = 0;
    let mut epoch_losses = Vec::with_capacity(config.epochs);
    for epoch in 1..=config.epochs {
        let started = Instant::now();
        let mut total_loss = 0f32;
        let batches = shuffled_batches(dataset.len(), config.batch_size, &mut rng);
        let batch_count = batches.len();

        for indices in &batches {
            let batch = dataset.batch(indices, &tokenizer, device, &mut rng)?;
            let (anchor_ids, anchor_padding) = &batch.anchors;
            let (positive_ids, positive_padding) = &batch.positives;
            let anchors = encoder.forward(anchor_ids, anchor_padding, true)?;
            let positives = encoder.forward(positive_ids, positive_padding, true)?;

            let loss = batch_loss(config.objective, &anchors, &positives, &batch.labels)?;
            optimizer.backward_step(&loss)?;
            step += 1;
            optimizer.set_learning_rate(schedule.lr_at(step));

            let value = loss.to_scalar::<f32>()?;
            total_loss += value;
            debug!(epoch, step, loss = value, "Training step");
        }

        let avg_loss = total_loss / batch_count.max(1) as f32;
        info!(
            epoch,
            epochs = config.epochs,
            avg_loss,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Epoch finished"
        );
        epoch_losses.push(avg_loss);

        if config.checkpoint_every > 0 && epoch % config.checkpoint_every == 0 {
            let dir = config.output_dir.join(epoch_checkpoint_name(epoch));
            encoder.save(&dir, &tokenizer, &varmap, Some(&TrainingState::now(epoch, avg_loss)))?;
        }
    }

    let final_dir = config.output_dir.join(FINAL_CHECKPOINT);
    let last_loss = epoch_losses.last().copied().unwrap_or_default();
    encoder.save(
        &final_dir,
        &tokenizer,
        &varmap,
        Some(&TrainingState::now(config.epochs, last_loss)),
    )?;

    evaluate(&encoder, &tokenizer, &PROBE_SENTENCES)?;

    Ok(TrainReport {
        epoch_losses,
        steps: step,
        final_checkpoint: final_dir,
    })
}

/// Pairwise cosine similarities of `sentences`, logged for the upper triangle.
pub fn evaluate(
    encoder: &SentenceEncoder,
    tokenizer: &TextTokenizer,
    sentences: &[&str],
) -> TrainingResult<Vec<Vec<f32>>> {
    let embeddings = encoder.encode_texts(tokenizer, sentences, sentences.len().max(1))?;
    let matrix: Vec<Vec<f32>> = embeddings
        .iter()
        .map(|a| {
            embeddings
                .iter()
                .map(|b| a.iter().zip(b).map(|(x, y)| x * y).sum())
                .collect()
        })
        .collect();

    for (i, row) in matrix.iter().enumerate() {
        for (j, similarity) in row.iter().enumerate().skip(i) {
            info!(a = sentences[i], b = sentences[j], similarity, "Probe similarity");
        }
    }
    Ok(matrix)
}
