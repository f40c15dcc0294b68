//! Next-token training for [`ItemDescLm`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::Device;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::clip::clip_grad_norm;
use super::dataset::{DEFAULT_VOCAB_LINES, ItemDescDataset, shuffled_batches, vocab_texts};
use super::error::{TrainingError, TrainingResult};
use super::loss::masked_cross_entropy;
use super::schedule::CosineAnnealing;
use crate::generation::{GenerationConfig, generate_text};
use crate::model::{ItemDescLm, LmConfig, StackConfig, TrainingState};
use crate::text::TextTokenizer;

pub const FINAL_CHECKPOINT: &str = "item_desc_model_final";

pub const SAMPLE_PROMPTS: [&str; 5] = ["智能手机", "连衣裙", "笔记本电脑", "运动鞋", "化妆品"];

pub fn epoch_checkpoint_name(epoch: usize) -> String {
    format!("item_desc_model_epoch_{epoch}")
}

#[derive(Debug, Clone)]
pub struct TrainLmConfig {
    /// `title<TAB>description` TSV file.
    pub data_path: PathBuf,
    /// Parent directory for checkpoints.
    pub output_dir: PathBuf,
    pub vocab_size: usize,
    pub vocab_lines: usize,
    pub max_seq_length: usize,
    pub max_samples: Option<usize>,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub max_grad_norm: f64,
    pub stack: StackConfig,
    pub seed: u64,
    /// Generation settings for the per-epoch smoke test.
    pub sample_generation: GenerationConfig,
    pub sample_prompts: Vec<String>,
}

impl TrainLmConfig {
    pub fn new(data_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            output_dir: output_dir.into(),
            vocab_size: 20_000,
            vocab_lines: DEFAULT_VOCAB_LINES,
            max_seq_length: 64,
            max_samples: Some(50_000),
            batch_size: 16,
            epochs: 5,
            learning_rate: 1e-4,
            weight_decay: 0.01,
            max_grad_norm: 1.0,
            stack: StackConfig {
                d_model: 256,
                nhead: 8,
                num_layers: 4,
                dim_feedforward: 512,
                dropout: 0.1,
            },
            seed: 42,
            sample_generation: GenerationConfig::new(30, 0.8, 20),
            sample_prompts: SAMPLE_PROMPTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.batch_size == 0 || self.epochs == 0 {
            return Err(TrainingError::InvalidConfig {
                reason: "batch_size and epochs must be non-zero".to_string(),
            });
        }
        if self.max_seq_length < 3 {
            return Err(TrainingError::InvalidConfig {
                reason: format!("max_seq_length {} leaves no room for text", self.max_seq_length),
            });
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig {
                reason: format!("learning_rate must be positive, got {}", self.learning_rate),
            });
        }
        self.stack.validate()?;
        Ok(())
    }
}

/// Outcome of a finished training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub epoch_losses: Vec<f32>,
    pub steps: usize,
    pub final_checkpoint: PathBuf,
}

/// Trains an LM from scratch and writes per-epoch and final checkpoints.
pub fn train_lm(config: &TrainLmConfig, device: &Device) -> TrainingResult<TrainReport> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut tokenizer = TextTokenizer::new(config.vocab_size);
    tokenizer.build_vocab(vocab_texts(&config.data_path, config.vocab_lines)?);
    info!(vocab = tokenizer.len(), "Vocabulary built");

    let dataset = ItemDescDataset::load(&config.data_path, config.max_seq_length, config.max_samples)?;
    if dataset.is_empty() {
        return Err(TrainingError::EmptyDataset {
            what: "item descriptions",
        });
    }

    let model_config = LmConfig::default()
        .with_vocab_size(tokenizer.len())
        .with_max_seq_length(config.max_seq_length)
        .with_stack(config.stack);
    let (model, varmap) = ItemDescLm::init(model_config, device)?;
    let vars = varmap.all_vars();
    let parameters: usize = vars.iter().map(|v| v.elem_count()).sum();

    let mut optimizer = AdamW::new(
        vars.clone(),
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
        parameters,
        batch_size = config.batch_size,
        epochs = config.epochs,
        lr = config.learning_rate,
        "Starting language model training"
    );

    let mut step = 0;
    let mut epoch_losses = Vec::with_capacity(config.epochs);
    for epoch in 1..=config.epochs {
        let started = Instant::now();
        let mut total_loss = 0f32;
        let batches = shuffled_batches(dataset.len(), config.batch_size, &mut rng);
        let batch_count = batches.len();

        for (i, indices) in batches.iter().enumerate() {
            let batch = dataset.batch(indices, &tokenizer, device)?;
            let logits = model.forward(&batch.ids, Some(&batch.padding), true)?;
            let loss = masked_cross_entropy(&logits, &batch.labels)?;

            let mut grads = loss.backward()?;
            let grad_norm = clip_grad_norm(&mut grads, &vars, config.max_grad_norm)?;
            optimizer.step(&grads)?;
            step += 1;
            optimizer.set_learning_rate(schedule.lr_at(step));

            let value = loss.to_scalar::<f32>()?;
            total_loss += value;
            debug!(epoch, batch = i + 1, batch_count, loss = value, grad_norm, "Training step");
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

        sample_generations(&model, &tokenizer, config, &mut rng);

        let state = TrainingState::now(epoch, avg_loss);
        let dir = config.output_dir.join(epoch_checkpoint_name(epoch));
        model.save(&dir, &tokenizer, &varmap, Some(&state))?;
    }

    let final_dir = config.output_dir.join(FINAL_CHECKPOINT);
    let last_loss = epoch_losses.last().copied().unwrap_or_default();
    model.save(
        &final_dir,
        &tokenizer,
        &varmap,
        Some(&TrainingState::now(config.epochs, last_loss)),
    )?;
    info!(path = %final_dir.display(), steps = step, "Language model training complete");

    Ok(TrainReport {
        epoch_losses,
        steps: step,
        final_checkpoint: final_dir,
    })
}

/// Logs a continuation for each sample prompt. Failures are logged, never fatal.
fn sample_generations(
    model: &ItemDescLm,
    tokenizer: &TextTokenizer,
    config: &TrainLmConfig,
    rng: &mut StdRng,
) {
    for prompt in &config.sample_prompts {
        match generate_text(model, tokenizer, prompt, &config.sample_generation, rng) {
            Ok(text) => info!(prompt = %prompt, generated = %text, "Sample generation"),
            Err(e) => warn!(prompt = %prompt, error = %e, "Sample generation failed"),
        }
    }
}

/// Loads the final checkpoint written by [`train_lm`].
pub fn load_final(output_dir: &Path, device: &Device) -> TrainingResult<(ItemDescLm, TextTokenizer)> {
    Ok(ItemDescLm::load(&output_dir.join(FINAL_CHECKPOINT), device)?)
}
