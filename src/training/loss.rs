//! Training objectives.

use candle_core::{D, Result, Tensor};
use candle_nn::ops::log_softmax;

use crate::constants::IGNORE_INDEX;

const COSINE_EPS: f64 = 1e-8;
/// Additive mask for self-similarity; finite so masked rows never produce NaN.
const SELF_MASK: f32 = -1e9;

/// Mean next-token cross-entropy over positions whose label is not [`IGNORE_INDEX`].
///
/// `logits` is `[.., vocab]`, `labels` holds one target per logit row.
pub fn masked_cross_entropy(logits: &Tensor, labels: &[i64]) -> Result<Tensor> {
    let vocab = logits.dim(D::Minus1)?;
    let flat = logits.reshape(((), vocab))?;
    let rows = flat.dim(0)?;
    if rows != labels.len() {
        candle_core::bail!("{} logit rows but {} labels", rows, labels.len());
    }

    let mut targets = Vec::with_capacity(rows);
    let mut weights = Vec::with_capacity(rows);
    for &label in labels {
        if label == IGNORE_INDEX {
            targets.push(0u32);
            weights.push(0f32);
        } else {
            targets.push(label as u32);
            weights.push(1f32);
        }
    }
    let counted = weights.iter().sum::<f32>().max(1.0);

    let device = flat.device();
    let log_probs = log_softmax(&flat, D::Minus1)?;
    let targets = Tensor::from_vec(targets, (rows, 1), device)?;
    let picked = log_probs.gather(&targets, 1)?.squeeze(1)?;
    let weights = Tensor::from_vec(weights, rows, device)?;
    (picked * weights)?.sum_all()?.neg()? / f64::from(counted)
}

/// `mean(1 − cos(a, b))`: cosine embedding loss with every pair a positive.
pub fn cosine_embedding_loss(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let dot = (a * b)?.sum(D::Minus1)?;
    let norm_a = a.sqr()?.sum(D::Minus1)?.sqrt()?;
    let norm_b = b.sqr()?.sum(D::Minus1)?.sqrt()?;
    let cos = (dot / (norm_a * norm_b)?.maximum(COSINE_EPS)?)?;
    cos.affine(-1.0, 1.0)?.mean_all()
}

/// Supervised InfoNCE: rows sharing a label are positives, self-pairs are excluded.
///
/// `embeddings` is `[n, d]` and should already be L2-normalised.
pub fn info_nce_loss(embeddings: &Tensor, labels: &[usize], temperature: f64) -> Result<Tensor> {
    let n = embeddings.dim(0)?;
    if n != labels.len() {
        candle_core::bail!("{} embeddings but {} labels", n, labels.len());
    }
    let device = embeddings.device();

    let mut positives = vec![0f32; n * n];
    let mut self_mask = vec![0f32; n * n];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                self_mask[i * n + j] = SELF_MASK;
            } else if labels[i] == labels[j] {
                positives[i * n + j] = 1.0;
            }
        }
    }
    let positives = Tensor::from_vec(positives, (n, n), device)?;
    let self_mask = Tensor::from_vec(self_mask, (n, n), device)?;

    let similarity = (embeddings.matmul(&embeddings.t()?)? / temperature)?;
    let log_prob = log_softmax(&(similarity + self_mask)?, D::Minus1)?;
    let per_row = (&positives * log_prob)?.sum(D::Minus1)?.neg()?;
    let counts = positives.sum(D::Minus1)?.maximum(1e-6)?;
    (per_row / counts)?.mean_all()
}
