//! Transformer building blocks shared by the language model and the sentence encoder.
//!
//! Layers follow the post-norm encoder layout: attention and feed-forward sub-blocks each
//! add their output to the residual stream and normalise afterwards.

use candle_core::{D, Device, Module, Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, VarBuilder};

use super::config::StackConfig;
use crate::constants::{LAYER_NORM_EPS, PAD_ID};

/// Multi-head self-attention with a fused input projection.
pub struct MultiHeadAttention {
    in_proj: Linear,
    out_proj: Linear,
    nhead: usize,
    head_dim: usize,
    dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new(config: &StackConfig, vb: VarBuilder) -> Result<Self> {
        let d = config.d_model;
        Ok(Self {
            in_proj: candle_nn::linear(d, 3 * d, vb.pp("in_proj"))?,
            out_proj: candle_nn::linear(d, d, vb.pp("out_proj"))?,
            nhead: config.nhead,
            head_dim: config.head_dim(),
            dropout: Dropout::new(config.dropout),
        })
    }

    /// `x`: `[batch, len, d_model]`. `mask` is additive and broadcastable to
    /// `[batch, heads, len, len]`.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let (b, l, d) = x.dims3()?;

        // [3, batch, heads, len, head_dim]
        let qkv = self
            .in_proj
            .forward(x)?
            .reshape((b, l, 3, self.nhead, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let scores = match mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let weights = self.dropout.forward(&weights, train)?;

        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, l, d))?;
        self.out_proj.forward(&out)
    }
}

/// One post-norm encoder layer (ReLU feed-forward).
pub struct EncoderLayer {
    self_attn: MultiHeadAttention,
    linear1: Linear,
    linear2: Linear,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    pub fn new(config: &StackConfig, vb: VarBuilder) -> Result<Self> {
        let d = config.d_model;
        Ok(Self {
            self_attn: MultiHeadAttention::new(config, vb.pp("self_attn"))?,
            linear1: candle_nn::linear(d, config.dim_feedforward, vb.pp("linear1"))?,
            linear2: candle_nn::linear(config.dim_feedforward, d, vb.pp("linear2"))?,
            norm1: candle_nn::layer_norm(d, LAYER_NORM_EPS, vb.pp("norm1"))?,
            norm2: candle_nn::layer_norm(d, LAYER_NORM_EPS, vb.pp("norm2"))?,
            dropout: Dropout::new(config.dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let attn = self.self_attn.forward(x, mask, train)?;
        let x = self
            .norm1
            .forward(&(x + self.dropout.forward(&attn, train)?)?)?;

        let hidden = self.linear1.forward(&x)?.relu()?;
        let ff = self
            .linear2
            .forward(&self.dropout.forward(&hidden, train)?)?;
        self.norm2.forward(&(&x + self.dropout.forward(&ff, train)?)?)
    }
}

/// Stack of [`EncoderLayer`]s.
pub struct TransformerEncoder {
    layers: Vec<EncoderLayer>,
}

impl TransformerEncoder {
    pub fn new(config: &StackConfig, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_layers)
            .map(|i| EncoderLayer::new(config, vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for layer in &self.layers {
            x = layer.forward(&x, mask, train)?;
        }
        Ok(x)
    }
}

/// Fixed sinusoidal position table, `[max_len, d_model]`.
pub fn sinusoidal_positions(max_len: usize, d_model: usize, device: &Device) -> Result<Tensor> {
    let mut table = vec![0f32; max_len * d_model];
    let log_base = -(10_000f32.ln()) / d_model as f32;
    for pos in 0..max_len {
        for i in (0..d_model).step_by(2) {
            let angle = pos as f32 * (i as f32 * log_base).exp();
            table[pos * d_model + i] = angle.sin();
            if i + 1 < d_model {
                table[pos * d_model + i + 1] = angle.cos();
            }
        }
    }
    Tensor::from_vec(table, (max_len, d_model), device)
}

/// Builds an additive `[batch, 1, len, len]` mask (`-inf` where attention is not allowed).
///
/// Returns `None` when nothing is masked.
pub fn attention_mask(
    batch: usize,
    len: usize,
    causal: bool,
    key_padding: Option<&[Vec<bool>]>,
    device: &Device,
) -> Result<Option<Tensor>> {
    if !causal && key_padding.is_none_or(|p| p.iter().flatten().all(|pad| !pad)) {
        return Ok(None);
    }

    let mut mask = vec![0f32; batch * len * len];
    for b in 0..batch {
        let padding = key_padding.and_then(|p| p.get(b));
        for q in 0..len {
            for k in 0..len {
                let future = causal && k > q;
                let padded = padding.is_some_and(|p| p.get(k).copied().unwrap_or(false));
                if future || padded {
                    mask[(b * len + q) * len + k] = f32::NEG_INFINITY;
                }
            }
        }
    }

    Tensor::from_vec(mask, (batch, 1, len, len), device).map(Some)
}

/// Right-pads id sequences to a common length.
///
/// Returns the `[batch, len]` id tensor and per-position padding flags.
pub fn pad_batch(sequences: &[Vec<u32>], device: &Device) -> Result<(Tensor, Vec<Vec<bool>>)> {
    let len = sequences.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let mut ids = Vec::with_capacity(sequences.len() * len);
    let mut padding = Vec::with_capacity(sequences.len());

    for seq in sequences {
        let mut flags = vec![false; seq.len()];
        ids.extend_from_slice(seq);
        for _ in seq.len()..len {
            ids.push(PAD_ID);
            flags.push(true);
        }
        padding.push(flags);
    }

    let tensor = Tensor::from_vec(ids, (sequences.len(), len), device)?;
    Ok((tensor, padding))
}

/// `[batch, len, 1]` float mask, 1.0 on real tokens.
pub fn keep_mask(padding: &[Vec<bool>], device: &Device) -> Result<Tensor> {
    let batch = padding.len();
    let len = padding.first().map(Vec::len).unwrap_or(0);
    let values: Vec<f32> = padding
        .iter()
        .flat_map(|row| row.iter().map(|&pad| if pad { 0.0 } else { 1.0 }))
        .collect();
    Tensor::from_vec(values, (batch, len, 1), device)
}

/// L2-normalises the last dimension of a `[batch, dim]` tensor.
pub fn l2_normalize(x: &Tensor, eps: f32) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.maximum(eps)?;
    x.broadcast_div(&norm)
}
