//! Logit processors and categorical sampling.
//!
//! Every processor works in place on a `[vocab]` logit row. Disallowed tokens are set to
//! `-inf` so they receive zero probability after softmax.

use rand::Rng;

use crate::constants::MIN_TEMPERATURE;

/// Divides logits by `max(temperature, MIN_TEMPERATURE)`.
pub fn apply_temperature(logits: &mut [f32], temperature: f32) {
    let t = temperature.max(MIN_TEMPERATURE);
    for l in logits.iter_mut() {
        *l /= t;
    }
}

/// Sets the given token ids to `-inf`. Out-of-range ids are ignored.
pub fn ban_tokens(logits: &mut [f32], banned: &[u32]) {
    for &id in banned {
        if let Some(l) = logits.get_mut(id as usize) {
            *l = f32::NEG_INFINITY;
        }
    }
}

/// Blocks every token `y` such that the pair `(last, y)` already occurs in `window`,
/// where `last` is the final token of `window`.
pub fn block_repeated_bigrams(logits: &mut [f32], window: &[u32]) {
    let Some((&last, _)) = window.split_last() else {
        return;
    };
    for pair in window.windows(2) {
        if pair[0] == last {
            if let Some(l) = logits.get_mut(pair[1] as usize) {
                *l = f32::NEG_INFINITY;
            }
        }
    }
}

/// Keeps the `min(k, vocab)` largest logits and sets the rest to `-inf`.
///
/// `k == 0` disables the filter. Ties at the boundary keep the lower token id.
pub fn top_k_filter(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }

    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]).then(a.cmp(&b)));

    for &idx in &order[k..] {
        logits[idx] = f32::NEG_INFINITY;
    }
}

/// Numerically stable softmax. Returns `None` when no logit is finite.
pub fn softmax(logits: &[f32]) -> Option<Vec<f32>> {
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }

    let exps: Vec<f32> = logits
        .iter()
        .map(|&l| if l.is_finite() { (l - max).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exps.iter().sum();
    Some(exps.into_iter().map(|e| e / sum).collect())
}

/// Draws an index from a probability vector (cumulative-sum inversion).
pub fn sample_categorical<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> Option<usize> {
    let total: f32 = probs.iter().sum();
    if total.is_nan() || total <= 0.0 {
        return None;
    }

    let target = rng.random::<f32>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        cumulative += p;
        last_positive = Some(i);
        if target < cumulative {
            return Some(i);
        }
    }
    last_positive
}
