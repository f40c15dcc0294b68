//! Constrained autoregressive generation.
//!
//! The prompt is framed as `<SOS> prompt <SEP>` and continued one token at a time over a
//! sliding window of at most `max_seq_length` tokens. Each step bans the framing tokens,
//! blocks repeated bigrams inside the window, applies top-k and samples.

pub mod sampler;


use rand::Rng;
use tracing::{debug, trace};

use crate::constants::{EOS_ID, PAD_ID, SEP_ID, SOS_ID, UNK_ID};
use crate::model::ModelError;
use crate::text::{DecodeOptions, EncodeOptions, TextTokenizer};

/// Tokens never produced by generation. `<EOS>` stays allowed.
pub const BANNED_TOKENS: [u32; 4] = [PAD_ID, SOS_ID, SEP_ID, UNK_ID];

/// Anything that scores the next token given a window of previous tokens.
pub trait NextTokenLogits {
    /// Longest window the model accepts.
    fn max_seq_length(&self) -> usize;

    /// Logits for the token following `window` (causal).
    fn next_token_logits(&self, window: &[u32]) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f32,
    /// `0` disables top-k filtering.
    pub top_k: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            temperature: 1.0,
            top_k: 50,
        }
    }
}

impl GenerationConfig {
    pub fn new(max_new_tokens: usize, temperature: f32, top_k: usize) -> Self {
        Self {
            max_new_tokens,
            temperature,
            top_k,
        }
    }
}

/// Result of one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Decoded text (prompt tokens included, specials dropped).
    pub text: String,
    /// Full token sequence, framing tokens included.
    pub tokens: Vec<u32>,
    /// Number of tokens produced after the prompt.
    pub new_tokens: usize,
    pub hit_eos: bool,
}

/// Builds the `<SOS> prompt <SEP>` prefix, truncating the prompt to fit the window.
pub fn prompt_ids(tokenizer: &TextTokenizer, prompt: &str, max_seq_length: usize) -> Vec<u32> {
    let mut ids = tokenizer.encode(prompt, EncodeOptions::plain());
    ids.truncate(max_seq_length.saturating_sub(2));

    let mut seq = Vec::with_capacity(ids.len() + 2);
    seq.push(SOS_ID);
    seq.extend(ids);
    seq.push(SEP_ID);
    seq
}

/// Applies every constraint to a raw logit row and samples one token.
///
/// Returns `None` when all tokens are disallowed.
pub fn sample_next<R: Rng + ?Sized>(
    mut logits: Vec<f32>,
    window: &[u32],
    config: &GenerationConfig,
    rng: &mut R,
) -> Option<u32> {
    sampler::apply_temperature(&mut logits, config.temperature);
    sampler::ban_tokens(&mut logits, &BANNED_TOKENS);
    sampler::block_repeated_bigrams(&mut logits, window);
    sampler::top_k_filter(&mut logits, config.top_k);

    let probs = sampler::softmax(&logits)?;
    sampler::sample_categorical(&probs, rng).map(|i| i as u32)
}

/// Continues `prompt` with `model`.
pub fn generate<M, R>(
    model: &M,
    tokenizer: &TextTokenizer,
    prompt: &str,
    config: &GenerationConfig,
    rng: &mut R,
) -> Result<Generation, ModelError>
where
    M: NextTokenLogits + ?Sized,
    R: Rng + ?Sized,
{
    let max_len = model.max_seq_length();
    let mut tokens = prompt_ids(tokenizer, prompt, max_len);
    let mut new_tokens = 0;
    let mut hit_eos = false;

    while new_tokens < config.max_new_tokens {
        let start = tokens.len().saturating_sub(max_len);
        let window = &tokens[start..];

        let logits = model.next_token_logits(window)?;
        let Some(next) = sample_next(logits, window, config, rng) else {
            debug!(step = new_tokens, "No admissible token left, stopping generation");
            break;
        };
        trace!(step = new_tokens, token = next, "Sampled token");

        tokens.push(next);
        new_tokens += 1;
        if next == EOS_ID {
            hit_eos = true;
            break;
        }
    }

    let text = tokenizer.decode(&tokens, DecodeOptions::default());
    Ok(Generation {
        text,
        tokens,
        new_tokens,
        hit_eos,
    })
}

/// Generates and returns only the decoded text.
pub fn generate_text<M, R>(
    model: &M,
    tokenizer: &TextTokenizer,
    prompt: &str,
    config: &GenerationConfig,
    rng: &mut R,
) -> Result<String, ModelError>
where
    M: NextTokenLogits + ?Sized,
    R: Rng + ?Sized,
{
    generate(model, tokenizer, prompt, config, rng).map(|g| g.text)
}

/// Model returning scripted logits; lets generation be tested without weights.
#[cfg(any(test, feature = "mock"))]
pub struct ScriptedLogits {
    vocab_size: usize,
    max_seq_length: usize,
    script: Box<dyn Fn(&[u32]) -> Vec<f32> + Send + Sync>,
}

#[cfg(any(test, feature = "mock"))]
impl ScriptedLogits {
    pub fn new<F>(vocab_size: usize, max_seq_length: usize, script: F) -> Self
    where
        F: Fn(&[u32]) -> Vec<f32> + Send + Sync + 'static,
    {
        Self {
            vocab_size,
            max_seq_length,
            script: Box::new(script),
        }
    }

    /// Always prefers `token` (logit 10), everything else 0.
    pub fn favouring(vocab_size: usize, max_seq_length: usize, token: u32) -> Self {
        Self::new(vocab_size, max_seq_length, move |_| {
            let mut logits = vec![0.0; vocab_size];
            if let Some(l) = logits.get_mut(token as usize) {
                *l = 10.0;
            }
            logits
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

#[cfg(any(test, feature = "mock"))]
impl NextTokenLogits for ScriptedLogits {
    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    fn next_token_logits(&self, window: &[u32]) -> Result<Vec<f32>, ModelError> {
        if window.len() > self.max_seq_length {
            return Err(ModelError::InferenceFailed {
                reason: format!("window of {} exceeds {}", window.len(), self.max_seq_length),
            });
        }
        Ok((self.script)(window))
    }
}
