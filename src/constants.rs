//! Cross-cutting, shared constants.
//!
//! Special token ids are fixed across every model and checkpoint. A tokenizer built with a
//! different layout cannot be paired with an existing checkpoint.

/// Padding token id.
pub const PAD_ID: u32 = 0;
/// Start-of-sequence token id.
pub const SOS_ID: u32 = 1;
/// End-of-sequence token id.
pub const EOS_ID: u32 = 2;
/// Unknown-token id.
pub const UNK_ID: u32 = 3;
/// Separator between title and description.
pub const SEP_ID: u32 = 4;

pub const PAD_TOKEN: &str = "<PAD>";
pub const SOS_TOKEN: &str = "<SOS>";
pub const EOS_TOKEN: &str = "<EOS>";
pub const UNK_TOKEN: &str = "<UNK>";
pub const SEP_TOKEN: &str = "<SEP>";

/// Special tokens in id order.
pub const SPECIAL_TOKENS: [&str; 5] = [PAD_TOKEN, SOS_TOKEN, EOS_TOKEN, UNK_TOKEN, SEP_TOKEN];

pub const NUM_SPECIAL_TOKENS: usize = SPECIAL_TOKENS.len();

/// Label value skipped by the masked cross-entropy.
pub const IGNORE_INDEX: i64 = -100;

/// Floor applied to the sampling temperature.
pub const MIN_TEMPERATURE: f32 = 1e-5;

pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Epsilon used by L2 normalisation of sentence embeddings.
pub const L2_NORM_EPS: f32 = 1e-12;

pub const DEFAULT_SEARCH_K: usize = 5;
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.6;

pub const DEFAULT_ENCODE_BATCH_SIZE: usize = 32;

/// Returns `true` for ids reserved by the tokenizer.
#[inline]
pub fn is_special_id(id: u32) -> bool {
    (id as usize) < NUM_SPECIAL_TOKENS
}
