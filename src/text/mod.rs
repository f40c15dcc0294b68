//! Character/word tokenizer for mixed Chinese and English product text.
//!
//! Chinese ideographs become single-character tokens, ASCII alphanumeric runs become word
//! tokens, and punctuation is kept one symbol at a time. The vocabulary is frequency-ranked
//! on top of five fixed special tokens (see [`crate::constants`]).

pub mod error;

#[cfg(test)]
mod tests;

pub use error::TokenizerError;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{
    EOS_ID, NUM_SPECIAL_TOKENS, PAD_ID, SOS_ID, SPECIAL_TOKENS, UNK_ID, is_special_id,
};

/// Default vocabulary size (specials included).
pub const DEFAULT_VOCAB_SIZE: usize = 10_000;

/// Options for [`TextTokenizer::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Target length. Only applied together with `pad_to_max`.
    pub max_length: Option<usize>,
    /// Wrap the ids as `<SOS> … <EOS>`.
    pub add_special_tokens: bool,
    /// Truncate or right-pad to `max_length`.
    pub pad_to_max: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_length: None,
            add_special_tokens: true,
            pad_to_max: false,
        }
    }
}

impl EncodeOptions {
    /// Raw token ids: no specials, no padding.
    pub fn plain() -> Self {
        Self {
            max_length: None,
            add_special_tokens: false,
            pad_to_max: false,
        }
    }

    /// `<SOS> … <EOS>` truncated or padded to exactly `max_length`.
    pub fn padded(max_length: usize) -> Self {
        Self {
            max_length: Some(max_length),
            add_special_tokens: true,
            pad_to_max: true,
        }
    }
}

/// Options for [`TextTokenizer::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub skip_special_tokens: bool,
    pub stop_at_eos: bool,
    /// Join tokens without separators (Chinese text); otherwise join with a space.
    pub concat: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            skip_special_tokens: true,
            stop_at_eos: true,
            concat: true,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TokenizerFile {
    vocab_size: usize,
    tokens: Vec<String>,
}

/// Frequency-ranked vocabulary tokenizer.
#[derive(Debug, Clone)]
pub struct TextTokenizer {
    vocab_size: usize,
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
}

impl Default for TextTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_VOCAB_SIZE)
    }
}

impl TextTokenizer {
    /// Creates a tokenizer holding only the special tokens.
    pub fn new(vocab_size: usize) -> Self {
        let id_to_token: Vec<String> = SPECIAL_TOKENS.iter().map(|t| t.to_string()).collect();
        let token_to_id = id_to_token
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Self {
            vocab_size,
            token_to_id,
            id_to_token,
        }
    }

    /// Splits text into tokens (lowercased).
    pub fn tokenize(text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut tokens = Vec::new();
        let mut chars = lowered.chars().peekable();

        while let Some(c) = chars.next() {
            if is_cjk(c) {
                tokens.push(c.to_string());
            } else if c.is_ascii_alphanumeric() {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_alphanumeric() {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(word);
            } else if !is_word_char(c) && !c.is_whitespace() {
                tokens.push(c.to_string());
            }
        }

        tokens
    }

    /// Rebuilds the vocabulary from a corpus, keeping the most frequent tokens.
    ///
    /// Ties are broken by first occurrence.
    pub fn build_vocab<I, S>(&mut self, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut seen = 0usize;
        for text in texts {
            for token in Self::tokenize(text.as_ref()) {
                let entry = counts.entry(token).or_insert_with(|| {
                    seen += 1;
                    (0, seen)
                });
                entry.0 += 1;
            }
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(token, (count, first))| (token, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let keep = self.vocab_size.saturating_sub(NUM_SPECIAL_TOKENS);
        let mut fresh = Self::new(self.vocab_size);
        for (token, _, _) in ranked.into_iter().take(keep) {
            fresh.push_token(token);
        }
        *self = fresh;

        info!(vocab_len = self.len(), vocab_size = self.vocab_size, "Vocabulary built");
    }

    fn push_token(&mut self, token: String) {
        let id = self.id_to_token.len() as u32;
        self.token_to_id.insert(token.clone(), id);
        self.id_to_token.push(token);
    }

    /// Encodes text into token ids.
    pub fn encode(&self, text: &str, opts: EncodeOptions) -> Vec<u32> {
        let mut ids: Vec<u32> = Self::tokenize(text)
            .iter()
            .map(|t| self.token_to_id.get(t).copied().unwrap_or(UNK_ID))
            .collect();

        if opts.add_special_tokens {
            ids.insert(0, SOS_ID);
            ids.push(EOS_ID);
        }

        if let (true, Some(max_length)) = (opts.pad_to_max, opts.max_length) {
            if ids.len() > max_length {
                ids.truncate(max_length);
                if opts.add_special_tokens {
                    if let Some(last) = ids.last_mut() {
                        *last = EOS_ID;
                    }
                }
            } else {
                ids.resize(max_length, PAD_ID);
            }
        }

        ids
    }

    /// Decodes ids back into text.
    ///
    /// Ids outside the vocabulary decode to the empty string.
    pub fn decode(&self, ids: &[u32], opts: DecodeOptions) -> String {
        let mut pieces: Vec<&str> = Vec::with_capacity(ids.len());
        for &id in ids {
            if opts.stop_at_eos && id == EOS_ID {
                break;
            }
            if opts.skip_special_tokens && is_special_id(id) {
                continue;
            }
            pieces.push(self.token(id).unwrap_or(""));
        }

        if opts.concat {
            pieces.concat()
        } else {
            pieces.join(" ")
        }
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    /// Number of tokens currently in the vocabulary (specials included).
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Configured upper bound on the vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Writes the vocabulary as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TokenizerError> {
        let file = TokenizerFile {
            vocab_size: self.vocab_size,
            tokens: self.id_to_token.clone(),
        };
        fs::write(path.as_ref(), serde_json::to_vec_pretty(&file)?)?;
        debug!(path = %path.as_ref().display(), "Tokenizer saved");
        Ok(())
    }

    /// Reads a vocabulary written by [`TextTokenizer::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TokenizerError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let file: TokenizerFile = serde_json::from_slice(&fs::read(path)?)?;

        if file.tokens.len() < NUM_SPECIAL_TOKENS
            || file.tokens[..NUM_SPECIAL_TOKENS]
                .iter()
                .zip(SPECIAL_TOKENS.iter())
                .any(|(a, b)| a != b)
        {
            return Err(TokenizerError::Corrupt {
                reason: "special tokens missing or reordered".to_string(),
            });
        }

        let mut tokenizer = Self::new(file.vocab_size);
        for token in file.tokens.into_iter().skip(NUM_SPECIAL_TOKENS) {
            if tokenizer.token_to_id.contains_key(&token) {
                return Err(TokenizerError::Corrupt {
                    reason: format!("duplicate token '{token}'"),
                });
            }
            tokenizer.push_token(token);
        }

        Ok(tokenizer)
    }
}

/// CJK Unified Ideographs block.
#[inline]
pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

#[inline]
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
