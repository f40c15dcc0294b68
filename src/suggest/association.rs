//! Vocabulary-level association on top of the language model.
//!
//! Similarity comes from the LM's input embedding matrix; associations and completions
//! come from sampling.

use std::collections::HashSet;
use std::path::Path;

use candle_core::{D, Device};
use rand::Rng;
use serde::Serialize;

use super::error::SuggestError;
use crate::generation::{self, GenerationConfig};
use crate::model::ItemDescLm;
use crate::text::TextTokenizer;

const COSINE_EPS: f64 = 1e-8;
const ASSOCIATION_NEW_TOKENS: usize = 30;
const ASSOCIATION_TOP_K: usize = 20;
const COMPLETION_EXTRA_TOKENS: usize = 5;
const COMPLETION_TEMPERATURE: f32 = 0.8;
const COMPLETION_TOP_K: usize = 15;
const SECOND_LAYER_NEIGHBOURS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarWord {
    pub word: String,
    pub similarity: f32,
}

pub struct WordAssociation {
    model: ItemDescLm,
    tokenizer: TextTokenizer,
}

impl std::fmt::Debug for WordAssociation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordAssociation")
            .field("vocab", &self.tokenizer.len())
            .finish_non_exhaustive()
    }
}

impl WordAssociation {
    pub fn new(model: ItemDescLm, tokenizer: TextTokenizer) -> Self {
        Self { model, tokenizer }
    }

    pub fn load(dir: &Path, device: &Device) -> Result<Self, SuggestError> {
        let (model, tokenizer) = ItemDescLm::load(dir, device)?;
        Ok(Self::new(model, tokenizer))
    }

    fn word_id(&self, word: &str) -> Result<u32, SuggestError> {
        self.tokenizer
            .token_id(word)
            .ok_or_else(|| SuggestError::WordNotInVocab {
                word: word.to_string(),
            })
    }

    /// Nearest vocabulary entries by cosine similarity of token embeddings.
    ///
    /// The word itself is excluded; ties go to the lower id.
    pub fn similar_words(&self, word: &str, top_k: usize) -> Result<Vec<SimilarWord>, SuggestError> {
        let target_id = self.word_id(word)?;
        let embeddings = self.model.token_embeddings();
        let target = embeddings.get(target_id as usize)?;

        let dots = embeddings.matmul(&target.unsqueeze(1)?)?.squeeze(1)?;
        let norms = embeddings.sqr()?.sum(D::Minus1)?.sqrt()?;
        let target_norm = f64::from(target.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?);
        let denom = (norms * target_norm)?.maximum(COSINE_EPS)?;
        let scores = (dots / denom)?.to_vec1::<f32>()?;

        let mut ranked: Vec<(u32, f32)> = scores
            .into_iter()
            .enumerate()
            .map(|(id, score)| (id as u32, score))
            .filter(|(id, _)| *id != target_id)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(ranked
            .into_iter()
            .filter_map(|(id, similarity)| {
                self.tokenizer.token(id).map(|w| SimilarWord {
                    word: w.to_string(),
                    similarity,
                })
            })
            .take(top_k)
            .collect())
    }

    /// Tokens the model produces after `text` that the input does not contain, in the
    /// order they were generated.
    pub fn associations<R: Rng + ?Sized>(
        &self,
        text: &str,
        max_associations: usize,
        temperature: f32,
        rng: &mut R,
    ) -> Result<Vec<String>, SuggestError> {
        let config = GenerationConfig::new(ASSOCIATION_NEW_TOKENS, temperature, ASSOCIATION_TOP_K);
        let generated = generation::generate_text(&self.model, &self.tokenizer, text, &config, rng)?;

        let input: HashSet<String> = TextTokenizer::tokenize(text).into_iter().collect();
        let mut seen = HashSet::new();
        Ok(TextTokenizer::tokenize(&generated)
            .into_iter()
            .filter(|t| !input.contains(t) && seen.insert(t.clone()))
            .take(max_associations)
            .collect())
    }

    /// Up to `max_completions` distinct continuations of `partial`.
    pub fn complete_phrase<R: Rng + ?Sized>(
        &self,
        partial: &str,
        max_completions: usize,
        rng: &mut R,
    ) -> Result<Vec<String>, SuggestError> {
        let budget = partial.split_whitespace().count() + COMPLETION_EXTRA_TOKENS;
        let config = GenerationConfig::new(budget, COMPLETION_TEMPERATURE, COMPLETION_TOP_K);
        let skip = partial.chars().count();

        let mut completions: Vec<String> = Vec::new();
        for _ in 0..max_completions {
            let completed =
                generation::generate_text(&self.model, &self.tokenizer, partial, &config, rng)?;
            let tail: String = completed.chars().skip(skip).collect();
            let tail = tail.trim();
            if !tail.is_empty() && !completions.iter().any(|c| c == tail) {
                completions.push(tail.to_string());
            }
        }
        Ok(completions)
    }

    /// Layered neighbourhood of `center`: layer 0 is the word itself, layer 1 its nearest
    /// words, layer 2 the neighbours of layer 1.
    pub fn word_cloud(
        &self,
        center: &str,
        layers: usize,
        per_layer: usize,
    ) -> Result<Vec<Vec<String>>, SuggestError> {
        self.word_id(center)?;
        let mut cloud = vec![vec![center.to_string()]];

        let first: Vec<String> = self
            .similar_words(center, per_layer * 2)?
            .into_iter()
            .take(per_layer)
            .map(|s| s.word)
            .collect();

        let second = if layers > 1 {
            let mut second: Vec<String> = Vec::new();
            'outer: for word in &first {
                for neighbour in self.similar_words(word, SECOND_LAYER_NEIGHBOURS)? {
                    if second.len() >= per_layer {
                        break 'outer;
                    }
                    if neighbour.word != center && !second.contains(&neighbour.word) {
                        second.push(neighbour.word);
                    }
                }
            }
            Some(second)
        } else {
            None
        };

        cloud.push(first);
        cloud.extend(second);
        Ok(cloud)
    }

    pub fn tokenizer(&self) -> &TextTokenizer {
        &self.tokenizer
    }

    pub fn model(&self) -> &ItemDescLm {
        &self.model
    }
}
