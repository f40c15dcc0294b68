//! LM-backed keyword suggestions.

use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use candle_core::Device;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::SuggestError;
use super::keywords::{KeywordExtractor, PostprocessOptions};
use crate::generation::{self, Generation, GenerationConfig, NextTokenLogits};
use crate::model::ItemDescLm;
use crate::text::TextTokenizer;

/// Raw generations per requested suggestion.
pub const OVERSAMPLE: usize = 3;

pub const N_RANGE: RangeInclusive<usize> = 1..=20;
pub const MAX_NEW_TOKENS_RANGE: RangeInclusive<usize> = 2..=32;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.1..=1.5;
pub const TOP_K_RANGE: RangeInclusive<usize> = 0..=200;

/// Per-request suggestion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestParams {
    pub n: usize,
    pub max_new_tokens: usize,
    pub temperature: f32,
    /// `0` disables top-k.
    pub top_k: usize,
}

impl Default for SuggestParams {
    fn default() -> Self {
        Self {
            n: 8,
            max_new_tokens: 12,
            temperature: 0.9,
            top_k: 30,
        }
    }
}

fn check_range<T>(name: &'static str, value: T, range: &RangeInclusive<T>) -> Result<(), SuggestError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SuggestError::InvalidParam {
            name,
            reason: format!(
                "{value} outside {}..={}",
                range.start(),
                range.end()
            ),
        })
    }
}

impl SuggestParams {
    pub fn validate(&self) -> Result<(), SuggestError> {
        check_range("n", self.n, &N_RANGE)?;
        check_range("max_new_tokens", self.max_new_tokens, &MAX_NEW_TOKENS_RANGE)?;
        check_range("temperature", self.temperature, &TEMPERATURE_RANGE)?;
        check_range("top_k", self.top_k, &TOP_K_RANGE)?;
        Ok(())
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig::new(self.max_new_tokens, self.temperature, self.top_k)
    }

    /// Number of raw samples drawn for one request.
    pub fn rounds(&self) -> usize {
        (self.n * OVERSAMPLE).max(1)
    }
}

/// Oversamples the language model and distils the samples into short suggestions.
pub struct SuggestionEngine<M = ItemDescLm> {
    model: M,
    tokenizer: TextTokenizer,
    keywords: Arc<KeywordExtractor>,
}

impl<M> std::fmt::Debug for SuggestionEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionEngine")
            .field("vocab", &self.tokenizer.len())
            .finish_non_exhaustive()
    }
}

impl SuggestionEngine<ItemDescLm> {
    /// Loads the LM checkpoint at `dir`.
    pub fn load(dir: &Path, device: &Device) -> Result<Self, SuggestError> {
        let (model, tokenizer) = ItemDescLm::load(dir, device)?;
        Ok(Self::new(model, tokenizer))
    }

    /// Like [`Self::load`] but reuses an existing segmenter.
    pub fn load_with(
        dir: &Path,
        device: &Device,
        keywords: Arc<KeywordExtractor>,
    ) -> Result<Self, SuggestError> {
        let (model, tokenizer) = ItemDescLm::load(dir, device)?;
        Ok(Self::with_extractor(model, tokenizer, keywords))
    }
}

impl<M: NextTokenLogits> SuggestionEngine<M> {
    pub fn new(model: M, tokenizer: TextTokenizer) -> Self {
        Self::with_extractor(model, tokenizer, Arc::new(KeywordExtractor::new()))
    }

    pub fn with_extractor(model: M, tokenizer: TextTokenizer, keywords: Arc<KeywordExtractor>) -> Self {
        Self {
            model,
            tokenizer,
            keywords,
        }
    }

    /// Suggestions for query `q`. A blank query yields none.
    pub fn suggest<R: Rng + ?Sized>(
        &self,
        q: &str,
        params: &SuggestParams,
        rng: &mut R,
    ) -> Result<Vec<String>, SuggestError> {
        params.validate()?;
        let query = q.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let config = params.generation_config();
        let rounds = params.rounds();
        let mut raw = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            raw.push(generation::generate_text(
                &self.model,
                &self.tokenizer,
                query,
                &config,
                rng,
            )?);
        }
        debug!(rounds, "Sampled raw continuations");

        let options = PostprocessOptions::default().with_want_n(params.n);
        let suggestions = self.keywords.postprocess(&raw, q, options);
        info!(
            query_chars = query.chars().count(),
            suggestions = suggestions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Suggestions generated"
        );
        Ok(suggestions)
    }

    /// Single constrained generation, used by the CLI.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        rng: &mut R,
    ) -> Result<Generation, SuggestError> {
        Ok(generation::generate(
            &self.model,
            &self.tokenizer,
            prompt,
            config,
            rng,
        )?)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokenizer(&self) -> &TextTokenizer {
        &self.tokenizer
    }

    pub fn keywords(&self) -> &Arc<KeywordExtractor> {
        &self.keywords
    }
}
