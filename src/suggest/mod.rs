//! Search-box suggestions and word association.
//!
//! [`SuggestionEngine`] oversamples the item-description LM for a query prefix and
//! distils the samples into short keyword phrases with [`KeywordExtractor`].
//! [`WordAssociation`] explores the LM's vocabulary directly.

pub mod association;
pub mod cache;
pub mod engine;
pub mod error;
pub mod keywords;


pub use association::{SimilarWord, WordAssociation};
pub use cache::SuggestCache;
pub use engine::{OVERSAMPLE, SuggestParams, SuggestionEngine};
pub use error::SuggestError;
pub use keywords::{
    KeywordExtractor, PostprocessOptions, compose_bigrams, is_good_token,
    remove_query_from_phrase, strip_punctuation,
};
