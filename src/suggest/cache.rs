//! TTL cache for suggestion responses.
//!
//! Keys are BLAKE3 hashes of the trimmed query and every sampling parameter, so two
//! requests share an entry only when they would run the same generation.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use super::engine::SuggestParams;
use crate::hashing::hash_fields;

pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SuggestCache {
    entries: Cache<[u8; 32], Arc<Vec<String>>>,
}

impl Default for SuggestCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

impl SuggestCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn key(query: &str, params: &SuggestParams) -> [u8; 32] {
        let n = (params.n as u64).to_le_bytes();
        let max_new = (params.max_new_tokens as u64).to_le_bytes();
        let temperature = params.temperature.to_bits().to_le_bytes();
        let top_k = (params.top_k as u64).to_le_bytes();
        hash_fields([
            query.trim().as_bytes(),
            n.as_slice(),
            max_new.as_slice(),
            temperature.as_slice(),
            top_k.as_slice(),
        ])
    }

    #[inline]
    pub fn get(&self, query: &str, params: &SuggestParams) -> Option<Arc<Vec<String>>> {
        self.entries.get(&Self::key(query, params))
    }

    #[inline]
    pub fn insert(&self, query: &str, params: &SuggestParams, suggestions: Arc<Vec<String>>) {
        self.entries.insert(Self::key(query, params), suggestions);
    }

    #[inline]
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate entry count; pending maintenance may lag.
    #[inline]
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }
}
