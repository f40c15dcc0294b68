//! Semantic search: embed texts, index them, query by meaning.
//!
//! [`SemanticSearchEngine`] couples a [`TextEmbedder`] with a [`VectorIndex`]. Use
//! [`StubEmbedder`] for tests and demos without trained weights.

pub mod embedder;
pub mod error;


pub use embedder::{EncoderEmbedder, StubEmbedder, TextEmbedder};
pub use error::SearchError;

use std::path::Path;
use std::time::Instant;

use candle_core::Device;
use serde::Serialize;
use tracing::{debug, info};

use crate::constants::DEFAULT_ENCODE_BATCH_SIZE;
use crate::index::{IndexKind, IndexStats, Metadata, SearchHit, VectorIndex};

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: usize,
    pub dimension: usize,
    pub index_kind: &'static str,
    pub embedder_mode: &'static str,
}

pub struct SemanticSearchEngine<E: TextEmbedder> {
    embedder: E,
    kind: IndexKind,
    index: Option<VectorIndex>,
}

impl<E: TextEmbedder> std::fmt::Debug for SemanticSearchEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticSearchEngine")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("stub", &self.embedder.is_stub())
            .finish()
    }
}

impl<E: TextEmbedder> SemanticSearchEngine<E> {
    pub fn new(embedder: E, kind: IndexKind) -> Self {
        Self {
            embedder,
            kind,
            index: None,
        }
    }

    pub fn encode_text(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embedder.embed(text)?)
    }

    pub fn encode_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(self.embedder.embed_batch(texts)?)
    }

    /// Replaces the current index with one built from `texts`.
    pub fn build_index_from_texts(
        &mut self,
        texts: &[String],
        metadata: Option<&[Metadata]>,
        batch_size: usize,
    ) -> Result<&VectorIndex, SearchError> {
        let started = Instant::now();
        let mut index = VectorIndex::new(self.embedder.embedding_dim(), self.kind)?;

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            vectors.extend(self.embedder.embed_batch(&refs)?);
            debug!(encoded = vectors.len(), total = texts.len(), "Encoding documents");
        }
        index.add(&vectors, texts, metadata)?;

        info!(
            documents = index.len(),
            kind = self.kind.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search index built"
        );
        Ok(self.index.insert(index))
    }

    /// Adds documents to the current index, creating it when missing.
    pub fn add_texts(
        &mut self,
        texts: &[String],
        metadata: Option<&[Metadata]>,
    ) -> Result<(), SearchError> {
        if self.index.is_none() {
            self.build_index_from_texts(texts, metadata, DEFAULT_ENCODE_BATCH_SIZE)?;
            return Ok(());
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(&refs)?;
        if let Some(index) = self.index.as_mut() {
            index.add(&vectors, texts, metadata)?;
        }
        Ok(())
    }

    pub fn search(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let index = self.index.as_ref().ok_or(SearchError::IndexNotReady)?;
        let vector = self.embedder.embed(query)?;
        let hits = index.search(&vector, k, threshold)?;
        debug!(query_len = query.len(), hits = hits.len(), "Search complete");
        Ok(hits)
    }

    pub fn batch_search(
        &self,
        queries: &[&str],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<SearchHit>>, SearchError> {
        let index = self.index.as_ref().ok_or(SearchError::IndexNotReady)?;
        let vectors = self.embedder.embed_batch(queries)?;
        Ok(index.batch_search(&vectors, k, threshold)?)
    }

    pub fn save_index<P: AsRef<Path>>(&self, path: P) -> Result<(), SearchError> {
        let index = self.index.as_ref().ok_or(SearchError::IndexNotReady)?;
        index.save(path)?;
        Ok(())
    }

    pub fn load_index<P: AsRef<Path>>(&mut self, path: P) -> Result<&VectorIndex, SearchError> {
        let index = VectorIndex::load(path)?;
        if index.dimension() != self.embedder.embedding_dim() {
            return Err(SearchError::DimensionMismatch {
                embedder: self.embedder.embedding_dim(),
                index: index.dimension(),
            });
        }
        self.kind = index.kind();
        Ok(self.index.insert(index))
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref()
    }

    pub fn index_stats(&self) -> Option<IndexStats> {
        self.index.as_ref().map(VectorIndex::stats)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            documents: self.index.as_ref().map_or(0, VectorIndex::len),
            dimension: self.embedder.embedding_dim(),
            index_kind: self.kind.label(),
            embedder_mode: if self.embedder.is_stub() {
                "stub"
            } else {
                "real"
            },
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }
}

impl SemanticSearchEngine<EncoderEmbedder> {
    /// Loads a trained encoder and, when given, a saved index.
    pub fn from_checkpoint(
        encoder_dir: &Path,
        index_path: Option<&Path>,
        kind: IndexKind,
        device: &Device,
    ) -> Result<Self, SearchError> {
        let embedder = EncoderEmbedder::load(encoder_dir, device)?;
        let mut engine = Self::new(embedder, kind);
        if let Some(path) = index_path {
            engine.load_index(path)?;
        }
        Ok(engine)
    }
}
