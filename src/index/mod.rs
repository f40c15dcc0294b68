//! In-process vector index over sentence embeddings.
//!
//! Two layouts are supported:
//! - [`IndexKind::Flat`]: exact brute-force scan.
//! - [`IndexKind::Ivf`]: k-means coarse quantiser trained on the first batch added; search
//!   scans only the `nprobe` closest inverted lists.
//!
//! Scores are cosine similarities, which equal inner products for the unit vectors the
//! sentence encoder produces.

pub mod error;
pub mod ivf;
pub mod snapshot;


pub use error::{IndexError, IndexResult};
pub use ivf::IvfLists;
pub use snapshot::{IndexSnapshot, SNAPSHOT_VERSION};

use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Free-form JSON object attached to every indexed text.
pub type Metadata = Map<String, Value>;

pub const DEFAULT_NLIST: usize = 100;
pub const DEFAULT_NPROBE: usize = 10;

const KMEANS_SEED: u64 = 0x5eed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum IndexKind {
    #[default]
    Flat,
    Ivf { nlist: usize, nprobe: usize },
}

impl IndexKind {
    pub fn ivf() -> Self {
        IndexKind::Ivf {
            nlist: DEFAULT_NLIST,
            nprobe: DEFAULT_NPROBE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Ivf { .. } => "ivf",
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    /// Position of the text in insertion order.
    pub index: usize,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub dimension: usize,
    pub kind: &'static str,
    pub nlist: Option<usize>,
}

pub struct VectorIndex {
    dimension: usize,
    kind: IndexKind,
    vectors: Vec<f32>,
    norms: Vec<f32>,
    texts: Vec<String>,
    metadata: Vec<Metadata>,
    ivf: Option<IvfLists>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

impl VectorIndex {
    pub fn new(dimension: usize, kind: IndexKind) -> IndexResult<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidConfig {
                reason: "dimension must be non-zero".to_string(),
            });
        }
        if let IndexKind::Ivf { nlist, nprobe } = kind {
            if nlist == 0 || nprobe == 0 {
                return Err(IndexError::InvalidConfig {
                    reason: "nlist and nprobe must be non-zero".to_string(),
                });
            }
        }
        Ok(Self {
            dimension,
            kind,
            vectors: Vec::new(),
            norms: Vec::new(),
            texts: Vec::new(),
            metadata: Vec::new(),
            ivf: None,
        })
    }

    pub fn flat(dimension: usize) -> IndexResult<Self> {
        Self::new(dimension, IndexKind::Flat)
    }

    /// Adds vectors with their texts. `metadata` defaults to empty objects.
    pub fn add(
        &mut self,
        vectors: &[Vec<f32>],
        texts: &[String],
        metadata: Option<&[Metadata]>,
    ) -> IndexResult<()> {
        if vectors.len() != texts.len() {
            return Err(IndexError::LengthMismatch {
                what: "text",
                expected: vectors.len(),
                actual: texts.len(),
            });
        }
        if let Some(meta) = metadata {
            if meta.len() != vectors.len() {
                return Err(IndexError::LengthMismatch {
                    what: "metadata",
                    expected: vectors.len(),
                    actual: meta.len(),
                });
            }
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(());
        }

        if let (IndexKind::Ivf { nlist, .. }, None) = (self.kind, &self.ivf) {
            let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
            let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
            let lists = IvfLists::train(&flat, self.dimension, nlist, &mut rng);
            info!(
                nlist = lists.nlist(),
                training_vectors = vectors.len(),
                "IVF quantiser trained"
            );
            self.ivf = Some(lists);
        }

        let start = self.texts.len();
        for (offset, v) in vectors.iter().enumerate() {
            self.vectors.extend_from_slice(v);
            self.norms.push(norm(v));
            if let Some(ivf) = self.ivf.as_mut() {
                ivf.insert(start + offset, v);
            }
        }
        self.texts.extend(texts.iter().cloned());
        match metadata {
            Some(meta) => self.metadata.extend(meta.iter().cloned()),
            None => self
                .metadata
                .extend(std::iter::repeat_with(Metadata::new).take(vectors.len())),
        }

        debug!(added = vectors.len(), total = self.len(), "Vectors indexed");
        Ok(())
    }

    /// Up to `k` hits scoring at least `threshold`, best first.
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> IndexResult<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = norm(query);
        let candidates: Vec<usize> = match (&self.kind, &self.ivf) {
            (IndexKind::Ivf { nprobe, .. }, Some(ivf)) => ivf.candidates(query, *nprobe),
            _ => (0..self.len()).collect(),
        };

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|i| (i, self.cosine(i, query, query_norm)))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                text: self.texts[i].clone(),
                score,
                index: i,
                metadata: self.metadata[i].clone(),
            })
            .collect())
    }

    pub fn batch_search(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        threshold: f32,
    ) -> IndexResult<Vec<Vec<SearchHit>>> {
        queries
            .iter()
            .map(|q| self.search(q, k, threshold))
            .collect()
    }

    fn cosine(&self, i: usize, query: &[f32], query_norm: f32) -> f32 {
        let denom = self.norms[i] * query_norm;
        if denom == 0.0 {
            return 0.0;
        }
        let v = &self.vectors[i * self.dimension..(i + 1) * self.dimension];
        v.iter().zip(query).map(|(a, b)| a * b).sum::<f32>() / denom
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.texts.get(index).map(String::as_str)
    }

    pub fn vector(&self, index: usize) -> Option<&[f32]> {
        (index < self.len()).then(|| &self.vectors[index * self.dimension..(index + 1) * self.dimension])
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.len(),
            dimension: self.dimension,
            kind: self.kind.label(),
            nlist: self.ivf.as_ref().map(IvfLists::nlist),
        }
    }

    pub fn to_snapshot(&self) -> IndexSnapshot {
        let (ivf_nlist, ivf_nprobe) = match self.kind {
            IndexKind::Flat => (0, 0),
            IndexKind::Ivf { nlist, nprobe } => (nlist as u32, nprobe as u32),
        };
        IndexSnapshot {
            version: SNAPSHOT_VERSION,
            dimension: self.dimension as u32,
            ivf_nlist,
            ivf_nprobe,
            vectors: self.vectors.clone(),
            texts: self.texts.clone(),
            metadata: self
                .metadata
                .iter()
                .map(|m| Value::Object(m.clone()).to_string())
                .collect(),
            centroids: self
                .ivf
                .as_ref()
                .map(|ivf| ivf.centroids().to_vec())
                .unwrap_or_default(),
            assignments: self
                .ivf
                .as_ref()
                .map(|ivf| ivf.assignments(self.len()))
                .unwrap_or_default(),
        }
    }

    pub fn from_snapshot(snapshot: IndexSnapshot) -> IndexResult<Self> {
        let dimension = snapshot.dimension as usize;
        let kind = if snapshot.ivf_nlist == 0 {
            IndexKind::Flat
        } else {
            IndexKind::Ivf {
                nlist: snapshot.ivf_nlist as usize,
                nprobe: snapshot.ivf_nprobe as usize,
            }
        };
        let mut index = Self::new(dimension, kind)?;

        let count = snapshot.texts.len();
        if snapshot.vectors.len() != count * dimension {
            return Err(IndexError::Snapshot {
                reason: format!(
                    "{} floats do not hold {count} vectors of dimension {dimension}",
                    snapshot.vectors.len()
                ),
            });
        }
        if snapshot.metadata.len() != count {
            return Err(IndexError::LengthMismatch {
                what: "metadata",
                expected: count,
                actual: snapshot.metadata.len(),
            });
        }

        index.metadata = snapshot
            .metadata
            .iter()
            .map(|raw| match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Ok(Metadata::new()),
                Err(e) => Err(IndexError::Snapshot {
                    reason: format!("invalid metadata: {e}"),
                }),
            })
            .collect::<IndexResult<_>>()?;
        index.norms = snapshot
            .vectors
            .chunks(dimension)
            .map(norm)
            .collect();
        index.vectors = snapshot.vectors;
        index.texts = snapshot.texts;

        if matches!(kind, IndexKind::Ivf { .. }) && count > 0 {
            if snapshot.assignments.len() != count {
                return Err(IndexError::LengthMismatch {
                    what: "assignment",
                    expected: count,
                    actual: snapshot.assignments.len(),
                });
            }
            index.ivf = Some(
                IvfLists::from_parts(dimension, snapshot.centroids, &snapshot.assignments)
                    .ok_or_else(|| IndexError::Snapshot {
                        reason: "invalid IVF centroids or assignments".to_string(),
                    })?,
            );
        }

        Ok(index)
    }

    /// Writes an `rkyv` snapshot to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> IndexResult<()> {
        self.to_snapshot().write(path.as_ref())?;
        info!(path = %path.as_ref().display(), documents = self.len(), "Index saved");
        Ok(())
    }

    /// Reads a snapshot written by [`VectorIndex::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let index = Self::from_snapshot(IndexSnapshot::read(path.as_ref())?)?;
        info!(
            path = %path.as_ref().display(),
            documents = index.len(),
            kind = index.kind.label(),
            "Index loaded"
        );
        Ok(index)
    }
}

#[inline]
fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
