//! Inverted-file coarse quantiser (k-means centroids + per-centroid id lists).

use rand::Rng;
use rand::seq::index::sample;

const KMEANS_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct IvfLists {
    dimension: usize,
    centroids: Vec<f32>,
    lists: Vec<Vec<usize>>,
}

impl IvfLists {
    /// Trains `nlist` centroids on row-major `vectors` with Lloyd's k-means.
    ///
    /// `nlist` is clamped to the number of training vectors.
    pub fn train<R: Rng + ?Sized>(
        vectors: &[f32],
        dimension: usize,
        nlist: usize,
        rng: &mut R,
    ) -> Self {
        let n = vectors.len() / dimension.max(1);
        let nlist = nlist.min(n).max(1);

        let mut centroids = Vec::with_capacity(nlist * dimension);
        if n == 0 {
            centroids.resize(dimension, 0.0);
        } else {
            for i in sample(rng, n, nlist) {
                centroids.extend_from_slice(row(vectors, dimension, i));
            }
        }

        let mut quantiser = Self {
            dimension,
            centroids,
            lists: vec![Vec::new(); nlist],
        };

        for _ in 0..KMEANS_ITERATIONS {
            let mut sums = vec![0f32; nlist * dimension];
            let mut counts = vec![0usize; nlist];
            for i in 0..n {
                let v = row(vectors, dimension, i);
                let c = quantiser.nearest(v);
                counts[c] += 1;
                for (s, x) in sums[c * dimension..(c + 1) * dimension].iter_mut().zip(v) {
                    *s += x;
                }
            }

            let mut moved = false;
            for c in 0..nlist {
                // Empty clusters keep their previous centroid.
                if counts[c] == 0 {
                    continue;
                }
                let inv = 1.0 / counts[c] as f32;
                let target = &mut quantiser.centroids[c * dimension..(c + 1) * dimension];
                for (t, s) in target.iter_mut().zip(&sums[c * dimension..(c + 1) * dimension]) {
                    let updated = s * inv;
                    if (updated - *t).abs() > f32::EPSILON {
                        moved = true;
                    }
                    *t = updated;
                }
            }
            if !moved {
                break;
            }
        }

        quantiser
    }

    /// Restores a quantiser from persisted centroids and per-vector assignments.
    pub fn from_parts(dimension: usize, centroids: Vec<f32>, assignments: &[u32]) -> Option<Self> {
        if dimension == 0 || centroids.is_empty() || centroids.len() % dimension != 0 {
            return None;
        }
        let nlist = centroids.len() / dimension;
        let mut lists = vec![Vec::new(); nlist];
        for (id, &c) in assignments.iter().enumerate() {
            lists.get_mut(c as usize)?.push(id);
        }
        Some(Self {
            dimension,
            centroids,
            lists,
        })
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    /// Centroid index for every stored id, in id order.
    pub fn assignments(&self, total: usize) -> Vec<u32> {
        let mut out = vec![0u32; total];
        for (c, ids) in self.lists.iter().enumerate() {
            for &id in ids {
                if let Some(slot) = out.get_mut(id) {
                    *slot = c as u32;
                }
            }
        }
        out
    }

    /// Adds a vector id to the list of its nearest centroid.
    pub fn insert(&mut self, id: usize, vector: &[f32]) {
        let c = self.nearest(vector);
        self.lists[c].push(id);
    }

    /// Ids stored in the `nprobe` lists closest to `query`.
    pub fn candidates(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut order: Vec<(usize, f32)> = (0..self.nlist())
            .map(|c| (c, squared_l2(query, self.centroid(c))))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        order
            .into_iter()
            .take(nprobe.max(1))
            .flat_map(|(c, _)| self.lists[c].iter().copied())
            .collect()
    }

    fn centroid(&self, c: usize) -> &[f32] {
        row(&self.centroids, self.dimension, c)
    }

    fn nearest(&self, v: &[f32]) -> usize {
        (0..self.nlist())
            .map(|c| (c, squared_l2(v, self.centroid(c))))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(c, _)| c)
            .unwrap_or(0)
    }
}

#[inline]
fn row(data: &[f32], dimension: usize, i: usize) -> &[f32] {
    &data[i * dimension..(i + 1) * dimension]
}

#[inline]
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
