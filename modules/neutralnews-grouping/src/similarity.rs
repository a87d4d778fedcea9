//! k-NN cosine graph + density clustering over item embeddings.
//!
//! Each item's neighborhood is itself plus its `k - 1` nearest other items,
//! kept only where the cosine distance is within `eps`. Clustering then
//! follows DBSCAN over that directed graph: an item with at least
//! `min_samples` neighbors is a core point, clusters grow outward from core
//! points, and anything unreachable is noise.
//!
//! Items are visited in index order and neighbor ties break on index, so the
//! same vectors always produce the same labels.

use neutralnews_common::config::GroupingConfig;
use tracing::debug;

/// Label for items that belong to no candidate cluster.
pub const NOISE: i32 = -1;

/// Norm floor for zero vectors.
const MIN_NORM: f32 = 1e-10;

/// Scale to unit length. NaN components count as zero; a zero vector stays
/// (near) zero instead of dividing by zero.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let cleaned: Vec<f32> = v.iter().map(|x| if x.is_nan() { 0.0 } else { *x }).collect();
    let norm = cleaned.iter().map(|x| x * x).sum::<f32>().sqrt().max(MIN_NORM);
    cleaned.into_iter().map(|x| x / norm).collect()
}

/// Cosine similarity of two vectors that are already unit length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Mean similarity over all unordered pairs. A single vector is perfectly
/// coherent with itself.
pub fn mean_pairwise_similarity(vectors: &[&[f32]]) -> f32 {
    let n = vectors.len();
    if n < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += cosine_similarity(vectors[i], vectors[j]);
            pairs += 1;
        }
    }
    total / pairs as f32
}

pub struct SimilarityGrouper {
    max_neighbors: usize,
    eps: f32,
    min_samples: usize,
}

impl SimilarityGrouper {
    pub fn new(config: &GroupingConfig) -> Self {
        Self {
            max_neighbors: config.max_neighbors,
            eps: config.eps,
            min_samples: config.min_samples.max(1),
        }
    }

    /// Neighborhood size including the item itself.
    pub fn neighbor_count(&self, n: usize) -> usize {
        if n <= 1 {
            return n;
        }
        self.max_neighbors.min(n).max(2)
    }

    /// Label every vector with a candidate cluster or [`NOISE`]. Vectors must
    /// be unit length and share one dimensionality.
    pub fn cluster(&self, vectors: &[Vec<f32>]) -> Vec<i32> {
        let n = vectors.len();
        if n <= 1 {
            return vec![NOISE; n];
        }

        let neighborhoods = self.neighborhoods(vectors);
        let is_core: Vec<bool> = neighborhoods
            .iter()
            .map(|nb| nb.len() >= self.min_samples)
            .collect();

        let mut labels = vec![NOISE; n];
        let mut next_label = 0;
        for start in 0..n {
            if labels[start] != NOISE || !is_core[start] {
                continue;
            }
            labels[start] = next_label;
            let mut stack = vec![start];
            while let Some(point) = stack.pop() {
                for &neighbor in &neighborhoods[point] {
                    if labels[neighbor] == NOISE {
                        labels[neighbor] = next_label;
                        if is_core[neighbor] {
                            stack.push(neighbor);
                        }
                    }
                }
            }
            next_label += 1;
        }

        debug!(
            items = n,
            clusters = next_label,
            noise = labels.iter().filter(|l| **l == NOISE).count(),
            "Density clustering complete"
        );
        labels
    }

    /// For each item: itself plus the nearest `k - 1` others within `eps`.
    fn neighborhoods(&self, vectors: &[Vec<f32>]) -> Vec<Vec<usize>> {
        let n = vectors.len();
        let k = self.neighbor_count(n);

        (0..n)
            .map(|i| {
                let mut others: Vec<(f32, usize)> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| (cosine_distance(&vectors[i], &vectors[j]), j))
                    .collect();
                others.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

                let mut neighborhood = vec![i];
                neighborhood.extend(
                    others
                        .into_iter()
                        .take(k - 1)
                        .filter(|(dist, _)| *dist <= self.eps)
                        .map(|(_, j)| j),
                );
                neighborhood
            })
            .collect()
    }
}
