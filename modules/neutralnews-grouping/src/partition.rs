//! Deterministic spherical k-means, used to split clusters that would
//! otherwise grow an oversized group.

use crate::similarity::{cosine_similarity, normalize};

const MAX_ITERATIONS: usize = 25;

/// Partition unit vectors into at most `k` parts. Returns one part index per
/// vector, numbered in order of first appearance.
///
/// Seeds are chosen farthest-first starting from the first vector, so the
/// result depends only on the input order.
pub fn partition(vectors: &[&[f32]], k: usize) -> Vec<usize> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.clamp(1, n);

    let mut centroids = seed_centroids(vectors, k);
    let mut assignment = vec![usize::MAX; n];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let best = nearest_centroid(v, &centroids);
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&[f32]> = vectors
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == c)
                .map(|(v, _)| *v)
                .collect();
            // An emptied part keeps its previous centroid.
            if members.is_empty() {
                continue;
            }
            let mut sum = vec![0.0f32; members[0].len()];
            for m in &members {
                for (s, x) in sum.iter_mut().zip(m.iter()) {
                    *s += x;
                }
            }
            *centroid = normalize(&sum);
        }
    }

    renumber(&assignment)
}

fn seed_centroids(vectors: &[&[f32]], k: usize) -> Vec<Vec<f32>> {
    let mut seeds = vec![0usize];
    while seeds.len() < k {
        // Farthest point from its closest seed; ties go to the lower index.
        let mut best: Option<(f32, usize)> = None;
        for (i, v) in vectors.iter().enumerate() {
            if seeds.contains(&i) {
                continue;
            }
            let closest = seeds
                .iter()
                .map(|&s| cosine_similarity(v, vectors[s]))
                .fold(f32::NEG_INFINITY, f32::max);
            let distance = 1.0 - closest;
            if best.map_or(true, |(d, _)| distance > d) {
                best = Some((distance, i));
            }
        }
        match best {
            Some((_, i)) => seeds.push(i),
            None => break,
        }
    }
    seeds.into_iter().map(|s| vectors[s].to_vec()).collect()
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let sim = cosine_similarity(v, centroid);
        if sim > best_sim {
            best_sim = sim;
            best = c;
        }
    }
    best
}

fn renumber(assignment: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::new();
    assignment
        .iter()
        .map(|a| match order.iter().position(|o| o == a) {
            Some(p) => p,
            None => {
                order.push(*a);
                order.len() - 1
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(deg: f32) -> Vec<f32> {
        let r = deg.to_radians();
        vec![r.cos(), r.sin()]
    }

    #[test]
    fn splits_three_tight_blobs() {
        let owned: Vec<Vec<f32>> = [0.0, 2.0, 60.0, 62.0, 120.0, 122.0, 1.0, 61.0]
            .iter()
            .map(|d| at(*d))
            .collect();
        let vectors: Vec<&[f32]> = owned.iter().map(|v| v.as_slice()).collect();
        let parts = partition(&vectors, 3);
        assert_eq!(parts, vec![0, 0, 1, 1, 2, 2, 0, 1]);
    }

    #[test]
    fn k_is_capped_by_input() {
        let owned = [at(0.0), at(90.0)];
        let vectors: Vec<&[f32]> = owned.iter().map(|v| v.as_slice()).collect();
        let parts = partition(&vectors, 5);
        assert_eq!(parts, vec![0, 1]);
        assert!(partition(&[], 3).is_empty());
    }

    #[test]
    fn identical_vectors_stay_together() {
        let owned = vec![at(10.0); 4];
        let vectors: Vec<&[f32]> = owned.iter().map(|v| v.as_slice()).collect();
        let parts = partition(&vectors, 2);
        assert_eq!(parts, vec![0, 0, 0, 0]);
    }
}
