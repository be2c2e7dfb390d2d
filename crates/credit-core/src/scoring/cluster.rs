//! k-means behavioral clustering
//!
//! k-means++ seeding from a seeded [`StdRng`] followed by Lloyd iterations.
//! Deterministic for a given seed and row order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[derive(Debug, Clone)]
pub struct KMeans {
    centroids: Vec<Vec<f64>>,
    iterations: usize,
}

impl KMeans {
    /// Fit `k` centroids. Requires `data.len() >= k >= 1`; callers fall back
    /// to no clustering otherwise.
    pub fn fit(data: &[Vec<f64>], k: usize, max_iterations: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut centroids = Self::seed_centroids(data, k, &mut rng);
        let mut labels = vec![usize::MAX; data.len()];
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;

            let mut changed = false;
            for (row, label) in data.iter().zip(labels.iter_mut()) {
                let nearest = nearest_centroid(&centroids, row);
                if nearest != *label {
                    *label = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let width = data[0].len();
            let mut sums = vec![vec![0.0; width]; k];
            let mut counts = vec![0usize; k];
            for (row, label) in data.iter().zip(&labels) {
                counts[*label] += 1;
                for (sum, value) in sums[*label].iter_mut().zip(row) {
                    *sum += value;
                }
            }
            for (cluster, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // An empty cluster keeps its previous centroid.
                if count > 0 {
                    centroids[cluster] = sum.into_iter().map(|s| s / count as f64).collect();
                }
            }
        }

        Self {
            centroids,
            iterations,
        }
    }

    /// k-means++: each further centroid is drawn with probability
    /// proportional to its squared distance from the nearest chosen one.
    fn seed_centroids(data: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut centroids = vec![data[rng.gen_range(0..data.len())].clone()];

        while centroids.len() < k {
            let distances: Vec<f64> = data
                .iter()
                .map(|row| {
                    centroids
                        .iter()
                        .map(|c| squared_distance(c, row))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let total: f64 = distances.iter().sum();

            let next = if total > 0.0 && total.is_finite() {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = data.len() - 1;
                for (i, d) in distances.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                chosen
            } else {
                // Every row coincides with a centroid already.
                rng.gen_range(0..data.len())
            };
            centroids.push(data[next].clone());
        }
        centroids
    }

    pub fn predict(&self, point: &[f64]) -> usize {
        nearest_centroid(&self.centroids, point)
    }

    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Index of the closest centroid; ties go to the lowest index.
fn nearest_centroid(centroids: &[Vec<f64>], point: &[f64]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(centroid, point);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}
