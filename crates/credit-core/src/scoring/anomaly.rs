//! Isolation forest anomaly detector
//!
//! Random axis-aligned splits isolate atypical rows in fewer steps than
//! typical ones, so short average path lengths mean anomalous. Randomness
//! comes from a seeded [`StdRng`]; the same data and seed always give the same
//! forest.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use crate::features::stats::percentile;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful binary-search-tree lookup over `n`
/// points; normalizes path lengths across subsample sizes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn path_length(&self, point: &[f64], depth: usize) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if point[*feature] < *threshold {
                    left.path_length(point, depth + 1)
                } else {
                    right.path_length(point, depth + 1)
                }
            }
        }
    }
}

struct TreeBuilder<'a> {
    data: &'a [Vec<f64>],
    max_depth: usize,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> Node {
        if depth >= self.max_depth || rows.len() <= 1 {
            return Node::Leaf { size: rows.len() };
        }

        // Only features that still vary inside this node can split it.
        let width = self.data[rows[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..width)
            .filter_map(|f| {
                let (min, max) = rows.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), r| {
                        let v = self.data[*r][f];
                        (lo.min(v), hi.max(v))
                    },
                );
                (max > min).then_some((f, min, max))
            })
            .collect();

        if candidates.is_empty() {
            return Node::Leaf { size: rows.len() };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|r| self.data[*r][feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(self.build(left, depth + 1, rng)),
            right: Box::new(self.build(right, depth + 1, rng)),
        }
    }
}

/// A fitted isolation forest plus its decision threshold.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Fit on `data` (rows of equal width) and place the decision threshold so
    /// that roughly `contamination` of the training rows are flagged.
    pub fn fit(
        data: &[Vec<f64>],
        trees: usize,
        max_samples: usize,
        contamination: f64,
        seed: u64,
    ) -> Self {
        if data.is_empty() {
            return Self {
                trees: Vec::new(),
                sample_size: 0,
                threshold: f64::INFINITY,
            };
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = max_samples.min(data.len());
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let builder = TreeBuilder { data, max_depth };

        let trees = (0..trees)
            .map(|_| {
                let rows = index::sample(&mut rng, data.len(), sample_size).into_vec();
                builder.build(rows, 0, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };

        let scores: Vec<f64> = data.iter().map(|row| forest.score(row)).collect();
        forest.threshold = percentile(&scores, 100.0 * (1.0 - contamination));
        forest
    }

    /// Anomaly score in `(0, 1]`; higher is more anomalous.
    pub fn score(&self, point: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let mean_path = self
            .trees
            .iter()
            .map(|t| t.path_length(point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let normalizer = average_path_length(self.sample_size).max(f64::EPSILON);
        2f64.powf(-mean_path / normalizer)
    }

    pub fn is_anomalous(&self, point: &[f64]) -> bool {
        self.score(point) > self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let jitter = (i % 7) as f64 * 0.01;
                vec![1.0 + jitter, 2.0 - jitter, 0.5 + jitter]
            })
            .collect();
        data.push(vec![9.0, -7.0, 8.0]);
        data
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn test_outlier_scores_highest_and_is_flagged() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 256, 0.1, 42);

        let outlier = data.last().unwrap();
        let outlier_score = forest.score(outlier);
        for row in &data[..data.len() - 1] {
            assert!(forest.score(row) < outlier_score);
        }
        assert!(forest.is_anomalous(outlier));
    }

    #[test]
    fn test_flag_share_respects_contamination() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 256, 0.1, 42);
        let flagged = data.iter().filter(|r| forest.is_anomalous(r)).count();
        assert!(flagged >= 1 && flagged <= 5, "flagged {}", flagged);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 50, 32, 0.1, 7);
        let b = IsolationForest::fit(&data, 50, 32, 0.1, 7);
        for row in &data {
            assert_eq!(a.score(row), b.score(row));
        }
    }

    #[test]
    fn test_identical_rows_are_not_flagged() {
        let data = vec![vec![1.0, 1.0]; 12];
        let forest = IsolationForest::fit(&data, 20, 256, 0.1, 42);
        assert!(data.iter().all(|r| !forest.is_anomalous(r)));
    }
}
