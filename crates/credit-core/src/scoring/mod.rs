//! Multi-stage wallet scoring

mod anomaly;
mod cluster;
pub mod config;
mod engine;
pub mod normalize;
mod population;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::features::stats::{mean, median};
use crate::models::{ScoreCategory, WalletScore};

pub use anomaly::IsolationForest;
pub use cluster::KMeans;
pub use config::{
    AnomalyConfig, ClusterConfig, Comparison, HeuristicRuleConfig, NormalizationConfig,
    ScoringConfig, ScoringModel, Transform, WeightEntry,
};
pub use engine::{ScoringEngine, StagedScore};
pub use population::{PopulationStatistics, RobustScaler};

/// Distribution of final scores across a population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub wallets: usize,
    pub mean: f64,
    pub median: f64,
    pub min: u16,
    pub max: u16,
    pub categories: BTreeMap<ScoreCategory, usize>,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[WalletScore]) -> Self {
        let values: Vec<f64> = scores.iter().map(|s| f64::from(s.score)).collect();
        let mut categories = BTreeMap::new();
        for score in scores {
            *categories.entry(score.category).or_insert(0) += 1;
        }

        Self {
            wallets: scores.len(),
            mean: mean(&values),
            median: median(&values),
            min: scores.iter().map(|s| s.score).min().unwrap_or(0),
            max: scores.iter().map(|s| s.score).max().unwrap_or(0),
            categories,
        }
    }

    pub fn count(&self, category: ScoreCategory) -> usize {
        self.categories.get(&category).copied().unwrap_or(0)
    }
}
