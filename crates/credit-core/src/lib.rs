//! # Credit Core
//!
//! Feature extraction and scoring engine for lending-protocol wallets.
//!
//! The pipeline turns a canonical transaction table into one behavioral
//! [`FeatureVector`] per wallet, then scores the whole population into
//! bounded [`WalletScore`]s in `[0, 1000]`:
//!
//! 1. weighted base score over a curated feature subset
//! 2. population-relative anomaly and cluster adjustments
//! 3. additive heuristic rules
//! 4. percentile clipping and rescaling
//!
//! Scores are population-relative: the same feature vector can land on a
//! different final score when the surrounding cohort changes.

pub mod error;
pub mod features;
pub mod matrix;
pub mod models;
pub mod scoring;

pub use error::*;
pub use features::{extract_features, Feature, FeatureVector};
pub use matrix::{group_by_wallet, FeatureMatrix, FeatureMatrixBuilder};
pub use models::*;
pub use scoring::{
    PopulationStatistics, ScoreSummary, ScoringConfig, ScoringEngine, ScoringModel, StagedScore,
};
