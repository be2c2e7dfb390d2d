//! Scoring engine
//!
//! Runs the four stages over a feature matrix:
//!
//! 1. weighted base score, independent of the rest of the population
//! 2. anomaly penalty and cluster adjustment, fitted on the population
//! 3. heuristic rules
//! 4. percentile normalization onto `[0, 1000]`
//!
//! Stages 1 to 3 are exposed per wallet through [`ScoringEngine::score_wallet`]
//! so callers can inspect how a score was assembled.

use std::collections::BTreeMap;

use crate::error::{CreditError, CreditResult};
use crate::features::FeatureVector;
use crate::matrix::FeatureMatrix;
use crate::models::{ScoreCategory, WalletScore, MAX_SCORE, MIN_SCORE};

use super::config::{ScoringConfig, ScoringModel};
use super::normalize::normalize;
use super::population::PopulationStatistics;

/// Intermediate result of stages 1 to 3 for one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedScore {
    pub wallet_address: String,
    pub base_score: f64,
    /// `None` when anomaly detection was skipped
    pub anomalous: Option<bool>,
    /// Points removed by the anomaly stage (0 when not flagged)
    pub anomaly_penalty: f64,
    pub cluster: Option<usize>,
    pub cluster_adjustment: f64,
    /// Score after stage 2
    pub risk_adjusted_score: f64,
    /// Fired rules with their adjustments, in evaluation order
    pub rule_adjustments: Vec<(String, f64)>,
    /// Score after stage 3
    pub pre_normalization_score: f64,
}

impl StagedScore {
    fn diagnostics(&self) -> BTreeMap<String, f64> {
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("base_score".to_string(), self.base_score);
        diagnostics.insert("anomaly_penalty".to_string(), self.anomaly_penalty);
        diagnostics.insert("cluster_adjustment".to_string(), self.cluster_adjustment);
        diagnostics.insert("risk_adjusted_score".to_string(), self.risk_adjusted_score);
        for (name, adjustment) in &self.rule_adjustments {
            diagnostics.insert(format!("rule:{}", name), *adjustment);
        }
        diagnostics.insert(
            "pre_normalization_score".to_string(),
            self.pre_normalization_score,
        );
        diagnostics
    }
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    model: ScoringModel,
}

impl ScoringEngine {
    /// Validate `config` and build an engine. Configuration errors surface
    /// here, before any wallet is scored.
    pub fn new(config: &ScoringConfig) -> CreditResult<Self> {
        Ok(Self::from_model(ScoringModel::from_config(config)?))
    }

    pub fn from_model(model: ScoringModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &ScoringModel {
        &self.model
    }

    /// Stage 1: `base_offset + Σ weight · transform(feature) · weight_scale`.
    pub fn base_score(&self, features: &FeatureVector) -> f64 {
        let weighted: f64 = self
            .model
            .weights
            .iter()
            .map(|w| w.weight * w.transform.apply(features.get(w.feature)))
            .sum();
        self.model.base_offset + weighted * self.model.weight_scale
    }

    pub fn fit_population(&self, matrix: &FeatureMatrix) -> PopulationStatistics {
        PopulationStatistics::fit(matrix, &self.model)
    }

    /// Stages 1 to 3 for one wallet against already fitted population
    /// statistics.
    pub fn score_wallet(
        &self,
        features: &FeatureVector,
        population: &PopulationStatistics,
    ) -> StagedScore {
        let base_score = self.base_score(features);

        let anomalous = population.is_anomalous(features);
        let anomaly_penalty = if anomalous == Some(true) {
            base_score * self.model.anomaly.penalty
        } else {
            0.0
        };

        let (cluster, cluster_adjustment) = match population.cluster_of(features) {
            Some((cluster, adjustment)) => (Some(cluster), adjustment),
            None => (None, 0.0),
        };

        let risk_adjusted_score = base_score - anomaly_penalty + cluster_adjustment;

        let rule_adjustments: Vec<(String, f64)> = self
            .model
            .rules
            .iter()
            .filter(|rule| rule.fires(features.get(rule.feature)))
            .map(|rule| (rule.name.clone(), rule.adjustment))
            .collect();
        let pre_normalization_score =
            risk_adjusted_score + rule_adjustments.iter().map(|(_, a)| a).sum::<f64>();

        StagedScore {
            wallet_address: features.wallet_address.clone(),
            base_score,
            anomalous,
            anomaly_penalty,
            cluster,
            cluster_adjustment,
            risk_adjusted_score,
            rule_adjustments,
            pre_normalization_score,
        }
    }

    /// Score a whole population. Output order follows the matrix rows.
    pub fn score_population(&self, matrix: &FeatureMatrix) -> CreditResult<Vec<WalletScore>> {
        if matrix.is_empty() {
            return Err(CreditError::EmptyPopulation);
        }

        let population = self.fit_population(matrix);
        let staged: Vec<StagedScore> = matrix
            .rows()
            .iter()
            .map(|row| self.score_wallet(row, &population))
            .collect();

        let flagged = staged.iter().filter(|s| s.anomalous == Some(true)).count();
        tracing::info!(
            wallets = staged.len(),
            anomalies = flagged,
            "Population adjustments applied"
        );

        let raw: Vec<f64> = staged.iter().map(|s| s.pre_normalization_score).collect();
        let normalization = &self.model.normalization;
        let normalized = normalize(
            &raw,
            normalization.lower_percentile,
            normalization.upper_percentile,
        );

        staged
            .into_iter()
            .zip(normalized)
            .map(|(staged, value)| Self::finalize(staged, value))
            .collect()
    }

    fn finalize(staged: StagedScore, value: f64) -> CreditResult<WalletScore> {
        let in_range = value.is_finite()
            && value >= f64::from(MIN_SCORE)
            && value <= f64::from(MAX_SCORE);
        if !in_range {
            tracing::error!(wallet = %staged.wallet_address, value, "Score out of range");
            return Err(CreditError::ScoreOutOfRange {
                wallet: staged.wallet_address,
                value,
            });
        }

        let score = value as u16;
        Ok(WalletScore {
            diagnostics: staged.diagnostics(),
            wallet_address: staged.wallet_address,
            score,
            category: ScoreCategory::from_score(score),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(&ScoringConfig::default()).unwrap()
    }

    fn reliable(wallet: &str) -> FeatureVector {
        let mut v = FeatureVector::zeroed(wallet);
        v.set(Feature::RepayConsistencyScore, 1.0);
        v.set(Feature::ActionDiversityScore, 0.6);
        v.set(Feature::GasOptimizationScore, 0.9);
        v.set(Feature::TotalVolume, 50_000.0);
        v.set(Feature::TenureDays, 200.0);
        v.set(Feature::TotalTransactions, 30.0);
        v.set(Feature::RepayRatio, 1.0);
        v.set(Feature::AssetConcentrationHhi, 0.5);
        v
    }

    #[test]
    fn test_zeroed_vector_scores_the_offset() {
        let v = FeatureVector::zeroed("0x0");
        assert_eq!(engine().base_score(&v), 500.0);
    }

    #[test]
    fn test_liquidations_never_raise_base() {
        let engine = engine();
        let clean = reliable("0xa");
        let mut liquidated = clean.clone();
        liquidated.set(Feature::LiquidationFrequency, 0.3);
        liquidated.set(Feature::HasLiquidations, 1.0);
        liquidated.set(Feature::LiquidationCount, 3.0);

        assert!(engine.base_score(&liquidated) < engine.base_score(&clean));
    }

    #[test]
    fn test_rules_are_additive_and_recorded() {
        let engine = engine();
        let matrix = FeatureMatrix::from_rows(vec![reliable("0xa")]);
        let population = engine.fit_population(&matrix);
        let staged = engine.score_wallet(&matrix.rows()[0], &population);

        let names: Vec<&str> = staged.rule_adjustments.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["established_tenure", "regular_activity", "full_repayment"]);
        assert_eq!(staged.anomalous, None);
        assert_eq!(staged.cluster, None);
        assert!((staged.pre_normalization_score - (staged.base_score + 80.0)).abs() < 1e-9);
    }

    #[test]
    fn test_flagged_outlier_loses_penalty_share() {
        let engine = engine();
        let mut rows: Vec<FeatureVector> = (0..19)
            .map(|i| {
                let mut v = reliable(&format!("0x{:02}", i));
                v.set(Feature::TotalVolume, 50_000.0 + 1_000.0 * i as f64);
                v
            })
            .collect();
        let mut odd = reliable("0xodd");
        odd.set(Feature::TotalVolume, 900_000.0);
        odd.set(Feature::LeverageRatio, 5.0);
        odd.set(Feature::LiquidationFrequency, 0.5);
        odd.set(Feature::HasLiquidations, 1.0);
        odd.set(Feature::LiquidationCount, 3.0);
        rows.push(odd);

        let matrix = FeatureMatrix::from_rows(rows);
        let population = engine.fit_population(&matrix);
        let staged: Vec<StagedScore> = matrix
            .rows()
            .iter()
            .map(|row| engine.score_wallet(row, &population))
            .collect();

        let outlier = &staged[19];
        assert_eq!(outlier.anomalous, Some(true));
        assert!((outlier.anomaly_penalty - 0.3 * outlier.base_score).abs() < 1e-9);
        assert_eq!(outlier.cluster_adjustment, -100.0);
        assert!(
            (outlier.risk_adjusted_score
                - (outlier.base_score - outlier.anomaly_penalty + outlier.cluster_adjustment))
                .abs()
                < 1e-9
        );

        // Everyone else sits in liquidation-free clusters.
        for score in &staged[..19] {
            assert_ne!(score.cluster, outlier.cluster);
            assert_eq!(score.cluster_adjustment, 50.0);
            assert!(
                (score.risk_adjusted_score
                    - (score.base_score - score.anomaly_penalty + 50.0))
                    .abs()
                    < 1e-9
            );
        }

        let clean = staged[..19]
            .iter()
            .find(|s| s.anomalous == Some(false))
            .unwrap();
        assert_eq!(clean.anomaly_penalty, 0.0);
        assert_eq!(clean.risk_adjusted_score, clean.base_score + 50.0);
    }

    #[test]
    fn test_single_wallet_population_scores() {
        let scores = engine()
            .score_population(&FeatureMatrix::from_rows(vec![reliable("0xa")]))
            .unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[0].score <= MAX_SCORE);
        assert_eq!(scores[0].diagnostics["rule:full_repayment"], 40.0);
    }

    #[test]
    fn test_empty_population_is_an_error() {
        let err = engine().score_population(&FeatureMatrix::default()).unwrap_err();
        assert!(matches!(err, CreditError::EmptyPopulation));
    }

    #[test]
    fn test_non_finite_score_is_rejected() {
        let staged = StagedScore {
            wallet_address: "0xbad".to_string(),
            base_score: f64::NAN,
            anomalous: None,
            anomaly_penalty: 0.0,
            cluster: None,
            cluster_adjustment: 0.0,
            risk_adjusted_score: f64::NAN,
            rule_adjustments: Vec::new(),
            pre_normalization_score: f64::NAN,
        };
        let err = ScoringEngine::finalize(staged, f64::NAN).unwrap_err();
        assert!(matches!(err, CreditError::ScoreOutOfRange { wallet, .. } if wallet == "0xbad"));
    }
}
