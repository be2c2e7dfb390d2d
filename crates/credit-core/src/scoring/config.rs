//! Scoring configuration
//!
//! [`ScoringConfig`] is the externally supplied, serde-friendly form: feature
//! names are plain strings so it can come from a config file. It is turned
//! into a [`ScoringModel`] once at startup; any malformed entry fails there,
//! before a single wallet is processed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CreditError, CreditResult};
use crate::features::Feature;

// =============================================================================
// Serde-facing configuration
// =============================================================================

/// How a raw feature value is mapped into `[0, 1]` before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Clamp to `[0, 1]`
    #[default]
    Unit,
    /// `min(x, cap) / cap`
    Ratio { cap: f64 },
    /// `min(ln(1 + x) / ln(1 + saturation), 1)`, for heavy-tailed values
    Log { saturation: f64 },
}

impl Transform {
    pub fn apply(&self, value: f64) -> f64 {
        let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
        let mapped = match *self {
            Transform::Unit => value,
            Transform::Ratio { cap } => value.min(cap) / cap,
            Transform::Log { saturation } => value.ln_1p() / saturation.ln_1p(),
        };
        mapped.clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<(), String> {
        match *self {
            Transform::Unit => Ok(()),
            Transform::Ratio { cap } if cap.is_finite() && cap > 0.0 => Ok(()),
            Transform::Log { saturation } if saturation.is_finite() && saturation > 0.0 => Ok(()),
            other => Err(format!("invalid transform {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub feature: String,
    pub weight: f64,
    #[serde(default)]
    pub transform: Transform,
}

impl WeightEntry {
    fn new(feature: Feature, weight: f64, transform: Transform) -> Self {
        Self {
            feature: feature.name().to_string(),
            weight,
            transform,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
        }
    }
}

/// One threshold rule: when `feature <comparison> threshold`, add
/// `adjustment` to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicRuleConfig {
    pub name: String,
    pub feature: String,
    pub comparison: Comparison,
    pub threshold: f64,
    pub adjustment: f64,
}

impl HeuristicRuleConfig {
    fn new(
        name: &str,
        feature: Feature,
        comparison: Comparison,
        threshold: f64,
        adjustment: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            feature: feature.name().to_string(),
            comparison,
            threshold,
            adjustment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub enabled: bool,
    /// Expected share of anomalous wallets, in `(0, 0.5]`
    pub contamination: f64,
    /// Proportional penalty for flagged wallets (0.3 = -30%)
    pub penalty: f64,
    pub trees: usize,
    pub max_samples: usize,
    /// Below this population size the detector is skipped
    pub min_population: usize,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            contamination: 0.1,
            penalty: 0.3,
            trees: 100,
            max_samples: 256,
            min_population: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Number of behavioral clusters; populations smaller than this skip
    /// clustering
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: u64,
    /// Raw feature averaged per cluster to rate its risk
    pub risk_feature: String,
    pub high_risk_threshold: f64,
    pub high_risk_adjustment: f64,
    pub low_risk_threshold: f64,
    pub low_risk_adjustment: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clusters: 5,
            max_iterations: 300,
            seed: 42,
            risk_feature: Feature::LiquidationFrequency.name().to_string(),
            high_risk_threshold: 0.1,
            high_risk_adjustment: -100.0,
            low_risk_threshold: 0.01,
            low_risk_adjustment: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub lower_percentile: f64,
    pub upper_percentile: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            lower_percentile: 1.0,
            upper_percentile: 99.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Starting point of every base score
    pub base_offset: f64,
    /// Multiplier applied to each weighted, transformed feature
    pub weight_scale: f64,
    pub weights: Vec<WeightEntry>,
    /// Evaluated in order, all effects additive
    pub heuristics: Vec<HeuristicRuleConfig>,
    /// Robust-scaled features are clipped to `±feature_clip` before the
    /// population stages see them
    pub feature_clip: f64,
    pub anomaly: AnomalyConfig,
    pub clustering: ClusterConfig,
    pub normalization: NormalizationConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_offset: 500.0,
            weight_scale: 1000.0,
            weights: default_weights(),
            heuristics: default_heuristics(),
            feature_clip: 10.0,
            anomaly: AnomalyConfig::default(),
            clustering: ClusterConfig::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}

/// Reference weight table, four pillars:
/// reliability 0.40, sophistication 0.25, volume & tenure 0.20,
/// risk management 0.15 (sums of absolute weights).
pub fn default_weights() -> Vec<WeightEntry> {
    use Feature::*;
    use Transform::*;

    vec![
        // reliability
        WeightEntry::new(RepayConsistencyScore, 0.15, Unit),
        WeightEntry::new(LiquidationFrequency, -0.10, Unit),
        WeightEntry::new(ActivityConsistencyCv, -0.05, Ratio { cap: 3.0 }),
        WeightEntry::new(HasLiquidations, -0.10, Unit),
        // sophistication
        WeightEntry::new(ActionDiversityScore, 0.08, Unit),
        WeightEntry::new(AssetConcentrationHhi, -0.05, Unit),
        WeightEntry::new(GasOptimizationScore, 0.07, Unit),
        WeightEntry::new(TransactionComplexityScore, 0.05, Unit),
        // volume & tenure
        WeightEntry::new(TotalVolume, 0.08, Log { saturation: 1e9 }),
        WeightEntry::new(TenureDays, 0.07, Log { saturation: 1095.0 }),
        WeightEntry::new(TotalTransactions, 0.05, Log { saturation: 1000.0 }),
        // risk management
        WeightEntry::new(LeverageRatio, -0.05, Ratio { cap: 2.0 }),
        WeightEntry::new(PositionSizeVariance, -0.05, Log { saturation: 1e18 }),
        WeightEntry::new(BotLikeRegularity, -0.05, Unit),
    ]
}

/// Reference rule list. Tiers are split into cumulative rules so every rule
/// stays independent.
pub fn default_heuristics() -> Vec<HeuristicRuleConfig> {
    use Comparison::*;
    use Feature::*;

    vec![
        HeuristicRuleConfig::new("established_tenure", TenureDays, Gt, 180.0, 25.0),
        HeuristicRuleConfig::new("long_tenure", TenureDays, Gt, 365.0, 25.0),
        HeuristicRuleConfig::new("regular_activity", TotalTransactions, Gt, 20.0, 15.0),
        HeuristicRuleConfig::new("high_activity", TotalTransactions, Gt, 50.0, 15.0),
        HeuristicRuleConfig::new("multi_asset", UniqueAssets, Gt, 3.0, 10.0),
        HeuristicRuleConfig::new("broad_asset_use", UniqueAssets, Gt, 5.0, 10.0),
        HeuristicRuleConfig::new("full_repayment", RepayRatio, Gte, 1.0, 40.0),
        HeuristicRuleConfig::new("liquidated", LiquidationCount, Gt, 0.0, -30.0),
        HeuristicRuleConfig::new("bot_like", BotLikeRegularity, Gt, 0.7, -1000.0),
    ]
}

// =============================================================================
// Validated model
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWeight {
    pub feature: Feature,
    pub weight: f64,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicRule {
    pub name: String,
    pub feature: Feature,
    pub comparison: Comparison,
    pub threshold: f64,
    pub adjustment: f64,
}

impl HeuristicRule {
    pub fn fires(&self, value: f64) -> bool {
        self.comparison.holds(value, self.threshold)
    }
}

/// Validated scoring configuration with feature names resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringModel {
    pub base_offset: f64,
    pub weight_scale: f64,
    pub weights: Vec<FeatureWeight>,
    pub rules: Vec<HeuristicRule>,
    pub feature_clip: f64,
    pub anomaly: AnomalyConfig,
    pub clustering: ClusterConfig,
    pub cluster_risk_feature: Feature,
    pub normalization: NormalizationConfig,
}

fn config_error(message: impl Into<String>) -> CreditError {
    CreditError::Configuration(message.into())
}

fn resolve_feature(name: &str, context: &str) -> CreditResult<Feature> {
    Feature::from_name(name)
        .ok_or_else(|| config_error(format!("{} references unknown feature '{}'", context, name)))
}

fn require_finite(value: f64, what: &str) -> CreditResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(config_error(format!("{} must be finite, got {}", what, value)))
    }
}

impl ScoringModel {
    pub fn from_config(config: &ScoringConfig) -> CreditResult<Self> {
        require_finite(config.base_offset, "base_offset")?;
        require_finite(config.weight_scale, "weight_scale")?;
        if config.weight_scale <= 0.0 {
            return Err(config_error("weight_scale must be positive"));
        }
        if !(config.feature_clip.is_finite() && config.feature_clip > 0.0) {
            return Err(config_error("feature_clip must be positive and finite"));
        }

        let weights = Self::resolve_weights(&config.weights)?;
        let rules = Self::resolve_rules(&config.heuristics)?;
        Self::validate_anomaly(&config.anomaly)?;
        let cluster_risk_feature = Self::validate_clustering(&config.clustering)?;
        Self::validate_normalization(&config.normalization)?;

        tracing::debug!(
            weights = weights.len(),
            rules = rules.len(),
            "Scoring configuration validated"
        );

        Ok(Self {
            base_offset: config.base_offset,
            weight_scale: config.weight_scale,
            weights,
            rules,
            feature_clip: config.feature_clip,
            anomaly: config.anomaly.clone(),
            clustering: config.clustering.clone(),
            cluster_risk_feature,
            normalization: config.normalization.clone(),
        })
    }

    fn resolve_weights(entries: &[WeightEntry]) -> CreditResult<Vec<FeatureWeight>> {
        if entries.is_empty() {
            return Err(config_error("weight table is empty"));
        }

        let mut seen = HashSet::new();
        let mut weights = Vec::with_capacity(entries.len());
        for entry in entries {
            let feature = resolve_feature(&entry.feature, "weight table")?;
            if !seen.insert(feature) {
                return Err(config_error(format!("duplicate weight for '{}'", feature)));
            }
            require_finite(entry.weight, &format!("weight for '{}'", feature))?;
            if feature.is_liquidation_feature() && entry.weight > 0.0 {
                return Err(config_error(format!(
                    "liquidation feature '{}' must not carry a positive weight",
                    feature
                )));
            }
            entry
                .transform
                .validate()
                .map_err(|e| config_error(format!("weight for '{}': {}", feature, e)))?;

            weights.push(FeatureWeight {
                feature,
                weight: entry.weight,
                transform: entry.transform,
            });
        }
        Ok(weights)
    }

    fn resolve_rules(entries: &[HeuristicRuleConfig]) -> CreditResult<Vec<HeuristicRule>> {
        let mut names = HashSet::new();
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.name.trim().is_empty() {
                return Err(config_error("heuristic rule with empty name"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(config_error(format!("duplicate heuristic rule '{}'", entry.name)));
            }
            let feature = resolve_feature(&entry.feature, &format!("rule '{}'", entry.name))?;
            require_finite(entry.threshold, &format!("threshold of rule '{}'", entry.name))?;
            require_finite(entry.adjustment, &format!("adjustment of rule '{}'", entry.name))?;

            rules.push(HeuristicRule {
                name: entry.name.clone(),
                feature,
                comparison: entry.comparison,
                threshold: entry.threshold,
                adjustment: entry.adjustment,
            });
        }
        Ok(rules)
    }

    fn validate_anomaly(anomaly: &AnomalyConfig) -> CreditResult<()> {
        if !(anomaly.contamination > 0.0 && anomaly.contamination <= 0.5) {
            return Err(config_error(format!(
                "anomaly contamination must be in (0, 0.5], got {}",
                anomaly.contamination
            )));
        }
        if !(0.0..=1.0).contains(&anomaly.penalty) {
            return Err(config_error(format!(
                "anomaly penalty must be in [0, 1], got {}",
                anomaly.penalty
            )));
        }
        if anomaly.trees == 0 || anomaly.max_samples < 2 {
            return Err(config_error("anomaly detector needs trees >= 1 and max_samples >= 2"));
        }
        if anomaly.min_population < 2 {
            return Err(config_error("anomaly min_population must be at least 2"));
        }
        Ok(())
    }

    fn validate_clustering(clustering: &ClusterConfig) -> CreditResult<Feature> {
        if clustering.clusters == 0 || clustering.max_iterations == 0 {
            return Err(config_error("clustering needs clusters >= 1 and max_iterations >= 1"));
        }
        require_finite(clustering.high_risk_threshold, "high_risk_threshold")?;
        require_finite(clustering.low_risk_threshold, "low_risk_threshold")?;
        require_finite(clustering.high_risk_adjustment, "high_risk_adjustment")?;
        require_finite(clustering.low_risk_adjustment, "low_risk_adjustment")?;
        if clustering.low_risk_threshold > clustering.high_risk_threshold {
            return Err(config_error("low_risk_threshold exceeds high_risk_threshold"));
        }
        resolve_feature(&clustering.risk_feature, "clustering")
    }

    fn validate_normalization(normalization: &NormalizationConfig) -> CreditResult<()> {
        let lower = normalization.lower_percentile;
        let upper = normalization.upper_percentile;
        if !(0.0..=100.0).contains(&lower) || !(0.0..=100.0).contains(&upper) || lower >= upper {
            return Err(config_error(format!(
                "normalization percentiles must satisfy 0 <= lower < upper <= 100, got [{}, {}]",
                lower, upper
            )));
        }
        Ok(())
    }
}
