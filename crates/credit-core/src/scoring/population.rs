//! Population-derived statistics
//!
//! Everything in stages 2 and 4 that depends on the cohort being scored is
//! fitted here once per scoring call and then applied per wallet.

use crate::features::stats::{mean, percentile_sorted};
use crate::features::{Feature, FeatureVector};
use crate::matrix::FeatureMatrix;

use super::anomaly::IsolationForest;
use super::cluster::KMeans;
use super::config::ScoringModel;

/// Per-feature median / IQR scaling, robust to the heavy tails of volume
/// features.
#[derive(Debug, Clone)]
pub struct RobustScaler {
    centers: Vec<f64>,
    scales: Vec<f64>,
    clip: f64,
}

impl RobustScaler {
    pub fn fit(rows: &[FeatureVector], clip: f64) -> Self {
        let mut centers = Vec::with_capacity(Feature::COUNT);
        let mut scales = Vec::with_capacity(Feature::COUNT);

        for feature in Feature::ALL {
            let mut column: Vec<f64> = rows.iter().map(|r| r.get(*feature)).collect();
            column.sort_by(|a, b| a.total_cmp(b));

            let q1 = percentile_sorted(&column, 25.0);
            let q3 = percentile_sorted(&column, 75.0);
            let iqr = q3 - q1;

            centers.push(percentile_sorted(&column, 50.0));
            // A constant column is centred but left unscaled.
            scales.push(if iqr > 0.0 && iqr.is_finite() { iqr } else { 1.0 });
        }

        Self {
            centers,
            scales,
            clip,
        }
    }

    pub fn transform(&self, row: &FeatureVector) -> Vec<f64> {
        row.values()
            .iter()
            .zip(self.centers.iter().zip(&self.scales))
            .map(|(value, (center, scale))| {
                let scaled = (value - center) / scale;
                if scaled.is_finite() {
                    scaled.clamp(-self.clip, self.clip)
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Fitted cluster model plus the additive adjustment assigned to each
/// cluster.
#[derive(Debug, Clone)]
struct ClusterProfile {
    model: KMeans,
    adjustments: Vec<f64>,
}

impl ClusterProfile {
    fn adjustment(&self, cluster: usize) -> f64 {
        self.adjustments.get(cluster).copied().unwrap_or(0.0)
    }
}

/// Statistics fitted on one scoring population.
#[derive(Debug, Clone)]
pub struct PopulationStatistics {
    scaler: RobustScaler,
    forest: Option<IsolationForest>,
    clusters: Option<ClusterProfile>,
}

impl PopulationStatistics {
    pub fn fit(matrix: &FeatureMatrix, model: &ScoringModel) -> Self {
        let rows = matrix.rows();
        let scaler = RobustScaler::fit(rows, model.feature_clip);
        let scaled: Vec<Vec<f64>> = rows.iter().map(|r| scaler.transform(r)).collect();

        let anomaly = &model.anomaly;
        let forest = if anomaly.enabled && rows.len() >= anomaly.min_population {
            let forest = IsolationForest::fit(
                &scaled,
                anomaly.trees,
                anomaly.max_samples,
                anomaly.contamination,
                anomaly.seed,
            );
            tracing::debug!(threshold = forest.threshold(), "Anomaly detector fitted");
            Some(forest)
        } else {
            tracing::debug!(
                population = rows.len(),
                min_population = anomaly.min_population,
                "Anomaly detection skipped"
            );
            None
        };

        let clusters = Self::fit_clusters(rows, &scaled, model);

        Self {
            scaler,
            forest,
            clusters,
        }
    }

    fn fit_clusters(
        rows: &[FeatureVector],
        scaled: &[Vec<f64>],
        model: &ScoringModel,
    ) -> Option<ClusterProfile> {
        let config = &model.clustering;
        if !config.enabled || rows.len() < config.clusters {
            tracing::debug!(
                population = rows.len(),
                clusters = config.clusters,
                "Behavioral clustering skipped"
            );
            return None;
        }

        let kmeans = KMeans::fit(scaled, config.clusters, config.max_iterations, config.seed);

        let mut members: Vec<Vec<f64>> = vec![Vec::new(); config.clusters];
        for (row, point) in rows.iter().zip(scaled) {
            members[kmeans.predict(point)].push(row.get(model.cluster_risk_feature));
        }

        let risk_means: Vec<f64> = members.iter().map(|m| mean(m)).collect();
        let adjustments: Vec<f64> = members
            .iter()
            .zip(&risk_means)
            .map(|(m, risk)| {
                if m.is_empty() {
                    0.0
                } else if *risk > config.high_risk_threshold {
                    config.high_risk_adjustment
                } else if *risk < config.low_risk_threshold {
                    config.low_risk_adjustment
                } else {
                    0.0
                }
            })
            .collect();

        for (cluster, (m, risk)) in members.iter().zip(&risk_means).enumerate() {
            tracing::debug!(
                cluster,
                wallets = m.len(),
                mean_risk = *risk,
                adjustment = adjustments[cluster],
                "Cluster profile"
            );
        }
        tracing::info!(
            clusters = config.clusters,
            iterations = kmeans.iterations(),
            "Behavioral clustering complete"
        );

        Some(ClusterProfile {
            model: kmeans,
            adjustments,
        })
    }

    pub fn scale(&self, row: &FeatureVector) -> Vec<f64> {
        self.scaler.transform(row)
    }

    /// `None` when anomaly detection was skipped for this population.
    pub fn is_anomalous(&self, row: &FeatureVector) -> Option<bool> {
        self.forest
            .as_ref()
            .map(|forest| forest.is_anomalous(&self.scale(row)))
    }

    /// Cluster index and its adjustment; `None` when clustering was skipped.
    pub fn cluster_of(&self, row: &FeatureVector) -> Option<(usize, f64)> {
        self.clusters.as_ref().map(|profile| {
            let cluster = profile.model.predict(&self.scale(row));
            (cluster, profile.adjustment(cluster))
        })
    }
}
