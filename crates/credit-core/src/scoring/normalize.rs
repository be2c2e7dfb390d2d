//! Stage 4: percentile normalization onto the published score range.

use crate::features::stats::percentile_sorted;
use crate::models::{MAX_SCORE, MIN_SCORE};

/// Clip bounds taken from the pre-normalization scores of one population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileBounds {
    pub lower: f64,
    pub upper: f64,
}

impl PercentileBounds {
    /// `None` when the population is too small or too uniform to rescale; the
    /// caller then keeps raw scores.
    pub fn fit(scores: &[f64], lower_percentile: f64, upper_percentile: f64) -> Option<Self> {
        if scores.len() < 2 {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let lower = percentile_sorted(&sorted, lower_percentile);
        let upper = percentile_sorted(&sorted, upper_percentile);
        (upper > lower && lower.is_finite() && upper.is_finite())
            .then_some(Self { lower, upper })
    }

    pub fn rescale(&self, score: f64) -> f64 {
        let span = f64::from(MAX_SCORE - MIN_SCORE);
        let clipped = score.clamp(self.lower, self.upper);
        f64::from(MIN_SCORE) + (clipped - self.lower) / (self.upper - self.lower) * span
    }
}

/// Round and clamp onto `[MIN_SCORE, MAX_SCORE]`. Non-finite input stays
/// non-finite so the caller can reject it.
pub fn to_score_range(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    value
        .round()
        .clamp(f64::from(MIN_SCORE), f64::from(MAX_SCORE))
}

/// Normalize a whole population. Order is preserved.
pub fn normalize(scores: &[f64], lower_percentile: f64, upper_percentile: f64) -> Vec<f64> {
    match PercentileBounds::fit(scores, lower_percentile, upper_percentile) {
        Some(bounds) => {
            tracing::debug!(
                lower = bounds.lower,
                upper = bounds.upper,
                "Normalizing against percentile bounds"
            );
            scores
                .iter()
                .map(|s| to_score_range(bounds.rescale(*s)))
                .collect()
        }
        None => {
            tracing::debug!(
                population = scores.len(),
                "Degenerate score distribution, keeping raw scores"
            );
            scores.iter().map(|s| to_score_range(*s)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spreads_onto_full_range() {
        let scores: Vec<f64> = (0..101).map(|i| 400.0 + i as f64).collect();
        let normalized = normalize(&scores, 1.0, 99.0);

        assert_eq!(normalized[0], 0.0);
        assert_eq!(normalized[1], 0.0);
        assert_eq!(normalized[50], 500.0);
        assert_eq!(normalized[99], 1000.0);
        assert_eq!(normalized[100], 1000.0);
    }

    #[test]
    fn test_preserves_order() {
        let scores = vec![300.0, -50.0, 820.0, 610.0, 610.0];
        let normalized = normalize(&scores, 1.0, 99.0);
        assert!(normalized[1] <= normalized[0]);
        assert!(normalized[0] <= normalized[3]);
        assert_eq!(normalized[3], normalized[4]);
        assert!(normalized[3] <= normalized[2]);
    }

    #[test]
    fn test_single_score_falls_back_to_identity() {
        assert_eq!(normalize(&[612.4], 1.0, 99.0), vec![612.0]);
        assert_eq!(normalize(&[-80.0], 1.0, 99.0), vec![0.0]);
        assert_eq!(normalize(&[1500.0], 1.0, 99.0), vec![1000.0]);
    }

    #[test]
    fn test_uniform_scores_fall_back_to_identity() {
        assert_eq!(normalize(&[450.0, 450.0, 450.0], 1.0, 99.0), vec![450.0; 3]);
    }

    #[test]
    fn test_non_finite_is_kept_for_rejection() {
        assert!(to_score_range(f64::NAN).is_nan());
    }
}
