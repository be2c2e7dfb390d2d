//! Behavioral feature catalogue
//!
//! Every wallet is described by the same closed set of named features. Names
//! are the stable identifiers used by the weight table and heuristic rules, so
//! they never change once published. Each feature carries the range its value
//! is clamped to before leaving the extractor.

mod extractor;
mod ledger;
pub mod stats;

use std::fmt;

pub use extractor::extract_features;
pub use ledger::{LedgerOutcome, RepaymentLedger};

macro_rules! feature_catalogue {
    ($($variant:ident => $name:literal, [$min:expr, $max:expr];)+) => {
        /// A named behavioral feature.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Feature {
            $($variant,)+
        }

        impl Feature {
            pub const ALL: &'static [Feature] = &[$(Feature::$variant,)+];
            pub const COUNT: usize = Feature::ALL.len();

            pub fn name(&self) -> &'static str {
                match self {
                    $(Feature::$variant => $name,)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Feature::$variant),)+
                    _ => None,
                }
            }

            /// Inclusive range every extracted value is clamped to
            pub fn range(&self) -> (f64, f64) {
                match self {
                    $(Feature::$variant => ($min, $max),)+
                }
            }
        }
    };
}

feature_catalogue! {
    // basic
    TotalTransactions => "total_transactions", [0.0, 1e9];
    TotalVolume => "total_volume", [0.0, 1e18];
    AvgTransactionSize => "avg_transaction_size", [0.0, 1e18];
    MedianTransactionSize => "median_transaction_size", [0.0, 1e18];
    MaxTransactionSize => "max_transaction_size", [0.0, 1e18];
    MinTransactionSize => "min_transaction_size", [0.0, 1e18];
    TransactionStd => "transaction_std", [0.0, 1e18];
    UniqueAssets => "unique_assets", [0.0, 1e6];
    TotalGasUsed => "total_gas_used", [0.0, 1e15];
    AvgGasPerTx => "avg_gas_per_tx", [0.0, 1e15];

    // financial
    DepositCount => "deposit_count", [0.0, 1e9];
    BorrowCount => "borrow_count", [0.0, 1e9];
    RepayCount => "repay_count", [0.0, 1e9];
    RedeemCount => "redeem_count", [0.0, 1e9];
    LiquidationCount => "liquidation_count", [0.0, 1e9];
    DepositVolume => "deposit_volume", [0.0, 1e18];
    BorrowVolume => "borrow_volume", [0.0, 1e18];
    RepayVolume => "repay_volume", [0.0, 1e18];
    RedeemVolume => "redeem_volume", [0.0, 1e18];
    LiquidationVolume => "liquidation_volume", [0.0, 1e18];
    AvgDepositSize => "avg_deposit_size", [0.0, 1e18];
    AvgBorrowSize => "avg_borrow_size", [0.0, 1e18];
    AvgRepaySize => "avg_repay_size", [0.0, 1e18];
    NetDepositVolume => "net_deposit_volume", [-1e18, 1e18];
    LeverageRatio => "leverage_ratio", [0.0, 1000.0];
    RepayRatio => "repay_ratio", [0.0, 2.0];
    AssetConcentrationHhi => "asset_concentration_hhi", [0.0, 1.0];
    AvgPositionSize => "avg_position_size", [0.0, 1e18];

    // risk
    LiquidationFrequency => "liquidation_frequency", [0.0, 1.0];
    LiquidationVolumeRatio => "liquidation_volume_ratio", [0.0, 1.0];
    HasLiquidations => "has_liquidations", [0.0, 1.0];
    RepayConsistencyScore => "repay_consistency_score", [0.0, 1.0];
    UnresolvedBorrowCount => "unresolved_borrow_count", [0.0, 1e9];
    PositionSizeVariance => "position_size_variance", [0.0, 1e36];
    MaxSinglePositionRatio => "max_single_position_ratio", [0.0, 1.0];

    // temporal
    TenureDays => "tenure_days", [0.0, 1e6];
    ActivityFrequency => "activity_frequency", [0.0, 1e9];
    ActivityConsistencyCv => "activity_consistency_cv", [0.0, 1e3];
    DailyActivityCv => "daily_activity_cv", [0.0, 1e3];
    AvgTimeBetweenTxHours => "avg_time_between_tx_hours", [0.0, 1e7];
    MedianTimeBetweenTxHours => "median_time_between_tx_hours", [0.0, 1e7];
    MaxInactiveDays => "max_inactive_days", [0.0, 1e6];
    DaysActive => "days_active", [0.0, 1e6];
    WeekendActivityRatio => "weekend_activity_ratio", [0.0, 1.0];
    BurstRatio => "burst_ratio", [0.0, 1.0];

    // network / sophistication
    GasEfficiencyScore => "gas_efficiency_score", [0.0, 1e18];
    GasOptimizationScore => "gas_optimization_score", [0.0, 1.0];
    UniqueGasPrices => "unique_gas_prices", [0.0, 1e9];
    ActionDiversityScore => "action_diversity_score", [0.0, 1.0];
    ActionEntropy => "action_entropy", [0.0, 1.0];
    ActionTransitionRate => "action_transition_rate", [0.0, 1.0];
    TransactionComplexityScore => "transaction_complexity_score", [0.0, 1.0];
    BotLikeRegularity => "bot_like_regularity", [0.0, 1.0];
}

impl Feature {
    /// Features that describe liquidations. Their weights may never be
    /// positive: more liquidations must not raise a base score.
    pub fn is_liquidation_feature(&self) -> bool {
        matches!(
            self,
            Feature::LiquidationCount
                | Feature::LiquidationVolume
                | Feature::LiquidationFrequency
                | Feature::LiquidationVolumeRatio
                | Feature::HasLiquidations
        )
    }

    /// Clamp a raw value into this feature's range. Non-finite values map
    /// to 0 before clamping.
    pub fn sanitize(&self, value: f64) -> f64 {
        let (min, max) = self.range();
        let value = if value.is_finite() { value } else { 0.0 };
        value.clamp(min, max)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-width behavioral description of one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub wallet_address: String,
    values: [f64; Feature::COUNT],
}

impl FeatureVector {
    /// All features at 0.0; the extractor fills the rest in.
    pub fn zeroed(wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            values: [0.0; Feature::COUNT],
        }
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature as usize]
    }

    /// Store a value, clamped into the feature's documented range.
    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values[feature as usize] = feature.sanitize(value);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().map(move |f| (*f, self.get(*f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_and_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for feature in Feature::ALL {
            assert_eq!(Feature::from_name(feature.name()), Some(*feature));
            assert!(seen.insert(feature.name()), "duplicate name {}", feature);
        }
        assert_eq!(Feature::from_name("credit_vibes"), None);
    }

    #[test]
    fn test_set_sanitizes() {
        let mut vector = FeatureVector::zeroed("0xabc");
        vector.set(Feature::RepayRatio, 7.5);
        vector.set(Feature::LeverageRatio, f64::INFINITY);
        vector.set(Feature::BotLikeRegularity, f64::NAN);
        vector.set(Feature::NetDepositVolume, -250.0);

        assert_eq!(vector.get(Feature::RepayRatio), 2.0);
        assert_eq!(vector.get(Feature::LeverageRatio), 0.0);
        assert_eq!(vector.get(Feature::BotLikeRegularity), 0.0);
        assert_eq!(vector.get(Feature::NetDepositVolume), -250.0);
    }

    #[test]
    fn test_catalogue_width() {
        assert_eq!(Feature::COUNT, Feature::ALL.len());
        assert!(Feature::COUNT >= 50);
    }
}
