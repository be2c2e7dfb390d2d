use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{Datelike, NaiveDate, Weekday};

use super::ledger::RepaymentLedger;
use super::stats::{
    coefficient_of_variation, mean, median, ratio_or, sample_std, sample_variance,
};
use super::{Feature, FeatureVector};
use crate::models::{Action, Transaction, WalletHistory};

const ACTION_KINDS: f64 = 5.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Gas optimization score for wallets without any gas data
const NO_GAS_DATA_SCORE: f64 = 0.5;

/// Aggregates shared by several feature groups, computed in one pass.
struct WalletAggregates<'a> {
    transactions: &'a [Transaction],
    usd: Vec<f64>,
    /// Seconds between consecutive transactions.
    gaps: Vec<f64>,
    total_volume: f64,
    action_counts: [usize; 5],
    action_volumes: [f64; 5],
    /// Per-asset USD volume. Ordered so float sums are reproducible.
    asset_volumes: BTreeMap<&'a str, f64>,
}

impl<'a> WalletAggregates<'a> {
    fn new(transactions: &'a [Transaction]) -> Self {
        let mut usd = Vec::with_capacity(transactions.len());
        let mut action_counts = [0usize; 5];
        let mut action_volumes = [0.0f64; 5];
        let mut asset_volumes: BTreeMap<&str, f64> = BTreeMap::new();

        for tx in transactions {
            let value = tx.usd();
            usd.push(value);
            action_counts[tx.action.index()] += 1;
            action_volumes[tx.action.index()] += value;
            *asset_volumes.entry(tx.asset.as_str()).or_default() += value;
        }

        let gaps = transactions
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
            .collect();

        let total_volume = usd.iter().sum();
        Self {
            transactions,
            usd,
            gaps,
            total_volume,
            action_counts,
            action_volumes,
            asset_volumes,
        }
    }

    fn len(&self) -> usize {
        self.transactions.len()
    }

    fn count(&self, action: Action) -> usize {
        self.action_counts[action.index()]
    }

    fn volume(&self, action: Action) -> f64 {
        self.action_volumes[action.index()]
    }

    fn position_sizes(&self) -> Vec<f64> {
        self.asset_volumes.values().copied().collect()
    }
}

/// Map one wallet history to its feature vector.
///
/// Pure function of the history. Works for any history length, including
/// zero and one transaction, and never yields a non-finite value.
pub fn extract_features(history: &WalletHistory) -> FeatureVector {
    let mut vector = FeatureVector::zeroed(history.wallet_address.clone());

    if history.is_empty() {
        vector.set(Feature::RepayConsistencyScore, 1.0);
        vector.set(Feature::GasOptimizationScore, NO_GAS_DATA_SCORE);
        return vector;
    }

    let aggregates = WalletAggregates::new(&history.transactions);

    basic_features(&aggregates, &mut vector);
    financial_features(&aggregates, &mut vector);
    risk_features(&aggregates, &mut vector);
    temporal_features(&aggregates, &mut vector);
    network_features(&aggregates, &mut vector);

    tracing::trace!(
        wallet = %history.wallet_address,
        transactions = history.len(),
        total_volume = aggregates.total_volume,
        "Extracted wallet features"
    );

    vector
}

fn basic_features(agg: &WalletAggregates, vector: &mut FeatureVector) {
    let gas: Vec<f64> = agg.transactions.iter().map(|tx| tx.gas_used as f64).collect();
    let assets: HashSet<&str> = agg.asset_volumes.keys().copied().collect();

    vector.set(Feature::TotalTransactions, agg.len() as f64);
    vector.set(Feature::TotalVolume, agg.total_volume);
    vector.set(Feature::AvgTransactionSize, mean(&agg.usd));
    vector.set(Feature::MedianTransactionSize, median(&agg.usd));
    vector.set(
        Feature::MaxTransactionSize,
        agg.usd.iter().copied().fold(0.0, f64::max),
    );
    vector.set(
        Feature::MinTransactionSize,
        agg.usd.iter().copied().fold(f64::INFINITY, f64::min),
    );
    vector.set(Feature::TransactionStd, sample_std(&agg.usd));
    vector.set(Feature::UniqueAssets, assets.len() as f64);
    vector.set(Feature::TotalGasUsed, gas.iter().sum());
    vector.set(Feature::AvgGasPerTx, mean(&gas));
}

fn financial_features(agg: &WalletAggregates, vector: &mut FeatureVector) {
    let deposits = agg.volume(Action::Deposit);
    let borrows = agg.volume(Action::Borrow);
    let repays = agg.volume(Action::Repay);
    let redeems = agg.volume(Action::Redeem);

    vector.set(Feature::DepositCount, agg.count(Action::Deposit) as f64);
    vector.set(Feature::BorrowCount, agg.count(Action::Borrow) as f64);
    vector.set(Feature::RepayCount, agg.count(Action::Repay) as f64);
    vector.set(Feature::RedeemCount, agg.count(Action::Redeem) as f64);
    vector.set(Feature::LiquidationCount, agg.count(Action::Liquidation) as f64);

    vector.set(Feature::DepositVolume, deposits);
    vector.set(Feature::BorrowVolume, borrows);
    vector.set(Feature::RepayVolume, repays);
    vector.set(Feature::RedeemVolume, redeems);
    vector.set(Feature::LiquidationVolume, agg.volume(Action::Liquidation));

    vector.set(
        Feature::AvgDepositSize,
        ratio_or(deposits, agg.count(Action::Deposit) as f64, 0.0),
    );
    vector.set(
        Feature::AvgBorrowSize,
        ratio_or(borrows, agg.count(Action::Borrow) as f64, 0.0),
    );
    vector.set(
        Feature::AvgRepaySize,
        ratio_or(repays, agg.count(Action::Repay) as f64, 0.0),
    );

    vector.set(Feature::NetDepositVolume, deposits - redeems);
    vector.set(Feature::LeverageRatio, ratio_or(borrows, deposits, 0.0));
    // Interest pushes repaid above borrowed; the range caps it at 2.
    vector.set(Feature::RepayRatio, ratio_or(repays, borrows, 0.0));
    vector.set(
        Feature::AssetConcentrationHhi,
        herfindahl_index(&agg.position_sizes()),
    );
    vector.set(Feature::AvgPositionSize, mean(&agg.position_sizes()));
}

/// Herfindahl–Hirschman index over per-asset volume shares.
///
/// One asset is exactly 1.0. With no volume at all every asset is treated as
/// an equal share, giving 1/N.
pub(crate) fn herfindahl_index(volumes: &[f64]) -> f64 {
    if volumes.is_empty() {
        return 0.0;
    }
    let total: f64 = volumes.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return 1.0 / volumes.len() as f64;
    }
    volumes.iter().map(|v| (v / total).powi(2)).sum()
}

fn risk_features(agg: &WalletAggregates, vector: &mut FeatureVector) {
    let liquidations = agg.count(Action::Liquidation);
    let ledger = RepaymentLedger::replay(agg.transactions);
    let largest = agg.usd.iter().copied().fold(0.0, f64::max);

    vector.set(
        Feature::LiquidationFrequency,
        ratio_or(liquidations as f64, agg.len() as f64, 0.0),
    );
    vector.set(
        Feature::LiquidationVolumeRatio,
        ratio_or(agg.volume(Action::Liquidation), agg.total_volume, 0.0),
    );
    vector.set(
        Feature::HasLiquidations,
        if liquidations > 0 { 1.0 } else { 0.0 },
    );
    vector.set(Feature::RepayConsistencyScore, ledger.consistency());
    vector.set(Feature::UnresolvedBorrowCount, ledger.unresolved as f64);
    vector.set(
        Feature::PositionSizeVariance,
        sample_variance(&agg.position_sizes()),
    );
    vector.set(
        Feature::MaxSinglePositionRatio,
        ratio_or(largest, agg.total_volume, 0.0),
    );
}

fn temporal_features(agg: &WalletAggregates, vector: &mut FeatureVector) {
    let txs = agg.transactions;
    let n = txs.len();

    let (first, last) = match (txs.first(), txs.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return,
    };
    let tenure_days = (last - first).num_days().max(0) as f64;

    let gaps = &agg.gaps;

    let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for tx in txs {
        *daily.entry(tx.timestamp.date_naive()).or_default() += 1;
    }
    let daily_counts: Vec<f64> = daily.values().map(|c| *c as f64).collect();

    let weekend = txs
        .iter()
        .filter(|tx| matches!(tx.timestamp.weekday(), Weekday::Sat | Weekday::Sun))
        .count();

    vector.set(Feature::TenureDays, tenure_days);
    vector.set(Feature::ActivityFrequency, n as f64 / tenure_days.max(1.0));
    // Fewer than three transactions give at most one gap; CV is meaningless.
    vector.set(
        Feature::ActivityConsistencyCv,
        if n < 3 {
            0.0
        } else {
            coefficient_of_variation(gaps).unwrap_or(0.0)
        },
    );
    vector.set(
        Feature::DailyActivityCv,
        coefficient_of_variation(&daily_counts).unwrap_or(0.0),
    );
    vector.set(
        Feature::AvgTimeBetweenTxHours,
        mean(gaps) / SECONDS_PER_HOUR,
    );
    vector.set(
        Feature::MedianTimeBetweenTxHours,
        median(gaps) / SECONDS_PER_HOUR,
    );
    vector.set(Feature::MaxInactiveDays, max_inactive_days(daily.keys()));
    vector.set(Feature::DaysActive, daily.len() as f64);
    vector.set(Feature::WeekendActivityRatio, weekend as f64 / n as f64);
    vector.set(
        Feature::BurstRatio,
        ratio_or(
            gaps.iter().filter(|g| **g < SECONDS_PER_HOUR).count() as f64,
            gaps.len() as f64,
            0.0,
        ),
    );
}

/// Longest run of whole idle days between two consecutive active dates.
fn max_inactive_days<'a>(dates: impl Iterator<Item = &'a NaiveDate>) -> f64 {
    let dates: Vec<&NaiveDate> = dates.collect();
    dates
        .windows(2)
        .map(|pair| (*pair[1] - *pair[0]).num_days() - 1)
        .max()
        .unwrap_or(0)
        .max(0) as f64
}

fn network_features(agg: &WalletAggregates, vector: &mut FeatureVector) {
    let txs = agg.transactions;
    let n = txs.len();

    let gas: Vec<f64> = txs.iter().map(|tx| tx.gas_used as f64).collect();
    let efficiency: Vec<f64> = txs
        .iter()
        .filter(|tx| tx.gas_used > 0)
        .map(|tx| tx.usd() / tx.gas_used as f64)
        .collect();
    let gas_prices: HashSet<u64> = txs.iter().map(|tx| tx.gas_used).collect();

    let gas_optimization = if gas.iter().sum::<f64>() <= 0.0 {
        NO_GAS_DATA_SCORE
    } else {
        (1.0 - coefficient_of_variation(&gas).unwrap_or(0.0)).max(0.0)
    };

    let distinct_actions: BTreeSet<Action> = txs.iter().map(|tx| tx.action).collect();
    let diversity = distinct_actions.len() as f64 / ACTION_KINDS;

    let entropy = Action::ALL
        .iter()
        .map(|a| agg.count(*a) as f64 / n as f64)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.ln())
        .sum::<f64>()
        / ACTION_KINDS.ln();

    let transitions = txs
        .windows(2)
        .filter(|pair| pair[0].action != pair[1].action)
        .count();
    let transition_rate = ratio_or(transitions as f64, n.saturating_sub(1) as f64, 0.0);

    // A single transaction shows no size regularity.
    let amount_regularity = coefficient_of_variation(&agg.usd)
        .map(|cv| (1.0 - cv).max(0.0))
        .unwrap_or(0.0);
    let complexity = (diversity + transition_rate + amount_regularity) / 3.0;

    vector.set(Feature::GasEfficiencyScore, mean(&efficiency));
    vector.set(Feature::GasOptimizationScore, gas_optimization);
    vector.set(Feature::UniqueGasPrices, gas_prices.len() as f64);
    vector.set(Feature::ActionDiversityScore, diversity);
    vector.set(Feature::ActionEntropy, entropy);
    vector.set(Feature::ActionTransitionRate, transition_rate);
    vector.set(Feature::TransactionComplexityScore, complexity);
    vector.set(Feature::BotLikeRegularity, bot_likelihood(&agg.gaps));
}

/// `max(0, 1 - 2 * CV)` of inter-transaction intervals.
///
/// Near-constant intervals approach 1. Any CV of 0.5 or more is non-bot.
/// Needs at least two intervals (three transactions); a zero mean interval
/// counts as CV 1.
fn bot_likelihood(intervals: &[f64]) -> f64 {
    if intervals.len() < 2 {
        return 0.0;
    }

    match coefficient_of_variation(intervals) {
        Some(cv) => (1.0 - 2.0 * cv).max(0.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn base_time() -> DateTime<Utc> {
        // A Wednesday
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
    }

    fn tx(action: Action, asset: &str, usd: i64, at: DateTime<Utc>) -> Transaction {
        Transaction {
            wallet_address: "0xwallet".to_string(),
            transaction_hash: format!("{}-{}-{}", action, asset, at.timestamp()),
            action,
            amount: Decimal::from(usd),
            asset: asset.to_string(),
            timestamp: at,
            usd_value: Decimal::from(usd),
            gas_used: 150_000,
            block_number: 0,
        }
    }

    fn assert_all_in_range(vector: &FeatureVector) {
        for (feature, value) in vector.iter() {
            let (min, max) = feature.range();
            assert!(value.is_finite(), "{} is not finite", feature);
            assert!(value >= min && value <= max, "{} = {} out of range", feature, value);
        }
    }

    #[test]
    fn test_empty_history_uses_fallbacks() {
        let vector = extract_features(&WalletHistory::new("0xempty", vec![]));
        assert_all_in_range(&vector);
        assert_eq!(vector.get(Feature::TotalTransactions), 0.0);
        assert_eq!(vector.get(Feature::RepayConsistencyScore), 1.0);
        assert_eq!(vector.get(Feature::GasOptimizationScore), 0.5);
    }

    #[test]
    fn test_single_transaction_wallet() {
        let history = WalletHistory::new(
            "0xone",
            vec![tx(Action::Deposit, "USDC", 250, base_time())],
        );
        let vector = extract_features(&history);

        assert_all_in_range(&vector);
        assert_eq!(vector.get(Feature::TenureDays), 0.0);
        assert_eq!(vector.get(Feature::ActivityFrequency), 1.0);
        assert_eq!(vector.get(Feature::ActivityConsistencyCv), 0.0);
        assert_eq!(vector.get(Feature::BotLikeRegularity), 0.0);
        assert_eq!(vector.get(Feature::TransactionStd), 0.0);
        assert_eq!(vector.get(Feature::LeverageRatio), 0.0);
        assert_eq!(vector.get(Feature::RepayRatio), 0.0);
        assert_eq!(vector.get(Feature::AssetConcentrationHhi), 1.0);
        assert_eq!(vector.get(Feature::MaxSinglePositionRatio), 1.0);
        assert_eq!(vector.get(Feature::ActionDiversityScore), 0.2);
    }

    #[test]
    fn test_hhi_single_asset_is_exactly_one() {
        let t = base_time();
        let history = WalletHistory::new(
            "0xhhi",
            vec![
                tx(Action::Deposit, "WETH", 333, t),
                tx(Action::Borrow, "WETH", 17, t + Duration::days(1)),
                tx(Action::Repay, "WETH", 19, t + Duration::days(2)),
            ],
        );
        let vector = extract_features(&history);
        assert_eq!(vector.get(Feature::AssetConcentrationHhi), 1.0);
    }

    #[test]
    fn test_hhi_equal_shares_is_one_over_n() {
        let t = base_time();
        for n in 2..=6 {
            let txs = (0..n)
                .map(|i| tx(Action::Deposit, &format!("ASSET{}", i), 1_000, t + Duration::hours(i)))
                .collect();
            let vector = extract_features(&WalletHistory::new("0xeq", txs));
            let hhi = vector.get(Feature::AssetConcentrationHhi);
            assert!((hhi - 1.0 / n as f64).abs() < 1e-12, "n = {}: hhi = {}", n, hhi);
        }
    }

    #[test]
    fn test_hhi_zero_volume_falls_back_to_equal_shares() {
        assert_eq!(herfindahl_index(&[0.0, 0.0, 0.0, 0.0]), 0.25);
        assert_eq!(herfindahl_index(&[]), 0.0);
    }

    #[test]
    fn test_lending_cycle_ratios() {
        let t = base_time();
        let history = WalletHistory::new(
            "0xlender",
            vec![
                tx(Action::Deposit, "USDC", 4_000, t),
                tx(Action::Deposit, "USDC", 3_000, t + Duration::days(10)),
                tx(Action::Deposit, "USDC", 3_000, t + Duration::days(20)),
                tx(Action::Borrow, "USDC", 5_000, t + Duration::days(30)),
                tx(Action::Repay, "USDC", 5_000, t + Duration::days(100)),
            ],
        );
        let vector = extract_features(&history);

        assert_all_in_range(&vector);
        assert_eq!(vector.get(Feature::LeverageRatio), 0.5);
        assert_eq!(vector.get(Feature::RepayRatio), 1.0);
        assert_eq!(vector.get(Feature::RepayConsistencyScore), 1.0);
        assert_eq!(vector.get(Feature::LiquidationFrequency), 0.0);
        assert_eq!(vector.get(Feature::HasLiquidations), 0.0);
        assert_eq!(vector.get(Feature::TenureDays), 100.0);
        assert_eq!(vector.get(Feature::NetDepositVolume), 10_000.0);
        assert_eq!(vector.get(Feature::ActionDiversityScore), 0.6);
        assert_eq!(vector.get(Feature::MaxInactiveDays), 69.0);
    }

    #[test]
    fn test_repay_ratio_is_capped() {
        let t = base_time();
        let history = WalletHistory::new(
            "0xover",
            vec![
                tx(Action::Borrow, "DAI", 100, t),
                tx(Action::Repay, "DAI", 900, t + Duration::days(1)),
            ],
        );
        let vector = extract_features(&history);
        assert_eq!(vector.get(Feature::RepayRatio), 2.0);
        assert_eq!(vector.get(Feature::LeverageRatio), 0.0);
    }

    #[test]
    fn test_liquidation_features() {
        let t = base_time();
        let history = WalletHistory::new(
            "0xliq",
            vec![
                tx(Action::Deposit, "WETH", 600, t),
                tx(Action::Borrow, "USDC", 300, t + Duration::days(1)),
                tx(Action::Liquidation, "WETH", 100, t + Duration::days(5)),
                tx(Action::Liquidation, "WETH", 0, t + Duration::days(6)),
            ],
        );
        let vector = extract_features(&history);

        assert_eq!(vector.get(Feature::LiquidationCount), 2.0);
        assert_eq!(vector.get(Feature::LiquidationFrequency), 0.5);
        assert_eq!(vector.get(Feature::HasLiquidations), 1.0);
        assert_eq!(vector.get(Feature::LiquidationVolumeRatio), 0.1);
        assert_eq!(vector.get(Feature::RepayConsistencyScore), 0.0);
        assert_eq!(vector.get(Feature::UnresolvedBorrowCount), 1.0);
    }

    #[test]
    fn test_fixed_interval_wallet_is_bot_like() {
        let t = base_time();
        let txs = (0..50)
            .map(|i| tx(Action::Deposit, "USDC", 10, t + Duration::seconds(60 * i)))
            .collect();
        let vector = extract_features(&WalletHistory::new("0xbot", txs));

        assert!(vector.get(Feature::BotLikeRegularity) >= 0.9);
        assert_eq!(vector.get(Feature::ActivityConsistencyCv), 0.0);
        assert_eq!(vector.get(Feature::BurstRatio), 1.0);
    }

    #[test]
    fn test_irregular_intervals_are_not_bot_like() {
        let t = base_time();
        let offsets = [0, 60, 7_200, 7_260, 400_000, 400_030];
        let txs = offsets
            .iter()
            .map(|s| tx(Action::Deposit, "USDC", 10, t + Duration::seconds(*s)))
            .collect();
        let vector = extract_features(&WalletHistory::new("0xhuman", txs));
        assert_eq!(vector.get(Feature::BotLikeRegularity), 0.0);
    }

    #[test]
    fn test_same_instant_transactions_stay_finite() {
        let t = base_time();
        let txs = (0..4).map(|_| tx(Action::Deposit, "USDC", 0, t)).collect();
        let vector = extract_features(&WalletHistory::new("0xburst", txs));

        assert_all_in_range(&vector);
        assert_eq!(vector.get(Feature::BotLikeRegularity), 0.0);
        assert_eq!(vector.get(Feature::ActivityConsistencyCv), 0.0);
        assert_eq!(vector.get(Feature::TotalVolume), 0.0);
    }

    #[test]
    fn test_weekend_ratio_uses_utc_days() {
        // 2024-01-06 is a Saturday, 2024-01-08 a Monday
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 23, 30, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 0, 30, 0).unwrap();
        let history = WalletHistory::new(
            "0xweekend",
            vec![
                tx(Action::Deposit, "USDC", 10, saturday),
                tx(Action::Deposit, "USDC", 10, monday),
            ],
        );
        let vector = extract_features(&history);
        assert_eq!(vector.get(Feature::WeekendActivityRatio), 0.5);
        assert_eq!(vector.get(Feature::MaxInactiveDays), 1.0);
    }

    #[test]
    fn test_aggregate_gaps_drive_timing_features() {
        let t = base_time();
        let offsets = [0, 3_600, 7_200, 10_800];
        let txs: Vec<Transaction> = offsets
            .iter()
            .map(|s| tx(Action::Deposit, "USDC", 10, t + Duration::seconds(*s)))
            .collect();

        let agg = WalletAggregates::new(&txs);
        assert_eq!(agg.gaps, vec![3_600.0; 3]);
        assert_eq!(bot_likelihood(&agg.gaps), 1.0);
        assert_eq!(bot_likelihood(&agg.gaps[..1]), 0.0);

        let vector = extract_features(&WalletHistory::new("0xhourly", txs));
        assert_eq!(vector.get(Feature::BotLikeRegularity), 1.0);
        assert_eq!(vector.get(Feature::AvgTimeBetweenTxHours), 1.0);
        assert_eq!(vector.get(Feature::MedianTimeBetweenTxHours), 1.0);
    }

    #[test]
    fn test_same_block_borrow_and_repay_resolve() {
        let t = base_time();
        let mut borrow = tx(Action::Borrow, "USDC", 100, t);
        borrow.transaction_hash = "0xff".to_string();
        let mut repay = tx(Action::Repay, "USDC", 100, t);
        repay.transaction_hash = "0x00".to_string();

        let vector = extract_features(&WalletHistory::new("0xflash", vec![repay, borrow]));
        assert_eq!(vector.get(Feature::RepayConsistencyScore), 1.0);
    }
}
