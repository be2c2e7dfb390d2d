//! Aave V2 transaction dump loader
//!
//! Reads the raw JSON array and normalizes each record into a canonical
//! [`Transaction`]. Records that cannot be normalized are skipped and counted;
//! they never reach the scoring core.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use credit_core::{Action, CreditError, CreditResult, Transaction};

use crate::error::AppResult;

// =============================================================================
// Raw format
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    user_wallet: Option<String>,
    tx_hash: Option<String>,
    action: Option<String>,
    timestamp: Option<Value>,
    block_number: Option<Value>,
    #[serde(default)]
    action_data: RawActionData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawActionData {
    amount: Option<Value>,
    asset_symbol: Option<String>,
    #[serde(rename = "assetPriceUSD")]
    asset_price_usd: Option<Value>,
}

/// Gas estimate per action; the dump carries no receipts.
pub fn estimate_gas(action: Action) -> u64 {
    match action {
        Action::Deposit => 150_000,
        Action::Borrow => 180_000,
        Action::Repay => 160_000,
        Action::Redeem => 170_000,
        Action::Liquidation => 220_000,
    }
}

fn malformed(message: impl Into<String>) -> CreditError {
    CreditError::MalformedRecord(message.into())
}

/// Numbers may arrive as JSON numbers or strings, occasionally in
/// scientific notation.
fn parse_decimal(value: &Value, field: &str) -> CreditResult<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(malformed(format!("{} has unexpected type: {}", field, other))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| malformed(format!("{} '{}' is not a number: {}", field, text, e)))
}

fn parse_u64(value: &Value, field: &str) -> CreditResult<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| malformed(format!("{} {} is not a non-negative integer", field, n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| malformed(format!("{} '{}' is not a non-negative integer", field, s))),
        other => Err(malformed(format!("{} has unexpected type: {}", field, other))),
    }
}

fn parse_timestamp(value: &Value) -> CreditResult<DateTime<Utc>> {
    let secs = parse_u64(value, "timestamp")?;
    if secs == 0 {
        return Err(malformed("timestamp is zero"));
    }
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .ok_or_else(|| malformed(format!("timestamp {} out of range", secs)))
}

fn require_text(value: Option<String>, field: &str) -> CreditResult<String> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(malformed(format!("missing {}", field))),
    }
}

impl RawRecord {
    fn normalize(self, unit: Decimal) -> CreditResult<Transaction> {
        let wallet_address = require_text(self.user_wallet, "userWallet")?.to_lowercase();
        let transaction_hash = require_text(self.tx_hash, "txHash")?;
        let raw_action = require_text(self.action, "action")?;
        let action = Action::from_str(&raw_action)
            .ok_or_else(|| malformed(format!("unsupported action '{}'", raw_action)))?;

        let timestamp = match &self.timestamp {
            Some(value) => parse_timestamp(value)?,
            None => return Err(malformed("missing timestamp")),
        };
        let block_number = match &self.block_number {
            Some(value) => parse_u64(value, "blockNumber")?,
            None => 0,
        };

        let data = self.action_data;
        let raw_amount = match &data.amount {
            Some(value) => parse_decimal(value, "amount")?,
            None => Decimal::ZERO,
        };
        let price = match &data.asset_price_usd {
            Some(value) => parse_decimal(value, "assetPriceUSD")?,
            None => Decimal::ZERO,
        };
        if raw_amount.is_sign_negative() || price.is_sign_negative() {
            return Err(malformed("negative amount or price"));
        }

        let amount = raw_amount
            .checked_mul(unit)
            .ok_or_else(|| malformed("amount overflows"))?;
        let usd_value = amount
            .checked_mul(price)
            .ok_or_else(|| malformed("usd value overflows"))?;

        Ok(Transaction {
            wallet_address,
            transaction_hash,
            action,
            amount,
            asset: data
                .asset_symbol
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            timestamp,
            usd_value,
            gas_used: estimate_gas(action),
            block_number,
        })
    }
}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug)]
pub struct LoadReport {
    pub transactions: Vec<Transaction>,
    pub raw_records: usize,
    pub skipped: usize,
}

/// Normalize an already parsed JSON array.
pub fn normalize_records(records: Vec<Value>, amount_decimals: u32) -> LoadReport {
    let unit = Decimal::new(1, amount_decimals);
    let raw_records = records.len();
    let mut transactions = Vec::with_capacity(raw_records);
    let mut skipped = 0;

    for (index, value) in records.into_iter().enumerate() {
        let normalized = serde_json::from_value::<RawRecord>(value)
            .map_err(|e| malformed(e.to_string()))
            .and_then(|raw| raw.normalize(unit));

        match normalized {
            Ok(tx) => transactions.push(tx),
            Err(e) => {
                skipped += 1;
                tracing::debug!(index, error = %e, "Skipping record");
            }
        }

        if (index + 1) % 10_000 == 0 {
            tracing::debug!(processed = index + 1, total = raw_records, "Normalizing records");
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, total = raw_records, "Skipped malformed records");
    }

    LoadReport {
        transactions,
        raw_records,
        skipped,
    }
}

pub fn load_file(path: &Path, amount_decimals: u32) -> AppResult<LoadReport> {
    tracing::info!(path = %path.display(), "Loading transaction dump");
    let content = std::fs::read_to_string(path)?;
    let records: Vec<Value> = serde_json::from_str(&content)?;
    tracing::info!(records = records.len(), "Parsed raw records");
    Ok(normalize_records(records, amount_decimals))
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DataSummary {
    pub total_transactions: usize,
    pub unique_wallets: usize,
    pub unique_assets: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub action_distribution: BTreeMap<Action, usize>,
    pub total_usd_volume: Decimal,
    pub avg_transaction_usd: Decimal,
    /// Ten most frequent assets, most frequent first
    pub top_assets: Vec<(String, usize)>,
}

impl DataSummary {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        let wallets: HashSet<&str> = transactions
            .iter()
            .map(|tx| tx.wallet_address.as_str())
            .collect();

        let mut action_distribution = BTreeMap::new();
        let mut asset_counts: HashMap<&str, usize> = HashMap::new();
        let mut total_usd_volume = Decimal::ZERO;
        for tx in transactions {
            *action_distribution.entry(tx.action).or_insert(0) += 1;
            *asset_counts.entry(tx.asset.as_str()).or_insert(0) += 1;
            total_usd_volume = total_usd_volume.saturating_add(tx.usd_value);
        }

        let avg_transaction_usd = if transactions.is_empty() {
            Decimal::ZERO
        } else {
            total_usd_volume / Decimal::from(transactions.len())
        };

        let mut top_assets: Vec<(String, usize)> = asset_counts
            .iter()
            .map(|(asset, count)| (asset.to_string(), *count))
            .collect();
        top_assets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_assets.truncate(10);

        Self {
            total_transactions: transactions.len(),
            unique_wallets: wallets.len(),
            unique_assets: asset_counts.len(),
            start: transactions.iter().map(|tx| tx.timestamp).min(),
            end: transactions.iter().map(|tx| tx.timestamp).max(),
            action_distribution,
            total_usd_volume,
            avg_transaction_usd,
            top_assets,
        }
    }

    pub fn log(&self) {
        tracing::info!(
            transactions = self.total_transactions,
            wallets = self.unique_wallets,
            assets = self.unique_assets,
            start = ?self.start,
            end = ?self.end,
            total_usd = %self.total_usd_volume.round_dp(2),
            avg_usd = %self.avg_transaction_usd.round_dp(2),
            "Data summary"
        );
        for (action, count) in &self.action_distribution {
            tracing::info!(action = %action, count, "Action distribution");
        }
        for (asset, count) in &self.top_assets {
            tracing::info!(asset = %asset, count, "Top asset");
        }
    }
}
