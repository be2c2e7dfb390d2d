//! Canonical data models for the scoring pipeline
//!
//! [`Transaction`] is the normalized row handed over by the loader. Everything
//! downstream (histories, feature vectors, scores) is derived from it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Transactions
// =============================================================================

/// Lending-protocol action recorded on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deposit,
    Borrow,
    Repay,
    Redeem,
    Liquidation,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Deposit,
        Action::Borrow,
        Action::Repay,
        Action::Redeem,
        Action::Liquidation,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "deposit" => Some(Action::Deposit),
            "borrow" => Some(Action::Borrow),
            "repay" => Some(Action::Repay),
            "redeem" | "redeemunderlying" | "withdraw" => Some(Action::Redeem),
            "liquidation" | "liquidationcall" => Some(Action::Liquidation),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Action::Deposit => 0,
            Action::Borrow => 1,
            Action::Repay => 2,
            Action::Redeem => 3,
            Action::Liquidation => 4,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Deposit => write!(f, "deposit"),
            Action::Borrow => write!(f, "borrow"),
            Action::Repay => write!(f, "repay"),
            Action::Redeem => write!(f, "redeem"),
            Action::Liquidation => write!(f, "liquidation"),
        }
    }
}

/// One normalized transaction event.
///
/// `amount` is asset-denominated, `usd_value` is the same event priced in USD.
/// Both are finite and non-negative; the loader rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub wallet_address: String,
    pub transaction_hash: String,
    pub action: Action,
    pub amount: Decimal,
    pub asset: String,
    pub timestamp: DateTime<Utc>,
    pub usd_value: Decimal,

    /// Estimated gas for the action, 0 when unknown
    #[serde(default)]
    pub gas_used: u64,

    #[serde(default)]
    pub block_number: u64,
}

impl Transaction {
    pub fn usd(&self) -> f64 {
        self.usd_value.to_f64().unwrap_or(0.0)
    }

    pub fn amount_f64(&self) -> f64 {
        self.amount.to_f64().unwrap_or(0.0)
    }
}

/// All transactions of one wallet in chronological order.
#[derive(Debug, Clone)]
pub struct WalletHistory {
    pub wallet_address: String,
    pub transactions: Vec<Transaction>,
}

impl WalletHistory {
    /// Build a history sorted by timestamp. Same-instant transactions are
    /// ordered by action (deposit, borrow, repay, redeem, liquidation) so a
    /// borrow precedes the repay recorded alongside it, then by hash so that
    /// replays are deterministic.
    pub fn new(wallet_address: impl Into<String>, mut transactions: Vec<Transaction>) -> Self {
        transactions.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.action.cmp(&b.action))
                .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
        });
        Self {
            wallet_address: wallet_address.into(),
            transactions,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

// =============================================================================
// Scores
// =============================================================================

pub const MIN_SCORE: u16 = 0;
pub const MAX_SCORE: u16 = 1000;

/// Risk bucket for a final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ScoreCategory {
    pub fn from_score(score: u16) -> Self {
        match score {
            900..=u16::MAX => ScoreCategory::Excellent,
            700..=899 => ScoreCategory::Good,
            500..=699 => ScoreCategory::Fair,
            300..=499 => ScoreCategory::Poor,
            _ => ScoreCategory::VeryPoor,
        }
    }
}

impl fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreCategory::Excellent => write!(f, "Excellent (900-1000)"),
            ScoreCategory::Good => write!(f, "Good (700-899)"),
            ScoreCategory::Fair => write!(f, "Fair (500-699)"),
            ScoreCategory::Poor => write!(f, "Poor (300-499)"),
            ScoreCategory::VeryPoor => write!(f, "Very Poor (0-299)"),
        }
    }
}

/// Terminal output of the scoring engine for one wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletScore {
    pub wallet_address: String,

    /// Final population-relative score in `[0, 1000]`
    pub score: u16,

    pub category: ScoreCategory,

    /// Stage-by-stage contributions, keyed by adjustment name
    pub diagnostics: BTreeMap<String, f64>,
}
