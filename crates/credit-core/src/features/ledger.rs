use std::collections::{HashMap, VecDeque};

use crate::models::{Action, Transaction};

/// A borrow counts as resolved once its remaining balance drops to within
/// this fraction of the original amount.
const RESOLVED_TOLERANCE: f64 = 0.01;

#[derive(Debug)]
struct OpenBorrow {
    original: f64,
    remaining: f64,
}

impl OpenBorrow {
    fn is_resolved(&self) -> bool {
        self.remaining <= self.original * RESOLVED_TOLERANCE
    }
}

/// Outcome of replaying one wallet's history through the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerOutcome {
    pub borrows: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

impl LedgerOutcome {
    /// Fraction of borrows fully repaid. A wallet that never borrowed has
    /// nothing outstanding and scores 1.0.
    pub fn consistency(&self) -> f64 {
        if self.borrows == 0 {
            return 1.0;
        }
        self.resolved as f64 / self.borrows as f64
    }
}

/// Per-asset outstanding-borrow ledger.
///
/// Borrows open a balance in a FIFO queue for their asset. A later repay of
/// the same asset pays the oldest open balances first; anything left after all
/// open balances are cleared (interest, dust) is dropped. Repays of an asset
/// with no open borrow are ignored.
#[derive(Debug, Default)]
pub struct RepaymentLedger {
    open: HashMap<String, VecDeque<OpenBorrow>>,
    borrows: usize,
    resolved: usize,
}

impl RepaymentLedger {
    fn new() -> Self {
        Self::default()
    }

    /// Replay a chronologically sorted history.
    pub fn replay(transactions: &[Transaction]) -> LedgerOutcome {
        let mut ledger = Self::new();
        for tx in transactions {
            ledger.apply(tx);
        }
        ledger.finish()
    }

    fn apply(&mut self, tx: &Transaction) {
        match tx.action {
            Action::Borrow => self.borrow(&tx.asset, tx.amount_f64()),
            Action::Repay => self.repay(&tx.asset, tx.amount_f64()),
            _ => {}
        }
    }

    fn borrow(&mut self, asset: &str, amount: f64) {
        self.borrows += 1;
        let entry = OpenBorrow {
            original: amount,
            remaining: amount,
        };
        // Zero-sized borrows have nothing to repay.
        if entry.is_resolved() {
            self.resolved += 1;
            return;
        }
        self.open.entry(asset.to_string()).or_default().push_back(entry);
    }

    fn repay(&mut self, asset: &str, amount: f64) {
        let Some(queue) = self.open.get_mut(asset) else {
            return;
        };

        let mut available = amount;
        while available > 0.0 {
            let Some(front) = queue.front_mut() else {
                break;
            };
            let paid = available.min(front.remaining);
            front.remaining -= paid;
            available -= paid;

            if front.is_resolved() {
                queue.pop_front();
                self.resolved += 1;
            } else {
                break;
            }
        }
    }

    fn finish(self) -> LedgerOutcome {
        let unresolved = self.open.values().map(VecDeque::len).sum();
        LedgerOutcome {
            borrows: self.borrows,
            resolved: self.resolved,
            unresolved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn tx(action: Action, asset: &str, amount: i64, day: i64) -> Transaction {
        Transaction {
            wallet_address: "0xabc".to_string(),
            transaction_hash: format!("{}-{}", action, day),
            action,
            amount: Decimal::from(amount),
            asset: asset.to_string(),
            timestamp: Utc.timestamp_opt(day * 86_400, 0).unwrap(),
            usd_value: Decimal::from(amount),
            gas_used: 0,
            block_number: 0,
        }
    }

    #[test]
    fn test_no_borrows_is_fully_consistent() {
        let outcome = RepaymentLedger::replay(&[tx(Action::Deposit, "USDC", 100, 0)]);
        assert_eq!(outcome.borrows, 0);
        assert_eq!(outcome.consistency(), 1.0);
    }

    #[test]
    fn test_overlapping_cycles_are_paid_fifo() {
        let history = vec![
            tx(Action::Borrow, "USDC", 100, 0),
            tx(Action::Borrow, "USDC", 50, 1),
            tx(Action::Repay, "USDC", 120, 2),
            tx(Action::Repay, "USDC", 40, 3),
        ];
        let outcome = RepaymentLedger::replay(&history);
        assert_eq!(outcome.borrows, 2);
        assert_eq!(outcome.resolved, 2);
        assert_eq!(outcome.unresolved, 0);
    }

    #[test]
    fn test_repay_of_other_asset_does_not_match() {
        let history = vec![
            tx(Action::Borrow, "DAI", 100, 0),
            tx(Action::Repay, "USDC", 100, 1),
        ];
        let outcome = RepaymentLedger::replay(&history);
        assert_eq!(outcome.resolved, 0);
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(outcome.consistency(), 0.0);
    }

    #[test]
    fn test_repay_before_borrow_does_not_count() {
        let history = vec![
            tx(Action::Repay, "USDC", 100, 0),
            tx(Action::Borrow, "USDC", 100, 1),
        ];
        let outcome = RepaymentLedger::replay(&history);
        assert_eq!(outcome.unresolved, 1);
    }

    #[test]
    fn test_partial_repay_leaves_borrow_open() {
        let history = vec![
            tx(Action::Borrow, "WETH", 10, 0),
            tx(Action::Borrow, "USDC", 100, 0),
            tx(Action::Repay, "WETH", 4, 1),
            tx(Action::Repay, "USDC", 100, 2),
        ];
        let outcome = RepaymentLedger::replay(&history);
        assert_eq!(outcome.borrows, 2);
        assert_eq!(outcome.resolved, 1);
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(outcome.consistency(), 0.5);
    }
}
