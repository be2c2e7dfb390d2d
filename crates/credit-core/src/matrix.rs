//! Grouping transactions into wallet histories and collecting feature vectors
//! into a population matrix.

use std::collections::{BTreeMap, HashSet};

use crate::error::{CreditError, CreditResult};
use crate::features::{extract_features, FeatureVector};
use crate::models::{Transaction, WalletHistory};

/// Group a canonical transaction table by wallet. Histories come back ordered
/// by wallet address, each sorted chronologically.
pub fn group_by_wallet(transactions: Vec<Transaction>) -> Vec<WalletHistory> {
    let mut grouped: BTreeMap<String, Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        grouped.entry(tx.wallet_address.clone()).or_default().push(tx);
    }
    grouped
        .into_iter()
        .map(|(wallet, txs)| WalletHistory::new(wallet, txs))
        .collect()
}

/// Feature vectors for one scoring population, one row per wallet.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    rows: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn from_rows(rows: Vec<FeatureVector>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds a [`FeatureMatrix`] from chunks of the transaction table.
///
/// Each chunk must contain complete wallet histories: a wallet seen in an
/// earlier chunk cannot reappear later, since its features were already
/// extracted from what is now known to be a partial history.
#[derive(Debug, Default)]
pub struct FeatureMatrixBuilder {
    seen: HashSet<String>,
    rows: Vec<FeatureVector>,
    chunks: usize,
}

impl FeatureMatrixBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, transactions: Vec<Transaction>) -> CreditResult<()> {
        self.push_histories(group_by_wallet(transactions))
    }

    /// Add already-grouped histories as one chunk.
    pub fn push_histories(&mut self, histories: Vec<WalletHistory>) -> CreditResult<()> {
        if let Some(split) = histories
            .iter()
            .find(|h| self.seen.contains(&h.wallet_address))
        {
            return Err(CreditError::SplitWalletHistory(split.wallet_address.clone()));
        }

        for history in &histories {
            self.seen.insert(history.wallet_address.clone());
            self.rows.push(extract_features(history));
        }

        self.chunks += 1;
        tracing::debug!(
            chunk = self.chunks,
            wallets = histories.len(),
            total_wallets = self.rows.len(),
            "Extracted features for chunk"
        );
        Ok(())
    }

    pub fn finish(self) -> FeatureMatrix {
        FeatureMatrix { rows: self.rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn tx(wallet: &str, secs: i64) -> Transaction {
        Transaction {
            wallet_address: wallet.to_string(),
            transaction_hash: format!("{}-{}", wallet, secs),
            action: Action::Deposit,
            amount: Decimal::from(10),
            asset: "USDC".to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            usd_value: Decimal::from(10),
            gas_used: 150_000,
            block_number: 0,
        }
    }

    #[test]
    fn test_group_by_wallet() {
        let histories = group_by_wallet(vec![tx("0xb", 5), tx("0xa", 9), tx("0xb", 1)]);
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].wallet_address, "0xa");
        assert_eq!(histories[1].len(), 2);
        assert_eq!(histories[1].transactions[0].timestamp.timestamp(), 1);
    }

    #[test]
    fn test_chunks_on_wallet_boundaries() {
        let mut builder = FeatureMatrixBuilder::new();
        builder.push_chunk(vec![tx("0xa", 1), tx("0xa", 2)]).unwrap();
        builder.push_chunk(vec![tx("0xb", 1)]).unwrap();
        let matrix = builder.finish();
        assert_eq!(matrix.len(), 2);
    }

    #[test]
    fn test_split_wallet_rejected() {
        let mut builder = FeatureMatrixBuilder::new();
        builder.push_chunk(vec![tx("0xa", 1)]).unwrap();
        let err = builder.push_chunk(vec![tx("0xa", 2)]).unwrap_err();
        assert!(matches!(err, CreditError::SplitWalletHistory(w) if w == "0xa"));
    }

    #[test]
    fn test_grouped_histories_match_raw_chunks() {
        let txs = vec![tx("0xa", 1), tx("0xb", 4), tx("0xa", 7), tx("0xc", 2)];

        let mut raw = FeatureMatrixBuilder::new();
        raw.push_chunk(txs.clone()).unwrap();

        let mut histories = group_by_wallet(txs).into_iter();
        let mut grouped = FeatureMatrixBuilder::new();
        grouped.push_histories(histories.by_ref().take(2).collect()).unwrap();
        grouped.push_histories(histories.collect()).unwrap();

        assert_eq!(raw.finish().rows(), grouped.finish().rows());
    }

    #[test]
    fn test_grouped_split_wallet_rejected() {
        let mut builder = FeatureMatrixBuilder::new();
        builder.push_histories(group_by_wallet(vec![tx("0xa", 1)])).unwrap();
        let err = builder
            .push_histories(group_by_wallet(vec![tx("0xa", 2)]))
            .unwrap_err();
        assert!(matches!(err, CreditError::SplitWalletHistory(w) if w == "0xa"));
    }
}
