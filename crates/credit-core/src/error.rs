//! Error types for Credit Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CreditError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Wallet history split across chunks: {0}")]
    SplitWalletHistory(String),

    #[error("Cannot score an empty population")]
    EmptyPopulation,

    #[error("Score out of range for wallet {wallet}: {value}")]
    ScoreOutOfRange { wallet: String, value: f64 },
}

pub type CreditResult<T> = Result<T, CreditError>;
