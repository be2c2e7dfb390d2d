use credit_core::CreditError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error("Input contains no usable transactions ({skipped} malformed records skipped)")]
    NoTransactions { skipped: usize },
}

pub type AppResult<T> = Result<T, AppError>;
