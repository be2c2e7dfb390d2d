use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use credit_core::ScoringConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Raw `actionData.amount` values are integers in base units; they are
    /// divided by `10^amount_decimals`.
    pub amount_decimals: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub path: String,
    pub include_features: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Wallets per extraction chunk; 0 extracts everything in one pass
    pub chunk_size: usize,
}

impl AppConfig {
    /// Defaults, then `config/default` and `config/local`, then an explicit
    /// file if given, then `CREDIT__*` environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("input.amount_decimals", 6)?
            .set_default("output.path", "wallet_scores.csv")?
            .set_default("output.include_features", false)?
            .set_default("pipeline.chunk_size", 10_000)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        // CREDIT__INPUT__AMOUNT_DECIMALS, CREDIT__SCORING__BASE_OFFSET, ...
        let config = builder
            .add_source(
                Environment::with_prefix("CREDIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: Self = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // rust_decimal carries at most 28 fractional digits.
        if self.input.amount_decimals > 28 {
            return Err(ConfigError::Message(format!(
                "input.amount_decimals must be at most 28, got {}",
                self.input.amount_decimals
            )));
        }
        Ok(())
    }
}
