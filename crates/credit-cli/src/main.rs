//! credit-score: batch credit scoring for lending-protocol wallets.
//!
//! Loads an Aave V2 transaction dump, extracts behavioral features per
//! wallet, scores the whole population and writes a CSV.

mod config;
mod error;
mod loader;
mod output;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_core::{
    group_by_wallet, FeatureMatrix, FeatureMatrixBuilder, ScoreSummary, ScoringEngine,
    Transaction,
};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::loader::DataSummary;

#[derive(Debug, Parser)]
#[command(name = "credit-score")]
#[command(about = "Behavioral credit scores for lending-protocol wallets", long_about = None)]
struct Args {
    /// Raw transaction dump (JSON array)
    #[arg(long)]
    input: PathBuf,

    /// Output CSV; defaults to `output.path` from configuration
    #[arg(long)]
    output: Option<PathBuf>,

    /// Extra configuration file layered over the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append every feature column to the CSV
    #[arg(long)]
    features: bool,

    /// Wallets per extraction chunk (0 = single pass)
    #[arg(long)]
    chunk_size: Option<usize>,
}

/// Extract feature vectors, `chunk_size` wallets at a time.
fn build_matrix(transactions: Vec<Transaction>, chunk_size: usize) -> AppResult<FeatureMatrix> {
    let histories = group_by_wallet(transactions);
    let chunk_size = if chunk_size == 0 {
        histories.len().max(1)
    } else {
        chunk_size
    };

    let mut builder = FeatureMatrixBuilder::new();
    let mut histories = histories.into_iter().peekable();
    while histories.peek().is_some() {
        let chunk: Vec<_> = histories.by_ref().take(chunk_size).collect();
        builder.push_histories(chunk)?;
    }
    Ok(builder.finish())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_cli=info,credit_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .init();

    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
    // Scoring configuration is validated before any input is read.
    let engine = ScoringEngine::new(&config.scoring).context("Invalid scoring configuration")?;

    tracing::info!(
        weights = engine.model().weights.len(),
        rules = engine.model().rules.len(),
        amount_decimals = config.input.amount_decimals,
        "Scoring engine ready"
    );

    let report = loader::load_file(&args.input, config.input.amount_decimals)?;
    tracing::info!(
        raw = report.raw_records,
        normalized = report.transactions.len(),
        skipped = report.skipped,
        "Loaded transactions"
    );
    if report.transactions.is_empty() {
        return Err(AppError::NoTransactions {
            skipped: report.skipped,
        }
        .into());
    }
    DataSummary::from_transactions(&report.transactions).log();

    let chunk_size = args.chunk_size.unwrap_or(config.pipeline.chunk_size);
    let matrix = build_matrix(report.transactions, chunk_size)?;
    tracing::info!(wallets = matrix.len(), "Feature extraction complete");

    let scores = engine.score_population(&matrix)?;

    let summary = ScoreSummary::from_scores(&scores);
    tracing::info!(
        wallets = summary.wallets,
        mean = summary.mean,
        median = summary.median,
        min = summary.min,
        max = summary.max,
        "Score summary"
    );
    for (category, count) in &summary.categories {
        tracing::info!(category = %category, count, "Score distribution");
    }

    let output_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.output.path));
    let file = File::create(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    output::write_scores(
        BufWriter::new(file),
        &scores,
        &matrix,
        args.features || config.output.include_features,
    )?;

    tracing::info!(path = %output_path.display(), wallets = scores.len(), "Scores written");
    Ok(())
}
