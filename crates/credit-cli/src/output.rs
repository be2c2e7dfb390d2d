//! CSV output of final scores

use std::io::Write;

use credit_core::{Feature, FeatureMatrix, FeatureVector, WalletScore};

use crate::error::AppResult;

const SUMMARY_FEATURES: [Feature; 5] = [
    Feature::TotalTransactions,
    Feature::TotalVolume,
    Feature::TenureDays,
    Feature::LiquidationCount,
    Feature::RepayConsistencyScore,
];

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn header(include_features: bool) -> Vec<String> {
    let mut columns: Vec<String> = [
        "wallet_address",
        "credit_score",
        "score_category",
        "base_score",
        "risk_adjusted_score",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    columns.extend(SUMMARY_FEATURES.iter().map(|f| f.name().to_string()));
    if include_features {
        columns.extend(
            Feature::ALL
                .iter()
                .filter(|f| !SUMMARY_FEATURES.contains(*f))
                .map(|f| f.name().to_string()),
        );
    }
    columns
}

fn row(score: &WalletScore, features: &FeatureVector, include_features: bool) -> Vec<String> {
    let diagnostic = |key: &str| {
        score
            .diagnostics
            .get(key)
            .map(|v| format!("{:.2}", v))
            .unwrap_or_default()
    };

    let mut fields = vec![
        escape(&score.wallet_address),
        score.score.to_string(),
        escape(&score.category.to_string()),
        diagnostic("base_score"),
        diagnostic("risk_adjusted_score"),
    ];
    fields.extend(SUMMARY_FEATURES.iter().map(|f| features.get(*f).to_string()));
    if include_features {
        fields.extend(
            Feature::ALL
                .iter()
                .filter(|f| !SUMMARY_FEATURES.contains(*f))
                .map(|f| features.get(*f).to_string()),
        );
    }
    fields
}

/// Write one line per wallet. `scores` must be in the same order as the
/// matrix rows, which is what the scoring engine returns.
pub fn write_scores<W: Write>(
    mut writer: W,
    scores: &[WalletScore],
    matrix: &FeatureMatrix,
    include_features: bool,
) -> AppResult<()> {
    writeln!(writer, "{}", header(include_features).join(","))?;
    for (score, features) in scores.iter().zip(matrix.rows()) {
        debug_assert_eq!(score.wallet_address, features.wallet_address);
        writeln!(writer, "{}", row(score, features, include_features).join(","))?;
    }
    writer.flush()?;
    Ok(())
}
