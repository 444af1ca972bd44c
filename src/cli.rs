//! Command-line interface definitions and argument parsing

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config::AnalysisConfig;
use crate::data::Transaction;

/// RFM scoring, rule-based segmentation and K-Means clustering of customer transactions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a JSON array of transactions
    /// ({"customer_id", "timestamp", "amount", optional "transaction_id"})
    #[arg(short, long, default_value = "transactions.json")]
    pub input: PathBuf,

    /// JSON configuration file; command-line flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Reference date for recency (RFC 3339 or YYYY-MM-DD); defaults to the latest transaction
    #[arg(short, long)]
    pub reference_date: Option<String>,

    /// Number of quantile buckets per metric
    #[arg(short, long)]
    pub quantiles: Option<u32>,

    /// Smallest cluster count to evaluate
    #[arg(long)]
    pub k_min: Option<usize>,

    /// Largest cluster count to evaluate
    #[arg(long)]
    pub k_max: Option<usize>,

    /// Fit exactly this many clusters instead of searching
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Random seed for K-Means initialization
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum iterations for K-Means algorithm
    #[arg(long)]
    pub max_iters: Option<u64>,

    /// Tolerance for K-Means convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Stop after segmentation; skip clustering and reconciliation
    #[arg(long)]
    pub no_clustering: bool,

    /// Write the full analysis as JSON to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Prediction mode: provide R,F,M values as comma-separated string
    /// Example: --predict "30,10,500.0" for Recency=30, Frequency=10, Monetary=500.0
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse RFM values from the predict string
    /// Expected format: "recency,frequency,monetary"
    pub fn parse_rfm_values(&self) -> anyhow::Result<Option<[f64; 3]>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != 3 {
            anyhow::bail!("Predict values must be in format 'recency,frequency,monetary'");
        }

        let mut values = [0.0; 3];
        for ((slot, part), name) in values
            .iter_mut()
            .zip(&parts)
            .zip(["recency", "frequency", "monetary"])
        {
            *slot = part
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid {name} value: {part}"))?;
        }
        Ok(Some(values))
    }

    pub fn parse_reference_date(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let Some(ref raw) = self.reference_date else {
            return Ok(None);
        };
        let raw = raw.trim();
        if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(date.with_timezone(&Utc)));
        }
        let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("Invalid reference date: {raw}"))?;
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .with_context(|| format!("Invalid reference date: {raw}"))?;
        Ok(Some(midnight.and_utc()))
    }

    /// Configuration file (or defaults) with command-line overrides applied
    pub fn build_config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_json_file(path)?,
            None => AnalysisConfig::default(),
        };

        if let Some(date) = self.parse_reference_date()? {
            config.aggregation.reference_date = Some(date);
        }
        if let Some(q) = self.quantiles {
            config.scoring.quantiles = q;
        }
        let clustering = &mut config.clustering;
        if let Some(k) = self.k_min {
            clustering.k_min = k;
        }
        if let Some(k) = self.k_max {
            clustering.k_max = k;
        }
        if self.clusters.is_some() {
            clustering.fixed_k = self.clusters;
        }
        if let Some(seed) = self.seed {
            clustering.seed = seed;
        }
        if let Some(iters) = self.max_iters {
            clustering.max_iterations = iters;
        }
        if let Some(tol) = self.tolerance {
            clustering.tolerance = tol;
        }
        if self.no_clustering {
            config.include_clustering = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Read a JSON array of transactions
pub fn load_transactions(path: &Path) -> anyhow::Result<Vec<Transaction>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transactions from {}", path.display()))?;
    let transactions: Vec<Transaction> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse transactions in {}", path.display()))?;
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_args() -> Args {
        Args::parse_from(["rfmseg"])
    }

    #[test]
    fn test_parse_rfm_values() {
        let mut args = create_test_args();
        args.predict = Some("30,10,500.0".to_string());

        let result = args.parse_rfm_values().unwrap();
        assert_eq!(result, Some([30.0, 10.0, 500.0]));

        args.predict = None;
        assert_eq!(args.parse_rfm_values().unwrap(), None);

        args.predict = Some("invalid".to_string());
        assert!(args.parse_rfm_values().is_err());

        args.predict = Some("1,two,3".to_string());
        assert!(args.parse_rfm_values().is_err());
    }

    #[test]
    fn test_parse_reference_date() {
        let mut args = create_test_args();
        args.reference_date = Some("2011-12-09".to_string());
        let date = args.parse_reference_date().unwrap().unwrap();
        assert_eq!(date.to_rfc3339(), "2011-12-09T00:00:00+00:00");

        args.reference_date = Some("2011-12-09T06:30:00Z".to_string());
        let date = args.parse_reference_date().unwrap().unwrap();
        assert_eq!(date.to_rfc3339(), "2011-12-09T06:30:00+00:00");

        args.reference_date = Some("yesterday".to_string());
        assert!(args.parse_reference_date().is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"scoring": {{"quantiles": 4}}, "clustering": {{"k_max": 6, "seed": 1}}}}"#
        )
        .unwrap();

        let args = Args::parse_from([
            "rfmseg",
            "--config",
            file.path().to_str().unwrap(),
            "--seed",
            "99",
            "-k",
            "3",
        ]);
        let config = args.build_config().unwrap();

        assert_eq!(config.scoring.quantiles, 4);
        assert_eq!(config.clustering.k_max, 6);
        assert_eq!(config.clustering.seed, 99);
        assert_eq!(config.clustering.fixed_k, Some(3));
    }

    #[test]
    fn test_no_clustering_flag() {
        let config = create_test_args().build_config().unwrap();
        assert!(config.include_clustering);

        let args = Args::parse_from(["rfmseg", "--no-clustering"]);
        assert!(!args.build_config().unwrap().include_clustering);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["rfmseg", "--k-min", "1"]);
        assert!(args.build_config().is_err());
    }

    #[test]
    fn test_load_transactions() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[{{"customer_id": "17850", "timestamp": "2010-12-01T08:26:00Z", "amount": 15.3, "transaction_id": "536365"}},
               {{"customer_id": "13047", "timestamp": "2010-12-01T08:34:00Z", "amount": 22.0}}]"#
        )
        .unwrap();

        let transactions = load_transactions(file.path()).unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].transaction_id.as_deref(), Some("536365"));
        assert_eq!(transactions[1].transaction_id, None);
    }
}
