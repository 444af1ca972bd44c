//! Analysis configuration with defaults and validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, RfmError};

/// How the frequency metric counts a customer's activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyBasis {
    /// Every transaction counts once.
    #[default]
    Transactions,
    /// Transactions sharing a transaction id count once; transactions
    /// without an id each count once.
    DistinctTransactionIds,
}

/// How raw metric values are turned into ordinal buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningStrategy {
    /// Value quantiles; falls back to rank binning when bin edges collapse.
    #[default]
    Quantile,
    /// Always bin by sorted rank, ties broken by customer id.
    Rank,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Recency reference point. Defaults to the latest transaction timestamp.
    pub reference_date: Option<DateTime<Utc>>,
    pub frequency_basis: FrequencyBasis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Number of quantile buckets (K); scores fall in [1, K].
    pub quantiles: u32,
    pub binning: BinningStrategy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            quantiles: 5,
            binning: BinningStrategy::Quantile,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quantiles == 0 {
            return Err(RfmError::config("quantiles", "must be at least 1"));
        }
        Ok(())
    }
}

/// Cluster engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Smallest candidate cluster count (inclusive)
    pub k_min: usize,
    /// Largest candidate cluster count (inclusive)
    pub k_max: usize,
    /// Skip the search and fit exactly this many clusters
    pub fixed_k: Option<usize>,
    pub seed: u64,
    /// Maximum Lloyd iterations per k-means run
    pub max_iterations: u64,
    /// Centroid movement below which a run is considered converged
    pub tolerance: f64,
    /// Independent k-means initializations per fit; the lowest inertia wins
    pub n_runs: usize,
    /// Apply ln(1 + x) to frequency and monetary before standardizing
    pub log_transform: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            k_min: 2,
            k_max: 10,
            fixed_k: None,
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
            n_runs: 10,
            log_transform: true,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k_min < 2 {
            return Err(RfmError::config(
                "k_min",
                format!("must be at least 2, got {}", self.k_min),
            ));
        }
        if self.k_min > self.k_max {
            return Err(RfmError::config(
                "k_max",
                format!("k_min ({}) exceeds k_max ({})", self.k_min, self.k_max),
            ));
        }
        if let Some(k) = self.fixed_k {
            if k < 2 {
                return Err(RfmError::config(
                    "fixed_k",
                    format!("must be at least 2, got {k}"),
                ));
            }
        }
        if self.max_iterations == 0 {
            return Err(RfmError::config("max_iterations", "must be positive"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(RfmError::config(
                "tolerance",
                format!("must be a positive finite number, got {}", self.tolerance),
            ));
        }
        if self.n_runs == 0 {
            return Err(RfmError::config("n_runs", "must be positive"));
        }
        Ok(())
    }

    /// Smallest cluster count the engine will be asked to fit.
    pub fn min_clusters(&self) -> usize {
        self.fixed_k.unwrap_or(self.k_min)
    }
}

/// Full configuration for one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub aggregation: AggregationConfig,
    pub scoring: ScoringConfig,
    pub clustering: ClusterConfig,
    /// Run the cluster engine and reconciliation after segmentation
    pub include_clustering: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationConfig::default(),
            scoring: ScoringConfig::default(),
            clustering: ClusterConfig::default(),
            include_clustering: true,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        if self.include_clustering {
            self.clustering.validate()?;
        }
        Ok(())
    }

    /// Load a configuration from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        let config: AnalysisConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}
