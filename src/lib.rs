//! RFM segmentation: customer value scoring and segmentation from transaction history
//!
//! Transactions are reduced to per-customer recency, frequency and monetary
//! metrics, scored into quantile buckets, labelled with one of eleven
//! rule-based segments, clustered with K-Means (cluster count chosen by
//! silhouette analysis) and finally the two segmentations are cross-tabulated.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod profile;
pub mod reconcile;
pub mod score;
pub mod segment;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{
    AggregationConfig, AnalysisConfig, BinningStrategy, ClusterConfig, FrequencyBasis,
    ScoringConfig,
};
pub use data::{aggregate_metrics, CustomerMetrics, RfmData, Transaction, TransactionSummary};
pub use error::{Result, RfmError};
pub use model::{
    cluster_customers, fit_kmeans, predict_cluster, ClusterLabel, ClusterResult, KMeansModel,
    SelectionMethod,
};
pub use pipeline::{analyze, analyze_with_rules, Analysis, CustomerRecord};
pub use reconcile::{reconcile, ReconciliationReport};
pub use score::{score_metrics, RfmScore, ScoreTable};
pub use segment::{segment_customers, RuleTable, Segment, SegmentLabel};
