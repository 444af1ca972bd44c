//! Error type shared by every stage of the analysis

use thiserror::Error;

/// Failures reported by the aggregation, scoring and clustering stages.
///
/// Every variant carries the offending parameter or the counts involved so a
/// caller can diagnose the failure without inspecting intermediate state.
#[derive(Error, Debug)]
pub enum RfmError {
    #[error("empty input: no {stage} to process")]
    EmptyInput { stage: &'static str },

    #[error("invalid configuration for `{parameter}`: {reason}")]
    InvalidConfiguration {
        parameter: &'static str,
        reason: String,
    },

    #[error(
        "insufficient data for clustering: {customers} customers ({distinct_points} distinct points), need {required}"
    )]
    InsufficientData {
        customers: usize,
        distinct_points: usize,
        required: usize,
    },

    #[error("degenerate distribution for {metric}: {reason}")]
    DegenerateDistribution {
        metric: &'static str,
        reason: String,
    },

    #[error("invalid transaction #{index} (customer '{customer_id}'): {reason}")]
    InvalidTransaction {
        index: usize,
        customer_id: String,
        reason: String,
    },

    #[error(
        "segment and cluster labels are not aligned: {segments} segment labels, {clusters} cluster labels, {unmatched} unmatched customers"
    )]
    MisalignedLabels {
        segments: usize,
        clusters: usize,
        unmatched: usize,
    },

    #[error("k-means fit failed for k={k}: {reason}")]
    ClusterFit { k: usize, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RfmError {
    pub(crate) fn config(parameter: &'static str, reason: impl Into<String>) -> Self {
        RfmError::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, RfmError>;
