//! Quantile scoring of recency, frequency and monetary metrics

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::config::{BinningStrategy, ScoringConfig};
use crate::data::CustomerMetrics;
use crate::error::{Result, RfmError};

/// One of the three RFM dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Recency,
    Frequency,
    Monetary,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Recency, Metric::Frequency, Metric::Monetary];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Recency => "recency",
            Metric::Frequency => "frequency",
            Metric::Monetary => "monetary",
        }
    }

    /// Smaller raw values score higher for recency only
    pub fn lower_is_better(self) -> bool {
        matches!(self, Metric::Recency)
    }

    fn value(self, m: &CustomerMetrics) -> f64 {
        match self {
            Metric::Recency => m.recency as f64,
            Metric::Frequency => m.frequency as f64,
            Metric::Monetary => m.monetary,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordinal R, F and M scores of one customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfmScore {
    pub customer_id: String,
    pub r: u32,
    pub f: u32,
    pub m: u32,
}

impl RfmScore {
    /// Concatenated display code, e.g. "545"
    pub fn code(&self) -> String {
        format!("{}{}{}", self.r, self.f, self.m)
    }

    pub fn total(&self) -> u32 {
        self.r + self.f + self.m
    }
}

/// Which binning path produced the scores of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningMethod {
    /// Distinct value-quantile edges
    Quantile,
    /// Sorted rank split into K groups, ties broken by customer id
    Rank,
    /// Single distinct value; every customer gets the middle score
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricBinning {
    pub metric: Metric,
    pub method: BinningMethod,
    /// K + 1 value-quantile edges (empty for constant metrics)
    pub edges: Vec<f64>,
}

/// Scores for every customer, in the order of the input metrics
#[derive(Debug, Clone, Serialize)]
pub struct ScoreTable {
    pub quantiles: u32,
    pub scores: Vec<RfmScore>,
    pub binning: Vec<MetricBinning>,
}

impl ScoreTable {
    pub fn binning_for(&self, metric: Metric) -> Option<&MetricBinning> {
        self.binning.iter().find(|b| b.metric == metric)
    }
}

/// Score every customer on each metric independently.
///
/// Recency is inverted so the most recent customers receive K. When a
/// metric's quantile edges collapse (fewer distinct values than buckets),
/// scores fall back to rank binning instead of failing.
pub fn score_metrics(metrics: &[CustomerMetrics], config: &ScoringConfig) -> Result<ScoreTable> {
    config.validate()?;
    if metrics.is_empty() {
        return Err(RfmError::EmptyInput { stage: "customers" });
    }

    let k = config.quantiles;
    let ids: Vec<&str> = metrics.iter().map(|m| m.customer_id.as_str()).collect();

    let mut per_metric = Vec::with_capacity(3);
    let mut binning = Vec::with_capacity(3);
    for metric in Metric::ALL {
        let values: Vec<f64> = metrics.iter().map(|m| metric.value(m)).collect();
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(RfmError::DegenerateDistribution {
                metric: metric.name(),
                reason: format!("non-finite value {bad}"),
            });
        }

        let (mut buckets, method, edges) = bin_values(&values, &ids, k, config.binning);
        if method != BinningMethod::Constant && metric.lower_is_better() {
            buckets.iter_mut().for_each(|b| *b = k + 1 - *b);
        }
        log::debug!("{metric} scored with {method:?} binning over {k} buckets");
        per_metric.push(buckets);
        binning.push(MetricBinning {
            metric,
            method,
            edges,
        });
    }

    let scores = ids
        .iter()
        .enumerate()
        .map(|(i, id)| RfmScore {
            customer_id: id.to_string(),
            r: per_metric[0][i],
            f: per_metric[1][i],
            m: per_metric[2][i],
        })
        .collect();

    Ok(ScoreTable {
        quantiles: k,
        scores,
        binning,
    })
}

/// Assign each value an ascending bucket in [1, k].
pub fn bin_values(
    values: &[f64],
    ids: &[&str],
    k: u32,
    strategy: BinningStrategy,
) -> (Vec<u32>, BinningMethod, Vec<f64>) {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let (Some(&first), Some(&last)) = (sorted.first(), sorted.last()) else {
        return (Vec::new(), BinningMethod::Constant, Vec::new());
    };
    if first == last {
        let middle = (k + 1) / 2;
        return (vec![middle; values.len()], BinningMethod::Constant, Vec::new());
    }

    let edges = quantile_edges(&sorted, k);
    let collapsed = edges.windows(2).any(|w| w[1] <= w[0]);

    match strategy {
        BinningStrategy::Quantile if !collapsed => {
            let buckets = values
                .iter()
                .map(|v| {
                    let upper = edges[1..]
                        .iter()
                        .position(|edge| *v <= *edge)
                        .unwrap_or(edges.len() - 2);
                    upper as u32 + 1
                })
                .collect();
            (buckets, BinningMethod::Quantile, edges)
        }
        _ => {
            if strategy == BinningStrategy::Quantile {
                log::warn!(
                    "quantile edges collapsed ({} values, {k} buckets); using rank binning",
                    values.len()
                );
            }
            (rank_buckets(values, ids, k), BinningMethod::Rank, edges)
        }
    }
}

/// K + 1 linearly interpolated quantile edges over sorted values.
fn quantile_edges(sorted: &[f64], k: u32) -> Vec<f64> {
    let span = (sorted.len() - 1) as u64;
    let k = u64::from(k);
    (0..=k)
        .map(|j| {
            let position = span * j;
            let lo = (position / k) as usize;
            let rem = position % k;
            if rem == 0 {
                sorted[lo]
            } else {
                let frac = rem as f64 / k as f64;
                sorted[lo] + (sorted[lo + 1] - sorted[lo]) * frac
            }
        })
        .collect()
}

/// Bin by sorted rank: rank i of n lands in bucket max(1, ceil((i - 1) * k / (n - 1))).
fn rank_buckets(values: &[f64], ids: &[&str], k: u32) -> Vec<u32> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| match values[a].total_cmp(&values[b]) {
        Ordering::Equal => ids[a].cmp(ids[b]),
        other => other,
    });

    let mut buckets = vec![1; n];
    if n < 2 {
        return buckets;
    }
    let span = (n - 1) as u64;
    let k = u64::from(k);
    for (rank0, &idx) in order.iter().enumerate() {
        let bucket = (rank0 as u64 * k).div_ceil(span).max(1);
        buckets[idx] = bucket as u32;
    }
    buckets
}
