//! Descriptive profiles of segments and clusters

use ndarray::Array1;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::data::CustomerMetrics;
use crate::error::{Result, RfmError};
use crate::model::ClusterLabel;
use crate::segment::{Segment, SegmentLabel};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Sample standard deviation; 0 for groups of one
    pub std: f64,
}

impl MetricStats {
    fn from_values(values: Vec<f64>) -> Self {
        let values = Array1::from(values);
        let mean = values.mean().unwrap_or(0.0);
        let std = if values.len() < 2 { 0.0 } else { values.std(1.0) };
        Self { mean, std }
    }
}

/// Size and RFM statistics of one group of customers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupProfile<K> {
    pub group: K,
    pub customers: usize,
    /// Share of all customers, in percent
    pub percentage: f64,
    pub recency: MetricStats,
    pub frequency: MetricStats,
    pub monetary: MetricStats,
}

pub type SegmentProfile = GroupProfile<Segment>;
pub type ClusterProfile = GroupProfile<usize>;

/// Profiles ordered by segment priority
pub fn segment_profiles(
    metrics: &[CustomerMetrics],
    labels: &[SegmentLabel],
) -> Result<Vec<SegmentProfile>> {
    profile_groups(
        metrics,
        labels.iter().map(|l| (l.customer_id.as_str(), l.segment)),
        labels.len(),
    )
}

/// Profiles ordered by cluster id
pub fn cluster_profiles(
    metrics: &[CustomerMetrics],
    labels: &[ClusterLabel],
) -> Result<Vec<ClusterProfile>> {
    profile_groups(
        metrics,
        labels.iter().map(|l| (l.customer_id.as_str(), l.cluster)),
        labels.len(),
    )
}

fn profile_groups<'a, K: Ord + Copy>(
    metrics: &[CustomerMetrics],
    labels: impl Iterator<Item = (&'a str, K)>,
    n_labels: usize,
) -> Result<Vec<GroupProfile<K>>> {
    let group_of: HashMap<&str, K> = labels.collect();
    let unmatched = metrics
        .iter()
        .filter(|m| !group_of.contains_key(m.customer_id.as_str()))
        .count();
    if unmatched > 0 || n_labels != metrics.len() {
        return Err(RfmError::MisalignedLabels {
            segments: metrics.len(),
            clusters: n_labels,
            unmatched: unmatched.max(n_labels.abs_diff(metrics.len())),
        });
    }

    let mut members: BTreeMap<K, Vec<&CustomerMetrics>> = BTreeMap::new();
    for m in metrics {
        members
            .entry(group_of[m.customer_id.as_str()])
            .or_default()
            .push(m);
    }

    let total = metrics.len() as f64;
    Ok(members
        .into_iter()
        .map(|(group, rows)| GroupProfile {
            group,
            customers: rows.len(),
            percentage: rows.len() as f64 / total * 100.0,
            recency: MetricStats::from_values(rows.iter().map(|m| m.recency as f64).collect()),
            frequency: MetricStats::from_values(rows.iter().map(|m| m.frequency as f64).collect()),
            monetary: MetricStats::from_values(rows.iter().map(|m| m.monetary).collect()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn metric(id: &str, recency: u64, frequency: u64, monetary: f64) -> CustomerMetrics {
        CustomerMetrics {
            customer_id: id.to_string(),
            recency,
            frequency,
            monetary,
            last_purchase: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_segment_profiles() {
        let metrics = vec![
            metric("a", 2, 10, 1000.0),
            metric("b", 4, 8, 800.0),
            metric("c", 200, 1, 15.0),
        ];
        let labels = vec![
            SegmentLabel {
                customer_id: "c".into(),
                segment: Segment::Lost,
            },
            SegmentLabel {
                customer_id: "a".into(),
                segment: Segment::Champions,
            },
            SegmentLabel {
                customer_id: "b".into(),
                segment: Segment::Champions,
            },
        ];
        let profiles = segment_profiles(&metrics, &labels).unwrap();

        assert_eq!(profiles.len(), 2);
        let champions = &profiles[0];
        assert_eq!(champions.group, Segment::Champions);
        assert_eq!(champions.customers, 2);
        assert_abs_diff_eq!(champions.percentage, 200.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(champions.recency.mean, 3.0);
        assert_abs_diff_eq!(champions.monetary.std, 2f64.sqrt() * 100.0, epsilon = 1e-9);

        let lost = &profiles[1];
        assert_eq!(lost.customers, 1);
        assert_eq!(lost.frequency.std, 0.0);
    }

    #[test]
    fn test_cluster_profiles_require_alignment() {
        let metrics = vec![metric("a", 1, 1, 1.0), metric("b", 2, 2, 2.0)];
        let labels = vec![ClusterLabel {
            customer_id: "a".into(),
            cluster: 0,
        }];
        assert!(cluster_profiles(&metrics, &labels).is_err());

        let labels = vec![
            ClusterLabel {
                customer_id: "b".into(),
                cluster: 1,
            },
            ClusterLabel {
                customer_id: "a".into(),
                cluster: 0,
            },
        ];
        let profiles = cluster_profiles(&metrics, &labels).unwrap();
        let groups: Vec<usize> = profiles.iter().map(|p| p.group).collect();
        assert_eq!(groups, vec![0, 1]);
    }
}
