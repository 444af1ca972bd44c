//! Cross-tabulation of rule-based segments against learned clusters

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{Result, RfmError};
use crate::model::ClusterLabel;
use crate::segment::{Segment, SegmentLabel};

/// Customers falling in one (segment, cluster) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContingencyCell {
    pub segment: Segment,
    pub cluster: usize,
    pub count: usize,
}

/// The cluster holding most customers of a segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominantCluster {
    pub segment: Segment,
    pub cluster: usize,
    pub count: usize,
    /// count / segment size
    pub share: f64,
}

/// The segment contributing most customers to a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominantSegment {
    pub cluster: usize,
    pub segment: Segment,
    pub count: usize,
    /// count / cluster size
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub total_customers: usize,
    /// Non-empty cells ordered by segment priority, then cluster id
    pub cells: Vec<ContingencyCell>,
    pub segment_totals: Vec<(Segment, usize)>,
    pub cluster_totals: Vec<(usize, usize)>,
    pub dominant_clusters: Vec<DominantCluster>,
    /// Reverse mapping used to give clusters a stable, meaningful name
    pub dominant_segments: Vec<DominantSegment>,
    /// Sum of dominant-cluster counts over all segments, divided by total customers
    pub agreement_ratio: f64,
}

impl ReconciliationReport {
    pub fn count(&self, segment: Segment, cluster: usize) -> usize {
        self.cells
            .iter()
            .find(|c| c.segment == segment && c.cluster == cluster)
            .map_or(0, |c| c.count)
    }

    pub fn dominant_cluster(&self, segment: Segment) -> Option<usize> {
        self.dominant_clusters
            .iter()
            .find(|d| d.segment == segment)
            .map(|d| d.cluster)
    }

    pub fn dominant_segment(&self, cluster: usize) -> Option<Segment> {
        self.dominant_segments
            .iter()
            .find(|d| d.cluster == cluster)
            .map(|d| d.segment)
    }
}

/// Build the contingency table between two labelings of the same customers.
///
/// Labels are joined on customer id; both sides must cover exactly the same
/// customers. Ties for a dominant cluster go to the lowest cluster id, ties
/// for a dominant segment to the higher-priority segment.
pub fn reconcile(
    segments: &[SegmentLabel],
    clusters: &[ClusterLabel],
) -> Result<ReconciliationReport> {
    if segments.is_empty() {
        return Err(RfmError::EmptyInput {
            stage: "segment labels",
        });
    }

    let cluster_of: HashMap<&str, usize> = clusters
        .iter()
        .map(|c| (c.customer_id.as_str(), c.cluster))
        .collect();
    let segment_ids: HashSet<&str> = segments.iter().map(|s| s.customer_id.as_str()).collect();
    let unmatched = segments
        .iter()
        .filter(|s| !cluster_of.contains_key(s.customer_id.as_str()))
        .count();
    // Each customer must carry exactly one label on each side
    if unmatched > 0
        || segment_ids.len() != segments.len()
        || cluster_of.len() != segments.len()
        || clusters.len() != segments.len()
    {
        return Err(RfmError::MisalignedLabels {
            segments: segments.len(),
            clusters: clusters.len(),
            unmatched: unmatched.max(clusters.len().abs_diff(segments.len())),
        });
    }

    let mut table: BTreeMap<(Segment, usize), usize> = BTreeMap::new();
    for label in segments {
        let cluster = cluster_of[label.customer_id.as_str()];
        *table.entry((label.segment, cluster)).or_default() += 1;
    }

    let mut segment_totals: BTreeMap<Segment, usize> = BTreeMap::new();
    let mut cluster_totals: BTreeMap<usize, usize> = BTreeMap::new();
    let mut best_cluster: BTreeMap<Segment, (usize, usize)> = BTreeMap::new();
    let mut best_segment: BTreeMap<usize, (Segment, usize)> = BTreeMap::new();
    for (&(segment, cluster), &count) in &table {
        *segment_totals.entry(segment).or_default() += count;
        *cluster_totals.entry(cluster).or_default() += count;

        // Iteration is ordered by (segment, cluster), so strict > keeps the first on ties
        let entry = best_cluster.entry(segment).or_insert((cluster, count));
        if count > entry.1 {
            *entry = (cluster, count);
        }
        let entry = best_segment.entry(cluster).or_insert((segment, count));
        if count > entry.1 {
            *entry = (segment, count);
        }
    }

    let total_customers = segments.len();
    let dominant_clusters: Vec<DominantCluster> = best_cluster
        .into_iter()
        .map(|(segment, (cluster, count))| DominantCluster {
            segment,
            cluster,
            count,
            share: count as f64 / segment_totals[&segment] as f64,
        })
        .collect();
    let dominant_segments = best_segment
        .into_iter()
        .map(|(cluster, (segment, count))| DominantSegment {
            cluster,
            segment,
            count,
            share: count as f64 / cluster_totals[&cluster] as f64,
        })
        .collect();

    let agreed: usize = dominant_clusters.iter().map(|d| d.count).sum();
    let agreement_ratio = agreed as f64 / total_customers as f64;
    log::info!(
        "Reconciled {total_customers} customers across {} segments and {} clusters: agreement {:.1}%",
        segment_totals.len(),
        cluster_totals.len(),
        agreement_ratio * 100.0
    );

    Ok(ReconciliationReport {
        total_customers,
        cells: table
            .into_iter()
            .map(|((segment, cluster), count)| ContingencyCell {
                segment,
                cluster,
                count,
            })
            .collect(),
        segment_totals: segment_totals.into_iter().collect(),
        cluster_totals: cluster_totals.into_iter().collect(),
        dominant_clusters,
        dominant_segments,
        agreement_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, segment: Segment) -> SegmentLabel {
        SegmentLabel {
            customer_id: id.to_string(),
            segment,
        }
    }

    fn clu(id: &str, cluster: usize) -> ClusterLabel {
        ClusterLabel {
            customer_id: id.to_string(),
            cluster,
        }
    }

    fn create_test_labels() -> (Vec<SegmentLabel>, Vec<ClusterLabel>) {
        let segments = vec![
            seg("a", Segment::Champions),
            seg("b", Segment::Champions),
            seg("c", Segment::Champions),
            seg("d", Segment::Lost),
            seg("e", Segment::Lost),
            seg("f", Segment::Hibernating),
        ];
        // Cluster labels in a different order than the segments
        let clusters = vec![
            clu("f", 1),
            clu("e", 1),
            clu("d", 1),
            clu("c", 2),
            clu("b", 0),
            clu("a", 0),
        ];
        (segments, clusters)
    }

    #[test]
    fn test_contingency_counts() {
        let (segments, clusters) = create_test_labels();
        let report = reconcile(&segments, &clusters).unwrap();

        assert_eq!(report.total_customers, 6);
        assert_eq!(report.count(Segment::Champions, 0), 2);
        assert_eq!(report.count(Segment::Champions, 2), 1);
        assert_eq!(report.count(Segment::Lost, 1), 2);
        assert_eq!(report.count(Segment::Lost, 0), 0);
        assert_eq!(report.cells.iter().map(|c| c.count).sum::<usize>(), 6);
        assert_eq!(report.cluster_totals, vec![(0, 2), (1, 3), (2, 1)]);
    }

    #[test]
    fn test_dominance_and_agreement() {
        let (segments, clusters) = create_test_labels();
        let report = reconcile(&segments, &clusters).unwrap();

        assert_eq!(report.dominant_cluster(Segment::Champions), Some(0));
        assert_eq!(report.dominant_cluster(Segment::Lost), Some(1));
        assert_eq!(report.dominant_cluster(Segment::Hibernating), Some(1));
        assert_eq!(report.dominant_segment(1), Some(Segment::Lost));
        assert_eq!(report.dominant_segment(2), Some(Segment::Champions));
        // 2 (Champions) + 2 (Lost) + 1 (Hibernating) of 6
        assert!((report.agreement_ratio - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_dominant_tie_goes_to_lowest_cluster() {
        let segments = vec![seg("a", Segment::Promising), seg("b", Segment::Promising)];
        let clusters = vec![clu("a", 3), clu("b", 1)];
        let report = reconcile(&segments, &clusters).unwrap();
        assert_eq!(report.dominant_cluster(Segment::Promising), Some(1));
        assert!((report.agreement_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_misaligned_inputs() {
        let (segments, mut clusters) = create_test_labels();
        clusters.pop();
        assert!(matches!(
            reconcile(&segments, &clusters),
            Err(RfmError::MisalignedLabels { unmatched: 1, .. })
        ));

        clusters.push(clu("zz", 0));
        assert!(matches!(
            reconcile(&segments, &clusters),
            Err(RfmError::MisalignedLabels { .. })
        ));
        assert!(matches!(
            reconcile(&[], &[]),
            Err(RfmError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_duplicate_segment_label_rejected() {
        let segments = vec![seg("a", Segment::Champions), seg("a", Segment::Lost)];
        let clusters = vec![clu("a", 0), clu("b", 1)];
        assert!(matches!(
            reconcile(&segments, &clusters),
            Err(RfmError::MisalignedLabels { segments: 2, clusters: 2, .. })
        ));
    }
}
