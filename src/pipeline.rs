//! One-shot analysis: aggregation, scoring, segmentation, clustering and reconciliation

use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::data::{aggregate_metrics, MetricTable, RfmData, Transaction, TransactionSummary};
use crate::error::{Result, RfmError};
use crate::model::{cluster_customers, predict_cluster, ClusterResult, ClusterSelection};
use crate::profile::{cluster_profiles, segment_profiles, ClusterProfile, SegmentProfile};
use crate::reconcile::{reconcile, ReconciliationReport};
use crate::score::{score_metrics, ScoreTable};
use crate::segment::{segment_customers, segment_distribution, RuleTable, Segment, SegmentLabel};

/// Every output of a completed run, aligned by customer (sorted by id).
///
/// The cluster-side fields are `None` when clustering was switched off.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub summary: TransactionSummary,
    pub metrics: MetricTable,
    pub scores: ScoreTable,
    pub segments: Vec<SegmentLabel>,
    pub segment_profiles: Vec<SegmentProfile>,
    pub rfm_data: Option<RfmData>,
    pub clusters: Option<ClusterResult>,
    pub reconciliation: Option<ReconciliationReport>,
    pub cluster_profiles: Option<Vec<ClusterProfile>>,
}

/// Flat per-customer row for tabular export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub recency: u64,
    pub frequency: u64,
    pub monetary: f64,
    pub r_score: u32,
    pub f_score: u32,
    pub m_score: u32,
    pub rfm_code: String,
    pub rfm_total: u32,
    pub segment: Segment,
    pub cluster: Option<usize>,
}

#[derive(Serialize)]
struct AnalysisExport<'a> {
    summary: &'a TransactionSummary,
    reference_date: String,
    quantiles: u32,
    segment_distribution: Vec<(Segment, usize)>,
    segment_profiles: &'a [SegmentProfile],
    cluster_selection: Option<&'a ClusterSelection>,
    silhouette: Option<f64>,
    reconciliation: Option<&'a ReconciliationReport>,
    cluster_profiles: Option<&'a [ClusterProfile]>,
    customers: Vec<CustomerRecord>,
}

/// Run every stage with the default rule table
pub fn analyze(transactions: &[Transaction], config: &AnalysisConfig) -> Result<Analysis> {
    analyze_with_rules(transactions, config, &RuleTable::default())
}

/// Run every stage; the first failing stage aborts the run
pub fn analyze_with_rules(
    transactions: &[Transaction],
    config: &AnalysisConfig,
    rules: &RuleTable,
) -> Result<Analysis> {
    config.validate()?;

    let metrics = aggregate_metrics(transactions, &config.aggregation)?;
    let summary = TransactionSummary::from_transactions(transactions)?;

    let scores = score_metrics(&metrics.customers, &config.scoring)?;
    log::info!("RFM scores calculated for {} customers", scores.scores.len());

    if scores.quantiles != 5 && *rules == RuleTable::default() {
        log::warn!(
            "default segment rules assume 5 score levels, got {}; some segments may be unreachable",
            scores.quantiles
        );
    }
    let segments = segment_customers(&scores.scores, rules);
    let segment_profiles = segment_profiles(&metrics.customers, &segments)?;

    let mut analysis = Analysis {
        summary,
        metrics,
        scores,
        segments,
        segment_profiles,
        rfm_data: None,
        clusters: None,
        reconciliation: None,
        cluster_profiles: None,
    };
    if !config.include_clustering {
        log::info!("Clustering disabled; stopping after segmentation");
        return Ok(analysis);
    }

    let customers = &analysis.metrics.customers;
    let rfm_data = RfmData::from_metrics(customers, config.clustering.log_transform)?;
    let clusters = cluster_customers(&rfm_data, &config.clustering)?;
    analysis.reconciliation = Some(reconcile(&analysis.segments, &clusters.labels)?);
    analysis.cluster_profiles = Some(cluster_profiles(customers, &clusters.labels)?);
    analysis.rfm_data = Some(rfm_data);
    analysis.clusters = Some(clusters);

    Ok(analysis)
}

impl Analysis {
    pub fn customer_records(&self) -> Vec<CustomerRecord> {
        let cluster_labels = self.clusters.as_ref().map(|c| c.labels.as_slice());
        self.metrics
            .customers
            .iter()
            .zip(&self.scores.scores)
            .zip(&self.segments)
            .enumerate()
            .map(|(i, ((m, score), segment))| CustomerRecord {
                customer_id: m.customer_id.clone(),
                recency: m.recency,
                frequency: m.frequency,
                monetary: m.monetary,
                r_score: score.r,
                f_score: score.f,
                m_score: score.m,
                rfm_code: score.code(),
                rfm_total: score.total(),
                segment: segment.segment,
                cluster: cluster_labels.and_then(|labels| labels.get(i)).map(|l| l.cluster),
            })
            .collect()
    }

    pub fn segment_distribution(&self) -> Vec<(Segment, usize)> {
        segment_distribution(&self.segments)
    }

    /// Cluster of new raw (recency, frequency, monetary) values under the fitted model
    pub fn predict_cluster(&self, rfm_values: &[f64; 3]) -> Result<usize> {
        match (&self.clusters, &self.rfm_data) {
            (Some(clusters), Some(rfm_data)) => {
                predict_cluster(&clusters.model, rfm_data, rfm_values)
            }
            _ => Err(RfmError::config(
                "include_clustering",
                "prediction needs a run with clustering enabled",
            )),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let export = AnalysisExport {
            summary: &self.summary,
            reference_date: self.metrics.reference_date.to_rfc3339(),
            quantiles: self.scores.quantiles,
            segment_distribution: self.segment_distribution(),
            segment_profiles: &self.segment_profiles,
            cluster_selection: self.clusters.as_ref().map(|c| &c.selection),
            silhouette: self.clusters.as_ref().map(|c| c.silhouette),
            reconciliation: self.reconciliation.as_ref(),
            cluster_profiles: self.cluster_profiles.as_deref(),
            customers: self.customer_records(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }
}
