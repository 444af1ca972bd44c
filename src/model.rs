//! K-Means cluster engine with automatic cluster-count selection

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;
use crate::data::RfmData;
use crate::error::{Result, RfmError};

/// Fitted k-means partition of the scaled feature matrix
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignment per row of the training features
    pub labels: Array1<usize>,
    /// Cluster centroids in scaled space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    /// Nearest centroid for a scaled feature vector
    pub fn predict(&self, features: &Array1<f64>) -> Result<usize> {
        if features.len() != self.centroids.ncols() {
            return Err(RfmError::config(
                "predict",
                format!(
                    "feature vector must have {} dimensions, got {}",
                    self.centroids.ncols(),
                    features.len()
                ),
            ));
        }

        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = 0;
        for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
            let distance = euclidean_distance(&features.view(), &centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = cluster_idx;
            }
        }

        Ok(closest_cluster)
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Quality measures recorded for one candidate cluster count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub k: usize,
    pub inertia: f64,
    pub silhouette: f64,
    /// Size of the smallest cluster (0 if a cluster ended up empty)
    pub min_cluster_size: usize,
}

impl CandidateScore {
    /// Every cluster holds at least two customers
    pub fn well_populated(&self) -> bool {
        self.min_cluster_size >= 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Highest mean silhouette among well-populated candidates
    Silhouette,
    /// Largest second difference of the inertia curve
    Elbow,
    /// Cluster count given by configuration
    Fixed,
}

/// Outcome of the cluster-count search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSelection {
    pub selected_k: usize,
    pub method: SelectionMethod,
    /// Ordered by k
    pub candidates: Vec<CandidateScore>,
    pub elbow_k: Option<usize>,
    pub best_silhouette_k: Option<usize>,
}

/// Cluster assigned to one customer. Ids carry no meaning across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLabel {
    pub customer_id: String,
    pub cluster: usize,
}

/// Final partition and the search that produced it
#[derive(Debug, Clone)]
pub struct ClusterResult {
    pub model: KMeansModel,
    pub selection: ClusterSelection,
    pub silhouette: f64,
    pub labels: Vec<ClusterLabel>,
}

/// Fit k-means with a fixed cluster count.
///
/// Deterministic for a given feature matrix, `n_clusters` and seed.
pub fn fit_kmeans(
    rfm_data: &RfmData,
    n_clusters: usize,
    config: &ClusterConfig,
) -> Result<KMeansModel> {
    if n_clusters < 2 {
        return Err(RfmError::config(
            "n_clusters",
            format!("must be at least 2, got {n_clusters}"),
        ));
    }
    if rfm_data.len() < n_clusters {
        return Err(RfmError::InsufficientData {
            customers: rfm_data.len(),
            distinct_points: rfm_data.distinct_points(),
            required: n_clusters,
        });
    }

    let dataset = DatasetBase::from(rfm_data.features.clone());
    let rng = Pcg64::seed_from_u64(config.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(config.max_iterations)
        .tolerance(config.tolerance)
        .n_runs(config.n_runs)
        .fit(&dataset)
        .map_err(|e| RfmError::ClusterFit {
            k: n_clusters,
            reason: e.to_string(),
        })?;

    let labels: Array1<usize> = model.predict(&rfm_data.features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&rfm_data.features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Fit every candidate k in parallel and score each fit.
///
/// Results come back ordered by k, paired with the fitted model.
pub fn evaluate_candidates(
    rfm_data: &RfmData,
    ks: &[usize],
    config: &ClusterConfig,
) -> Result<Vec<(CandidateScore, KMeansModel)>> {
    ks.par_iter()
        .map(|&k| -> Result<(CandidateScore, KMeansModel)> {
            let model = fit_kmeans(rfm_data, k, config)?;
            let silhouette = silhouette_score(&rfm_data.features, &model.labels, k);
            let min_cluster_size = model.cluster_sizes().into_iter().min().unwrap_or(0);
            log::debug!(
                "k={k}: inertia={:.3} silhouette={silhouette:.4} smallest cluster={min_cluster_size}",
                model.inertia
            );
            let score = CandidateScore {
                k,
                inertia: model.inertia,
                silhouette,
                min_cluster_size,
            };
            Ok((score, model))
        })
        .collect()
}

/// Choose a cluster count from scored candidates (ordered by k).
///
/// Silhouette decides among candidates whose clusters all hold at least two
/// customers, ties going to the smaller k. With no such candidate the elbow
/// of the inertia curve is used.
pub fn select_k(candidates: &[CandidateScore]) -> Option<(usize, SelectionMethod)> {
    let best_silhouette = best_silhouette_k(candidates);
    match best_silhouette {
        Some(k) => Some((k, SelectionMethod::Silhouette)),
        None => find_elbow(candidates).map(|k| (k, SelectionMethod::Elbow)),
    }
}

fn best_silhouette_k(candidates: &[CandidateScore]) -> Option<usize> {
    candidates
        .iter()
        .filter(|c| c.well_populated())
        .fold(None::<&CandidateScore>, |best, c| match best {
            Some(b) if b.silhouette >= c.silhouette => Some(b),
            _ => Some(c),
        })
        .map(|c| c.k)
}

/// k at the point of maximum curvature (second difference) of inertia.
///
/// With fewer than three candidates the smallest k is returned.
pub fn find_elbow(candidates: &[CandidateScore]) -> Option<usize> {
    if candidates.len() < 3 {
        return candidates.first().map(|c| c.k);
    }

    let mut best_idx = 1;
    let mut best_diff = f64::NEG_INFINITY;
    for (i, w) in candidates.windows(3).enumerate() {
        let second_diff = w[0].inertia - 2.0 * w[1].inertia + w[2].inertia;
        if second_diff > best_diff {
            best_diff = second_diff;
            best_idx = i + 1;
        }
    }
    Some(candidates[best_idx].k)
}

/// Search the configured cluster-count range (or use the fixed k) and
/// return the final partition with one label per customer.
pub fn cluster_customers(rfm_data: &RfmData, config: &ClusterConfig) -> Result<ClusterResult> {
    config.validate()?;

    let customers = rfm_data.len();
    let distinct_points = rfm_data.distinct_points();
    let k_min = config.min_clusters();
    if customers < k_min {
        return Err(RfmError::InsufficientData {
            customers,
            distinct_points,
            required: k_min,
        });
    }

    // Silhouette needs k < number of distinct points
    let k_upper = config.fixed_k.unwrap_or(config.k_max).min(distinct_points.saturating_sub(1));
    if k_upper < k_min {
        return Err(RfmError::InsufficientData {
            customers,
            distinct_points,
            required: k_min + 1,
        });
    }
    if config.fixed_k.is_none() && k_upper < config.k_max {
        log::warn!(
            "only {distinct_points} distinct customers; searching k in {k_min}..={k_upper} instead of {k_min}..={}",
            config.k_max
        );
    }

    let ks: Vec<usize> = (k_min..=k_upper).collect();
    let mut evaluated = evaluate_candidates(rfm_data, &ks, config)?;
    let candidates: Vec<CandidateScore> = evaluated.iter().map(|(c, _)| c.clone()).collect();

    let elbow_k = find_elbow(&candidates);
    let best_silhouette = best_silhouette_k(&candidates);
    let (selected_k, method) = if let Some(k) = config.fixed_k {
        (k, SelectionMethod::Fixed)
    } else {
        select_k(&candidates).ok_or(RfmError::InsufficientData {
            customers,
            distinct_points,
            required: k_min + 1,
        })?
    };

    let position = evaluated
        .iter()
        .position(|(c, _)| c.k == selected_k)
        .ok_or(RfmError::ClusterFit {
            k: selected_k,
            reason: "selected k was not evaluated".to_string(),
        })?;
    let (selected, model) = evaluated.swap_remove(position);

    log::info!(
        "Selected k={selected_k} by {method:?} (silhouette {:.3}, elbow suggests {elbow_k:?}, silhouette suggests {best_silhouette:?})",
        selected.silhouette
    );

    let labels = rfm_data
        .customer_ids
        .iter()
        .zip(model.labels.iter())
        .map(|(id, &cluster)| ClusterLabel {
            customer_id: id.clone(),
            cluster,
        })
        .collect();

    Ok(ClusterResult {
        silhouette: selected.silhouette,
        selection: ClusterSelection {
            selected_k,
            method,
            candidates,
            elbow_k,
            best_silhouette_k: best_silhouette,
        },
        model,
        labels,
    })
}

/// Predict the cluster of new raw (recency, frequency, monetary) values
pub fn predict_cluster(
    model: &KMeansModel,
    rfm_data: &RfmData,
    rfm_values: &[f64; 3],
) -> Result<usize> {
    let scaled_features = rfm_data.scale_new_data(rfm_values)?;
    model.predict(&scaled_features)
}

/// Mean silhouette coefficient over all points.
///
/// A point alone in its cluster scores 0. Returns 0 when fewer than two
/// clusters are populated.
pub fn silhouette_score(features: &Array2<f64>, labels: &Array1<usize>, n_clusters: usize) -> f64 {
    let n_samples = features.nrows();
    if n_samples < 2 {
        return 0.0;
    }

    let mut sizes = vec![0usize; n_clusters];
    for &label in labels.iter() {
        if label < n_clusters {
            sizes[label] += 1;
        }
    }
    if sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return 0.0;
    }

    let mut silhouette_sum = 0.0;
    let mut distance_sums = vec![0.0; n_clusters];
    for i in 0..n_samples {
        let own = labels[i];
        if own >= n_clusters || sizes[own] < 2 {
            continue;
        }

        distance_sums.iter_mut().for_each(|d| *d = 0.0);
        let point = features.row(i);
        for j in 0..n_samples {
            if i != j && labels[j] < n_clusters {
                distance_sums[labels[j]] += euclidean_distance(&point, &features.row(j));
            }
        }

        // a(i): mean distance within own cluster; b(i): nearest other cluster
        let a_i = distance_sums[own] / (sizes[own] - 1) as f64;
        let b_i = (0..n_clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| distance_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a_i.max(b_i);
        if denom > 0.0 && b_i.is_finite() {
            silhouette_sum += (b_i - a_i) / denom;
        }
    }

    silhouette_sum / n_samples as f64
}

/// Within-cluster sum of squares
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|&(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| euclidean_distance(&features.row(i), &centroids.row(cluster)).powi(2))
        .sum()
}

fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StandardScaler;
    use approx::assert_abs_diff_eq;

    /// Three well separated blobs of four customers each
    fn create_test_rfm_data() -> RfmData {
        let centres = [(2.0, 20.0, 2000.0), (60.0, 5.0, 300.0), (300.0, 1.0, 20.0)];
        let offsets = [(0.0, 0.0, 0.0), (1.0, 1.0, 10.0), (2.0, 0.0, -5.0), (0.0, 1.0, 5.0)];
        let mut raw = Vec::new();
        let mut customer_ids = Vec::new();
        for (c, (r, f, m)) in centres.iter().enumerate() {
            for (o, (dr, df, dm)) in offsets.iter().enumerate() {
                raw.extend_from_slice(&[r + dr, f + df, m + dm]);
                customer_ids.push(format!("c{c}-{o}"));
            }
        }
        let raw_features = Array2::from_shape_vec((12, 3), raw).unwrap();
        let scaler = StandardScaler::fit(&raw_features);
        let features = scaler.transform(raw_features.clone());

        RfmData {
            features,
            customer_ids,
            scaler,
            raw_features,
            log_transform: false,
        }
    }

    fn config() -> ClusterConfig {
        ClusterConfig {
            k_min: 2,
            k_max: 5,
            ..Default::default()
        }
    }

    fn candidate(k: usize, inertia: f64, silhouette: f64, min_cluster_size: usize) -> CandidateScore {
        CandidateScore {
            k,
            inertia,
            silhouette,
            min_cluster_size,
        }
    }

    #[test]
    fn test_fit_kmeans() {
        let rfm_data = create_test_rfm_data();
        let model = fit_kmeans(&rfm_data, 3, &config()).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 12);
        assert_eq!(model.centroids.shape(), &[3, 3]);
        assert_eq!(model.cluster_sizes(), vec![4, 4, 4]);
        assert!(model.inertia >= 0.0 && model.inertia.is_finite());
    }

    #[test]
    fn test_same_seed_same_assignments() {
        let rfm_data = create_test_rfm_data();
        let first = fit_kmeans(&rfm_data, 3, &config()).unwrap();
        let second = fit_kmeans(&rfm_data, 3, &config()).unwrap();
        assert_eq!(first.labels, second.labels);
    }

    #[test]
    fn test_cluster_customers_finds_three_blobs() {
        let rfm_data = create_test_rfm_data();
        let result = cluster_customers(&rfm_data, &config()).unwrap();

        assert_eq!(result.selection.selected_k, 3);
        assert_eq!(result.selection.method, SelectionMethod::Silhouette);
        assert_eq!(result.labels.len(), 12);
        let ks: Vec<usize> = result.selection.candidates.iter().map(|c| c.k).collect();
        assert_eq!(ks, vec![2, 3, 4, 5]);

        // Members of each blob share a label
        for blob in result.labels.chunks(4) {
            assert!(blob.iter().all(|l| l.cluster == blob[0].cluster));
        }
    }

    #[test]
    fn test_selected_silhouette_dominates() {
        let rfm_data = create_test_rfm_data();
        let result = cluster_customers(&rfm_data, &config()).unwrap();
        let selection = &result.selection;
        if selection.candidates.iter().all(|c| c.well_populated()) {
            for c in &selection.candidates {
                assert!(result.silhouette >= c.silhouette);
            }
        }
    }

    #[test]
    fn test_fixed_k() {
        let rfm_data = create_test_rfm_data();
        let config = ClusterConfig {
            fixed_k: Some(4),
            ..config()
        };
        let result = cluster_customers(&rfm_data, &config).unwrap();
        assert_eq!(result.selection.selected_k, 4);
        assert_eq!(result.selection.method, SelectionMethod::Fixed);
        assert_eq!(result.model.n_clusters, 4);
    }

    #[test]
    fn test_insufficient_customers() {
        let mut rfm_data = create_test_rfm_data();
        rfm_data.features = rfm_data.features.slice(ndarray::s![0..9;4, ..]).to_owned();
        rfm_data.raw_features = rfm_data.raw_features.slice(ndarray::s![0..9;4, ..]).to_owned();
        rfm_data.customer_ids = vec!["a".into(), "b".into(), "c".into()];

        let config = ClusterConfig {
            k_min: 5,
            k_max: 8,
            ..Default::default()
        };
        match cluster_customers(&rfm_data, &config) {
            Err(RfmError::InsufficientData {
                customers,
                required,
                ..
            }) => {
                assert_eq!(customers, 3);
                assert_eq!(required, 5);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_points_cannot_cluster() {
        let raw_features = Array2::from_elem((4, 3), 1.0);
        let scaler = StandardScaler::fit(&raw_features);
        let rfm_data = RfmData {
            features: scaler.transform(raw_features.clone()),
            customer_ids: (0..4).map(|i| format!("c{i}")).collect(),
            scaler,
            raw_features,
            log_transform: false,
        };
        assert!(matches!(
            cluster_customers(&rfm_data, &config()),
            Err(RfmError::InsufficientData {
                distinct_points: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_select_k_prefers_silhouette() {
        let candidates = vec![
            candidate(2, 100.0, 0.40, 5),
            candidate(3, 40.0, 0.55, 3),
            candidate(4, 30.0, 0.55, 2),
            candidate(5, 25.0, 0.30, 2),
        ];
        assert_eq!(select_k(&candidates), Some((3, SelectionMethod::Silhouette)));
    }

    #[test]
    fn test_select_k_skips_thin_clusters() {
        let candidates = vec![
            candidate(2, 100.0, 0.40, 5),
            candidate(3, 40.0, 0.90, 1),
        ];
        assert_eq!(select_k(&candidates), Some((2, SelectionMethod::Silhouette)));
    }

    #[test]
    fn test_elbow_fallback() {
        let candidates = vec![
            candidate(2, 100.0, 0.9, 1),
            candidate(3, 40.0, 0.8, 1),
            candidate(4, 30.0, 0.7, 1),
            candidate(5, 25.0, 0.6, 0),
        ];
        assert_eq!(find_elbow(&candidates), Some(3));
        assert_eq!(select_k(&candidates), Some((3, SelectionMethod::Elbow)));
        assert_eq!(find_elbow(&candidates[..2]), Some(2));
        assert_eq!(select_k(&[]), None);
    }

    #[test]
    fn test_silhouette_score_known_values() {
        let features =
            Array2::from_shape_vec((4, 1), vec![0.0, 1.0, 10.0, 11.0]).unwrap();
        let labels = Array1::from(vec![0, 0, 1, 1]);
        // Every point has a = 1; b is 10.5 for the outer points and 9.5 for the inner ones
        let expected = ((10.5 - 1.0) / 10.5 + (9.5 - 1.0) / 9.5) / 2.0;
        assert_abs_diff_eq!(silhouette_score(&features, &labels, 2), expected, epsilon = 1e-12);

        let single = Array1::from(vec![0, 0, 0, 0]);
        assert_eq!(silhouette_score(&features, &single, 2), 0.0);
    }

    #[test]
    fn test_singleton_cluster_scores_zero() {
        let features = Array2::from_shape_vec((3, 1), vec![0.0, 1.0, 10.0]).unwrap();
        let labels = Array1::from(vec![0, 0, 1]);
        // Points 0 and 1: a = 1, b = 10 and 9; point 2 is alone
        let expected = ((10.0 - 1.0) / 10.0 + (9.0 - 1.0) / 9.0) / 3.0;
        assert_abs_diff_eq!(silhouette_score(&features, &labels, 2), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_cluster() {
        let rfm_data = create_test_rfm_data();
        let model = fit_kmeans(&rfm_data, 3, &config()).unwrap();

        let cluster = predict_cluster(&model, &rfm_data, &[3.0, 21.0, 1990.0]).unwrap();
        assert_eq!(cluster, model.labels[0]);
        assert!(model.predict(&Array1::from(vec![0.0, 1.0])).is_err());
    }
}
