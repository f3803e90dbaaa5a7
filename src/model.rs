//! Segmentation models: k-means, hierarchical and DBSCAN fitting, prediction and the elbow method

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use linfa::traits::{Fit, Predict, Transformer};
use linfa::{Dataset, ParamGuard};
use linfa_clustering::{Dbscan, KMeans};
use linfa_nn::distance::{Distance, L2Dist};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::hierarchical::{agglomerate, Linkage};
use crate::metrics::{cluster_means, silhouette_score, QualityMetrics};
use crate::preprocess::PreparedData;
use crate::profile::{profile_clusters, ClusterProfile};

/// Label of points that belong to no density-based cluster
pub const NOISE: i64 = -1;

/// Clustering strategy identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    KMeans,
    Hierarchical,
    Dbscan,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::KMeans => "kmeans",
            Algorithm::Hierarchical => "hierarchical",
            Algorithm::Dbscan => "dbscan",
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kmeans" | "k-means" => Ok(Algorithm::KMeans),
            "hierarchical" => Ok(Algorithm::Hierarchical),
            "dbscan" => Ok(Algorithm::Dbscan),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm selection together with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum ClusterParams {
    KMeans {
        n_clusters: usize,
    },
    Hierarchical {
        n_clusters: usize,
        #[serde(default)]
        linkage: Linkage,
    },
    Dbscan {
        eps: f64,
        min_samples: usize,
    },
}

impl ClusterParams {
    pub const DEFAULT_N_CLUSTERS: usize = 5;
    pub const DEFAULT_EPS: f64 = 0.5;
    pub const DEFAULT_MIN_SAMPLES: usize = 5;

    /// Parameters for `algorithm` with the default K, linkage, eps and min_samples
    pub fn defaults(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::KMeans => ClusterParams::KMeans {
                n_clusters: Self::DEFAULT_N_CLUSTERS,
            },
            Algorithm::Hierarchical => ClusterParams::Hierarchical {
                n_clusters: Self::DEFAULT_N_CLUSTERS,
                linkage: Linkage::default(),
            },
            Algorithm::Dbscan => ClusterParams::Dbscan {
                eps: Self::DEFAULT_EPS,
                min_samples: Self::DEFAULT_MIN_SAMPLES,
            },
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            ClusterParams::KMeans { .. } => Algorithm::KMeans,
            ClusterParams::Hierarchical { .. } => Algorithm::Hierarchical,
            ClusterParams::Dbscan { .. } => Algorithm::Dbscan,
        }
    }

    fn validate(&self, n_samples: usize) -> crate::Result<()> {
        match *self {
            ClusterParams::KMeans { n_clusters }
            | ClusterParams::Hierarchical { n_clusters, .. } => {
                if n_clusters == 0 || n_clusters > n_samples {
                    return Err(Error::invalid(format!(
                        "n_clusters must be between 1 and the number of samples ({}), got {}",
                        n_samples, n_clusters
                    )));
                }
            }
            ClusterParams::Dbscan { eps, min_samples } => {
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::invalid(format!("eps must be positive, got {}", eps)));
                }
                if min_samples < 2 {
                    return Err(Error::invalid(format!(
                        "min_samples must be at least 2, got {}",
                        min_samples
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Settings for every k-means fit, including those of the elbow method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Seed of the centroid initialization
    pub seed: u64,
    /// Number of restarts; the lowest-inertia run is kept
    pub n_runs: usize,
    pub max_iters: u64,
    pub tolerance: f64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted segmentation state
///
/// Produced by [`SegmentationModel::fit`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationModel {
    params: ClusterParams,
    /// Cluster centers in standardized space, row `i` for cluster `i`
    centers: Option<Array2<f64>>,
    /// Assignment of every training row, [`NOISE`] for noise
    labels: Array1<i64>,
    metrics: QualityMetrics,
    /// Within-cluster sum of squares against `centers`, noise excluded
    inertia: Option<f64>,
    /// Feature columns the model was fitted on
    feature_names: Vec<String>,
}

impl SegmentationModel {
    /// Fit the selected algorithm on a standardized feature matrix
    ///
    /// # Arguments
    /// * `features` - Standardized features (n_samples, n_features)
    /// * `feature_names` - Column names of `features`, kept for pairing checks
    /// * `params` - Algorithm and its parameters
    /// * `kmeans` - Restart and convergence settings, used by k-means only
    ///
    /// # Returns
    /// * Fitted `SegmentationModel` with assignments, centers and quality metrics
    pub fn fit(
        features: &Array2<f64>,
        feature_names: &[String],
        params: &ClusterParams,
        kmeans: &KMeansConfig,
    ) -> crate::Result<Self> {
        if features.nrows() == 0 || features.ncols() == 0 {
            return Err(Error::invalid("feature matrix is empty"));
        }
        if feature_names.len() != features.ncols() {
            return Err(Error::invalid(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                features.ncols()
            )));
        }
        params.validate(features.nrows())?;

        let (labels, centers) = match *params {
            ClusterParams::KMeans { n_clusters } => {
                let fit = fit_kmeans(features, n_clusters, kmeans)?;
                (fit.labels.mapv(|l| l as i64), Some(fit.centroids))
            }
            ClusterParams::Hierarchical {
                n_clusters,
                linkage,
            } => {
                let labels = agglomerate(features, n_clusters, linkage)?.mapv(|l| l as i64);
                let centers = reconstruct_centers(features, &labels)?;
                (labels, centers)
            }
            ClusterParams::Dbscan { eps, min_samples } => {
                let labels = fit_dbscan(features, eps, min_samples)?;
                let centers = reconstruct_centers(features, &labels)?;
                (labels, centers)
            }
        };

        let metrics = QualityMetrics::compute(features, &labels);
        let inertia = centers
            .as_ref()
            .map(|c| compute_inertia(features, &labels, c));

        info!(
            algorithm = %params.algorithm(),
            n_clusters = metrics.n_clusters,
            n_noise_points = metrics.n_noise_points,
            inertia = ?inertia,
            "fitted segmentation model"
        );
        if let Some(reason) = metrics.unavailable_reason() {
            warn!(%reason, "quality metrics unavailable");
        }

        Ok(Self {
            params: *params,
            centers,
            labels,
            metrics,
            inertia,
            feature_names: feature_names.to_vec(),
        })
    }

    /// Fit on prepared data
    pub fn fit_prepared(
        data: &PreparedData,
        params: &ClusterParams,
        kmeans: &KMeansConfig,
    ) -> crate::Result<Self> {
        Self::fit(&data.features, &data.feature_names, params, kmeans)
    }

    /// Assign each row of `features` to the nearest cluster center
    pub fn predict(&self, features: &Array2<f64>) -> crate::Result<Array1<i64>> {
        let centers = self.usable_centers()?;
        if features.ncols() != centers.ncols() {
            return Err(Error::invalid(format!(
                "model expects {} features, got {}",
                centers.ncols(),
                features.ncols()
            )));
        }
        Ok(features
            .outer_iter()
            .map(|point| nearest_center(point, centers))
            .collect())
    }

    /// Predict the cluster of a single standardized point
    pub fn predict_one(&self, point: ArrayView1<f64>) -> crate::Result<i64> {
        let centers = self.usable_centers()?;
        if point.len() != centers.ncols() {
            return Err(Error::invalid(format!(
                "model expects {} features, got {}",
                centers.ncols(),
                point.len()
            )));
        }
        Ok(nearest_center(point, centers))
    }

    /// Profile the training clusters over `data`, which must be the matrix the model was fitted on
    pub fn profile(&self, data: &PreparedData) -> crate::Result<Vec<ClusterProfile>> {
        profile_clusters(&data.features, &data.feature_names, data.roles, &self.labels)
    }

    /// Get cluster sizes, indexed by cluster id
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let n_clusters = self
            .labels
            .iter()
            .copied()
            .max()
            .filter(|&max| max >= 0)
            .map_or(0, |max| max as usize + 1);
        let mut sizes = vec![0; n_clusters];
        for &label in self.labels.iter().filter(|&&l| l != NOISE) {
            sizes[label as usize] += 1;
        }
        sizes
    }

    /// Whether `feature_names` matches the columns the model was fitted on
    pub fn matches_features(&self, feature_names: &[String]) -> bool {
        self.feature_names == feature_names
    }

    pub fn algorithm(&self) -> Algorithm {
        self.params.algorithm()
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    pub fn centers(&self) -> Option<&Array2<f64>> {
        self.centers.as_ref()
    }

    pub fn labels(&self) -> &Array1<i64> {
        &self.labels
    }

    pub fn metrics(&self) -> &QualityMetrics {
        &self.metrics
    }

    pub fn inertia(&self) -> Option<f64> {
        self.inertia
    }

    pub fn n_clusters(&self) -> usize {
        self.metrics.n_clusters
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn usable_centers(&self) -> crate::Result<&Array2<f64>> {
        match &self.centers {
            Some(centers) if centers.nrows() > 0 => Ok(centers),
            _ => Err(Error::NoCenters),
        }
    }
}

/// Result of one k-means fit
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Array1<usize>,
    pub centroids: Array2<f64>,
    pub inertia: f64,
}

/// Fit k-means with seeded restarts, keeping the lowest-inertia run
pub fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    config: &KMeansConfig,
) -> crate::Result<KMeansFit> {
    if features.nrows() < n_clusters {
        return Err(Error::invalid(format!(
            "Number of data points ({}) must be at least equal to number of clusters ({})",
            features.nrows(),
            n_clusters
        )));
    }

    // Dummy targets for unsupervised learning
    let targets: Array1<usize> = Array1::zeros(features.nrows());
    let dataset = Dataset::new(features.clone(), targets);

    let rng = ChaCha8Rng::seed_from_u64(config.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .n_runs(config.n_runs.max(1))
        .max_n_iterations(config.max_iters)
        .tolerance(config.tolerance)
        .fit(&dataset)
        .map_err(|e| Error::backend("k-means fitting", e))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels.mapv(|l| l as i64), &centroids);
    debug!(n_clusters, inertia, "k-means fit complete");

    Ok(KMeansFit {
        labels,
        centroids,
        inertia,
    })
}

fn fit_dbscan(features: &Array2<f64>, eps: f64, min_samples: usize) -> crate::Result<Array1<i64>> {
    let memberships = Dbscan::params(min_samples)
        .tolerance(eps)
        .check()
        .map_err(|e| Error::backend("DBSCAN parameter check", e))?
        .transform(features);

    Ok(memberships.mapv(|m| m.map_or(NOISE, |c| c as i64)))
}

/// Per-cluster means over non-noise rows, `None` when every row is noise
///
/// Cluster ids must form the dense range `0..k`.
fn reconstruct_centers(
    features: &Array2<f64>,
    labels: &Array1<i64>,
) -> crate::Result<Option<Array2<f64>>> {
    let kept: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] != NOISE).collect();
    let Some(max) = kept.iter().map(|&i| labels[i]).max() else {
        return Ok(None);
    };
    let n_clusters = max as usize + 1;

    let dense: Vec<usize> = kept.iter().map(|&i| labels[i] as usize).collect();
    let mut present = vec![false; n_clusters];
    dense.iter().for_each(|&l| present[l] = true);
    if let Some(missing) = present.iter().position(|p| !p) {
        return Err(Error::Numerical(format!(
            "cluster ids are not a dense range: id {} of 0..{} has no members",
            missing, n_clusters
        )));
    }

    let filtered = features.select(Axis(0), &kept);
    Ok(Some(cluster_means(&filtered, &dense, n_clusters)))
}

/// Compute within-cluster sum of squares (inertia), skipping noise
fn compute_inertia(features: &Array2<f64>, labels: &Array1<i64>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (point, &cluster) in features.outer_iter().zip(labels.iter()) {
        if cluster >= 0 && (cluster as usize) < centroids.nrows() {
            inertia += L2Dist.rdistance(point, centroids.row(cluster as usize));
        }
    }

    inertia
}

fn nearest_center(point: ArrayView1<f64>, centers: &Array2<f64>) -> i64 {
    let mut min_distance = f64::INFINITY;
    let mut closest_cluster = 0;

    for (cluster_idx, center) in centers.outer_iter().enumerate() {
        let distance = L2Dist.rdistance(point, center);
        if distance < min_distance {
            min_distance = distance;
            closest_cluster = cluster_idx;
        }
    }

    closest_cluster as i64
}

/// Inertia and silhouette score per K, for choosing K by eye
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElbowCurve {
    pub k_values: Vec<usize>,
    pub inertias: Vec<f64>,
    pub silhouette_scores: Vec<f64>,
}

/// Fit a fresh k-means model for every K in `k_range`
///
/// Fits run in parallel; results keep the order of `k_range`.
///
/// # Arguments
/// * `features` - Standardized features (n_samples, n_features)
/// * `k_range` - Candidate cluster counts, from 2 up to below `n_samples`
/// * `config` - Seed, restarts and convergence settings shared by every fit
///
/// # Returns
/// * `ElbowCurve` with one inertia and one silhouette score per K
pub fn elbow_method(
    features: &Array2<f64>,
    k_range: RangeInclusive<usize>,
    config: &KMeansConfig,
) -> crate::Result<ElbowCurve> {
    let k_values: Vec<usize> = k_range.clone().collect();
    if k_values.is_empty() {
        return Err(Error::invalid(format!(
            "empty K range {}..={}",
            k_range.start(),
            k_range.end()
        )));
    }
    if *k_range.start() < 2 || *k_range.end() >= features.nrows() {
        return Err(Error::invalid(format!(
            "K must lie in 2..={} for {} samples, got {}..={}",
            features.nrows().saturating_sub(1),
            features.nrows(),
            k_range.start(),
            k_range.end()
        )));
    }

    let points: Vec<(f64, f64)> = k_values
        .par_iter()
        .map(|&k| -> crate::Result<(f64, f64)> {
            let fit = fit_kmeans(features, k, config)?;
            let labels = fit.labels.to_vec();
            Ok((fit.inertia, silhouette_score(features, &labels, k)))
        })
        .collect::<crate::Result<_>>()?;

    let (inertias, silhouette_scores) = points.into_iter().unzip();
    Ok(ElbowCurve {
        k_values,
        inertias,
        silhouette_scores,
    })
}
