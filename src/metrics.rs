//! Cluster quality metrics computed over non-noise points

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::model::NOISE;

/// Separability scores for a clustering with at least two clusters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeparationScores {
    /// Mean silhouette coefficient, in [-1, 1], higher is better
    pub silhouette: f64,
    /// Davies-Bouldin index, lower is better
    pub davies_bouldin: f64,
    /// Calinski-Harabasz index, higher is better
    pub calinski_harabasz: f64,
}

/// Why scores could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Every point is noise
    AllNoise,
    /// Only one cluster was found
    SingleCluster,
    /// Each cluster needs more than one point on average; valid counts are 2 to n_samples - 1
    TooManyClusters { n_clusters: usize, n_samples: usize },
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::AllNoise => f.write_str("No clusters found, all points are noise"),
            UnavailableReason::SingleCluster => {
                f.write_str("Only one cluster found, need at least 2 clusters for metrics")
            }
            UnavailableReason::TooManyClusters {
                n_clusters,
                n_samples,
            } => write!(
                f,
                "Number of clusters is {}. Valid values are 2 to {} (n_samples - 1)",
                n_clusters,
                n_samples.saturating_sub(1)
            ),
        }
    }
}

/// Scores, or the reason they are missing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Scores {
    Available(SeparationScores),
    Unavailable(UnavailableReason),
}

/// Quality metric set of one fitted clustering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Number of distinct non-noise clusters
    pub n_clusters: usize,
    /// All samples, noise included
    pub n_samples: usize,
    pub n_noise_points: usize,
    pub scores: Scores,
}

impl QualityMetrics {
    /// Score `labels` against `features`, leaving noise points out of every score.
    pub fn compute(features: &Array2<f64>, labels: &Array1<i64>) -> Self {
        let n_samples = labels.len();
        let kept: Vec<usize> = (0..n_samples).filter(|&i| labels[i] != NOISE).collect();
        let n_noise_points = n_samples - kept.len();

        let filtered = features.select(Axis(0), &kept);
        let (dense, n_clusters) = densify(kept.iter().map(|&i| labels[i]));

        let scores = if n_clusters == 0 {
            Scores::Unavailable(UnavailableReason::AllNoise)
        } else if n_clusters == 1 {
            Scores::Unavailable(UnavailableReason::SingleCluster)
        } else if n_clusters >= kept.len() {
            Scores::Unavailable(UnavailableReason::TooManyClusters {
                n_clusters,
                n_samples: kept.len(),
            })
        } else {
            Scores::Available(SeparationScores {
                silhouette: silhouette_score(&filtered, &dense, n_clusters),
                davies_bouldin: davies_bouldin_score(&filtered, &dense, n_clusters),
                calinski_harabasz: calinski_harabasz_score(&filtered, &dense, n_clusters),
            })
        };

        Self {
            n_clusters,
            n_samples,
            n_noise_points,
            scores,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.scores, Scores::Available(_))
    }

    pub fn separation(&self) -> Option<&SeparationScores> {
        match &self.scores {
            Scores::Available(scores) => Some(scores),
            Scores::Unavailable(_) => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<UnavailableReason> {
        match self.scores {
            Scores::Available(_) => None,
            Scores::Unavailable(reason) => Some(reason),
        }
    }
}

/// Map arbitrary labels onto `0..k` in ascending label order
fn densify(labels: impl Iterator<Item = i64> + Clone) -> (Vec<usize>, usize) {
    let ids: BTreeMap<i64, usize> = labels
        .clone()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(dense, id)| (id, dense))
        .collect();
    (labels.map(|l| ids[&l]).collect(), ids.len())
}

/// Mean silhouette coefficient
///
/// Points alone in their cluster score 0.
pub fn silhouette_score(features: &Array2<f64>, labels: &[usize], n_clusters: usize) -> f64 {
    let n = features.nrows();
    if n == 0 {
        return 0.0;
    }
    let sizes = cluster_sizes(labels, n_clusters);

    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        let mut sums = vec![0.0; n_clusters];
        for j in 0..n {
            if i != j {
                sums[labels[j]] += euclidean_distance(features.row(i), features.row(j));
            }
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..n_clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let s = if b.is_infinite() || a.max(b) == 0.0 {
            0.0
        } else {
            (b - a) / a.max(b)
        };
        total += s;
    }
    total / n as f64
}

/// Davies-Bouldin index: mean over clusters of the worst similarity ratio
pub fn davies_bouldin_score(features: &Array2<f64>, labels: &[usize], n_clusters: usize) -> f64 {
    let centroids = cluster_means(features, labels, n_clusters);
    let sizes = cluster_sizes(labels, n_clusters);

    let mut intra = vec![0.0; n_clusters];
    for (row, &label) in features.outer_iter().zip(labels) {
        intra[label] += euclidean_distance(row, centroids.row(label));
    }
    for (spread, &size) in intra.iter_mut().zip(&sizes) {
        if size > 0 {
            *spread /= size as f64;
        }
    }

    if intra.iter().all(|&s| s.abs() < 1e-12) {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n_clusters {
        let worst = (0..n_clusters)
            .filter(|&j| j != i)
            .map(|j| {
                let separation = euclidean_distance(centroids.row(i), centroids.row(j));
                if separation == 0.0 {
                    0.0
                } else {
                    (intra[i] + intra[j]) / separation
                }
            })
            .fold(0.0, f64::max);
        total += worst;
    }
    total / n_clusters as f64
}

/// Calinski-Harabasz index: between- over within-cluster dispersion, scaled by degrees of freedom
pub fn calinski_harabasz_score(
    features: &Array2<f64>,
    labels: &[usize],
    n_clusters: usize,
) -> f64 {
    let n = features.nrows();
    let Some(overall) = features.mean_axis(Axis(0)) else {
        return 0.0;
    };
    let centroids = cluster_means(features, labels, n_clusters);
    let sizes = cluster_sizes(labels, n_clusters);

    let between: f64 = (0..n_clusters)
        .map(|c| sizes[c] as f64 * squared_distance(centroids.row(c), overall.view()))
        .sum();
    let within: f64 = features
        .outer_iter()
        .zip(labels)
        .map(|(row, &label)| squared_distance(row, centroids.row(label)))
        .sum();

    if within == 0.0 {
        return 1.0;
    }
    between * (n - n_clusters) as f64 / (within * (n_clusters - 1) as f64)
}

/// Per-cluster feature means; empty clusters get a zero row
pub fn cluster_means(features: &Array2<f64>, labels: &[usize], n_clusters: usize) -> Array2<f64> {
    let mut means = Array2::zeros((n_clusters, features.ncols()));
    let sizes = cluster_sizes(labels, n_clusters);
    for (row, &label) in features.outer_iter().zip(labels) {
        let mut target = means.row_mut(label);
        target += &row;
    }
    for (mut mean, &size) in means.outer_iter_mut().zip(&sizes) {
        if size > 0 {
            mean /= size as f64;
        }
    }
    means
}

fn cluster_sizes(labels: &[usize], n_clusters: usize) -> Vec<usize> {
    let mut sizes = vec![0; n_clusters];
    for &label in labels {
        sizes[label] += 1;
    }
    sizes
}

/// Calculate Euclidean distance between two points
pub fn euclidean_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    squared_distance(a, b).sqrt()
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
