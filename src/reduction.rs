//! Dimensionality reduction of prepared features for visualization

use std::fmt;
use std::str::FromStr;

use linfa::traits::{Fit, Predict, Transformer};
use linfa::{Dataset, ParamGuard};
use linfa_reduction::Pca;
use linfa_tsne::TSneParams;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

/// Projection strategy for the visualization coordinates of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMethod {
    #[default]
    Pca,
    Tsne,
}

impl ProjectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionMethod::Pca => "pca",
            ProjectionMethod::Tsne => "tsne",
        }
    }
}

impl FromStr for ProjectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pca" => Ok(ProjectionMethod::Pca),
            "tsne" | "t-sne" => Ok(ProjectionMethod::Tsne),
            other => Err(Error::invalid(format!(
                "unknown projection '{}', expected pca or tsne",
                other
            ))),
        }
    }
}

impl fmt::Display for ProjectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low-dimensional coordinates of every prepared row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub method: ProjectionMethod,
    /// Projected rows (n_samples, n_components)
    pub coordinates: Array2<f64>,
    /// Fraction of the total variance captured by each PCA component, largest
    /// first; absent for t-SNE
    pub explained_variance: Option<Array1<f64>>,
}

/// Project `features` onto their first `n_components` principal components
///
/// Fails with [`Error::Numerical`] when fewer than `n_components` directions
/// carry variance.
pub fn reduce_pca(features: &Array2<f64>, n_components: usize) -> crate::Result<Projection> {
    let limit = features.nrows().min(features.ncols());
    if n_components == 0 || n_components > limit {
        return Err(Error::invalid(format!(
            "n_components must be between 1 and {}, got {}",
            limit, n_components
        )));
    }
    if features.nrows() < 2 {
        return Err(Error::invalid("PCA needs at least two samples"));
    }

    let mean = features
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::invalid("feature matrix is empty"))?;
    let total: f64 = (features - &mean).mapv(|v| v * v).sum();
    if total <= f64::EPSILON {
        return Err(Error::Numerical("features have no variance to project".into()));
    }

    let dataset = Dataset::from(features.clone());
    let pca = Pca::params(n_components)
        .fit(&dataset)
        .map_err(|e| Error::backend("PCA fitting", e))?;
    let coordinates: Array2<f64> = pca.predict(features);

    // Coordinates are centered, so each column's sum of squares is its share of `total`.
    let explained_variance = coordinates.map_axis(Axis(0), |c| c.mapv(|v| v * v).sum() / total);
    let carried = explained_variance.iter().filter(|&&r| r > 1e-12).count();
    if coordinates.ncols() != n_components || carried != n_components {
        return Err(Error::Numerical(format!(
            "only {} of {} principal components carry variance",
            carried.min(coordinates.ncols()),
            n_components
        )));
    }
    debug!(n_components, explained = ?explained_variance.to_vec(), "PCA projection");

    Ok(Projection {
        method: ProjectionMethod::Pca,
        coordinates,
        explained_variance: Some(explained_variance),
    })
}

/// Settings for the t-SNE embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneConfig {
    pub n_components: usize,
    pub perplexity: f64,
    /// Barnes-Hut approximation threshold, 0 for the exact gradient
    pub approx_threshold: f64,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            perplexity: 30.0,
            approx_threshold: 0.5,
            max_iter: 1000,
            seed: 42,
        }
    }
}

/// Nonlinear neighbour-preserving embedding into two or three dimensions
///
/// There is no inverse mapping and new points cannot be projected.
pub fn reduce_tsne(features: &Array2<f64>, config: &TsneConfig) -> crate::Result<Projection> {
    if !(2..=3).contains(&config.n_components) {
        return Err(Error::invalid(format!(
            "t-SNE embeds into 2 or 3 dimensions, got {}",
            config.n_components
        )));
    }
    // Perplexity is bounded by (n_samples - 1) / 3.
    if features.nrows() as f64 - 1.0 < 3.0 * config.perplexity {
        return Err(Error::invalid(format!(
            "perplexity {} is too large for {} samples",
            config.perplexity,
            features.nrows()
        )));
    }

    let rng = ChaCha8Rng::seed_from_u64(config.seed);
    let embedding = TSneParams::embedding_size_with_rng(config.n_components, rng)
        .perplexity(config.perplexity)
        .approx_threshold(config.approx_threshold)
        .max_iter(config.max_iter)
        .check()
        .map_err(|e| Error::backend("t-SNE parameter check", e))?
        .transform(features.clone())
        .map_err(|e| Error::backend("t-SNE embedding", e))?;

    debug!(
        n_components = config.n_components,
        perplexity = config.perplexity,
        "t-SNE embedding"
    );
    Ok(Projection {
        method: ProjectionMethod::Tsne,
        coordinates: embedding,
        explained_variance: None,
    })
}
