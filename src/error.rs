//! Error types shared by feature preparation and the segmentation engine

use thiserror::Error;

/// Errors surfaced by the segmentation pipeline
///
/// Too few clusters for quality scoring is not an error; see
/// [`crate::metrics::QualityMetrics`].
#[derive(Debug, Error)]
pub enum Error {
    /// The record set, a parameter or a matrix shape was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An algorithm identifier that is not one of `kmeans`, `hierarchical`, `dbscan`.
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Prediction was requested before any model or preprocessor was fitted.
    #[error("Model not fitted yet")]
    NotFitted,

    /// The fitted model has no usable cluster centers (for example an all-noise density fit).
    #[error("No cluster centers available")]
    NoCenters,

    /// A numerical degeneracy such as a feature column with no observed values.
    #[error("Numerical failure: {0}")]
    Numerical(String),

    /// An algorithm backend failed; the backend error is kept as the source.
    #[error("{context} failed")]
    Clustering {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A frame operation or CSV read/write failed.
    #[error("Data frame error: {0}")]
    Frame(#[from] polars::error::PolarsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    pub(crate) fn backend<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Clustering {
            context,
            source: Box::new(source),
        }
    }
}
