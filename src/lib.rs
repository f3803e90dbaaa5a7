//! segmentforge: customer segmentation over tabular customer records
//!
//! Records are prepared into a standardized feature matrix ([`preprocess`]),
//! clustered with k-means, hierarchical agglomeration or DBSCAN ([`model`]),
//! scored ([`metrics`]) and summarized into labeled segment profiles
//! ([`profile`]). Fitted state is stored as versioned blobs ([`persistence`]).

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod hierarchical;
pub mod metrics;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod preprocess;
pub mod profile;
pub mod reduction;
pub mod sample;

// Re-export public items for easier access
pub use config::PipelineConfig;
pub use data::{load_records_csv, write_records_csv, Record, Value};
pub use error::Error;
pub use hierarchical::Linkage;
pub use metrics::{QualityMetrics, Scores, SeparationScores, UnavailableReason};
pub use model::{
    elbow_method, Algorithm, ClusterParams, ElbowCurve, KMeansConfig, SegmentationModel, NOISE,
};
pub use pipeline::{SegmentationOutcome, SegmentationPipeline};
pub use preprocess::{
    prepare_for_clustering, PreparedData, PreprocessConfig, Preprocessor, SemanticRoles,
};
pub use profile::{label_assignments, ClusterProfile};
pub use reduction::{reduce_pca, reduce_tsne, Projection, ProjectionMethod, TsneConfig};
pub use sample::mall_customers;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
