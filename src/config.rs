//! Pipeline configuration, loadable from a JSON file

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::KMeansConfig;
use crate::preprocess::PreprocessConfig;
use crate::reduction::{ProjectionMethod, TsneConfig};

/// Default number of PCA components for visualization coordinates
pub const DEFAULT_PCA_COMPONENTS: usize = 2;

/// Settings shared by every stage of a segmentation run
///
/// Missing fields in a config file take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocess: PreprocessConfig,
    pub kmeans: KMeansConfig,
    /// Strategy for the visualization coordinates attached to each run
    pub projection: ProjectionMethod,
    pub tsne: TsneConfig,
    /// Components of the PCA projection, 0 to skip it
    pub pca_components: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            kmeans: KMeansConfig::default(),
            projection: ProjectionMethod::default(),
            tsne: TsneConfig::default(),
            pca_components: DEFAULT_PCA_COMPONENTS,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        debug!(path = %path.display(), ?config, "loaded pipeline config");
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.kmeans.seed = seed;
        self.tsne.seed = seed;
        self
    }

    pub fn with_skew_threshold(mut self, threshold: Option<f64>) -> Self {
        self.preprocess.skew_threshold = threshold;
        self
    }

    pub fn with_projection(mut self, projection: ProjectionMethod) -> Self {
        self.projection = projection;
        self
    }
}
