//! End-to-end segmentation session: prepare, fit, profile, project, persist and predict

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data::{Record, Value};
use crate::error::Error;
use crate::metrics::QualityMetrics;
use crate::model::{elbow_method, Algorithm, ClusterParams, ElbowCurve, SegmentationModel};
use crate::persistence::{self, check_pairing};
use crate::preprocess::{prepare_for_clustering, Preprocessor};
use crate::profile::{label_assignments, ClusterProfile};
use crate::reduction::{reduce_pca, reduce_tsne, Projection, ProjectionMethod};

/// File name of the preprocessing blob inside a model directory
pub const PREPROCESSOR_FILE: &str = "preprocessor.json";

/// File name of the segmentation blob for `algorithm`
pub fn model_file_name(algorithm: Algorithm) -> String {
    format!("{}_model.json", algorithm)
}

/// Everything a fit reports back, aligned with the input record order
#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    /// Cluster id per record, -1 for noise
    pub assignments: Array1<i64>,
    /// Profile label per record, `"Noise"` for noise
    pub segment_labels: Vec<String>,
    pub customer_ids: Vec<Option<Value>>,
    pub metrics: QualityMetrics,
    pub profiles: Vec<ClusterProfile>,
    pub feature_names: Vec<String>,
    /// Visualization coordinates, absent when disabled or when the projection failed
    pub projection: Option<Projection>,
}

/// Fitted preprocessing and segmentation state of one session
#[derive(Debug, Clone)]
pub struct SegmentationPipeline {
    config: PipelineConfig,
    preprocessor: Option<Preprocessor>,
    model: Option<SegmentationModel>,
}

impl SegmentationPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            preprocessor: None,
            model: None,
        }
    }

    /// Prepare `records`, fit `params` and profile the result.
    ///
    /// Replaces any state from an earlier fit or load. A projection that fails
    /// is logged and left out of the outcome; the fit itself still succeeds.
    pub fn fit(
        &mut self,
        records: &[Record],
        params: &ClusterParams,
    ) -> crate::Result<SegmentationOutcome> {
        let (preprocessor, data) = prepare_for_clustering(records, &self.config.preprocess)?;
        let model = SegmentationModel::fit_prepared(&data, params, &self.config.kmeans)?;
        let profiles = model.profile(&data)?;
        let segment_labels = label_assignments(model.labels(), &profiles);

        let projection = match self.project(&data.features) {
            Ok(projection) => projection,
            Err(e) => {
                warn!(method = %self.config.projection, error = %e, "projection skipped");
                None
            }
        };

        info!(
            algorithm = %params.algorithm(),
            records = records.len(),
            profiles = profiles.len(),
            "segmentation run complete"
        );

        let outcome = SegmentationOutcome {
            assignments: model.labels().clone(),
            segment_labels,
            customer_ids: data.customer_ids,
            metrics: *model.metrics(),
            profiles,
            feature_names: data.feature_names,
            projection,
        };
        self.preprocessor = Some(preprocessor);
        self.model = Some(model);
        Ok(outcome)
    }

    /// Inertia and silhouette for every K in `k_range` on freshly prepared `records`
    ///
    /// Leaves the session state untouched.
    pub fn elbow(
        &self,
        records: &[Record],
        k_range: RangeInclusive<usize>,
    ) -> crate::Result<ElbowCurve> {
        let (_, data) = prepare_for_clustering(records, &self.config.preprocess)?;
        elbow_method(&data.features, k_range, &self.config.kmeans)
    }

    /// Assign new records with the fitted preprocessing and model
    pub fn predict(&self, records: &[Record]) -> crate::Result<Array1<i64>> {
        let (preprocessor, model) = self.fitted()?;
        check_pairing(preprocessor, model);
        let data = preprocessor.transform(records)?;
        model.predict(&data.features)
    }

    pub fn predict_record(&self, record: &Record) -> crate::Result<i64> {
        let labels = self.predict(std::slice::from_ref(record))?;
        labels
            .first()
            .copied()
            .ok_or_else(|| Error::invalid("no prediction for record"))
    }

    /// Write both blobs into `dir`, returning their paths
    pub fn save(&self, dir: impl AsRef<Path>) -> crate::Result<(PathBuf, PathBuf)> {
        let (preprocessor, model) = self.fitted()?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let preprocessor_path = dir.join(PREPROCESSOR_FILE);
        let model_path = dir.join(model_file_name(model.algorithm()));
        persistence::save(preprocessor, &preprocessor_path)?;
        persistence::save(model, &model_path)?;
        info!(dir = %dir.display(), algorithm = %model.algorithm(), "saved fitted state");
        Ok((preprocessor_path, model_path))
    }

    /// Restore a session from the blobs [`SegmentationPipeline::save`] wrote for `algorithm`
    pub fn load(
        dir: impl AsRef<Path>,
        algorithm: Algorithm,
        config: PipelineConfig,
    ) -> crate::Result<Self> {
        let dir = dir.as_ref();
        let preprocessor: Preprocessor = persistence::load(dir.join(PREPROCESSOR_FILE))?;
        let model: SegmentationModel = persistence::load(dir.join(model_file_name(algorithm)))?;
        if model.algorithm() != algorithm {
            return Err(Error::invalid(format!(
                "blob for {} holds a {} model",
                algorithm,
                model.algorithm()
            )));
        }
        check_pairing(&preprocessor, &model);

        Ok(Self {
            config,
            preprocessor: Some(preprocessor),
            model: Some(model),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn preprocessor(&self) -> Option<&Preprocessor> {
        self.preprocessor.as_ref()
    }

    pub fn model(&self) -> Option<&SegmentationModel> {
        self.model.as_ref()
    }

    fn project(&self, features: &Array2<f64>) -> crate::Result<Option<Projection>> {
        match self.config.projection {
            ProjectionMethod::Pca => {
                let components = self
                    .config
                    .pca_components
                    .min(features.ncols())
                    .min(features.nrows());
                if components == 0 {
                    return Ok(None);
                }
                reduce_pca(features, components).map(Some)
            }
            ProjectionMethod::Tsne => reduce_tsne(features, &self.config.tsne).map(Some),
        }
    }

    fn fitted(&self) -> crate::Result<(&Preprocessor, &SegmentationModel)> {
        match (&self.preprocessor, &self.model) {
            (Some(preprocessor), Some(model)) => Ok((preprocessor, model)),
            _ => Err(Error::NotFitted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::mall_customers;
    use tempfile::tempdir;

    #[test]
    fn test_predict_before_fit() {
        let pipeline = SegmentationPipeline::new(PipelineConfig::default());
        let records = mall_customers(5, 1);
        assert!(matches!(pipeline.predict(&records), Err(Error::NotFitted)));
        assert!(matches!(pipeline.save("unused"), Err(Error::NotFitted)));
    }

    #[test]
    fn test_fit_outcome_alignment() {
        let records = mall_customers(80, 2);
        let mut pipeline = SegmentationPipeline::new(PipelineConfig::default());
        let outcome = pipeline
            .fit(&records, &ClusterParams::KMeans { n_clusters: 4 })
            .unwrap();

        assert_eq!(outcome.assignments.len(), 80);
        assert_eq!(outcome.segment_labels.len(), 80);
        assert_eq!(outcome.customer_ids[0], Some(Value::Number(1.0)));
        assert_eq!(outcome.profiles.len(), 4);
        assert_eq!(
            outcome.feature_names,
            vec!["Age", "AnnualIncome", "SpendingScore", "Gender_Male"]
        );
        let projection = outcome.projection.as_ref().unwrap();
        assert_eq!(projection.coordinates.shape(), &[80, 2]);
        let explained = projection.explained_variance.as_ref().unwrap();
        assert!(explained.sum() < 1.0 + 1e-9);

        // Training records predict back onto their own assignments.
        let predicted = pipeline.predict(&records).unwrap();
        assert_eq!(predicted, outcome.assignments);
    }

    #[test]
    fn test_save_load_predict() {
        let records = mall_customers(60, 5);
        let mut pipeline = SegmentationPipeline::new(PipelineConfig::default());
        pipeline
            .fit(
                &records,
                &ClusterParams::Hierarchical {
                    n_clusters: 3,
                    linkage: crate::hierarchical::Linkage::Ward,
                },
            )
            .unwrap();

        let dir = tempdir().unwrap();
        let (preprocessor_path, model_path) = pipeline.save(dir.path()).unwrap();
        assert!(preprocessor_path.ends_with(PREPROCESSOR_FILE));
        assert!(model_path.ends_with("hierarchical_model.json"));

        let config = PipelineConfig::default();
        let loaded =
            SegmentationPipeline::load(dir.path(), Algorithm::Hierarchical, config).unwrap();
        assert_eq!(loaded.predict(&records).unwrap(), pipeline.predict(&records).unwrap());
        assert_eq!(
            loaded.predict_record(&records[0]).unwrap(),
            pipeline.predict_record(&records[0]).unwrap()
        );
        assert!(SegmentationPipeline::load(dir.path(), Algorithm::KMeans, PipelineConfig::default())
            .is_err());
    }

    #[test]
    fn test_failed_projection_keeps_fit() {
        let mut records = mall_customers(40, 8);
        for customer in &mut records {
            customer.remove("Gender");
            customer.insert("Age".to_string(), Value::from(30.0));
            customer.insert("AnnualIncome".to_string(), Value::from(60.0));
        }

        let mut pipeline = SegmentationPipeline::new(PipelineConfig::default());
        let outcome = pipeline
            .fit(&records, &ClusterParams::KMeans { n_clusters: 3 })
            .unwrap();

        // Only SpendingScore varies, so a two-component PCA has nothing to show.
        assert!(outcome.projection.is_none());
        assert_eq!(outcome.profiles.len(), 3);
        assert!(pipeline.model().is_some());
        assert_eq!(pipeline.predict(&records).unwrap(), outcome.assignments);
    }

    #[test]
    fn test_tsne_projection() {
        let config = PipelineConfig {
            tsne: crate::reduction::TsneConfig {
                perplexity: 10.0,
                max_iter: 250,
                ..Default::default()
            },
            ..PipelineConfig::default()
        }
        .with_projection(ProjectionMethod::Tsne);

        let records = mall_customers(60, 12);
        let mut pipeline = SegmentationPipeline::new(config);
        let outcome = pipeline
            .fit(&records, &ClusterParams::KMeans { n_clusters: 3 })
            .unwrap();

        let projection = outcome.projection.unwrap();
        assert_eq!(projection.method, ProjectionMethod::Tsne);
        assert_eq!(projection.coordinates.shape(), &[60, 2]);
        assert!(projection.explained_variance.is_none());
    }

    #[test]
    fn test_elbow_leaves_state_alone() {
        let records = mall_customers(50, 6);
        let pipeline = SegmentationPipeline::new(PipelineConfig::default());
        let curve = pipeline.elbow(&records, 2..=4).unwrap();
        assert_eq!(curve.k_values, vec![2, 3, 4]);
        assert!(pipeline.model().is_none());
    }
}
