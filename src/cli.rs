//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::config::PipelineConfig;
use crate::data::Record;
use crate::hierarchical::Linkage;
use crate::model::{Algorithm, ClusterParams};

/// Customer segmentation with k-means, hierarchical and DBSCAN clustering
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON file with pipeline settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Segment the customers of a CSV file and save the fitted state
    Cluster {
        /// Path to the input CSV file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        algorithm: AlgorithmArgs,

        /// Directory receiving the preprocessor and model blobs
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,

        /// Log-transform skewed columns above this skewness
        #[arg(long)]
        skew_threshold: Option<f64>,

        /// Visualization projection, pca or tsne
        #[arg(long)]
        projection: Option<String>,
    },
    /// Print inertia and silhouette score for a range of K
    Elbow {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, default_value = "2")]
        k_min: usize,

        #[arg(long, default_value = "10")]
        k_max: usize,
    },
    /// Predict the segment of one customer with saved state
    Predict {
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,

        #[arg(short, long, default_value = "kmeans")]
        algorithm: String,

        /// Customer as a JSON object, e.g. '{"Age": 31, "AnnualIncome": 70, "SpendingScore": 40}'
        #[arg(short, long)]
        record: String,
    },
    /// Write a synthetic Mall-Customers dataset
    Sample {
        #[arg(short = 'n', long, default_value = "200")]
        count: usize,

        #[arg(short, long, default_value = "customers.csv")]
        output: PathBuf,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

/// Algorithm selection shared by the fitting subcommands
#[derive(Args, Debug, Clone)]
pub struct AlgorithmArgs {
    /// One of kmeans, hierarchical, dbscan
    #[arg(short, long, default_value = "kmeans")]
    pub algorithm: String,

    /// Number of clusters for k-means and hierarchical
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Linkage criterion for hierarchical
    #[arg(long)]
    pub linkage: Option<String>,

    /// Neighbourhood radius for DBSCAN
    #[arg(long)]
    pub eps: Option<f64>,

    /// Minimum neighbourhood size for DBSCAN, point included
    #[arg(long)]
    pub min_samples: Option<usize>,
}

impl AlgorithmArgs {
    /// Resolve the algorithm identifier and fill unset parameters with defaults
    pub fn to_params(&self) -> crate::Result<ClusterParams> {
        let algorithm: Algorithm = self.algorithm.parse()?;
        let params = match ClusterParams::defaults(algorithm) {
            ClusterParams::KMeans { n_clusters } => ClusterParams::KMeans {
                n_clusters: self.clusters.unwrap_or(n_clusters),
            },
            ClusterParams::Hierarchical {
                n_clusters,
                linkage,
            } => ClusterParams::Hierarchical {
                n_clusters: self.clusters.unwrap_or(n_clusters),
                linkage: match &self.linkage {
                    Some(name) => name.parse::<Linkage>()?,
                    None => linkage,
                },
            },
            ClusterParams::Dbscan { eps, min_samples } => ClusterParams::Dbscan {
                eps: self.eps.unwrap_or(eps),
                min_samples: self.min_samples.unwrap_or(min_samples),
            },
        };
        Ok(params)
    }
}

impl Cli {
    /// Settings from `--config`, or the defaults
    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("failed to read config {}", path.display())),
            None => Ok(PipelineConfig::default()),
        }
    }
}

/// Parse a customer record given as a JSON object
pub fn parse_record(json: &str) -> anyhow::Result<Record> {
    let record: Record = serde_json::from_str(json)
        .with_context(|| format!("record must be a JSON object of scalar fields: {}", json))?;
    if record.is_empty() {
        anyhow::bail!("record has no fields");
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    fn algorithm_args(algorithm: &str) -> AlgorithmArgs {
        AlgorithmArgs {
            algorithm: algorithm.to_string(),
            clusters: None,
            linkage: None,
            eps: None,
            min_samples: None,
        }
    }

    #[test]
    fn test_to_params() {
        assert_eq!(
            algorithm_args("kmeans").to_params().unwrap(),
            ClusterParams::KMeans { n_clusters: 5 }
        );

        let mut args = algorithm_args("hierarchical");
        args.clusters = Some(3);
        args.linkage = Some("average".to_string());
        assert_eq!(
            args.to_params().unwrap(),
            ClusterParams::Hierarchical {
                n_clusters: 3,
                linkage: Linkage::Average
            }
        );

        let mut args = algorithm_args("dbscan");
        args.eps = Some(0.3);
        assert_eq!(
            args.to_params().unwrap(),
            ClusterParams::Dbscan {
                eps: 0.3,
                min_samples: 5
            }
        );

        assert!(algorithm_args("spectral").to_params().is_err());
    }

    #[test]
    fn test_parse_record() {
        let record = parse_record(r#"{"Age": 31, "Gender": "Female"}"#).unwrap();
        assert_eq!(record["Age"], Value::Number(31.0));
        assert!(parse_record("{}").is_err());
        assert!(parse_record("[1, 2]").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "segmentforge",
            "--verbose",
            "cluster",
            "--input",
            "customers.csv",
            "--algorithm",
            "dbscan",
            "--eps",
            "0.7",
            "--projection",
            "tsne",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Cluster {
                input,
                algorithm,
                projection,
                ..
            } => {
                assert_eq!(input, PathBuf::from("customers.csv"));
                assert_eq!(algorithm.eps, Some(0.7));
                assert_eq!(projection.as_deref(), Some("tsne"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
