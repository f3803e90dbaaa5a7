//! segmentforge: customer segmentation CLI
//!
//! This is the main entrypoint that orchestrates data loading, preparation,
//! clustering, profiling, persistence and prediction.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use segmentforge::cli::{parse_record, AlgorithmArgs, Cli, Command};
use segmentforge::{
    load_records_csv, mall_customers, write_records_csv, Algorithm, PipelineConfig,
    ProjectionMethod, Scores, SegmentationOutcome, SegmentationPipeline,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.pipeline_config()?;
    match &cli.command {
        Command::Cluster {
            input,
            algorithm,
            model_dir,
            skew_threshold,
            projection,
        } => {
            let config = match skew_threshold {
                Some(threshold) => config.with_skew_threshold(Some(*threshold)),
                None => config,
            };
            let config = match projection {
                Some(name) => config.with_projection(name.parse::<ProjectionMethod>()?),
                None => config,
            };
            run_cluster(config, input, algorithm, model_dir)
        }
        Command::Elbow {
            input,
            k_min,
            k_max,
        } => run_elbow(config, input, *k_min, *k_max),
        Command::Predict {
            model_dir,
            algorithm,
            record,
        } => run_predict(config, model_dir, algorithm, record),
        Command::Sample {
            count,
            output,
            seed,
        } => run_sample(*count, output, *seed),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Run the full segmentation pipeline and save both blobs
fn run_cluster(
    config: PipelineConfig,
    input: &Path,
    algorithm: &AlgorithmArgs,
    model_dir: &Path,
) -> Result<()> {
    println!("=== Segmentation Pipeline ===\n");
    let start_time = Instant::now();

    let params = algorithm.to_params()?;
    let records = load_records_csv(input)
        .with_context(|| format!("failed to load customers from {}", input.display()))?;
    println!("✓ Data loaded: {} customers", records.len());

    let mut pipeline = SegmentationPipeline::new(config);
    let outcome = pipeline
        .fit(&records, &params)
        .context("segmentation failed")?;
    println!("✓ Model fitted: {}", params.algorithm());

    print_outcome(&outcome);

    let (preprocessor_path, model_path) = pipeline
        .save(model_dir)
        .with_context(|| format!("failed to save fitted state to {}", model_dir.display()))?;

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("Preprocessor saved to: {}", preprocessor_path.display());
    println!("Model saved to: {}", model_path.display());

    Ok(())
}

fn print_outcome(outcome: &SegmentationOutcome) {
    println!("\nFeatures: {}", outcome.feature_names.join(", "));

    println!("\n=== Quality Metrics ===");
    let metrics = &outcome.metrics;
    println!("Clusters: {}", metrics.n_clusters);
    println!("Noise points: {}", metrics.n_noise_points);
    match &metrics.scores {
        Scores::Available(scores) => {
            println!("Silhouette score: {:.3}", scores.silhouette);
            println!("Davies-Bouldin index: {:.3}", scores.davies_bouldin);
            println!("Calinski-Harabasz index: {:.2}", scores.calinski_harabasz);
        }
        Scores::Unavailable(reason) => println!("Metrics unavailable: {}", reason),
    }

    println!("\n=== Cluster Profiles ===");
    for profile in &outcome.profiles {
        println!(
            "Cluster {} - {}: {} customers ({:.2}%)",
            profile.cluster_id, profile.label, profile.size, profile.percentage
        );
        for feature in &profile.features {
            println!(
                "  {:<20} mean {:>8.2}  median {:>8.2}",
                feature.feature, feature.mean, feature.median
            );
        }
    }

    match &outcome.projection {
        Some(projection) => match &projection.explained_variance {
            Some(ratios) => {
                let explained: Vec<String> =
                    ratios.iter().map(|v| format!("{:.1}%", v * 100.0)).collect();
                println!("\nPCA variance explained: {}", explained.join(", "));
            }
            None => println!(
                "\n{} embedding: {} x {}",
                projection.method,
                projection.coordinates.nrows(),
                projection.coordinates.ncols()
            ),
        },
        None => println!("\nNo projection computed"),
    }
}

fn run_elbow(config: PipelineConfig, input: &Path, k_min: usize, k_max: usize) -> Result<()> {
    println!("=== Elbow Method ===\n");
    let records = load_records_csv(input)
        .with_context(|| format!("failed to load customers from {}", input.display()))?;

    let pipeline = SegmentationPipeline::new(config);
    let curve = pipeline
        .elbow(&records, k_min..=k_max)
        .context("elbow method failed")?;

    println!("{:>4}  {:>14}  {:>10}", "K", "Inertia", "Silhouette");
    for ((k, inertia), silhouette) in curve
        .k_values
        .iter()
        .zip(&curve.inertias)
        .zip(&curve.silhouette_scores)
    {
        println!("{:>4}  {:>14.2}  {:>10.3}", k, inertia, silhouette);
    }

    Ok(())
}

fn run_predict(
    config: PipelineConfig,
    model_dir: &Path,
    algorithm: &str,
    record: &str,
) -> Result<()> {
    println!("=== Prediction Mode ===");
    let start_time = Instant::now();

    let algorithm: Algorithm = algorithm.parse()?;
    let record = parse_record(record)?;
    let pipeline = SegmentationPipeline::load(model_dir, algorithm, config)
        .with_context(|| format!("failed to load fitted state from {}", model_dir.display()))?;

    let cluster = pipeline.predict_record(&record)?;
    println!("\n✓ Predicted Cluster: {}", cluster);
    println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    if let Some(model) = pipeline.model() {
        let sizes = model.cluster_sizes();
        let total: usize = sizes.iter().sum();
        if let Some(&size) = usize::try_from(cluster).ok().and_then(|c| sizes.get(c)) {
            println!(
                "  Cluster size: {} customers ({:.1}% of training set)",
                size,
                size as f64 / total as f64 * 100.0
            );
        }
    }

    Ok(())
}

fn run_sample(count: usize, output: &Path, seed: u64) -> Result<()> {
    let records = mall_customers(count, seed);
    write_records_csv(&records, output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("✓ Wrote {} sample customers to {}", records.len(), output.display());
    Ok(())
}
