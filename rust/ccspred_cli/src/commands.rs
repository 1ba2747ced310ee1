use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ccspred::config::PipelineConfig;
use ccspred::ml::{
    GridConfiguration,
    TrainTestSummary,
};
use ccspred::pipeline::SourceMetrics;
use ccspred::{
    CombinedDataset,
    TrainedModel,
    read_records_csv,
    train_pipeline,
};
use tracing::{
    info,
    instrument,
};

use crate::cli::{
    PredictArgs,
    TrainArgs,
    WriteTemplateArgs,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct MetricsReport<'a> {
    best_configuration: &'a GridConfiguration,
    best_cv_mse: f64,
    cluster_sizes: &'a [usize],
    n_excluded: usize,
    n_missing_descriptors: usize,
    n_non_finite: usize,
    summary: &'a TrainTestSummary,
    /// Held-out rows only, grouped by source.
    test_per_source: &'a [SourceMetrics],
}

#[derive(Debug, Serialize)]
struct PredictionRow<'a> {
    name: &'a str,
    adduct: &'a str,
    ccs_pred: Option<f64>,
    cluster: Option<usize>,
    centroid_distance: Option<f64>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn load_config(args: &TrainArgs) -> Result<PipelineConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PipelineConfig::from_json_file(path)?
        }
        None => {
            info!("No configuration given, using defaults");
            PipelineConfig::default()
        }
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(counts) = &args.cluster_counts {
        config.cluster_counts = counts.clone();
    }
    if let Some(mode) = &args.stratify_by {
        config.stratify_by = mode.clone();
    }
    if let Some(estimator) = &args.estimator {
        config.estimator = estimator.clone();
    }
    if let Some(fraction) = args.test_fraction {
        config.test_fraction = fraction;
    }
    if let Some(folds) = args.cv_folds {
        config.cv_folds = folds;
    }
    config.validate()?;
    Ok(config)
}

/// Main function for the 'train' subcommand.
#[instrument(skip_all)]
pub fn main_train(args: TrainArgs) -> Result<(), CliError> {
    let config = load_config(&args)?;
    info!("Using configuration: {:#?}", config);

    let mut dataset = CombinedDataset::from_records(read_records_csv(&args.data)?);
    if let Some(tags) = &args.sources {
        dataset = dataset.select_sources(tags);
        info!("Training on sources {:?}", dataset.tags());
    }
    let records: Vec<_> = dataset.records().cloned().collect();
    let report = train_pipeline(&config, &records, args.progress)?;

    std::fs::create_dir_all(&args.output_dir)?;
    report.model.save_json(args.output_dir.join("model.json"))?;
    write_json(
        &args.output_dir.join("metrics.json"),
        &MetricsReport {
            best_configuration: &report.model.configuration,
            best_cv_mse: report.best_cv_mse,
            cluster_sizes: report.model.ensemble.cluster_sizes()?,
            n_excluded: report.n_excluded,
            n_missing_descriptors: report.n_missing_descriptors,
            n_non_finite: report.n_non_finite,
            summary: &report.summary,
            test_per_source: &report.test_per_source,
        },
    )?;
    write_json(&args.output_dir.join("grid_scores.json"), &report.grid_scores)?;
    Ok(())
}

/// Main function for the 'predict' subcommand.
#[instrument(skip_all)]
pub fn main_predict(args: PredictArgs) -> Result<(), CliError> {
    info!("Loading model from {}", args.model.display());
    let model = TrainedModel::load_json(&args.model)?;
    let records = read_records_csv(&args.data)?;
    let preds = model.predict_records(&records)?;

    let mut writer = csv::Writer::from_path(&args.output)?;
    for (rec, pred) in records.iter().zip(preds.iter()) {
        writer.serialize(PredictionRow {
            name: &rec.name,
            adduct: &rec.adduct,
            ccs_pred: pred.map(|p| p.value),
            cluster: pred.map(|p| p.cluster),
            centroid_distance: pred.map(|p| p.centroid_distance),
        })?;
    }
    writer.flush()?;
    info!(
        "Wrote {} predictions to {}",
        preds.iter().filter(|p| p.is_some()).count(),
        args.output.display()
    );
    Ok(())
}

/// Main function for the 'write-template' subcommand.
pub fn main_write_template(args: WriteTemplateArgs) -> Result<(), CliError> {
    let target_dir = args.output_path;
    std::fs::create_dir_all(&target_dir)?;

    let config_path = target_dir.join("train_config_template.json");
    std::fs::write(&config_path, PipelineConfig::default().to_json_pretty()?)?;
    println!("Wrote training config template to: {}", config_path.display());
    Ok(())
}
