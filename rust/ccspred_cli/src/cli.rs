use clap::{
    Parser,
    Subcommand,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a cluster-routed CCS model and report its metrics.
    Train(TrainArgs),
    /// Predict CCS values with a trained model.
    Predict(PredictArgs),
    /// Write a template training configuration.
    WriteTemplate(WriteTemplateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct TrainArgs {
    /// JSON training configuration, defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// CSV with columns name,mz,adduct,ccs,src_tag,mqn_0..mqn_41.
    #[arg(short, long)]
    pub data: PathBuf,

    /// Only train on these source tags, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub sources: Option<Vec<String>>,

    /// Directory for model.json, metrics.json and grid_scores.json.
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Overrides `seed` from the configuration.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Overrides `cluster_counts`, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub cluster_counts: Option<Vec<usize>>,

    /// Overrides `stratify_by` ("source" or "target_bins").
    #[arg(long)]
    pub stratify_by: Option<String>,

    /// Overrides `estimator` ("svr", "ridge" or "kernel_ridge").
    #[arg(long)]
    pub estimator: Option<String>,

    /// Overrides `test_fraction`.
    #[arg(long)]
    pub test_fraction: Option<f64>,

    /// Overrides `cv_folds`.
    #[arg(long)]
    pub cv_folds: Option<usize>,

    /// Show a progress bar during the grid search.
    #[arg(long, default_value_t = false)]
    pub progress: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct PredictArgs {
    /// model.json written by `train`.
    #[arg(short, long)]
    pub model: PathBuf,

    /// CSV with columns name,mz,adduct,mqn_0..mqn_41 (ccs and src_tag optional).
    #[arg(short, long)]
    pub data: PathBuf,

    /// Output CSV with columns name,adduct,ccs_pred,cluster,centroid_distance.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct WriteTemplateArgs {
    /// Directory to write the template into.
    #[arg(short, long)]
    pub output_path: PathBuf,
}
