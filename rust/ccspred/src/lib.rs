#![doc = include_str!("../README.md")]

pub mod config;
pub mod data;
pub mod errors;
pub mod features;
pub mod ml;
pub mod pipeline;
pub mod split;
pub mod utils;

pub use config::PipelineConfig;
pub use data::{
    CombinedDataset,
    CompoundRecord,
    SourceDataset,
    read_records_csv,
};
pub use errors::{
    CcsPredError,
    DataProcessingError,
};
pub use features::{
    FeatureAssembler,
    FeatureMatrix,
    StandardScaler,
};
pub use ml::{
    AnyEstimator,
    ClusterEnsemble,
    KMeansRouter,
};
pub use pipeline::{
    ScaledData,
    TrainedModel,
    TrainingReport,
    evaluate_per_source,
    train_pipeline,
};
pub use split::{
    SplitData,
    StratifyBy,
};
