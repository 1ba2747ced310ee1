pub mod cluster;
pub mod cv;
pub mod ensemble;
pub mod estimator;
pub mod estimators;
pub mod grid;
pub mod metrics;
pub mod params;

pub use cluster::{
    KMeansOptions,
    KMeansRouter,
};
pub use cv::{
    DEFAULT_MAX_CONFIGURATIONS,
    GridScore,
    GridSearchOptions,
    GridSearchResult,
    grid_search,
};
pub use ensemble::{
    ClusterEnsemble,
    EnsembleOptions,
    RoutedPrediction,
};
pub use estimator::{
    Estimator,
    FittedEstimator,
};
pub use estimators::{
    AnyEstimator,
    AnyFitted,
    KernelRidge,
    Ridge,
    Svr,
};
pub use grid::{
    GridConfiguration,
    GridEntry,
    ParameterGrid,
    expand_grid,
};
pub use metrics::{
    CumulativeError,
    RegressionMetrics,
    TrainTestSummary,
    ZeroTargetPolicy,
    compute_metrics,
};
pub use params::{
    EstimatorParams,
    ParamValue,
};
