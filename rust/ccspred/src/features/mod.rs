pub mod assembler;
pub mod encoder;
pub mod matrix;
pub mod scaler;

pub use assembler::{
    AssembledData,
    DescriptorSelection,
    FeatureAssembler,
    FeatureConfig,
    FeatureLayout,
};
pub use encoder::OneHotEncoder;
pub use matrix::FeatureMatrix;
pub use scaler::{
    StandardScaler,
    ZeroVariancePolicy,
};
