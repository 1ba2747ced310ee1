pub mod adducts;
pub mod records;

pub use adducts::{
    CategoryCollapser,
    DEFAULT_COMMON_ADDUCTS,
    OTHER_CATEGORY,
};
pub use records::{
    CombinedDataset,
    CompoundRecord,
    SourceDataset,
    N_DESCRIPTORS,
    read_records_csv,
};
