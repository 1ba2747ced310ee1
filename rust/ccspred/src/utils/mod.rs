pub mod streaming_calculators;
pub mod summary_stats;
