pub mod chart;
pub mod dataset;

// Re-export types for convenience.
pub use crate::types::chart::{
    truncation, ChartEntry, ChartRow, TruncationMarker, NAME_KEY, VALUE_KEY,
};
pub use crate::types::dataset::{
    key_from_value, number_from_value, Dataset, GroupKey, GroupedDataset, Row, ALL_GROUP,
};
