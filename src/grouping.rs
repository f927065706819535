//! Grouping engine: partitions a dataset with a slice function.

use crate::models::non_empty;
use crate::series::SliceMap;
use crate::types::{Dataset, GroupedDataset};

/// Partition `dataset` into groups using the slice named `slice`.
///
/// Without a slice, or when `slice` names no known slice function, every row lands in the single
/// [ALL_GROUP](crate::types::ALL_GROUP) group in its original order. Rows are not inspected or
/// filtered.
pub fn group(dataset: Dataset, slice: Option<&str>, slices: &SliceMap) -> GroupedDataset {
    let slice_fn = match non_empty(slice).and_then(|slice| slices.get(slice)) {
        Some(slice_fn) => slice_fn,
        None => return GroupedDataset::all(dataset),
    };
    let mut grouped = GroupedDataset::new();
    for row in dataset {
        grouped.push(slice_fn(&row), row);
    }
    grouped
}
