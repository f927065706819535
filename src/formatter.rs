//! Chart formatter
//!
//! Turns a [GroupedDataset] into the payload rendered for a section:
//!
//! * table: the groups themselves, without empty rows.
//! * pie: one [ChartRow] per group holding the aggregate of the group.
//! * line and bar: one [ChartRow] per group. With a chart sub-slice, each row holds the
//!   aggregate of every sub-slice value seen anywhere in the data, zero when the group has no
//!   rows for that value. Values may then be normalised to percentages.
//!
//! Chart payloads longer than the maximum number of groups are cut and terminated by a
//! [TruncationMarker].

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::models::{non_empty, Format, PercentageMode};
use crate::series::{
    count_rows, AggregatorFn, AggregatorMap, SliceFn, SliceMap, DEFAULT_AGGREGATOR,
};
use crate::types::{
    number_from_value, ChartEntry, ChartRow, GroupKey, GroupedDataset, Row, TruncationMarker,
    NAME_KEY,
};

/// Chart sub-slice names meaning "no sub-slice".
const NO_SLICE: [&str; 3] = ["None", "All", "null"];

/// Parameters of a formatting run
#[derive(Clone, Debug, PartialEq)]
pub struct FormatOptions {
    pub format: Format,
    /// Name of the aggregator. Unknown names fall back to `Default`, then to a row count.
    pub aggregator: String,
    /// Slice breaking each line or bar group down into one value per slice key
    pub chart_slice: Option<String>,
    pub percentage_mode: PercentageMode,
    /// Maximum number of chart groups. [None] disables truncation.
    pub max_groups: Option<usize>,
}

impl FormatOptions {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            aggregator: DEFAULT_AGGREGATOR.to_string(),
            chart_slice: None,
            percentage_mode: PercentageMode::None,
            max_groups: None,
        }
    }
}

/// Formatted section data
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormattedData {
    Table(GroupedDataset),
    Chart(Vec<ChartEntry>),
}

/// Format grouped data for display.
///
/// # Arguments
///
/// * `grouped`: Data grouped by the primary slice
/// * `options`: Format, aggregator, chart sub-slice, percentage mode and group limit
/// * `slices`: Slice functions of the series
/// * `aggregators`: Aggregator functions of the series
pub fn format(
    grouped: &GroupedDataset,
    options: &FormatOptions,
    slices: &SliceMap,
    aggregators: &AggregatorMap,
) -> FormattedData {
    if !options.format.is_chart() {
        return FormattedData::Table(grouped.without_empty_rows());
    }
    let aggregator = resolve_aggregator(aggregators, &options.aggregator);
    let mut rows = match (options.format.is_multi_series(), chart_slice(options, slices)) {
        (true, Some(slice_fn)) => sub_sliced_rows(grouped, slice_fn, &aggregator),
        _ => aggregate_rows(grouped, &aggregator),
    };
    if options.format.is_multi_series() {
        apply_percentage_mode(&mut rows, options.percentage_mode);
    }
    FormattedData::Chart(truncate(rows, options.max_groups))
}

/// Round to two decimal places, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn resolve_aggregator(aggregators: &AggregatorMap, name: &str) -> AggregatorFn {
    aggregators
        .get(name)
        .or_else(|| aggregators.get(DEFAULT_AGGREGATOR))
        .cloned()
        .unwrap_or_else(count_rows)
}

fn chart_slice<'a>(options: &FormatOptions, slices: &'a SliceMap) -> Option<&'a SliceFn> {
    non_empty(options.chart_slice.as_deref())
        .filter(|slice| !NO_SLICE.contains(slice))
        .and_then(|slice| slices.get(slice))
}

/// Aggregate rows, coercing the result to a number rounded to two decimal places.
fn aggregate(aggregator: &AggregatorFn, rows: &[Row]) -> f64 {
    round2(number_from_value(&aggregator(rows)).unwrap_or(0.0))
}

/// One row per group holding the aggregate of the whole group.
fn aggregate_rows(grouped: &GroupedDataset, aggregator: &AggregatorFn) -> Vec<ChartRow> {
    grouped
        .iter()
        .map(|(key, rows)| ChartRow::value(key, aggregate(aggregator, rows)))
        .collect()
}

/// One row per group holding an aggregate per chart sub-slice key, backfilled with zeros.
///
/// The sub-slice function is applied exactly once per non-empty row. Rows are bucketed by
/// index and each bucket is copied out only while it is aggregated. Rows whose sub-slice key is
/// [NAME_KEY] are left out, as that key holds the category of the chart row.
fn sub_sliced_rows(
    grouped: &GroupedDataset,
    slice_fn: &SliceFn,
    aggregator: &AggregatorFn,
) -> Vec<ChartRow> {
    let mut all_keys: IndexSet<GroupKey> = IndexSet::new();
    let mut chart_rows = Vec::with_capacity(grouped.len());
    for (key, rows) in grouped.iter() {
        let mut buckets: IndexMap<GroupKey, Vec<usize>> = IndexMap::new();
        for (index, row) in rows.iter().enumerate().filter(|(_, row)| !row.is_empty()) {
            let sub_key = slice_fn(row);
            if sub_key == NAME_KEY {
                continue;
            }
            if !all_keys.contains(&sub_key) {
                all_keys.insert(sub_key.clone());
            }
            buckets.entry(sub_key).or_default().push(index);
        }
        let values = buckets
            .into_iter()
            .map(|(sub_key, indices)| {
                let bucket: Vec<Row> = indices.iter().map(|&index| rows[index].clone()).collect();
                (sub_key, aggregate(aggregator, &bucket))
            })
            .collect();
        chart_rows.push(ChartRow {
            name: key.clone(),
            values,
        });
    }

    for row in chart_rows.iter_mut() {
        for sub_key in &all_keys {
            if !row.values.contains_key(sub_key) {
                row.values.insert(sub_key.clone(), 0.0);
            }
        }
    }
    chart_rows
}

/// Normalise chart values to percentages.
///
/// Rows, or with [PercentageMode::Total] the whole chart, summing to zero are left untouched.
pub fn apply_percentage_mode(rows: &mut [ChartRow], mode: PercentageMode) {
    match mode {
        PercentageMode::None => {}
        PercentageMode::XaxisGroup => {
            for row in rows.iter_mut() {
                let total = row.total();
                scale(row, total);
            }
        }
        PercentageMode::Total => {
            let total: f64 = rows.iter().map(ChartRow::total).sum();
            for row in rows.iter_mut() {
                scale(row, total);
            }
        }
    }
}

fn scale(row: &mut ChartRow, total: f64) {
    if total == 0.0 {
        return;
    }
    for value in row.values.values_mut() {
        *value = round2(*value / total * 100.0);
    }
}

/// Keep at most `max_groups` rows, appending a [TruncationMarker] when rows were dropped.
pub fn truncate(rows: Vec<ChartRow>, max_groups: Option<usize>) -> Vec<ChartEntry> {
    let total = rows.len();
    let limit = match max_groups {
        Some(max_groups) if max_groups > 0 && total > max_groups => max_groups,
        _ => return rows.into_iter().map(ChartEntry::Row).collect(),
    };
    let mut entries: Vec<ChartEntry> = Vec::with_capacity(limit + 1);
    entries.extend(rows.into_iter().take(limit).map(ChartEntry::Row));
    entries.push(ChartEntry::Truncated(TruncationMarker::new(total, limit)));
    entries
}
