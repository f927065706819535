//! Series providers
//!
//! A series is a pluggable data source. It produces the rows of a [Dataset] for a request and
//! names the functions used to slice, filter and aggregate them.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::models::{FilterSpec, UserContext};
use crate::types::{key_from_value, number_from_value, Dataset, GroupKey, Row};

pub mod json;

/// Name of the aggregator used when none is requested.
pub const DEFAULT_AGGREGATOR: &str = "Default";

/// Maps a row to the key of its group.
pub type SliceFn = Arc<dyn Fn(&Row) -> GroupKey + Send + Sync>;

/// Reduces the rows of a group to a single value.
///
/// Numbers and numeric strings are accepted.
pub type AggregatorFn = Arc<dyn Fn(&[Row]) -> Value + Send + Sync>;

/// Decides whether a row passes a filter.
pub type FilterFn = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// Slice functions by name
pub type SliceMap = IndexMap<String, SliceFn>;

/// Aggregator functions by name
pub type AggregatorMap = IndexMap<String, AggregatorFn>;

/// Filter predicates by field, then by filter name
pub type FilterMap = IndexMap<String, IndexMap<String, FilterFn>>;

/// A source of series data.
///
/// Implementations are registered with a [SeriesRegistry](crate::registry::SeriesRegistry) at
/// startup.
#[async_trait]
pub trait SeriesProvider: Send + Sync {
    /// Unique name of the series
    fn name(&self) -> &str;

    /// Human readable description
    fn description(&self) -> &str;

    /// Return the rows of this series, with the filters in `bag` applied.
    ///
    /// # Arguments
    ///
    /// * `bag`: Requested filters and slice
    /// * `user`: Identity of the user the data is produced for, when known
    async fn data(
        &self,
        bag: &FilterBag,
        user: Option<&UserContext>,
    ) -> Result<Dataset, ProviderError>;

    /// Slice functions offered by this series
    fn slices(&self) -> SliceMap;

    /// Filters offered by this series
    fn filters(&self) -> FilterMap {
        FilterMap::new()
    }

    /// Aggregators offered by this series. Without any, groups are aggregated by row count.
    fn aggregators(&self) -> AggregatorMap {
        AggregatorMap::new()
    }
}

/// Filters and slice requested for a load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterBag {
    filters: IndexMap<String, Vec<String>>,
    slice: Option<String>,
}

impl FilterBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a [FilterBag] for requested filters and an optional slice.
    pub fn from_specs(specs: &[FilterSpec], slice: Option<&str>) -> Self {
        let mut bag = Self::new();
        for spec in specs {
            bag.add_filter(&spec.field, &spec.value);
        }
        if let Some(slice) = slice {
            bag.set_slice(slice);
        }
        bag
    }

    /// Enable the filter named `filter` of `field`.
    pub fn add_filter(&mut self, field: &str, filter: &str) {
        let names = self.filters.entry(field.to_string()).or_default();
        if !names.iter().any(|name| name == filter) {
            names.push(filter.to_string());
        }
    }

    pub fn set_slice(&mut self, slice: &str) {
        self.slice = Some(slice.to_string());
    }

    pub fn slice(&self) -> Option<&str> {
        self.slice.as_deref()
    }

    /// Enabled filter names by field
    pub fn filters(&self) -> &IndexMap<String, Vec<String>> {
        &self.filters
    }

    pub fn is_filter_set(&self, field: &str, filter: &str) -> bool {
        self.filters
            .get(field)
            .map_or(false, |names| names.iter().any(|name| name == filter))
    }

    /// Keep the rows that pass the enabled filters.
    ///
    /// Filters of the same field are alternatives: a row passes the field if any enabled filter
    /// of that field accepts it. A row is kept if it passes every field with an enabled filter.
    pub fn apply(&self, mut rows: Dataset, all_filters: &FilterMap) -> Dataset {
        let active: Vec<Vec<&FilterFn>> = all_filters
            .iter()
            .map(|(field, filters)| {
                filters
                    .iter()
                    .filter(|(name, _)| self.is_filter_set(field, name))
                    .map(|(_, filter)| filter)
                    .collect::<Vec<_>>()
            })
            .filter(|filters| !filters.is_empty())
            .collect();
        if !active.is_empty() {
            rows.retain(|row| {
                active
                    .iter()
                    .all(|filters| filters.iter().any(|filter| filter(row)))
            });
        }
        rows
    }
}

/// Return a slice function keyed by the value of `field`. Missing fields give an empty key.
pub fn field_slice(field: &str) -> SliceFn {
    let field = field.to_string();
    Arc::new(move |row: &Row| row.get(&field).map(key_from_value).unwrap_or_default())
}

/// Return an aggregator counting rows.
pub fn count_rows() -> AggregatorFn {
    Arc::new(|rows: &[Row]| Value::from(rows.len()))
}

/// Return an aggregator summing the numeric values of `field`.
pub fn sum_field(field: &str) -> AggregatorFn {
    let field = field.to_string();
    Arc::new(move |rows: &[Row]| Value::from(numbers(rows, &field).sum::<f64>()))
}

/// Return an aggregator averaging the numeric values of `field`. No values average to 0.
pub fn average_field(field: &str) -> AggregatorFn {
    let field = field.to_string();
    Arc::new(move |rows: &[Row]| {
        let (sum, count) = numbers(rows, &field).fold((0.0, 0_usize), |(sum, count), n| {
            (sum + n, count + 1)
        });
        if count == 0 {
            Value::from(0.0)
        } else {
            Value::from(sum / count as f64)
        }
    })
}

fn numbers<'a>(rows: &'a [Row], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    rows.iter()
        .filter_map(move |row| row.get(field).and_then(number_from_value))
}
