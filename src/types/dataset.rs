//! Tabular series data
//!
//! Series providers produce a [Dataset]: a sequence of [Row]s without a fixed schema. The
//! grouping engine partitions a dataset into a [GroupedDataset], keyed by the output of a slice
//! function.
//!
//! Group keys are always strings. A key that looks numeric, such as `"24"`, stays a string
//! through serialisation and is never reinterpreted as a positional index.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single row of series data: an ordered mapping of field name to scalar.
pub type Row = Map<String, Value>;

/// Rows produced by a series provider for one request.
pub type Dataset = Vec<Row>;

/// Identifies a partition of a [GroupedDataset].
pub type GroupKey = String;

/// Key of the single group used when no slice is applied.
pub const ALL_GROUP: &str = "All";

/// Rows partitioned by group key.
///
/// Groups are kept in first-seen order. Each group is always a sequence of rows, never a bare
/// row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GroupedDataset(IndexMap<GroupKey, Vec<Row>>);

impl GroupedDataset {
    /// Return an empty [GroupedDataset].
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a [GroupedDataset] with every row in the [ALL_GROUP] group.
    pub fn all(rows: Dataset) -> Self {
        let mut groups = IndexMap::with_capacity(1);
        groups.insert(ALL_GROUP.to_string(), rows);
        Self(groups)
    }

    /// Append a row to a group, creating the group if this is the first time its key is seen.
    pub fn push(&mut self, key: GroupKey, row: Row) {
        self.0.entry(key).or_default().push(row);
    }

    /// Rows of a group, if present.
    pub fn get(&self, key: &str) -> Option<&[Row]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Group keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterate over groups in order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &Vec<Row>)> {
        self.0.iter()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of rows across all groups.
    pub fn row_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Return a copy with rows that have no fields removed. Groups left without rows are kept.
    pub fn without_empty_rows(&self) -> Self {
        self.0
            .iter()
            .map(|(key, rows)| {
                let rows: Vec<Row> = rows.iter().filter(|row| !row.is_empty()).cloned().collect();
                (key.clone(), rows)
            })
            .collect()
    }
}

impl FromIterator<(GroupKey, Vec<Row>)> for GroupedDataset {
    fn from_iter<I: IntoIterator<Item = (GroupKey, Vec<Row>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for GroupedDataset {
    type Item = (GroupKey, Vec<Row>);
    type IntoIter = indexmap::map::IntoIter<GroupKey, Vec<Row>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Render a field value as a group key.
///
/// Strings are used as-is, null becomes the empty string and anything else uses its JSON
/// representation.
pub fn key_from_value(value: &Value) -> GroupKey {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Interpret a field value as a number.
///
/// Numeric strings are parsed, other non-numeric values yield [None].
pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
