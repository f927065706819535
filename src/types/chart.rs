//! Chart-ready data

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::GroupKey;

/// Key holding the aggregate of a chart row without a chart sub-slice.
pub const VALUE_KEY: &str = "value";

/// Key holding the category of a chart row. Never used as a value key.
pub const NAME_KEY: &str = "name";

/// One category of a chart.
///
/// `name` is the x-axis or pie category. `values` holds either a single [VALUE_KEY] entry or
/// one entry per chart sub-slice value. Serialises as a flat object with `name` first.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChartRow {
    pub name: GroupKey,
    #[serde(flatten)]
    pub values: IndexMap<String, f64>,
}

impl ChartRow {
    /// Return a [ChartRow] with a single aggregate value.
    pub fn value(name: &str, value: f64) -> Self {
        let mut values = IndexMap::with_capacity(1);
        values.insert(VALUE_KEY.to_string(), value);
        Self {
            name: name.to_string(),
            values,
        }
    }

    /// Sum of the numeric values of this row.
    pub fn total(&self) -> f64 {
        self.values.values().sum()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum MarkerTag {
    #[serde(rename = "truncated")]
    Truncated,
}

/// Trailer appended to chart data that has been cut to the maximum number of groups.
///
/// Its reserved `_meta` field never appears in a [ChartRow].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TruncationMarker {
    #[serde(rename = "_meta")]
    pub meta: MarkerTag,
    /// Number of groups before truncation
    #[serde(rename = "_total")]
    pub total: usize,
    /// Number of groups kept
    #[serde(rename = "_shown")]
    pub shown: usize,
}

impl TruncationMarker {
    pub fn new(total: usize, shown: usize) -> Self {
        Self {
            meta: MarkerTag::Truncated,
            total,
            shown,
        }
    }
}

/// An element of formatted chart data.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartEntry {
    Row(ChartRow),
    Truncated(TruncationMarker),
}

impl ChartEntry {
    /// The chart row, unless this entry is a truncation marker.
    pub fn as_row(&self) -> Option<&ChartRow> {
        match self {
            ChartEntry::Row(row) => Some(row),
            ChartEntry::Truncated(_) => None,
        }
    }
}

/// Return the truncation marker of chart data, if it has one.
pub fn truncation(entries: &[ChartEntry]) -> Option<&TruncationMarker> {
    match entries.last() {
        Some(ChartEntry::Truncated(marker)) => Some(marker),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_row_serialises_flat_with_name_first() {
        let mut row = ChartRow::value("CA", 1.0);
        row.values.insert("NY".to_string(), 0.0);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(r#"{"name":"CA","value":1.0,"NY":0.0}"#, json);
    }

    #[test]
    fn entries_decode_rows_and_markers() {
        let json = r#"[{"name":"Jan","CA":100.0},{"_meta":"truncated","_total":4,"_shown":1}]"#;
        let entries: Vec<ChartEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(2, entries.len());
        let row = entries[0].as_row().unwrap();
        assert_eq!("Jan", row.name);
        assert_eq!(Some(&100.0), row.values.get("CA"));
        assert!(entries[1].as_row().is_none());
        assert_eq!(Some(&TruncationMarker::new(4, 1)), truncation(&entries));
    }

    #[test]
    fn no_marker_without_truncation() {
        let entries = vec![ChartEntry::Row(ChartRow::value("CA", 1.0))];
        assert_eq!(None, truncation(&entries));
        assert_eq!(None, truncation(&[]));
    }
}
