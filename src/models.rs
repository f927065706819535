//! Data types and associated functions and methods

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::Display;
use validator::Validate;

/// Output format of a section
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    /// Raw grouped rows
    Table,
    /// One slice per group
    Pie,
    /// One point per group, optionally one line per chart sub-slice value
    Line,
    /// One bar per group, optionally one bar segment per chart sub-slice value
    Bar,
}

impl Format {
    /// Whether this format is rendered as a chart.
    pub fn is_chart(self) -> bool {
        !matches!(self, Format::Table)
    }

    /// Whether this format supports chart sub-slices and percentage modes.
    pub fn is_multi_series(self) -> bool {
        matches!(self, Format::Line | Format::Bar)
    }
}

/// Percentage normalisation of line and bar chart values
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PercentageMode {
    /// Absolute values
    #[default]
    None,
    /// Each value as a percentage of its x-axis group
    XaxisGroup,
    /// Each value as a percentage of the grand total
    Total,
}

/// A requested filter: the filter named `value` defined for `field`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    #[validate(length(min = 1, message = "filter field must not be empty"))]
    pub field: String,
    #[validate(length(min = 1, message = "filter value must not be empty"))]
    pub value: String,
}

impl FilterSpec {
    pub fn new(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Query parameters of the series data and download endpoints
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct SeriesDataQuery {
    /// Section whose data is requested
    pub section_id: u64,
    /// Name of the series
    #[validate(length(min = 1, message = "series must not be empty"))]
    pub series: String,
    /// Slice used to group rows
    pub slice: Option<String>,
    /// Slice providing the x-axis categories of line and bar charts
    pub xaxis_slice: Option<String>,
    /// Aggregator name
    pub aggregator: Option<String>,
    /// JSON encoded list of filters, e.g. `[{"field": "dob", "value": "Before 1990"}]`
    #[serde(default, deserialize_with = "deserialize_filters")]
    #[validate]
    pub filters: Option<Vec<FilterSpec>>,
    /// Output format
    pub format: Format,
    /// Percentage normalisation
    pub percentage_mode: Option<PercentageMode>,
    /// Discard cached data and recompute
    #[serde(default)]
    pub force_refresh: bool,
}

/// Deserialise a JSON encoded filter list carried in a single query parameter.
fn deserialize_filters<'de, D>(deserializer: D) -> Result<Option<Vec<FilterSpec>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.filter(|raw| !raw.trim().is_empty())
        .map(|raw| serde_json::from_str(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

/// Identity of the caller, as asserted by the authenticating proxy.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UserContext {
    pub user_id: String,
    pub client_id: Option<String>,
}

/// Response body sent while section data is being computed
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct Processing {
    pub message: String,
    /// Seconds until the data is expected to be available
    pub estimated_time: u64,
}

/// Return a string option with empty values removed.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
