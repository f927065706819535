//! Series defined by a JSON file.
//!
//! A definition holds the rows of the series together with the fields it may be sliced by,
//! the numeric fields it may be aggregated over and its filters:
//!
//! ```json
//! {
//!   "name": "Patients",
//!   "description": "Patients by state",
//!   "rows": [{"state": "CA", "dob": "1980-01-01", "cost": 100}],
//!   "slices": {"State": "state"},
//!   "value_fields": ["cost"],
//!   "filters": {"dob": {"Before 1990": {"less_than": "1990-01-01"}}}
//! }
//! ```

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ChartistError, ProviderError};
use crate::models::UserContext;
use crate::series::{
    average_field, count_rows, field_slice, sum_field, AggregatorMap, FilterBag, FilterFn,
    FilterMap, SeriesProvider, SliceMap, DEFAULT_AGGREGATOR,
};
use crate::types::{Dataset, Row};

/// Condition a field value must meet to pass a filter
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FilterRule {
    Equals(Value),
    NotEquals(Value),
    /// Numeric comparison when both sides are numbers, otherwise lexical
    LessThan(Value),
    /// Numeric comparison when both sides are numbers, otherwise lexical
    GreaterOrEqual(Value),
    OneOf(Vec<Value>),
}

impl FilterRule {
    /// Whether `value` meets this rule. A missing field only meets `not_equals`.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = match value {
            Some(value) => value,
            None => return matches!(self, FilterRule::NotEquals(_)),
        };
        match self {
            FilterRule::Equals(expected) => loose_eq(value, expected),
            FilterRule::NotEquals(expected) => !loose_eq(value, expected),
            FilterRule::LessThan(bound) => compare(value, bound) == Some(Ordering::Less),
            FilterRule::GreaterOrEqual(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterRule::OneOf(expected) => expected.iter().any(|e| loose_eq(value, e)),
        }
    }

    fn predicate(&self, field: &str) -> FilterFn {
        let rule = self.clone();
        let field = field.to_string();
        Arc::new(move |row: &Row| rule.matches(row.get(&field)))
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeriesDefinition {
    name: String,
    #[serde(default)]
    description: String,
    rows: Dataset,
    /// Slice label to field
    #[serde(default)]
    slices: IndexMap<String, String>,
    #[serde(default)]
    value_fields: Vec<String>,
    #[serde(default)]
    filters: IndexMap<String, IndexMap<String, FilterRule>>,
}

/// A series whose rows and functions are read from a definition file.
pub struct JsonSeries {
    name: String,
    description: String,
    rows: Dataset,
    slices: SliceMap,
    aggregators: AggregatorMap,
    filters: FilterMap,
}

impl JsonSeries {
    /// Load a series definition file.
    pub fn from_path(path: &Path) -> Result<Self, ChartistError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ChartistError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&contents).map_err(|source| ChartistError::ParseFile {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse a series definition.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(definition: &str) -> Result<Self, serde_json::Error> {
        let definition: SeriesDefinition = serde_json::from_str(definition)?;
        Ok(Self::build(definition))
    }

    fn build(definition: SeriesDefinition) -> Self {
        let slices = definition
            .slices
            .iter()
            .map(|(label, field)| (label.clone(), field_slice(field)))
            .collect();
        let mut aggregators = AggregatorMap::new();
        aggregators.insert(DEFAULT_AGGREGATOR.to_string(), count_rows());
        for field in &definition.value_fields {
            aggregators.insert(format!("Sum of {field}"), sum_field(field));
            aggregators.insert(format!("Average of {field}"), average_field(field));
        }
        let filters = definition
            .filters
            .iter()
            .map(|(field, rules)| {
                let predicates = rules
                    .iter()
                    .map(|(name, rule)| (name.clone(), rule.predicate(field)))
                    .collect();
                (field.clone(), predicates)
            })
            .collect();
        Self {
            name: definition.name,
            description: definition.description,
            rows: definition.rows,
            slices,
            aggregators,
            filters,
        }
    }
}

#[async_trait]
impl SeriesProvider for JsonSeries {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn data(
        &self,
        bag: &FilterBag,
        _user: Option<&UserContext>,
    ) -> Result<Dataset, ProviderError> {
        Ok(bag.apply(self.rows.clone(), &self.filters))
    }

    fn slices(&self) -> SliceMap {
        self.slices.clone()
    }

    fn filters(&self) -> FilterMap {
        self.filters.clone()
    }

    fn aggregators(&self) -> AggregatorMap {
        self.aggregators.clone()
    }
}
