//! Registry of the series known to the server.

use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{event, Level};

use crate::error::ChartistError;
use crate::series::json::JsonSeries;
use crate::series::SeriesProvider;

/// Description of a series, as listed by the API.
#[derive(Debug, PartialEq, Serialize)]
pub struct SeriesDescription {
    pub name: String,
    pub description: String,
    pub slices: Vec<String>,
    /// Filter names by field
    pub filters: IndexMap<String, Vec<String>>,
    pub aggregators: Vec<String>,
}

/// Series providers by name, in registration order.
#[derive(Clone, Default)]
pub struct SeriesRegistry {
    series: IndexMap<String, Arc<dyn SeriesProvider>>,
}

impl SeriesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a registry with the series of each definition file.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self, ChartistError> {
        let mut registry = Self::new();
        for path in paths {
            registry.register(JsonSeries::from_path(path)?);
        }
        Ok(registry)
    }

    /// Register a series under its name, replacing any series of the same name.
    pub fn register<S: SeriesProvider + 'static>(&mut self, series: S) {
        let name = series.name().to_string();
        event!(Level::DEBUG, "registering series {name}");
        if self.series.insert(name.clone(), Arc::new(series)).is_some() {
            event!(Level::WARN, "series {name} registered more than once");
        }
    }

    /// Look up a series by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SeriesProvider>> {
        self.series.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Describe every registered series.
    pub fn describe(&self) -> Vec<SeriesDescription> {
        self.series
            .values()
            .map(|series| SeriesDescription {
                name: series.name().to_string(),
                description: series.description().to_string(),
                slices: series.slices().keys().cloned().collect(),
                filters: series
                    .filters()
                    .iter()
                    .map(|(field, filters)| (field.clone(), filters.keys().cloned().collect()))
                    .collect(),
                aggregators: series.aggregators().keys().cloned().collect(),
            })
            .collect()
    }
}
