//! Reports and their sections.
//!
//! Sections are configured outside this service. The server only reads them, to find the series,
//! slices, filters and format a section is rendered with, and the report that scopes access to it.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::Deserialize;
use std::path::Path;

use crate::error::ChartistError;
use crate::models::{FilterSpec, Format, PercentageMode};
use crate::series::DEFAULT_AGGREGATOR;

/// A saved report
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Report {
    pub id: u64,
    pub name: String,
    pub author_id: String,
    /// Client scope of the report. Unscoped reports are visible to every client.
    #[serde(default)]
    pub client_id: Option<String>,
}

/// A section of a report, rendering one series
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Section {
    pub id: u64,
    pub report_id: u64,
    pub name: String,
    pub series: String,
    #[serde(default)]
    pub slice: Option<String>,
    #[serde(default)]
    pub xaxis_slice: Option<String>,
    #[serde(default = "default_aggregator")]
    pub aggregator: String,
    #[serde(default)]
    pub percentage_mode: PercentageMode,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    pub format: Format,
}

fn default_aggregator() -> String {
    DEFAULT_AGGREGATOR.to_string()
}

/// Read access to reports and sections
#[async_trait]
pub trait SectionStore: Send + Sync {
    async fn section(&self, id: u64) -> Result<Option<Section>, ChartistError>;

    async fn report(&self, id: u64) -> Result<Option<Report>, ChartistError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SectionsFile {
    #[serde(default)]
    reports: Vec<Report>,
    #[serde(default)]
    sections: Vec<Section>,
}

/// Reports and sections held in memory, loaded once at startup.
#[derive(Debug, Default)]
pub struct StaticSectionStore {
    reports: HashMap<u64, Report>,
    sections: HashMap<u64, Section>,
}

impl StaticSectionStore {
    pub fn new(reports: Vec<Report>, sections: Vec<Section>) -> Self {
        Self {
            reports: reports.into_iter().map(|r| (r.id, r)).collect(),
            sections: sections.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    /// Load reports and sections from a JSON file of the form
    /// `{"reports": [...], "sections": [...]}`.
    pub fn from_path(path: &Path) -> Result<Self, ChartistError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ChartistError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let file: SectionsFile =
            serde_json::from_str(&contents).map_err(|source| ChartistError::ParseFile {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(file.reports, file.sections))
    }
}

#[async_trait]
impl SectionStore for StaticSectionStore {
    async fn section(&self, id: u64) -> Result<Option<Section>, ChartistError> {
        Ok(self.sections.get(&id).cloned())
    }

    async fn report(&self, id: u64) -> Result<Option<Report>, ChartistError> {
        Ok(self.reports.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{
                "reports": [{"id": 1, "name": "Patients", "author_id": "u1", "client_id": "acme"}],
                "sections": [{
                    "id": 10, "report_id": 1, "name": "By state", "series": "Test Series",
                    "slice": "State", "format": "pie"
                }]
            }"#,
        )
        .unwrap();
        let store = StaticSectionStore::from_path(file.path()).unwrap();
        let section = store.section(10).await.unwrap().unwrap();
        assert_eq!("Default", section.aggregator);
        assert_eq!(PercentageMode::None, section.percentage_mode);
        assert_eq!(Some("State".to_string()), section.slice);
        assert!(section.filters.is_empty());
        assert_eq!(Format::Pie, section.format);
        let report = store.report(section.report_id).await.unwrap().unwrap();
        assert_eq!(Some("acme".to_string()), report.client_id);
        assert!(store.section(11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_store() {
        let store = StaticSectionStore::default();
        assert!(store.section(1).await.unwrap().is_none());
        assert!(store.report(1).await.unwrap().is_none());
    }

    #[test]
    fn from_path_rejects_unknown_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"sections": [{"id": 1, "report_id": 1, "name": "s", "series": "s", "format": "map"}]}"#,
        )
        .unwrap();
        let error = StaticSectionStore::from_path(file.path()).unwrap_err();
        assert!(matches!(error, ChartistError::ParseFile { .. }));
    }
}
