use crate::cache::{CacheBackend, MemoryCache};
use crate::error::{ChartistError, ProviderError};
use crate::models::*;
use crate::sections::{Report, Section, StaticSectionStore};
use crate::series::{
    count_rows, field_slice, sum_field, AggregatorMap, FilterBag, FilterFn, FilterMap,
    SeriesProvider, SliceMap, DEFAULT_AGGREGATOR,
};
use crate::types::{Dataset, Row};

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Create a SeriesDataQuery object with only required fields set.
pub(crate) fn get_test_query() -> SeriesDataQuery {
    SeriesDataQuery {
        section_id: 1,
        series: "Test Series".to_string(),
        slice: None,
        xaxis_slice: None,
        aggregator: None,
        filters: None,
        format: Format::Table,
        percentage_mode: None,
        force_refresh: false,
    }
}

/// Create a SeriesDataQuery object with all fields set.
pub(crate) fn get_test_query_optional() -> SeriesDataQuery {
    SeriesDataQuery {
        section_id: 1,
        series: "Test Series".to_string(),
        slice: Some("State".to_string()),
        xaxis_slice: Some("Month".to_string()),
        aggregator: Some("Sum".to_string()),
        filters: Some(vec![FilterSpec::new("dob", "Before 1990")]),
        format: Format::Bar,
        percentage_mode: Some(PercentageMode::XaxisGroup),
        force_refresh: true,
    }
}

/// The four rows of the test series.
pub(crate) fn test_rows() -> Dataset {
    serde_json::from_value(json!([
        {"name": "Test 1", "state": "CA", "month": "Jan", "dob": "1980-01-01", "value": 100},
        {"name": "Test 2", "state": "NY", "month": "Jan", "dob": "1985-01-01", "value": 200},
        {"name": "Test 3", "state": "TX", "month": "Feb", "dob": "1990-01-01", "value": 150},
        {"name": "Test 4", "state": "FL", "month": "Feb", "dob": "1995-01-01", "value": 250},
    ]))
    .unwrap()
}

/// Series over [test_rows], sliceable by state and month.
///
/// Calls to [SeriesProvider::data] are counted and may be held back by a gate.
#[derive(Clone, Default)]
pub(crate) struct TestSeries {
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl TestSeries {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return a series whose data calls wait for a permit to be added to the returned gate.
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let series = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (series, gate)
    }

    /// Number of data calls made so far, including calls waiting at the gate.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn dob_before(bound: &'static str) -> FilterFn {
    Arc::new(move |row: &Row| row["dob"].as_str().map_or(false, |dob| dob < bound))
}

fn dob_from(bound: &'static str) -> FilterFn {
    Arc::new(move |row: &Row| row["dob"].as_str().map_or(false, |dob| dob >= bound))
}

#[async_trait]
impl SeriesProvider for TestSeries {
    fn name(&self) -> &str {
        "Test Series"
    }

    fn description(&self) -> &str {
        "Test Series Description"
    }

    async fn data(
        &self,
        bag: &FilterBag,
        _user: Option<&UserContext>,
    ) -> Result<Dataset, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        Ok(bag.apply(test_rows(), &self.filters()))
    }

    fn slices(&self) -> SliceMap {
        let mut slices = SliceMap::new();
        slices.insert(
            "State".to_string(),
            Arc::new(|row: &Row| {
                row.get("state")
                    .and_then(|state| state.as_str())
                    .unwrap_or_default()
                    .to_uppercase()
            }),
        );
        slices.insert("Month".to_string(), field_slice("month"));
        slices
    }

    fn filters(&self) -> FilterMap {
        let mut dob = IndexMap::new();
        dob.insert("Before 1990".to_string(), dob_before("1990-01-01"));
        dob.insert("After 1990".to_string(), dob_from("1990-01-01"));
        let mut filters = FilterMap::new();
        filters.insert("dob".to_string(), dob);
        filters
    }

    fn aggregators(&self) -> AggregatorMap {
        let mut aggregators = AggregatorMap::new();
        aggregators.insert(DEFAULT_AGGREGATOR.to_string(), count_rows());
        aggregators.insert("Sum".to_string(), sum_field("value"));
        aggregators
    }
}

/// Series whose data call always fails.
pub(crate) struct FailingSeries;

#[async_trait]
impl SeriesProvider for FailingSeries {
    fn name(&self) -> &str {
        "Failing Series"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn data(
        &self,
        _bag: &FilterBag,
        _user: Option<&UserContext>,
    ) -> Result<Dataset, ProviderError> {
        Err(ProviderError::new("upstream unavailable"))
    }

    fn slices(&self) -> SliceMap {
        SliceMap::new()
    }
}

/// Series whose data call panics.
pub(crate) struct PanickingSeries;

#[async_trait]
impl SeriesProvider for PanickingSeries {
    fn name(&self) -> &str {
        "Panicking Series"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    async fn data(
        &self,
        _bag: &FilterBag,
        _user: Option<&UserContext>,
    ) -> Result<Dataset, ProviderError> {
        panic!("series bug")
    }

    fn slices(&self) -> SliceMap {
        SliceMap::new()
    }
}

fn section(id: u64, report_id: u64, series: &str, format: Format) -> Section {
    Section {
        id,
        report_id,
        name: format!("Section {id}"),
        series: series.to_string(),
        slice: None,
        xaxis_slice: None,
        aggregator: DEFAULT_AGGREGATOR.to_string(),
        percentage_mode: PercentageMode::None,
        filters: Vec::new(),
        format,
    }
}

/// Sections used by the HTTP tests.
///
/// * 1: table of the test series, unscoped report
/// * 2: bar chart by month and state, summed, unscoped report
/// * 3: pie chart by state in a report scoped to client `acme`
/// * 4: pie chart of an unregistered series
/// * 5: bar chart whose report does not exist
pub(crate) fn test_sections() -> StaticSectionStore {
    let reports = vec![
        Report {
            id: 1,
            name: "Open report".to_string(),
            author_id: "author".to_string(),
            client_id: None,
        },
        Report {
            id: 2,
            name: "Acme report".to_string(),
            author_id: "author".to_string(),
            client_id: Some("acme".to_string()),
        },
    ];
    let bar = Section {
        slice: Some("State".to_string()),
        xaxis_slice: Some("Month".to_string()),
        aggregator: "Sum".to_string(),
        ..section(2, 1, "Test Series", Format::Bar)
    };
    let pie = Section {
        slice: Some("State".to_string()),
        ..section(3, 2, "Test Series", Format::Pie)
    };
    let sections = vec![
        section(1, 1, "Test Series", Format::Table),
        bar,
        pie,
        section(4, 1, "Missing Series", Format::Pie),
        section(5, 99, "Test Series", Format::Bar),
    ];
    StaticSectionStore::new(reports, sections)
}

/// Identity of the user making test requests.
pub(crate) fn test_user() -> UserContext {
    UserContext {
        user_id: "user".to_string(),
        client_id: None,
    }
}

/// Cache backend that can only store running flags. Every other write fails.
#[derive(Default)]
pub(crate) struct BrokenCache {
    inner: MemoryCache,
}

#[async_trait]
impl CacheBackend for BrokenCache {
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), ChartistError> {
        if key.ends_with(":is_running") {
            self.inner.put(key, value, ttl).await
        } else {
            Err(ChartistError::Cache {
                error: format!("cannot write {key}"),
            })
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, ChartistError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ChartistError> {
        self.inner.delete(key).await
    }

    async fn purge_expired(&self) -> Result<usize, ChartistError> {
        self.inner.purge_expired().await
    }
}

/// Wait until `condition` holds, failing the test after five seconds.
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
