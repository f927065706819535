//! Section load jobs
//!
//! A load job materialises the data of one section: it fetches the rows of the series, groups
//! them by the primary slice, formats them for charts and stores the results in the
//! [SectionCache]. The running flag of the section is set for the duration of the job and is
//! cleared however the job ends.

use std::time::Instant;

use strum_macros::Display;
use tracing::{event, Level};
use uuid::Uuid;

use crate::cache::SectionCache;
use crate::error::JobError;
use crate::formatter::{self, FormatOptions, FormattedData};
use crate::grouping;
use crate::models::{Format, PercentageMode, UserContext};
use crate::registry::SeriesRegistry;
use crate::series::FilterBag;

/// Everything needed to load one section
#[derive(Clone, Debug, PartialEq)]
pub struct LoadSectionJob {
    pub section_id: u64,
    /// Name of the series providing the rows
    pub series: String,
    pub filters: FilterBag,
    /// Slice grouping the rows
    pub slice: Option<String>,
    /// User the data is loaded for
    pub user: Option<UserContext>,
    pub format: Format,
    pub aggregator: String,
    /// Slice breaking line and bar groups down into one value per slice key
    pub chart_slice: Option<String>,
    pub percentage_mode: PercentageMode,
}

impl LoadSectionJob {
    /// Deduplication token of this job.
    ///
    /// Jobs for the same section dispatched within the same window share a token.
    ///
    /// # Arguments
    ///
    /// * `now`: Seconds since the unix epoch
    /// * `window`: Width of the deduplication window in seconds
    pub fn unique_id(&self, now: u64, window: u64) -> String {
        let bucket = now.checked_div(window).map_or(now, |index| index * window);
        format!("{}_{}", self.section_id, bucket)
    }
}

/// Split the slices of a section into the primary slice and the chart sub-slice.
///
/// Line and bar charts with an x-axis slice group by the x-axis slice and break each group
/// down by `slice`. Everything else groups by `slice` alone.
pub fn resolve_slices(
    format: Format,
    slice: Option<&str>,
    xaxis_slice: Option<&str>,
) -> (Option<String>, Option<String>) {
    let slice = slice.filter(|slice| !slice.is_empty()).map(String::from);
    let xaxis_slice = xaxis_slice.filter(|slice| !slice.is_empty()).map(String::from);
    match xaxis_slice {
        Some(xaxis_slice) if format.is_multi_series() => (Some(xaxis_slice), slice),
        _ => (slice, None),
    }
}

/// How a load job ended, when it did not fail
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum JobOutcome {
    /// Data was cached
    Completed { duration_secs: u64 },
    /// The series is not registered. Nothing was cached.
    SeriesNotFound,
    /// The series failed to produce data. Nothing was cached.
    #[strum(serialize = "provider_error")]
    ProviderFailed,
}

/// Runs load jobs against the series registry and the section cache.
#[derive(Clone)]
pub struct SectionLoader {
    cache: SectionCache,
    registry: SeriesRegistry,
    max_chart_groups: Option<usize>,
    use_rayon: bool,
}

impl SectionLoader {
    /// Return a new SectionLoader.
    ///
    /// # Arguments
    ///
    /// * `cache`: Cache receiving the loaded data
    /// * `registry`: Series available to jobs
    /// * `max_chart_groups`: Group limit of chart data, if any
    /// * `use_rayon`: Whether to format charts on the rayon thread pool
    pub fn new(
        cache: SectionCache,
        registry: SeriesRegistry,
        max_chart_groups: Option<usize>,
        use_rayon: bool,
    ) -> Self {
        Self {
            cache,
            registry,
            max_chart_groups,
            use_rayon,
        }
    }

    pub fn cache(&self) -> &SectionCache {
        &self.cache
    }

    /// Run a load job.
    ///
    /// Provider failures end the job without an error, since retrying a faulty series is
    /// pointless. Other failures are returned so that the job may be retried.
    #[tracing::instrument(
        level = "DEBUG",
        skip(self, job),
        fields(section_id = job.section_id, series = %job.series, run_id = %Uuid::new_v4())
    )]
    pub async fn run(&self, job: &LoadSectionJob) -> Result<JobOutcome, JobError> {
        self.cache.set_running(job.section_id, true).await?;
        let result = self.load(job).await;
        let cleared = self.cache.set_running(job.section_id, false).await;
        match result {
            Ok(outcome) => {
                cleared?;
                Ok(outcome)
            }
            Err(JobError::Provider(err)) => {
                event!(Level::WARN, "series failed to produce data: {err}");
                cleared?;
                Ok(JobOutcome::ProviderFailed)
            }
            Err(err) => {
                if let Err(clear_err) = cleared {
                    event!(Level::ERROR, "failed to clear running flag: {clear_err}");
                }
                Err(err)
            }
        }
    }

    async fn load(&self, job: &LoadSectionJob) -> Result<JobOutcome, JobError> {
        let started = Instant::now();
        let series = match self.registry.get(&job.series) {
            Some(series) => series,
            None => {
                event!(Level::WARN, "series not found");
                return Ok(JobOutcome::SeriesNotFound);
            }
        };

        let dataset = series.data(&job.filters, job.user.as_ref()).await?;
        event!(Level::DEBUG, rows = dataset.len(), "fetched series data");
        let slices = series.slices();
        let grouped = grouping::group(dataset, job.slice.as_deref(), &slices);
        self.cache.put_raw(job.section_id, &grouped).await?;

        if job.format.is_chart() {
            let options = FormatOptions {
                format: job.format,
                aggregator: job.aggregator.clone(),
                chart_slice: job.chart_slice.clone(),
                percentage_mode: job.percentage_mode,
                max_groups: self.max_chart_groups,
            };
            let aggregators = series.aggregators();
            let formatted = if self.use_rayon {
                tokio_rayon::spawn(move || {
                    formatter::format(&grouped, &options, &slices, &aggregators)
                })
                .await
            } else {
                formatter::format(&grouped, &options, &slices, &aggregators)
            };
            if let FormattedData::Chart(entries) = formatted {
                self.cache.put_formatted(job.section_id, &entries).await?;
            }
        }

        let duration_secs = started.elapsed().as_secs_f64().round() as u64;
        self.cache
            .set_last_run_duration(job.section_id, duration_secs)
            .await?;
        event!(Level::INFO, duration_secs, "section loaded");
        Ok(JobOutcome::Completed { duration_secs })
    }
}
