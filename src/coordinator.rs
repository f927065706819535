//! Request handlers
//!
//! Handlers only ever read the section cache. When the data of a section is missing, a load job
//! is dispatched and the caller is asked to come back later.

use async_trait::async_trait;
use axum::{
    extract::{rejection::PathRejection, FromRequestParts, Path, State},
    http::{header::HeaderName, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{event, Level};

use crate::app_state::SharedAppState;
use crate::csv_export::{self, CsvTable};
use crate::error::ChartistError;
use crate::job::{resolve_slices, LoadSectionJob};
use crate::models::{non_empty, Format, Processing, SeriesDataQuery, UserContext};
use crate::queue::Dispatch;
use crate::registry::SeriesDescription;
use crate::sections::Section;
use crate::series::FilterBag;
use crate::types::{ChartEntry, GroupedDataset};
use crate::validated_query::ValidatedQuery;

/// Header carrying the id of the calling user
pub static HEADER_USER: HeaderName = HeaderName::from_static("x-chartist-user");
/// Header carrying the client scope of the calling user
pub static HEADER_CLIENT: HeaderName = HeaderName::from_static("x-chartist-client");

const PROCESSING_MESSAGE: &str = "Data is being processed, please retry shortly";

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = ChartistError;

    /// Extract the caller identity set by the authenticating proxy.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(String::from)
        };
        let user_id = header(&HEADER_USER).ok_or(ChartistError::Unauthorised)?;
        Ok(UserContext {
            user_id,
            client_id: header(&HEADER_CLIENT),
        })
    }
}

/// Response of the series data endpoint
#[derive(Debug, PartialEq)]
pub enum SeriesDataResponse {
    Table(GroupedDataset),
    Chart(Vec<ChartEntry>),
    /// The data is being computed
    Processing(Processing),
}

impl IntoResponse for SeriesDataResponse {
    fn into_response(self) -> Response {
        match self {
            SeriesDataResponse::Table(grouped) => Json(grouped).into_response(),
            SeriesDataResponse::Chart(entries) => Json(entries).into_response(),
            SeriesDataResponse::Processing(processing) => {
                (StatusCode::ACCEPTED, Json(processing)).into_response()
            }
        }
    }
}

/// Return a section the caller may access.
async fn authorised_section(
    state: &SharedAppState,
    section_id: u64,
    user: &UserContext,
) -> Result<Section, ChartistError> {
    let section = state
        .sections
        .section(section_id)
        .await?
        .ok_or(ChartistError::SectionNotFound { section_id })?;
    let report = state
        .sections
        .report(section.report_id)
        .await?
        .ok_or(ChartistError::ReportNotFound {
            report_id: section.report_id,
        })?;
    match &report.client_id {
        Some(client_id) if user.client_id.as_ref() != Some(client_id) => {
            Err(ChartistError::Forbidden { section_id })
        }
        _ => Ok(section),
    }
}

/// Build the load job of a request. Query parameters override the section configuration.
pub fn load_job(section: &Section, query: &SeriesDataQuery, user: &UserContext) -> LoadSectionJob {
    let slice = non_empty(query.slice.as_deref()).or(non_empty(section.slice.as_deref()));
    let xaxis_slice =
        non_empty(query.xaxis_slice.as_deref()).or(non_empty(section.xaxis_slice.as_deref()));
    let (slice, chart_slice) = resolve_slices(query.format, slice, xaxis_slice);
    let filters = query.filters.as_deref().unwrap_or(&section.filters);
    let aggregator = non_empty(query.aggregator.as_deref()).unwrap_or(&section.aggregator);
    LoadSectionJob {
        section_id: section.id,
        series: query.series.clone(),
        filters: FilterBag::from_specs(filters, slice.as_deref()),
        slice,
        user: Some(user.clone()),
        format: query.format,
        aggregator: aggregator.to_string(),
        chart_slice,
        percentage_mode: query.percentage_mode.unwrap_or(section.percentage_mode),
    }
}

/// Dispatch a load job unless one is running, and tell the caller how long to wait.
async fn processing(
    state: &SharedAppState,
    job: LoadSectionJob,
) -> Result<Processing, ChartistError> {
    let section_id = job.section_id;
    if state.cache.is_running(section_id).await? {
        event!(Level::DEBUG, section_id, "load job already running");
    } else if let Dispatch::Duplicate { token } = state.jobs.dispatch(job)? {
        event!(Level::DEBUG, section_id, %token, "load job already queued");
    }
    let estimated_time = state
        .cache
        .last_run_duration(section_id)
        .await?
        .unwrap_or(state.args.default_estimated_time);
    Ok(Processing {
        message: PROCESSING_MESSAGE.to_string(),
        estimated_time,
    })
}

/// Handler for the series data endpoint
///
/// Responds with cached data, or with 202 while a load job computes it.
#[tracing::instrument(level = "DEBUG", skip(state, user))]
pub async fn series_data(
    State(state): State<SharedAppState>,
    ValidatedQuery(query): ValidatedQuery<SeriesDataQuery>,
    user: UserContext,
) -> Result<SeriesDataResponse, ChartistError> {
    let section = authorised_section(&state, query.section_id, &user).await?;
    if query.force_refresh {
        state.cache.clear_section(section.id).await?;
    }
    match query.format {
        Format::Table => {
            if let Some(grouped) = state.cache.get_raw(section.id).await? {
                return Ok(SeriesDataResponse::Table(grouped.without_empty_rows()));
            }
        }
        Format::Pie | Format::Line | Format::Bar => {
            if let Some(entries) = state.cache.get_formatted(section.id).await? {
                return Ok(SeriesDataResponse::Chart(entries));
            }
        }
    }
    let job = load_job(&section, &query, &user);
    Ok(SeriesDataResponse::Processing(
        processing(&state, job).await?,
    ))
}

/// Handler for the CSV download endpoint
///
/// Never dispatches a load job.
#[tracing::instrument(level = "DEBUG", skip(state, user))]
pub async fn download(
    State(state): State<SharedAppState>,
    ValidatedQuery(query): ValidatedQuery<SeriesDataQuery>,
    user: UserContext,
) -> Result<Response, ChartistError> {
    let section = authorised_section(&state, query.section_id, &user).await?;
    let section_id = section.id;
    let table = match query.format {
        Format::Table => {
            let grouped = state
                .cache
                .get_raw(section_id)
                .await?
                .ok_or(ChartistError::CacheEmpty { section_id })?;
            CsvTable::from_grouped(&grouped)
        }
        Format::Pie | Format::Line | Format::Bar => {
            let entries = state
                .cache
                .get_formatted(section_id)
                .await?
                .ok_or(ChartistError::CacheEmpty { section_id })?;
            CsvTable::from_chart(&entries)
        }
    };
    let chunks = table.to_chunks()?;
    let filename = format!("section-{section_id}-{}.csv", query.format);
    Ok(csv_export::attachment(&filename, chunks))
}

/// Handler listing the registered series
pub async fn list_series(State(state): State<SharedAppState>) -> Json<Vec<SeriesDescription>> {
    Json(state.registry.describe())
}

/// Handler clearing the cache of a section
#[tracing::instrument(level = "DEBUG", skip(state, user))]
pub async fn clear_cache(
    State(state): State<SharedAppState>,
    path: Result<Path<u64>, PathRejection>,
    user: UserContext,
) -> Result<StatusCode, ChartistError> {
    let Path(section_id) = path?;
    let section = authorised_section(&state, section_id, &user).await?;
    state.cache.clear_section(section.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
