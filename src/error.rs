//! Error handling.

use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// Chartist server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum ChartistError {
    /// Error reading or writing a cache entry
    #[error("cache error {error}")]
    Cache { error: String },

    /// Requested cache entry is empty
    #[error("no cached data for section {section_id}")]
    CacheEmpty { section_id: u64 },

    /// Error writing CSV output
    #[error("failed to write CSV")]
    Csv(#[from] csv::Error),

    /// Caller may not access a section
    #[error("access to section {section_id} is forbidden")]
    Forbidden { section_id: u64 },

    /// A load job panicked
    #[error("load job for section {section_id} panicked")]
    JobPanicked { section_id: u64 },

    /// Error parsing a definition file
    #[error("failed to parse {path}")]
    ParseFile {
        path: String,
        source: serde_json::Error,
    },

    /// The job queue is no longer accepting jobs
    #[error("job queue is closed")]
    QueueClosed,

    /// Error reading a definition file
    #[error("failed to read {path}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Report owning a section does not exist
    #[error("report {report_id} not found")]
    ReportNotFound { report_id: u64 },

    /// Error deserialising path parameters
    #[error("request path is not valid")]
    RequestPathRejection(#[from] PathRejection),

    /// Error deserialising query parameters into SeriesDataQuery
    #[error("request data is not valid")]
    RequestQueryRejection(#[from] QueryRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Section does not exist
    #[error("section {section_id} not found")]
    SectionNotFound { section_id: u64 },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error (de)serialising cached data
    #[error("failed to (de)serialise data")]
    Serialisation(#[from] serde_json::Error),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Missing or invalid caller identity
    #[error("missing or invalid user identity")]
    Unauthorised,
}

impl IntoResponse for ChartistError {
    /// Convert from a `ChartistError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Error raised by a series provider while producing data.
///
/// Provider failures are usually caused by a faulty series definition rather than by the
/// service, so load jobs do not retry them.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ProviderError {
    /// Return a new ProviderError with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Return a new ProviderError wrapping an underlying error.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure of a load job
#[derive(Debug, Error)]
pub enum JobError {
    /// The series provider failed. Not retried.
    #[error("series provider failed")]
    Provider(#[from] ProviderError),

    /// Anything else, such as an unavailable cache. Retried up to the retry limit.
    #[error("load job failed")]
    Infrastructure(#[from] ChartistError),
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 401 unauthorised ErrorResponse
    fn unauthorised<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::UNAUTHORIZED, error)
    }

    /// Return a 403 forbidden ErrorResponse
    fn forbidden<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::FORBIDDEN, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<ChartistError> for ErrorResponse {
    /// Convert from a `ChartistError` into an `ErrorResponse`.
    fn from(error: ChartistError) -> Self {
        let response = match &error {
            // Bad request
            ChartistError::RequestPathRejection(_)
            | ChartistError::RequestQueryRejection(_)
            | ChartistError::RequestDataValidationSingle(_)
            | ChartistError::RequestDataValidation(_) => Self::bad_request(&error),

            // Unauthorised
            ChartistError::Unauthorised => Self::unauthorised(&error),

            // Forbidden
            ChartistError::Forbidden { section_id: _ } => Self::forbidden(&error),

            // Not found
            ChartistError::CacheEmpty { section_id: _ }
            | ChartistError::ReportNotFound { report_id: _ }
            | ChartistError::SectionNotFound { section_id: _ } => Self::not_found(&error),

            // Internal server error
            ChartistError::Cache { error: _ }
            | ChartistError::Csv(_)
            | ChartistError::JobPanicked { section_id: _ }
            | ChartistError::ParseFile { path: _, source: _ }
            | ChartistError::QueueClosed
            | ChartistError::ReadFile { path: _, source: _ }
            | ChartistError::SemaphoreAcquireError(_)
            | ChartistError::Serialisation(_)
            | ChartistError::TryFromInt(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

/// Render a `ChartistError` as a JSON error response.
///
/// Used by middleware that rejects requests before they reach a handler.
pub fn error_response(error: ChartistError) -> Response {
    ErrorResponse::from(error).into_response()
}
