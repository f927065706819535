//! Chartist server API

use crate::app_state::{AppState, SharedAppState};
use crate::cli::CommandLineArgs;
use crate::coordinator::{self, HEADER_USER};
use crate::error::{error_response, ChartistError};
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};

use axum::{
    body::Body,
    http::Request,
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;

/// Whether a request carries a non-empty user identity.
fn has_user(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(&HEADER_USER)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| !value.trim().is_empty())
}

/// Returns a [axum::Router] for the Chartist API
///
/// The router is populated with all routes as well as the following middleware:
///
/// * a [tower_http::trace::TraceLayer] for tracing requests and responses, recording metrics
/// * a [tower_http::validate_request::ValidateRequestHeaderLayer] for validating caller identity
///   on `/v1` routes
fn router(state: SharedAppState) -> Router {
    fn v1(state: SharedAppState) -> Router {
        Router::new()
            .route("/series", get(coordinator::list_series))
            .route("/series-data", get(coordinator::series_data))
            .route("/series-data/download", get(coordinator::download))
            .route("/sections/:section_id/cache", delete(coordinator::clear_cache))
            .layer(ValidateRequestHeaderLayer::custom(
                // Validate that a user identity has been provided.
                |request: &mut Request<Body>| {
                    if has_user(request) {
                        Ok(())
                    } else {
                        Err(error_response(ChartistError::Unauthorised))
                    }
                },
            ))
            .with_state(state)
    }

    Router::new()
        .route("/metrics", get(metrics_handler))
        .nest("/v1", v1(state))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(request_counter)
                    .on_response(record_response_metrics),
            ),
        )
}

/// The Chartist service type
///
/// We need to use a specific type to be able to pass the service to axum-server.
pub type Service = NormalizePath<Router>;

/// Returns a [crate::app::Service] for the Chartist server API
///
/// The service is populated with all routes as well as the following middleware:
///
/// * a [tower_http::normalize_path::NormalizePathLayer] for trimming trailing slashes from
///   requests
///
/// Must be called from within a tokio runtime.
pub fn service(args: &CommandLineArgs) -> Result<Service, ChartistError> {
    let state = Arc::new(AppState::new(args)?);
    Ok(service_with_state(state))
}

/// Returns a [crate::app::Service] serving an existing [AppState].
pub fn service_with_state(state: SharedAppState) -> Service {
    // Note that any middleware that should affect routing must wrap the router.
    // See https://docs.rs/axum/0.6.12/axum/middleware/index.html#rewriting-request-uri-in-middleware.
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::{MemoryCache, SectionCache};
    use crate::models::Processing;
    use crate::registry::SeriesRegistry;
    use crate::test_utils::{self, FailingSeries, TestSeries};
    use crate::types::{ChartEntry, ChartRow, GroupedDataset};

    use axum::{
        http::{Method, StatusCode},
        response::Response,
    };
    use clap::Parser;
    use regex::Regex;
    use serde_json::Value;
    use tower::ServiceExt; // for `oneshot` and `ready`

    struct TestApp {
        state: SharedAppState,
        series: TestSeries,
        gate: Arc<tokio::sync::Semaphore>,
    }

    impl TestApp {
        fn new() -> Self {
            let args = CommandLineArgs::parse_from(["chartist", "--max-chart-groups", "3"]);
            let (series, gate) = TestSeries::gated();
            let mut registry = SeriesRegistry::new();
            registry.register(series.clone());
            registry.register(FailingSeries);
            let state = Arc::new(AppState::from_parts(
                &args,
                Arc::new(MemoryCache::new()),
                registry,
                Arc::new(test_utils::test_sections()),
            ));
            Self {
                state,
                series,
                gate,
            }
        }

        fn cache(&self) -> &SectionCache {
            &self.state.cache
        }

        async fn request(
            &self,
            method: Method,
            uri: &str,
            user: Option<&str>,
            client: Option<&str>,
        ) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                builder = builder.header(&HEADER_USER, user);
            }
            if let Some(client) = client {
                builder = builder.header(&coordinator::HEADER_CLIENT, client);
            }
            service_with_state(self.state.clone())
                .oneshot(builder.body(Body::empty()).unwrap())
                .await
                .unwrap()
        }

        async fn get(&self, uri: &str) -> Response {
            self.request(Method::GET, uri, Some("user"), None).await
        }

        /// Release the series and wait for every queued job to finish.
        async fn finish_jobs(&self) {
            self.gate.add_permits(100);
            let jobs = self.state.jobs.clone();
            test_utils::wait_until(move || jobs.in_flight_count() == 0).await;
        }
    }

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    const BAR_URI: &str = "/v1/series-data?section_id=2&series=Test%20Series&format=bar";
    const TABLE_URI: &str = "/v1/series-data?section_id=1&series=Test%20Series&format=table";

    #[tokio::test]
    async fn metrics() {
        let app = TestApp::new();
        let response = app.request(Method::GET, "/metrics", None, None).await;
        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn missing_identity() {
        let app = TestApp::new();
        let response = app.request(Method::GET, BAR_URI, None, None).await;
        assert_eq!(StatusCode::UNAUTHORIZED, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r".*missing or invalid user identity.*").unwrap();
        assert!(re.is_match(&body[..]), "body: {body}");

        let response = app.request(Method::GET, BAR_URI, Some(" "), None).await;
        assert_eq!(StatusCode::UNAUTHORIZED, response.status());
    }

    #[tokio::test]
    async fn invalid_query() {
        let app = TestApp::new();
        let response = app
            .get("/v1/series-data?section_id=2&series=Test%20Series&format=radar")
            .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());

        let response = app
            .get("/v1/series-data?section_id=2&series=&format=bar")
            .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r".*series must not be empty.*").unwrap();
        assert!(re.is_match(&body[..]), "body: {body}");

        let response = app.get("/v1/series-data?series=Test%20Series&format=bar").await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert_eq!(0, app.state.jobs.in_flight_count());
    }

    #[tokio::test]
    async fn unknown_section_and_report() {
        let app = TestApp::new();
        let response = app
            .get("/v1/series-data?section_id=42&series=Test%20Series&format=bar")
            .await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());

        let response = app
            .get("/v1/series-data?section_id=5&series=Test%20Series&format=bar")
            .await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r".*report 99 not found.*").unwrap();
        assert!(re.is_match(&body[..]), "body: {body}");
    }

    #[tokio::test]
    async fn client_scope() {
        let app = TestApp::new();
        let uri = "/v1/series-data?section_id=3&series=Test%20Series&format=pie";
        let response = app.request(Method::GET, uri, Some("user"), None).await;
        assert_eq!(StatusCode::FORBIDDEN, response.status());
        let response = app
            .request(Method::GET, uri, Some("user"), Some("other"))
            .await;
        assert_eq!(StatusCode::FORBIDDEN, response.status());
        assert_eq!(0, app.state.jobs.in_flight_count());

        let response = app.request(Method::GET, uri, Some("user"), Some("acme")).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
    }

    #[tokio::test]
    async fn chart_is_processed_then_served() {
        let app = TestApp::new();
        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
        let processing: Processing = body_json(response).await;
        assert_eq!(300, processing.estimated_time);

        // Polling while the job runs does not dispatch another.
        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
        let series = app.series.clone();
        test_utils::wait_until(move || series.calls() == 1).await;
        assert!(app.cache().is_running(2).await.unwrap());
        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());

        app.finish_jobs().await;
        assert_eq!(1, app.series.calls());
        assert!(!app.cache().is_running(2).await.unwrap());

        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::OK, response.status());
        let body: Value = body_json(response).await;
        assert_eq!(
            serde_json::json!([
                {"name": "Jan", "CA": 100.0, "NY": 200.0, "TX": 0.0, "FL": 0.0},
                {"name": "Feb", "CA": 0.0, "NY": 0.0, "TX": 150.0, "FL": 250.0},
            ]),
            body
        );
    }

    #[tokio::test]
    async fn table_is_served_from_raw_data() {
        let app = TestApp::new();
        let mut grouped = GroupedDataset::new();
        for row in test_utils::test_rows() {
            grouped.push("All".to_string(), row);
        }
        grouped.push("All".to_string(), Default::default());
        app.cache().put_raw(1, &grouped).await.unwrap();

        let response = app.get(TABLE_URI).await;
        assert_eq!(StatusCode::OK, response.status());
        let body: GroupedDataset = body_json(response).await;
        assert_eq!(4, body.row_count());
        assert_eq!(0, app.state.jobs.in_flight_count());
    }

    #[tokio::test]
    async fn chart_is_not_formatted_on_request() {
        let app = TestApp::new();
        app.cache()
            .put_raw(2, &GroupedDataset::all(test_utils::test_rows()))
            .await
            .unwrap();
        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
        assert_eq!(1, app.state.jobs.in_flight_count());
        app.finish_jobs().await;
    }

    #[tokio::test]
    async fn estimated_time_is_the_last_duration() {
        let app = TestApp::new();
        app.cache().set_last_run_duration(2, 42).await.unwrap();
        app.cache().set_running(2, true).await.unwrap();
        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
        let processing: Processing = body_json(response).await;
        assert_eq!(42, processing.estimated_time);
        // A running section gets no further jobs.
        assert_eq!(0, app.state.jobs.in_flight_count());
    }

    #[tokio::test]
    async fn force_refresh_discards_cached_data() {
        let app = TestApp::new();
        let stale = vec![ChartEntry::Row(ChartRow::value("stale", 1.0))];
        app.cache().put_formatted(2, &stale).await.unwrap();
        let response = app.get(BAR_URI).await;
        assert_eq!(StatusCode::OK, response.status());

        let response = app.get(&format!("{BAR_URI}&force_refresh=true")).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
        assert_eq!(None, app.cache().get_formatted(2).await.unwrap());
        app.finish_jobs().await;
    }

    #[tokio::test]
    async fn truncated_chart() {
        let app = TestApp::new();
        let uri = "/v1/series-data?section_id=2&series=Test%20Series&format=bar&xaxis_slice=State&slice=None";
        app.get(uri).await;
        app.finish_jobs().await;
        let response = app.get(uri).await;
        assert_eq!(StatusCode::OK, response.status());
        let body: Value = body_json(response).await;
        assert_eq!(
            serde_json::json!([
                {"name": "CA", "value": 100.0},
                {"name": "NY", "value": 200.0},
                {"name": "TX", "value": 150.0},
                {"_meta": "truncated", "_total": 4, "_shown": 3},
            ]),
            body
        );
    }

    #[tokio::test]
    async fn unregistered_series_stays_processing() {
        let app = TestApp::new();
        let uri = "/v1/series-data?section_id=4&series=Missing%20Series&format=pie";
        app.get(uri).await;
        app.finish_jobs().await;
        assert!(!app.cache().is_running(4).await.unwrap());
        let response = app.get(uri).await;
        assert_eq!(StatusCode::ACCEPTED, response.status());
        app.finish_jobs().await;
    }

    #[tokio::test]
    async fn download_chart() {
        let app = TestApp::new();
        let response = app
            .get("/v1/series-data/download?section_id=2&series=Test%20Series&format=bar")
            .await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());
        assert_eq!(0, app.state.jobs.in_flight_count());

        let entries = vec![
            ChartEntry::Row(ChartRow::value("Jan", 1234.0)),
            ChartEntry::Row(ChartRow::value("Feb", 0.5)),
        ];
        app.cache().put_formatted(2, &entries).await.unwrap();
        let response = app
            .get("/v1/series-data/download?section_id=2&series=Test%20Series&format=bar")
            .await;
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(
            "text/csv; charset=utf-8",
            response.headers()["content-type"].to_str().unwrap()
        );
        assert_eq!(
            "attachment; filename=\"section-2-bar.csv\"",
            response.headers()["content-disposition"].to_str().unwrap()
        );
        let body = body_string(response).await;
        assert_eq!("\u{feff}name,value\nJan,\"1,234\"\nFeb,0.50\n", body);
    }

    #[tokio::test]
    async fn download_table() {
        let app = TestApp::new();
        app.cache()
            .put_raw(1, &GroupedDataset::all(test_utils::test_rows()))
            .await
            .unwrap();
        let response = app
            .get("/v1/series-data/download?section_id=1&series=Test%20Series&format=table")
            .await;
        assert_eq!(StatusCode::OK, response.status());
        let body = body_string(response).await;
        let mut lines = body.trim_start_matches('\u{feff}').lines();
        assert_eq!(Some("key,name,state,month,dob,value"), lines.next());
        assert_eq!(Some("All,Test 1,CA,Jan,1980-01-01,100"), lines.next());
    }

    #[tokio::test]
    async fn list_series() {
        let app = TestApp::new();
        let response = app.get("/v1/series/").await;
        assert_eq!(StatusCode::OK, response.status());
        let body: Value = body_json(response).await;
        assert_eq!("Test Series", body[0]["name"]);
        assert_eq!(serde_json::json!(["State", "Month"]), body[0]["slices"]);
        assert_eq!("Failing Series", body[1]["name"]);
    }

    #[tokio::test]
    async fn clear_cache() {
        let app = TestApp::new();
        app.cache()
            .put_raw(1, &GroupedDataset::all(test_utils::test_rows()))
            .await
            .unwrap();
        app.cache().set_last_run_duration(1, 3).await.unwrap();
        let response = app
            .request(Method::DELETE, "/v1/sections/1/cache", Some("user"), None)
            .await;
        assert_eq!(StatusCode::NO_CONTENT, response.status());
        assert_eq!(None, app.cache().get_raw(1).await.unwrap());
        assert_eq!(None, app.cache().last_run_duration(1).await.unwrap());

        let response = app
            .request(Method::DELETE, "/v1/sections/abc/cache", Some("user"), None)
            .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());

        let response = app
            .request(Method::DELETE, "/v1/sections/3/cache", Some("user"), None)
            .await;
        assert_eq!(StatusCode::FORBIDDEN, response.status());
    }
}
