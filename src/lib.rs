//! This crate provides Chartist, a server materialising series data for report sections and
//! formatting it for tables and charts.
//!
//! A section renders one series: a pluggable source of tabular rows offering named slices,
//! filters and aggregators. Loading a section can take minutes, so it never happens on the
//! request path. Requests read the section cache, and on a miss a background load job is
//! dispatched while the caller is told how long to wait.
//!
//! The pipeline of a load job is:
//!
//! * the [series provider](series::SeriesProvider) returns the filtered rows
//! * the [grouping engine](grouping) partitions them by the primary slice
//! * the [chart formatter](formatter) turns the groups into chart rows, with sub-slice backfill,
//!   percentages and truncation
//! * both the groups and the chart rows are written to the [section cache](cache::SectionCache)
//!
//! At most one load job per section runs at a time: a running flag is held in the cache for the
//! duration of a job, and the [job queue](queue::JobQueue) drops jobs whose deduplication token
//! is already in flight.
//!
//! Chartist is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request, response and cache data.
//! * [cached] provides the persistent disk cache backend.

pub mod app;
pub mod app_state;
pub mod cache;
pub mod cli;
pub mod coordinator;
pub mod csv_export;
pub mod error;
pub mod formatter;
pub mod grouping;
pub mod job;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod registry;
pub mod resource_manager;
pub mod sections;
pub mod series;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
pub mod validated_query;
