//! This file defines the chartist binary entry point.

use chartist::app;
use chartist::cli;
use chartist::metrics;
use chartist::server;
use chartist::tracing;

use std::process::exit;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    ::tracing::debug!("{:?}", args);
    metrics::register_metrics();
    let service = match app::service(&args) {
        Ok(service) => service,
        Err(err) => {
            ::tracing::error!("failed to start: {err}");
            let mut current = std::error::Error::source(&err);
            while let Some(source) = current {
                ::tracing::error!("Caused by: {source}");
                current = source.source();
            }
            tracing::shutdown_tracing();
            exit(1)
        }
    };
    server::serve(&args, service).await;
    tracing::shutdown_tracing();
}
