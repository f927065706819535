//! Tracing (logging)

use crate::cli::CommandLineArgs;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initlialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to enable debug
/// logging for this crate and tower_http if not set.
///
/// Spans are also exported to a Jaeger agent when enabled on the command line.
pub fn init_tracing(args: &CommandLineArgs) {
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chartist=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer());
    if args.enable_jaeger {
        match opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name("chartist")
            .install_simple()
        {
            Ok(tracer) => subscriber
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init(),
            Err(err) => {
                subscriber.init();
                tracing::warn!("failed to initialise Jaeger exporter: {err}");
            }
        }
    } else {
        subscriber.init();
    }
}

/// Flush and shut down the tracer provider.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
