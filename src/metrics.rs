use axum::{body::Body, http::Request, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use tracing::Span;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Simple request counter
    pub static ref INCOMING_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("incoming_requests", "The number of HTTP requests received"),
        &["http_method"]
    ).unwrap();
    // Request counter by status code
    pub static ref RESPONSE_CODE_COLLECTOR: IntCounterVec = IntCounterVec::new(
        Opts::new("outgoing_response", "The number of responses sent."),
        &["status_code"]
    ).unwrap();
    // Request histogram by response time
    pub static ref RESPONSE_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("response_time", "The time taken to respond to each request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(), // Change buckets here if desired
        },
        &[],
    ).unwrap();
    // Load jobs accepted by the job queue
    pub static ref JOBS_DISPATCHED: IntCounter = IntCounter::new(
        "jobs_dispatched", "The number of load jobs queued"
    ).unwrap();
    // Load jobs dropped because an identical job was in flight
    pub static ref JOBS_DEDUPLICATED: IntCounter = IntCounter::new(
        "jobs_deduplicated", "The number of load jobs dropped as duplicates"
    ).unwrap();
    // Load job attempts by outcome
    pub static ref JOB_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("job_outcomes", "The number of load job attempts by outcome"),
        &["outcome"]
    ).unwrap();
    // Load job histogram by run time
    pub static ref JOB_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("job_duration", "The time taken by each load job attempt"),
            buckets: vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0],
        },
        &[],
    ).unwrap();
    // Cache lookups by entry kind and result
    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookups", "The number of section cache lookups"),
        &["kind", "result"]
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(INCOMING_REQUESTS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RESPONSE_CODE_COLLECTOR.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RESPONSE_TIME_COLLECTOR.clone()))
        .unwrap();
    REGISTRY.register(Box::new(JOBS_DISPATCHED.clone())).unwrap();
    REGISTRY
        .register(Box::new(JOBS_DEDUPLICATED.clone()))
        .unwrap();
    REGISTRY.register(Box::new(JOB_OUTCOMES.clone())).unwrap();
    REGISTRY.register(Box::new(JOB_DURATION.clone())).unwrap();
    REGISTRY.register(Box::new(CACHE_LOOKUPS.clone())).unwrap();
}

pub async fn metrics_handler() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    encoder.encode(&REGISTRY.gather(), &mut buffer).unwrap();

    String::from_utf8_lossy(&buffer).into_owned()
}

/// Increments the prometheus counter on all incoming requests, labelled by http method
pub fn request_counter(request: &Request<Body>, _span: &Span) {
    INCOMING_REQUESTS
        .with_label_values(&[&request.method().to_string().to_ascii_uppercase()])
        .inc();
}

/// Increment the prometheus counter on all outgoing responses, labelled by status code
pub fn record_response_metrics<B>(
    response: &Response<B>,
    latency: std::time::Duration,
    _span: &Span,
) {
    RESPONSE_CODE_COLLECTOR
        .with_label_values(&[response.status().as_str()])
        .inc();

    RESPONSE_TIME_COLLECTOR
        .with_label_values(&[])
        .observe(latency.as_secs_f64());
}

/// Count a section cache lookup, labelled by entry kind and hit or miss
pub fn record_cache_lookup(kind: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS.with_label_values(&[kind, result]).inc();
}
