//! Command Line Interface (CLI) arguments.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Where section data is cached
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CacheBackendKind {
    /// In process memory, lost on restart
    Memory,
    /// On local disk
    Disk,
}

/// Chartist command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "CHARTIST_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "CHARTIST_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "CHARTIST_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/chartist/certs/cert.pem",
        env = "CHARTIST_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/chartist/certs/key.pem",
        env = "CHARTIST_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "CHARTIST_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "CHARTIST_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Whether to use Rayon for chart formatting.
    #[arg(long, default_value_t = false, env = "CHARTIST_USE_RAYON")]
    pub use_rayon: bool,
    /// Where to cache section data
    #[arg(long, value_enum, default_value_t = CacheBackendKind::Memory, env = "CHARTIST_CACHE_BACKEND")]
    pub cache_backend: CacheBackendKind,
    /// Directory of the disk cache
    #[arg(
        long,
        default_value = "~/.cache/chartist",
        env = "CHARTIST_CACHE_PATH"
    )]
    pub cache_path: String,
    /// Time to live in seconds of cached section data
    #[arg(long, default_value_t = 14 * 24 * 60 * 60, env = "CHARTIST_DATA_TTL")]
    pub data_ttl: u64,
    /// Time to live in seconds of the running flag of a section
    #[arg(long, default_value_t = 30 * 60, env = "CHARTIST_RUNNING_TTL")]
    pub running_ttl: u64,
    /// Window in seconds within which repeated loads of a section are collapsed into one
    #[arg(long, default_value_t = 300, env = "CHARTIST_DEDUP_WINDOW")]
    pub dedup_window: u64,
    /// Estimated load time in seconds reported before any load of a section has completed
    #[arg(long, default_value_t = 300, env = "CHARTIST_DEFAULT_ESTIMATED_TIME")]
    pub default_estimated_time: u64,
    /// Maximum number of groups in chart data. 0 disables truncation.
    #[arg(long, default_value_t = 100, env = "CHARTIST_MAX_CHART_GROUPS")]
    pub max_chart_groups: usize,
    /// Maximum number of load jobs running at once. Defaults to the number of CPUs less one.
    #[arg(long, env = "CHARTIST_JOB_CONCURRENCY")]
    pub job_concurrency: Option<usize>,
    /// Number of times a load job failing for reasons other than its series is retried
    #[arg(long, default_value_t = 1, env = "CHARTIST_JOB_MAX_RETRIES")]
    pub job_max_retries: u32,
    /// JSON file of the reports and sections to serve
    #[arg(long, env = "CHARTIST_SECTIONS_FILE")]
    pub sections_file: Option<PathBuf>,
    /// JSON series definition file. May be repeated.
    #[arg(long = "series-file", env = "CHARTIST_SERIES_FILES", value_delimiter = ',')]
    pub series_files: Vec<PathBuf>,
}

impl CommandLineArgs {
    /// Maximum number of chart groups, if limited.
    pub fn max_chart_groups(&self) -> Option<usize> {
        Some(self.max_chart_groups).filter(|max| *max > 0)
    }

    pub fn data_ttl(&self) -> Duration {
        Duration::from_secs(self.data_ttl)
    }

    pub fn running_ttl(&self) -> Duration {
        Duration::from_secs(self.running_ttl)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window)
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
