use crate::cache::{self, CacheBackend, DiskCache, MemoryCache, SectionCache};
use crate::cli::{CacheBackendKind, CommandLineArgs};
use crate::error::ChartistError;
use crate::job::SectionLoader;
use crate::queue::JobQueue;
use crate::registry::SeriesRegistry;
use crate::resource_manager::ResourceManager;
use crate::sections::{SectionStore, StaticSectionStore};

use expanduser::expanduser;
use std::sync::Arc;
use std::time::Duration;

/// How often expired cache entries are purged.
const PRUNE_PERIOD: Duration = Duration::from_secs(60);

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Section cache.
    pub cache: SectionCache,

    /// Registered series.
    pub registry: SeriesRegistry,

    /// Reports and sections.
    pub sections: Arc<dyn SectionStore>,

    /// Load job queue.
    pub jobs: JobQueue,
}

impl AppState {
    /// Create and return an [AppState] configured from the command line.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(args: &CommandLineArgs) -> Result<Self, ChartistError> {
        let backend: Arc<dyn CacheBackend> = match args.cache_backend {
            CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
            CacheBackendKind::Disk => {
                let path = expanduser(&args.cache_path).map_err(|source| {
                    ChartistError::ReadFile {
                        path: args.cache_path.clone(),
                        source,
                    }
                })?;
                Arc::new(DiskCache::new(&path, args.data_ttl())?)
            }
        };
        cache::spawn_pruning(backend.clone(), PRUNE_PERIOD);
        let registry = SeriesRegistry::from_files(&args.series_files)?;
        let sections = match &args.sections_file {
            Some(path) => StaticSectionStore::from_path(path)?,
            None => StaticSectionStore::default(),
        };
        Ok(Self::from_parts(args, backend, registry, Arc::new(sections)))
    }

    /// Create and return an [AppState] from its collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_parts(
        args: &CommandLineArgs,
        backend: Arc<dyn CacheBackend>,
        registry: SeriesRegistry,
        sections: Arc<dyn SectionStore>,
    ) -> Self {
        let cache = SectionCache::new(backend, args.data_ttl(), args.running_ttl());
        let job_limit = args
            .job_concurrency
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let loader = SectionLoader::new(
            cache.clone(),
            registry.clone(),
            args.max_chart_groups(),
            args.use_rayon,
        );
        let jobs = JobQueue::start(
            loader,
            ResourceManager::new(job_limit),
            args.job_max_retries,
            args.dedup_window(),
        );

        Self {
            args: args.clone(),
            cache,
            registry,
            sections,
            jobs,
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
