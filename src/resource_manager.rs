//! Resource management

use crate::error::ChartistError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] limits the load jobs running at once.
/// Resource management is performed using a Tokio Semaphore.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for load jobs.
    jobs: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(job_limit: Option<usize>) -> Self {
        Self {
            jobs: job_limit.map(Semaphore::new),
        }
    }

    /// Acquire a load job resource.
    pub async fn job(&self) -> Result<Option<SemaphorePermit>, ChartistError> {
        optional_acquire(&self.jobs, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, ChartistError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
