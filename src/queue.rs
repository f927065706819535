//! Background job queue
//!
//! Load jobs are sent over an unbounded channel to a dispatcher task, which runs each job in its
//! own task once the [ResourceManager] grants a job permit. A job is identified by its
//! deduplication token. At most one job per section is in flight: while a section's job is
//! queued or running, further jobs for that section are dropped, whatever their token.

use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::{event, Instrument, Level};

use crate::error::{ChartistError, JobError};
use crate::job::{JobOutcome, LoadSectionJob, SectionLoader};
use crate::metrics::{JOBS_DEDUPLICATED, JOBS_DISPATCHED, JOB_DURATION, JOB_OUTCOMES};
use crate::resource_manager::ResourceManager;

/// Result of a dispatch
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// The job was queued
    Queued { token: String },
    /// A job for the same section is in flight under `token`. Nothing was queued.
    Duplicate { token: String },
}

struct QueuedJob {
    token: String,
    job: LoadSectionJob,
}

/// Token of the queued or running job of each section
type InFlight = Arc<Mutex<HashMap<u64, String>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<u64, String>> {
    // The set is never left half updated, so a poisoned lock is still usable.
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Handle for dispatching load jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    in_flight: InFlight,
    dedup_window: Duration,
}

impl JobQueue {
    /// Start the dispatcher task and return a handle to its queue.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `loader`: Runs the jobs
    /// * `resource_manager`: Limits the number of jobs running at once
    /// * `max_retries`: Number of retries of a job failing with an infrastructure error
    /// * `dedup_window`: Width of the deduplication window
    pub fn start(
        loader: SectionLoader,
        resource_manager: ResourceManager,
        max_retries: u32,
        dedup_window: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let in_flight = InFlight::default();
        let worker = Arc::new(Worker {
            loader,
            resource_manager,
            max_retries,
            in_flight: in_flight.clone(),
        });
        tokio::spawn(dispatch_loop(receiver, worker));
        Self {
            sender,
            in_flight,
            dedup_window,
        }
    }

    /// Queue a job unless a job for the same section is already in flight.
    pub fn dispatch(&self, job: LoadSectionJob) -> Result<Dispatch, ChartistError> {
        self.dispatch_at(job, unix_now())
    }

    /// Queue a job as if dispatched at `now` seconds since the unix epoch.
    pub fn dispatch_at(&self, job: LoadSectionJob, now: u64) -> Result<Dispatch, ChartistError> {
        let section_id = job.section_id;
        let token = job.unique_id(now, self.dedup_window.as_secs());
        {
            let mut in_flight = lock(&self.in_flight);
            if let Some(running) = in_flight.get(&section_id) {
                let token = running.clone();
                JOBS_DEDUPLICATED.inc();
                event!(Level::DEBUG, %token, "load job already in flight");
                return Ok(Dispatch::Duplicate { token });
            }
            in_flight.insert(section_id, token.clone());
        }
        let queued = QueuedJob {
            token: token.clone(),
            job,
        };
        if self.sender.send(queued).is_err() {
            lock(&self.in_flight).remove(&section_id);
            return Err(ChartistError::QueueClosed);
        }
        JOBS_DISPATCHED.inc();
        event!(Level::DEBUG, %token, "load job queued");
        Ok(Dispatch::Queued { token })
    }

    /// Whether a job with this token is queued or running.
    pub fn is_in_flight(&self, token: &str) -> bool {
        lock(&self.in_flight).values().any(|queued| queued == token)
    }

    /// Number of jobs queued or running.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

async fn dispatch_loop(mut receiver: mpsc::UnboundedReceiver<QueuedJob>, worker: Arc<Worker>) {
    while let Some(queued) = receiver.recv().await {
        let worker = worker.clone();
        tokio::spawn(async move { worker.process(queued).await });
    }
    event!(Level::DEBUG, "job queue closed");
}

struct Worker {
    loader: SectionLoader,
    resource_manager: ResourceManager,
    max_retries: u32,
    in_flight: InFlight,
}

impl Worker {
    #[tracing::instrument(level = "DEBUG", skip(self, queued), fields(token = %queued.token))]
    async fn process(&self, queued: QueuedJob) {
        let QueuedJob { token, job } = queued;
        let section_id = job.section_id;
        match self.resource_manager.job().await {
            Ok(_permit) => self.run_with_retries(job).await,
            Err(err) => event!(Level::ERROR, "failed to acquire job permit: {err}"),
        }
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(&section_id) == Some(&token) {
            in_flight.remove(&section_id);
        }
    }

    async fn run_with_retries(&self, job: LoadSectionJob) {
        let job = Arc::new(job);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let timer = JOB_DURATION.with_label_values(&[]).start_timer();
            let result = self.attempt(job.clone()).await;
            timer.observe_duration();
            match result {
                Ok(outcome) => {
                    record_outcome(&outcome.to_string());
                    if let JobOutcome::SeriesNotFound = outcome {
                        event!(Level::WARN, series = %job.series, "load job skipped");
                    }
                    return;
                }
                Err(err) if attempt <= self.max_retries => {
                    record_outcome("infrastructure_error");
                    event!(Level::WARN, attempt, "load job failed, retrying: {err}");
                }
                Err(err) => {
                    record_outcome("infrastructure_error");
                    record_outcome("failed_permanently");
                    log_failure(&err);
                    return;
                }
            }
        }
    }

    /// Run one attempt of a job in its own task, turning a panic into an error.
    async fn attempt(&self, job: Arc<LoadSectionJob>) -> Result<JobOutcome, JobError> {
        let loader = self.loader.clone();
        let task_job = job.clone();
        let handle = tokio::spawn(
            async move { loader.run(&task_job).await }.instrument(tracing::Span::current()),
        );
        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                event!(Level::ERROR, "load job panicked: {join_error}");
                if let Err(err) = self.loader.cache().set_running(job.section_id, false).await {
                    event!(Level::ERROR, "failed to clear running flag: {err}");
                }
                Err(ChartistError::JobPanicked {
                    section_id: job.section_id,
                }
                .into())
            }
        }
    }
}

fn record_outcome(outcome: &str) {
    JOB_OUTCOMES.with_label_values(&[outcome]).inc();
}

fn log_failure(err: &JobError) {
    event!(Level::ERROR, "load job failed permanently: {err}");
    let mut current = err.source();
    while let Some(source) = current {
        event!(Level::ERROR, "Caused by: {}", source.to_string());
        current = source.source();
    }
}
