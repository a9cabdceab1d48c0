//! Job host: persists reindex state between ticks and requeues finished jobs

use crate::indexing::error::{IndexingError, IndexingResult};
use crate::indexing::job::{ReindexJob, ReindexJobState};
use crate::metrics::REINDEX_JOBS_COMPLETED_TOTAL;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;
use tracing::{debug, error, info, warn};

const STATE_TREE: &str = "reindex_jobs";
const STATE_KEY: &[u8] = b"current";

/// The job slot as persisted between ticks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueuedJob {
    /// A fresh job starts at or after `start_after`
    Pending { start_after: DateTime<Utc> },
    /// A job in progress
    Active { state: ReindexJobState },
}

/// What a tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The next job is not due yet
    Waiting { start_after: DateTime<Utc> },
    /// Another tick is still running
    Busy,
    /// A batch was processed and the job continues
    Progressed { current_step: u64, total_steps: u64 },
    /// The job finished and a successor was queued
    Completed { next_start: DateTime<Utc> },
}

/// Persists the job slot between ticks
#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn load(&self) -> IndexingResult<Option<QueuedJob>>;
    async fn save(&self, job: &QueuedJob) -> IndexingResult<()>;
}

/// Job state kept in memory, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slot: Mutex<Option<QueuedJob>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStateStore for MemoryStateStore {
    async fn load(&self) -> IndexingResult<Option<QueuedJob>> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, job: &QueuedJob) -> IndexingResult<()> {
        *self.slot.lock() = Some(job.clone());
        Ok(())
    }
}

/// Job state persisted in a sled database
#[derive(Clone)]
pub struct SledStateStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> IndexingResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            IndexingError::Storage(format!("Failed to open state database: {}", e))
        })?;
        let tree = db.open_tree(STATE_TREE)?;

        info!(path = %path.display(), "Opened reindex state store");
        Ok(Self { db, tree })
    }
}

#[async_trait]
impl JobStateStore for SledStateStore {
    async fn load(&self) -> IndexingResult<Option<QueuedJob>> {
        match self.tree.get(STATE_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, job: &QueuedJob) -> IndexingResult<()> {
        let bytes = serde_json::to_vec(job)?;
        self.tree.insert(STATE_KEY, bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Drives a [`ReindexJob`] one tick at a time
pub struct JobHost {
    job: ReindexJob,
    store: Arc<dyn JobStateStore>,
    locales: Vec<String>,
    requeue_delay: Duration,
    tick_lock: tokio::sync::Mutex<()>,
}

impl JobHost {
    pub fn new(job: ReindexJob, store: Arc<dyn JobStateStore>) -> Self {
        Self {
            job,
            store,
            locales: Vec::new(),
            requeue_delay: Duration::seconds(300),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Split every content class into one group per locale
    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.locales = locales;
        self
    }

    /// Delay before a finished job's successor starts
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn job(&self) -> &ReindexJob {
        &self.job
    }

    /// Currently persisted job slot
    pub async fn current(&self) -> IndexingResult<Option<QueuedJob>> {
        self.store.load().await
    }

    /// Run one scheduling tick.
    ///
    /// State is saved before an error propagates, so counters advanced by a
    /// failed batch survive into the next tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> IndexingResult<TickOutcome> {
        let _guard = match self.tick_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Previous reindex tick still running");
                return Ok(TickOutcome::Busy);
            }
        };

        let slot = self
            .store
            .load()
            .await?
            .unwrap_or(QueuedJob::Pending { start_after: now });

        let mut state = match slot {
            QueuedJob::Pending { start_after } if start_after > now => {
                return Ok(TickOutcome::Waiting { start_after });
            }
            QueuedJob::Pending { .. } => {
                info!(title = self.job.title(), "Starting reindex job");
                self.job.snapshot(&self.locales).await?
            }
            QueuedJob::Active { state } => state,
        };

        let result = self.job.process(&mut state).await;

        let outcome = if state.is_complete {
            let next_start = now + self.requeue_delay;
            REINDEX_JOBS_COMPLETED_TOTAL.inc();
            info!(job_id = %state.id, next_start = %next_start, "Queued next reindex job");
            self.store
                .save(&QueuedJob::Pending {
                    start_after: next_start,
                })
                .await?;
            TickOutcome::Completed { next_start }
        } else {
            let outcome = TickOutcome::Progressed {
                current_step: state.current_step,
                total_steps: state.total_steps,
            };
            self.store.save(&QueuedJob::Active { state }).await?;
            outcome
        };

        result?;
        Ok(outcome)
    }

    /// Run a fresh job until it completes, ignoring any queued start time.
    ///
    /// `on_batch` sees the state after every processed batch.
    pub async fn run_to_completion<F>(&self, mut on_batch: F) -> IndexingResult<ReindexJobState>
    where
        F: FnMut(&ReindexJobState),
    {
        let _guard = self.tick_lock.lock().await;

        let mut state = self.job.snapshot(&self.locales).await?;
        while !state.is_complete {
            let result = self.job.process(&mut state).await;
            on_batch(&state);
            if let Err(e) = result {
                self.store
                    .save(&QueuedJob::Active {
                        state: state.clone(),
                    })
                    .await?;
                return Err(e);
            }
        }

        REINDEX_JOBS_COMPLETED_TOTAL.inc();
        self.store
            .save(&QueuedJob::Pending {
                start_after: Utc::now() + self.requeue_delay,
            })
            .await?;
        Ok(state)
    }
}

/// Cron-driven ticking of a [`JobHost`]
pub struct ReindexScheduler {
    scheduler: JobScheduler,
}

impl ReindexScheduler {
    /// Register a tick on `schedule` (cron with seconds) and start ticking
    pub async fn start(host: Arc<JobHost>, schedule: &str) -> IndexingResult<Self> {
        let scheduler = JobScheduler::new().await?;

        let tick = tokio_cron_scheduler::Job::new_async(schedule, move |_uuid, _l| {
            let host = host.clone();
            Box::pin(async move {
                match host.tick(Utc::now()).await {
                    Ok(TickOutcome::Progressed {
                        current_step,
                        total_steps,
                    }) => {
                        debug!(current_step, total_steps, "Reindex tick processed");
                    }
                    Ok(outcome) => debug!(?outcome, "Reindex tick"),
                    Err(e) => error!(error = %e, "Reindex tick failed"),
                }
            })
        })
        .map_err(|e| IndexingError::Scheduler(format!("Invalid schedule {}: {}", schedule, e)))?;

        scheduler.add(tick).await?;
        scheduler.start().await?;

        info!(schedule = schedule, "Reindex scheduler started");
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> IndexingResult<()> {
        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "Reindex scheduler did not shut down cleanly");
            return Err(e.into());
        }
        info!("Reindex scheduler stopped");
        Ok(())
    }
}
