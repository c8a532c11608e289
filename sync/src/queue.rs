//! Durable sync queue and its bounded worker pool.
//!
//! [`SyncQueue::enqueue`] persists a job through the store (so it survives a
//! restart) and nudges the workers. [`SyncWorkerPool`] runs a fixed number of
//! worker tasks; each claims due jobs one at a time and dispatches them to
//! the [`Reconciler`]. Failure classification drives what happens next:
//! transient failures reschedule with exponential backoff until the retry
//! budget runs out, permanent failures dead-letter immediately. Dead letters
//! are persisted, never dropped; resubmission is an operator concern.
//!
//! No ordering is guaranteed across jobs — correctness comes from every
//! handler being an idempotent upsert.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use stagepass_core::dto::job_payload_for;
use stagepass_core::environment::Clock;
use stagepass_core::event::DomainEvent;
use stagepass_core::job::{BackoffPolicy, JobKind, SyncJob};
use stagepass_core::store::{StoreError, SyncStore};

use crate::metrics;
use crate::reconcile::Reconciler;

/// Default bounded worker concurrency.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;

/// How often an idle worker re-polls for due jobs (backoff wake-ups arrive
/// through time, not notifications).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Producer half: persists jobs and wakes the workers.
pub struct SyncQueue {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    notify: Arc<Notify>,
}

impl SyncQueue {
    /// Wire the queue against the store.
    #[must_use]
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            notify: Arc::new(Notify::new()),
        }
    }

    /// The wake handle the worker pool listens on.
    #[must_use]
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Persist a job and wake the workers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the job cannot be persisted.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let job = SyncJob::new(kind, payload, self.clock.now());
        self.store.enqueue_job(&job).await?;
        metrics::record_job_enqueued(kind);
        tracing::debug!(job = %job.id, kind = %kind, "sync job enqueued");
        self.notify.notify_waiters();
        Ok(job.id)
    }

    /// Map a decoded domain event to its job kind and payload, then enqueue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the payload cannot be built or persisted.
    pub async fn enqueue_event(&self, event: DomainEvent) -> Result<Uuid, StoreError> {
        let kind = JobKind::for_event(&event);
        let payload =
            job_payload_for(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.enqueue(kind, payload).await
    }
}

/// Consumer half: a fixed pool of worker tasks.
pub struct SyncWorkerPool {
    store: Arc<dyn SyncStore>,
    clock: Arc<dyn Clock>,
    reconciler: Arc<Reconciler>,
    notify: Arc<Notify>,
    concurrency: usize,
    backoff: BackoffPolicy,
    poll_interval: Duration,
}

impl SyncWorkerPool {
    /// Build a pool with default concurrency, backoff and poll interval.
    #[must_use]
    pub fn new(
        store: Arc<dyn SyncStore>,
        clock: Arc<dyn Clock>,
        reconciler: Arc<Reconciler>,
        notify: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            clock,
            reconciler,
            notify,
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            backoff: BackoffPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the number of worker tasks.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Override the retry backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn every worker task; each runs until `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let pool = Arc::new(self);
        (0..pool.concurrency)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    pool.worker_loop(worker, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(worker, "sync worker started");
        loop {
            // Drain everything currently due, then sleep until woken by an
            // enqueue, the poll interval, or shutdown.
            while let Some(job) = self.claim_one(worker).await {
                self.process(worker, job).await;
                if !shutdown.is_empty() {
                    break;
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(worker, "sync worker received shutdown signal");
                    break;
                }
                () = self.notify.notified() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::info!(worker, "sync worker stopped");
    }

    async fn claim_one(&self, worker: usize) -> Option<SyncJob> {
        match self.store.claim_due_jobs(self.clock.now(), 1).await {
            Ok(mut jobs) => jobs.pop(),
            Err(e) => {
                tracing::warn!(worker, error = %e, "failed to claim jobs");
                None
            }
        }
    }

    async fn process(&self, worker: usize, job: SyncJob) {
        tracing::debug!(worker, job = %job.id, kind = %job.kind, attempt = job.attempts + 1, "processing sync job");
        match self.reconciler.handle(&job).await {
            Ok(()) => {
                if let Err(e) = self.store.complete_job(job.id).await {
                    tracing::error!(job = %job.id, error = %e, "failed to complete job");
                }
                metrics::record_job_completed(job.kind);
            }
            Err(err) => {
                let attempts = job.attempts + 1;
                if err.is_transient() && job.retries_remaining() {
                    let delay = self.backoff.delay_after(attempts);
                    let run_at = self.clock.now()
                        + ChronoDuration::milliseconds(
                            i64::try_from(delay.as_millis()).unwrap_or(i64::MAX),
                        );
                    tracing::warn!(
                        job = %job.id,
                        kind = %job.kind,
                        attempts,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "sync job failed, retrying"
                    );
                    if let Err(e) = self
                        .store
                        .retry_job(job.id, attempts, run_at, &err.to_string())
                        .await
                    {
                        tracing::error!(job = %job.id, error = %e, "failed to reschedule job");
                    }
                    metrics::record_job_retried(job.kind);
                } else {
                    tracing::error!(
                        job = %job.id,
                        kind = %job.kind,
                        attempts,
                        error = %err,
                        "sync job dead-lettered"
                    );
                    if let Err(e) = self
                        .store
                        .dead_letter_job(&job, &err.to_string(), self.clock.now())
                        .await
                    {
                        tracing::error!(job = %job.id, error = %e, "failed to park dead letter");
                    }
                    metrics::record_job_dead_lettered(job.kind);
                }
            }
        }
    }
}
