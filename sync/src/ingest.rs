//! Ledger notification ingestion.
//!
//! The ingestor owns the subscription to the ticketing program's push
//! notification stream. Its only side effect is enqueueing a sync job per
//! decoded event — no projection writes happen here, which keeps ingestion
//! replay-safe and cheap. Nothing in this module ever propagates an error
//! out of the notification loop: undecodable or foreign notifications are
//! logged and dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use stagepass_core::event::{DomainEvent, TICKETING_SERVICE};
use stagepass_core::ledger::{LedgerClient, RawNotification};

use crate::metrics;
use crate::queue::SyncQueue;

/// Bounded connectivity wait: attempts before giving up on the node.
pub const CONNECT_ATTEMPTS: u32 = 10;

/// Delay between connectivity attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Subscribes to ledger notifications and enqueues sync jobs.
pub struct EventIngestor {
    ledger: Arc<dyn LedgerClient>,
    queue: Arc<SyncQueue>,
}

impl EventIngestor {
    /// Wire the ingestor against the ledger and the queue.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerClient>, queue: Arc<SyncQueue>) -> Self {
        Self { ledger, queue }
    }

    /// Spawn the ingestion task; it runs until `shutdown` fires or the
    /// notification stream closes.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("event ingestor started");

        // Wait for ledger connectivity with a bounded retry loop. If the
        // node never shows up the subscription is simply not installed and
        // the task ends without crashing; event backfill is out of scope.
        if !self.await_connectivity(&mut shutdown).await {
            tracing::warn!(
                attempts = CONNECT_ATTEMPTS,
                "ledger connectivity never arrived; notifications will not be ingested"
            );
            return;
        }

        let mut subscription = match self.ledger.subscribe(TICKETING_SERVICE).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(error = %e, "failed to subscribe to ledger notifications");
                return;
            }
        };
        tracing::info!(service = TICKETING_SERVICE, "subscribed to ledger notifications");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("event ingestor received shutdown signal");
                    break;
                }
                raw = subscription.recv() => match raw {
                    Some(notification) => self.ingest(notification).await,
                    None => {
                        tracing::warn!("ledger notification stream closed");
                        break;
                    }
                }
            }
        }
        // Dropping the subscription runs the unsubscribe disposer.
        tracing::info!("event ingestor stopped");
    }

    /// `true` once the ledger answers a connectivity check; `false` after
    /// the attempt budget is spent or shutdown fires.
    async fn await_connectivity(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        for attempt in 1..=CONNECT_ATTEMPTS {
            if self.ledger.is_connected().await {
                return true;
            }
            tracing::warn!(
                attempt,
                attempts = CONNECT_ATTEMPTS,
                "ledger not reachable, retrying"
            );
            tokio::select! {
                _ = shutdown.recv() => return false,
                () = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
            }
        }
        false
    }

    /// Filter, decode, enqueue. Never returns an error.
    async fn ingest(&self, raw: RawNotification) {
        if raw.source != self.ledger.program_id() {
            tracing::debug!(source = %raw.source, "notification from foreign program dropped");
            metrics::record_notification_dropped("foreign_source");
            return;
        }
        if !raw.destination.is_zero() {
            tracing::debug!(destination = %raw.destination, "directed notification dropped");
            metrics::record_notification_dropped("not_broadcast");
            return;
        }

        let event = match DomainEvent::decode(&raw.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable notification dropped");
                metrics::record_notification_dropped("undecodable");
                return;
            }
        };

        let name = event.name();
        match self.queue.enqueue_event(event).await {
            Ok(job_id) => {
                tracing::debug!(event = name, job = %job_id, "notification ingested");
                metrics::record_event_ingested(name);
            }
            Err(e) => {
                tracing::error!(event = name, error = %e, "failed to enqueue sync job");
            }
        }
    }
}
