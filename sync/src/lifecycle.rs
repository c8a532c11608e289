//! Engine lifecycle management and graceful shutdown.
//!
//! The raw ledger RPC/wallet wrapper and the HTTP surface live in the
//! embedding service; this module wires everything in between. Hand
//! [`Engine::start`] the store, the ledger client and a clock, and it owns
//! the background tasks (ingestor + worker pool), the shutdown broadcast,
//! and the synchronous entry points the embedding service calls
//! ([`Engine::minter`], [`Engine::queue`]).
//!
//! # Graceful Shutdown
//!
//! On [`Engine::shutdown`] (or a Ctrl+C / SIGTERM via
//! [`Engine::run_until_signal`]):
//! 1. The shutdown signal is broadcast to every background task
//! 2. Workers finish their in-flight job; the ingestor drops its
//!    subscription (running the unsubscribe disposer)
//! 3. Each task gets a bounded wait before the engine gives up on it

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use stagepass_core::environment::Clock;
use stagepass_core::job::BackoffPolicy;
use stagepass_core::ledger::LedgerClient;
use stagepass_core::store::SyncStore;

use crate::config::QueueConfig;
use crate::ingest::EventIngestor;
use crate::metrics;
use crate::mint::MintOrchestrator;
use crate::queue::{SyncQueue, SyncWorkerPool};
use crate::reconcile::Reconciler;

/// How long each background task gets to finish after the shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The running engine: background tasks plus the synchronous entry points.
pub struct Engine {
    queue: Arc<SyncQueue>,
    minter: Arc<MintOrchestrator>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Engine {
    /// Wire and start the engine: reconciler, worker pool, ingestor.
    ///
    /// Background tasks are running when this returns; the ingestor begins
    /// its bounded connectivity wait immediately.
    #[must_use]
    pub fn start(
        store: Arc<dyn SyncStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        metrics::register_engine_metrics();

        let (shutdown_tx, _) = broadcast::channel(1);

        let queue = Arc::new(SyncQueue::new(Arc::clone(&store), Arc::clone(&clock)));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));
        let minter = Arc::new(MintOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));

        let pool = SyncWorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            reconciler,
            queue.wake_handle(),
        )
        .with_concurrency(config.concurrency)
        .with_backoff(BackoffPolicy {
            base: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        })
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms));

        let mut handles = pool.spawn(&shutdown_tx);
        info!(workers = config.concurrency, "sync workers started");

        let ingestor = EventIngestor::new(ledger, Arc::clone(&queue));
        handles.push(ingestor.spawn(shutdown_tx.subscribe()));

        Self {
            queue,
            minter,
            handles,
            shutdown_tx,
        }
    }

    /// The queue producer, for flows that enqueue work directly.
    #[must_use]
    pub fn queue(&self) -> Arc<SyncQueue> {
        Arc::clone(&self.queue)
    }

    /// The synchronous mint entry point.
    #[must_use]
    pub fn minter(&self) -> Arc<MintOrchestrator> {
        Arc::clone(&self.minter)
    }

    /// Run until Ctrl+C or SIGTERM, then shut down gracefully.
    pub async fn run_until_signal(self) {
        shutdown_signal().await;
        self.shutdown().await;
    }

    /// Broadcast shutdown and wait (bounded) for every background task.
    pub async fn shutdown(self) {
        info!("engine shutting down");
        let _ = self.shutdown_tx.send(());
        for (idx, handle) in self.handles.into_iter().enumerate() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!(task = idx, "task stopped gracefully"),
                Ok(Err(e)) => warn!(task = idx, error = %e, "task failed"),
                Err(_) => warn!(task = idx, "task shutdown timed out"),
            }
        }
        info!("engine shutdown complete");
    }
}

/// Initialize tracing with an env-filterable subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("stagepass_sync={default_level}"))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C signal");
        }
        () = terminate => {
            info!("received SIGTERM signal");
        }
    }
}
