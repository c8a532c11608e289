//! # StagePass Sync
//!
//! The ledger reconciliation engine: ingests the ticketing program's push
//! notifications, durably queues them, idempotently merges them into the
//! local relational projections, and runs the speculative-mint /
//! compensating-transaction flow for purchase requests.
//!
//! # Architecture
//!
//! ```text
//! client request ──► MintOrchestrator ──► LedgerClient (write)
//!                          │                    │ (async confirmation)
//!                  speculative rows             ▼
//!                          │            EventIngestor ──► SyncQueue
//!                          │                                  │
//!                          ▼                                  ▼
//!                      LocalStore ◄──── Reconciler ◄───── workers
//! ```
//!
//! Delivery is at-least-once with no cross-job ordering; every reconciler
//! handler is an idempotent upsert, which is the whole consistency story.
//! The mint flow is a two-step saga whose compensation guarantees no phantom
//! tickets survive a failed ledger call.
//!
//! The embedding service supplies the [`stagepass_core::ledger::LedgerClient`]
//! implementation (the raw RPC/wallet wrapper) and the
//! [`stagepass_core::store::SyncStore`] (see `stagepass-postgres`), then
//! starts everything through [`lifecycle::Engine`].

pub mod config;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod mint;
pub mod queue;
pub mod reconcile;

pub use config::Config;
pub use ingest::EventIngestor;
pub use lifecycle::Engine;
pub use mint::{MintOrchestrator, MintOutcome};
pub use queue::{SyncQueue, SyncWorkerPool};
pub use reconcile::Reconciler;
