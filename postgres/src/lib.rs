//! `PostgreSQL` projection store for the StagePass ledger sync engine.
//!
//! [`PgSyncStore`] implements the `SyncStore` seam over sqlx with
//! runtime-bound queries: `ON CONFLICT` upserts for the idempotent
//! reconciliation writes, single transactions for the mint saga's
//! speculative batch and its compensation, and `FOR UPDATE SKIP LOCKED`
//! claims for the durable job queue.
//!
//! Schema management is owned by the platform's migration pipeline;
//! [`PgSyncStore::ensure_schema`] exists for local development and tests.

#![forbid(unsafe_code)]

mod store;

pub use store::PgSyncStore;
