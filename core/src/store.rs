//! The local store seam.
//!
//! [`SyncStore`] is the repository facade the engine writes projections and
//! jobs through. Implementations own their transaction boundaries: the two
//! mint-saga operations ([`SyncStore::create_speculative_batch`],
//! [`SyncStore::remove_speculative_batch`]) must each be atomic, which is how
//! the zone capacity check stays race-free within one process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::address::Address;
use crate::job::{DeadLetter, SyncJob};
use crate::record::{
    AccountRecord, EventRecord, LedgerTicketId, ListingRecord, TicketRecord, ZoneRecord,
};

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend is temporarily unreachable or contended; safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A constraint was violated (duplicate key, capacity exceeded).
    #[error("store conflict: {0}")]
    Conflict(String),
    /// A referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
    /// A stored value failed to encode or decode.
    #[error("stored value serialization: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same operation can plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Adjustment of one zone's `sold` counter, applied as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneAdjustment {
    /// Zone name within the event.
    pub zone: String,
    /// Number of seats.
    pub count: u32,
}

/// The speculative writes of one mint request, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeBatch {
    /// Mint request id shared by every placeholder ticket id.
    pub request_id: Uuid,
    /// Local id of the event being minted against.
    pub event_id: Uuid,
    /// Placeholder tickets to insert.
    pub tickets: Vec<TicketRecord>,
    /// Zone `sold` increments to apply, capacity-checked.
    pub zone_increments: Vec<ZoneAdjustment>,
}

/// What a compensating transaction actually undid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemovedBatch {
    /// Speculative tickets deleted.
    pub tickets_removed: u32,
    /// Zone `sold` decrements applied.
    pub zone_decrements: Vec<ZoneAdjustment>,
}

/// Repository facade over the relational projection store.
///
/// Every method is a single logical operation; multi-row operations are
/// atomic inside the implementation. All reads reflect committed state.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Fetch an account by local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn account(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError>;

    /// Fetch the account that has `wallet` on file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn account_by_wallet(&self, wallet: &Address)
    -> Result<Option<AccountRecord>, StoreError>;

    /// Insert an account row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on duplicate id.
    async fn insert_account(&self, account: &AccountRecord) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Event records
    // ------------------------------------------------------------------

    /// Fetch the event record owning a confirmed ledger id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn event_by_ledger_id(&self, ledger_id: u64)
    -> Result<Option<EventRecord>, StoreError>;

    /// Fetch an event record by local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn event_by_local_id(&self, id: Uuid) -> Result<Option<EventRecord>, StoreError>;

    /// All still-pending event records for one organizer created at or after
    /// `created_after`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn pending_events_for_organizer(
        &self,
        organizer_id: Uuid,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Insert a new event record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the ledger id is already owned.
    async fn insert_event(&self, record: &EventRecord) -> Result<(), StoreError>;

    /// Replace an event record, keyed by local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the record does not exist.
    async fn update_event(&self, record: &EventRecord) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// Fetch a ticket by its (possibly placeholder) ledger id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn ticket(&self, id: &LedgerTicketId) -> Result<Option<TicketRecord>, StoreError>;

    /// Insert or replace a ticket, keyed by its ledger id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn upsert_ticket(&self, record: &TicketRecord) -> Result<(), StoreError>;

    /// Atomically replace a placeholder ticket with its confirmed form.
    ///
    /// The placeholder row is deleted and `promoted` inserted in one step so
    /// a concurrent reader never sees both or neither.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the placeholder is gone.
    async fn promote_ticket(
        &self,
        placeholder: &LedgerTicketId,
        promoted: &TicketRecord,
    ) -> Result<(), StoreError>;

    /// Speculative (placeholder) tickets for `(event, owner)` created at or
    /// after `created_after`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn speculative_tickets(
        &self,
        event_id: Uuid,
        owner: &Address,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<TicketRecord>, StoreError>;

    /// Every ticket of one event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn tickets_for_event(&self, event_id: Uuid) -> Result<Vec<TicketRecord>, StoreError>;

    /// Apply one mint request's speculative writes atomically: insert all
    /// placeholder tickets and increment the named zones' `sold` counters,
    /// failing the whole batch if any zone would exceed capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] naming the zone when capacity would
    /// be exceeded; nothing is written in that case.
    async fn create_speculative_batch(&self, batch: &SpeculativeBatch) -> Result<(), StoreError>;

    /// Compensate one mint request atomically: delete exactly the placeholder
    /// tickets carrying `request_id` and decrement the zones they occupied.
    ///
    /// Removing an already-removed batch is a no-op returning zero counts, so
    /// compensation is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn remove_speculative_batch(&self, request_id: Uuid)
    -> Result<RemovedBatch, StoreError>;

    // ------------------------------------------------------------------
    // Zones
    // ------------------------------------------------------------------

    /// Fetch one zone of an event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn zone(&self, event_id: Uuid, name: &str) -> Result<Option<ZoneRecord>, StoreError>;

    /// All zones of an event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn zones_for_event(&self, event_id: Uuid) -> Result<Vec<ZoneRecord>, StoreError>;

    /// Insert a zone row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on duplicate (event, name).
    async fn insert_zone(&self, zone: &ZoneRecord) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    /// The `Active` listing for a ticket, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn active_listing(&self, ticket_id: u64) -> Result<Option<ListingRecord>, StoreError>;

    /// Insert or replace a listing, keyed by ticket id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Persist a new job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn enqueue_job(&self, job: &SyncJob) -> Result<(), StoreError>;

    /// Claim up to `limit` due jobs (`run_at <= now`), making them invisible
    /// to other claimers until completed or retried.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SyncJob>, StoreError>;

    /// Delete a finished job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn complete_job(&self, id: Uuid) -> Result<(), StoreError>;

    /// Put a claimed job back with an incremented attempt count, a new due
    /// time, and the failure message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn retry_job(
        &self,
        id: Uuid,
        attempts: u32,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Park a job as a dead letter; it will never be claimed again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn dead_letter_job(
        &self,
        job: &SyncJob,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All parked jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;

    /// Number of jobs waiting to run (for metrics/ops).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    async fn pending_job_count(&self) -> Result<u64, StoreError>;
}
