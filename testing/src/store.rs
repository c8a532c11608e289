//! In-memory `SyncStore` for fast, deterministic tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stagepass_core::address::Address;
use stagepass_core::job::{DeadLetter, SyncJob};
use stagepass_core::record::{
    AccountRecord, EventRecord, LedgerTicketId, ListingRecord, ListingStatus, TicketRecord,
    ZoneRecord,
};
use stagepass_core::store::{RemovedBatch, SpeculativeBatch, StoreError, SyncStore, ZoneAdjustment};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<Uuid, AccountRecord>,
    events: HashMap<Uuid, EventRecord>,
    tickets: HashMap<String, TicketRecord>,
    zones: HashMap<(Uuid, String), ZoneRecord>,
    listings: HashMap<u64, ListingRecord>,
    jobs: HashMap<Uuid, SyncJob>,
    claimed: HashSet<Uuid>,
    dead: Vec<DeadLetter>,
}

/// HashMap-backed [`SyncStore`] with transient-failure injection.
///
/// Atomicity of the batch operations falls out of the single write lock;
/// capacity checks behave exactly like the relational implementation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    fail_ops: Arc<AtomicU32>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store operations fail with
    /// [`StoreError::Unavailable`], then recover. Drives retry-path tests.
    pub fn fail_next_ops(&self, n: u32) {
        self.fail_ops.store(n, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        let remaining = self.fail_ops.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_ops.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    /// Total tickets currently stored, speculative included.
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.inner.read().unwrap().tickets.len()
    }

    /// Jobs currently waiting or claimed.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.inner.read().unwrap().jobs.len()
    }

    /// Parked jobs.
    #[must_use]
    pub fn dead_letter_count(&self) -> usize {
        self.inner.read().unwrap().dead.len()
    }
}

#[async_trait]
impl SyncStore for InMemoryStore {
    async fn account(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self.inner.read().unwrap().accounts.get(&id).cloned())
    }

    async fn account_by_wallet(
        &self,
        wallet: &Address,
    ) -> Result<Option<AccountRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .inner
            .read()
            .unwrap()
            .accounts
            .values()
            .find(|a| a.wallet.as_ref() == Some(wallet))
            .cloned())
    }

    async fn insert_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!(
                "duplicate account {}",
                account.id
            )));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn event_by_ledger_id(
        &self,
        ledger_id: u64,
    ) -> Result<Option<EventRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .inner
            .read()
            .unwrap()
            .events
            .values()
            .find(|e| e.ledger_event_id.as_confirmed() == Some(ledger_id))
            .cloned())
    }

    async fn event_by_local_id(&self, id: Uuid) -> Result<Option<EventRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self.inner.read().unwrap().events.get(&id).cloned())
    }

    async fn pending_events_for_organizer(
        &self,
        organizer_id: Uuid,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.injected_failure()?;
        let mut pending: Vec<EventRecord> = self
            .inner
            .read()
            .unwrap()
            .events
            .values()
            .filter(|e| {
                e.is_pending() && e.organizer_id == organizer_id && e.created_at >= created_after
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn insert_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        if let Some(ledger_id) = record.ledger_event_id.as_confirmed() {
            if inner
                .events
                .values()
                .any(|e| e.ledger_event_id.as_confirmed() == Some(ledger_id))
            {
                return Err(StoreError::Conflict(format!(
                    "ledger event {ledger_id} already owned"
                )));
            }
        }
        inner.events.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        if !inner.events.contains_key(&record.id) {
            return Err(StoreError::NotFound(format!("event {}", record.id)));
        }
        inner.events.insert(record.id, record.clone());
        Ok(())
    }

    async fn ticket(&self, id: &LedgerTicketId) -> Result<Option<TicketRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .inner
            .read()
            .unwrap()
            .tickets
            .get(&id.to_string())
            .cloned())
    }

    async fn upsert_ticket(&self, record: &TicketRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        self.inner
            .write()
            .unwrap()
            .tickets
            .insert(record.ledger_ticket_id.to_string(), record.clone());
        Ok(())
    }

    async fn promote_ticket(
        &self,
        placeholder: &LedgerTicketId,
        promoted: &TicketRecord,
    ) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        if inner.tickets.remove(&placeholder.to_string()).is_none() {
            return Err(StoreError::NotFound(format!(
                "speculative ticket {placeholder}"
            )));
        }
        inner
            .tickets
            .insert(promoted.ledger_ticket_id.to_string(), promoted.clone());
        Ok(())
    }

    async fn speculative_tickets(
        &self,
        event_id: Uuid,
        owner: &Address,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<TicketRecord>, StoreError> {
        self.injected_failure()?;
        let mut found: Vec<TicketRecord> = self
            .inner
            .read()
            .unwrap()
            .tickets
            .values()
            .filter(|t| {
                t.is_speculative()
                    && t.event_id == event_id
                    && t.owner == *owner
                    && t.minted_at >= created_after
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.minted_at.cmp(&b.minted_at));
        Ok(found)
    }

    async fn tickets_for_event(&self, event_id: Uuid) -> Result<Vec<TicketRecord>, StoreError> {
        self.injected_failure()?;
        let mut found: Vec<TicketRecord> = self
            .inner
            .read()
            .unwrap()
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.minted_at.cmp(&b.minted_at));
        Ok(found)
    }

    async fn create_speculative_batch(&self, batch: &SpeculativeBatch) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();

        // Validate every increment before touching anything; the whole batch
        // commits or none of it does.
        for adj in &batch.zone_increments {
            let key = (batch.event_id, adj.zone.clone());
            let zone = inner
                .zones
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("zone {}", adj.zone)))?;
            if zone.sold + adj.count > zone.capacity {
                return Err(StoreError::Conflict(format!(
                    "Zone {} is sold out",
                    adj.zone
                )));
            }
        }

        for adj in &batch.zone_increments {
            let key = (batch.event_id, adj.zone.clone());
            if let Some(zone) = inner.zones.get_mut(&key) {
                zone.sold += adj.count;
            }
        }
        for ticket in &batch.tickets {
            inner
                .tickets
                .insert(ticket.ledger_ticket_id.to_string(), ticket.clone());
        }
        Ok(())
    }

    async fn remove_speculative_batch(
        &self,
        request_id: Uuid,
    ) -> Result<RemovedBatch, StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();

        let keys: Vec<String> = inner
            .tickets
            .iter()
            .filter(|(_, t)| t.ledger_ticket_id.request_id() == Some(request_id))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = RemovedBatch::default();
        let mut per_zone: HashMap<(Uuid, String), u32> = HashMap::new();
        for key in keys {
            if let Some(ticket) = inner.tickets.remove(&key) {
                removed.tickets_removed += 1;
                if let Some(zone) = ticket.zone {
                    *per_zone.entry((ticket.event_id, zone)).or_insert(0) += 1;
                }
            }
        }
        for ((event_id, zone_name), count) in per_zone {
            if let Some(zone) = inner.zones.get_mut(&(event_id, zone_name.clone())) {
                zone.sold = zone.sold.saturating_sub(count);
            }
            removed.zone_decrements.push(ZoneAdjustment {
                zone: zone_name,
                count,
            });
        }
        removed.zone_decrements.sort_by(|a, b| a.zone.cmp(&b.zone));
        Ok(removed)
    }

    async fn zone(&self, event_id: Uuid, name: &str) -> Result<Option<ZoneRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .inner
            .read()
            .unwrap()
            .zones
            .get(&(event_id, name.to_string()))
            .cloned())
    }

    async fn zones_for_event(&self, event_id: Uuid) -> Result<Vec<ZoneRecord>, StoreError> {
        self.injected_failure()?;
        let mut found: Vec<ZoneRecord> = self
            .inner
            .read()
            .unwrap()
            .zones
            .values()
            .filter(|z| z.event_id == event_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn insert_zone(&self, zone: &ZoneRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        let key = (zone.event_id, zone.name.clone());
        if inner.zones.contains_key(&key) {
            return Err(StoreError::Conflict(format!("duplicate zone {}", zone.name)));
        }
        inner.zones.insert(key, zone.clone());
        Ok(())
    }

    async fn active_listing(&self, ticket_id: u64) -> Result<Option<ListingRecord>, StoreError> {
        self.injected_failure()?;
        Ok(self
            .inner
            .read()
            .unwrap()
            .listings
            .get(&ticket_id)
            .filter(|l| l.status == ListingStatus::Active)
            .cloned())
    }

    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        self.inner
            .write()
            .unwrap()
            .listings
            .insert(listing.ticket_id, listing.clone());
        Ok(())
    }

    async fn enqueue_job(&self, job: &SyncJob) -> Result<(), StoreError> {
        self.injected_failure()?;
        self.inner.write().unwrap().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SyncJob>, StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        let mut due: Vec<SyncJob> = inner
            .jobs
            .values()
            .filter(|j| !inner.claimed.contains(&j.id) && j.run_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.run_at.cmp(&b.run_at).then(a.created_at.cmp(&b.created_at)));
        due.truncate(limit as usize);
        for job in &due {
            inner.claimed.insert(job.id);
        }
        Ok(due)
    }

    async fn complete_job(&self, id: Uuid) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        inner.jobs.remove(&id);
        inner.claimed.remove(&id);
        Ok(())
    }

    async fn retry_job(
        &self,
        id: Uuid,
        attempts: u32,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.attempts = attempts;
            job.run_at = run_at;
            job.last_error = Some(error.to_string());
        }
        inner.claimed.remove(&id);
        Ok(())
    }

    async fn dead_letter_job(
        &self,
        job: &SyncJob,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut inner = self.inner.write().unwrap();
        inner.jobs.remove(&job.id);
        inner.claimed.remove(&job.id);
        inner.dead.push(DeadLetter {
            job: job.clone(),
            reason: reason.to_string(),
            dead_at: now,
        });
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.injected_failure()?;
        Ok(self.inner.read().unwrap().dead.clone())
    }

    async fn pending_job_count(&self) -> Result<u64, StoreError> {
        self.injected_failure()?;
        let inner = self.inner.read().unwrap();
        Ok(inner.jobs.len() as u64)
    }
}
