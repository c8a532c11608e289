//! Idempotent reconciliation of ledger events into local projections.
//!
//! Each entry point merges one ledger fact into the store. Handlers are
//! idempotent and convergent: replaying any event produces the same rows as
//! applying it once, which is what lets the queue deliver at-least-once with
//! no ordering guarantee.
//!
//! The pending-record matching protocol lives here: records born locally
//! before ledger confirmation carry placeholder ids, and the first matching
//! confirmation promotes them instead of inserting duplicates. The match is
//! heuristic (recency window, metadata-hash preference, most-recent
//! tie-break) and stays exactly that — see DESIGN.md for the known ambiguity
//! under bursts.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use stagepass_core::address::Address;
use stagepass_core::dto::{
    ListingActivityDto, SyncEventDto, SyncTicketDto, TicketBatchDto, TicketResaleDto,
    TicketUsedDto,
};
use stagepass_core::environment::Clock;
use stagepass_core::error::SyncError;
use stagepass_core::job::{JobKind, SyncJob};
use stagepass_core::ledger::LedgerClient;
use stagepass_core::record::{
    EventRecord, LedgerEventId, LedgerTicketId, ListingStatus, TicketRecord, TicketStatus,
};
use stagepass_core::store::{StoreError, SyncStore};

/// Recency window for matching a `PENDING` event record to its
/// `EventCreated` confirmation, in minutes.
pub const PENDING_EVENT_MATCH_WINDOW_MINS: i64 = 30;

/// Recency window for matching a speculative ticket to its `TicketsMinted`
/// confirmation, in minutes.
pub const PENDING_TICKET_MATCH_WINDOW_MINS: i64 = 30;

/// Per-event-kind idempotent merge handlers.
pub struct Reconciler {
    store: Arc<dyn SyncStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    /// Wire the reconciler against its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SyncStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
        }
    }

    /// Dispatch one claimed job to its handler.
    ///
    /// # Errors
    ///
    /// Returns the handler's [`SyncError`]; a payload that does not
    /// deserialize is [`SyncError::Permanent`].
    pub async fn handle(&self, job: &SyncJob) -> Result<(), SyncError> {
        match job.kind {
            JobKind::SyncEvent => self.sync_event(parse(&job.payload)?).await,
            JobKind::SyncTicketBatch => self.sync_ticket_batch(parse(&job.payload)?).await,
            JobKind::SyncTicketUsed => self.sync_ticket_used(parse(&job.payload)?).await,
            JobKind::SyncTicketResale => self.sync_ticket_resale(parse(&job.payload)?).await,
            JobKind::ListingActivity => {
                self.note_listing_activity(&parse(&job.payload)?);
                Ok(())
            }
        }
    }

    /// Merge an `EventCreated` fact.
    ///
    /// # Errors
    ///
    /// [`SyncError::Permanent`] when the organizer has no local account;
    /// [`SyncError::Transient`] on store contention.
    #[tracing::instrument(skip(self, dto), fields(ledger_event_id = dto.event_id))]
    pub async fn sync_event(&self, dto: SyncEventDto) -> Result<(), SyncError> {
        let now = self.clock.now();

        // Exact match first: a duplicate delivery or a late update. Only
        // ledger-sourced fields are refreshed; tickets_total and the resale
        // and commission configs are organizer-authoritative and frozen.
        if let Some(mut existing) = self.store.event_by_ledger_id(dto.event_id).await? {
            existing.metadata_hash = dto.metadata_hash;
            existing.event_start_time = dto.event_start_time;
            existing.last_synced_at = Some(now);
            self.store.update_event(&existing).await?;
            tracing::debug!(local_id = %existing.id, "confirmed event refreshed");
            return Ok(());
        }

        let organizer_wallet = Address::from_actor(&dto.organizer);
        let Some(organizer) = self.store.account_by_wallet(&organizer_wallet).await? else {
            // Non-retryable given current data: no amount of replay creates
            // the missing account.
            return Err(SyncError::Permanent(format!(
                "no local account for organizer {organizer_wallet}"
            )));
        };

        let window_start = now - Duration::minutes(PENDING_EVENT_MATCH_WINDOW_MINS);
        let pending = self
            .store
            .pending_events_for_organizer(organizer.id, window_start)
            .await?;
        // Prefer an exact metadata-hash match; otherwise the most recent
        // pending record in the window (the store returns them newest first).
        let matched = pending
            .iter()
            .find(|e| e.metadata_hash == dto.metadata_hash)
            .or_else(|| pending.first())
            .cloned();

        match matched {
            Some(mut record) => {
                record.ledger_event_id = LedgerEventId::Confirmed(dto.event_id);
                record.tickets_minted = 0;
                record.last_synced_at = Some(now);
                self.store.update_event(&record).await?;
                tracing::info!(local_id = %record.id, "pending event promoted to confirmed");
            }
            None => {
                // Degraded path: the event was created directly against the
                // ledger, so build the record from ledger-supplied values and
                // platform defaults.
                let record = EventRecord {
                    id: Uuid::new_v4(),
                    ledger_event_id: LedgerEventId::Confirmed(dto.event_id),
                    organizer_id: organizer.id,
                    metadata_hash: dto.metadata_hash,
                    event_start_time: dto.event_start_time,
                    tickets_total: dto.tickets_total,
                    tickets_minted: 0,
                    resale: dto.resale.unwrap_or_default(),
                    commission: dto.commission.unwrap_or_default(),
                    created_at: now,
                    last_synced_at: Some(now),
                };
                match self.store.insert_event(&record).await {
                    Ok(()) => {
                        tracing::info!(local_id = %record.id, "event record created from ledger");
                    }
                    // A concurrent worker inserted the same ledger id; the
                    // projections already converged.
                    Err(StoreError::Conflict(_)) => {
                        tracing::debug!("concurrent insert for same ledger event, skipping");
                    }
                    Err(other) => return Err(other.into()),
                }
            }
        }
        Ok(())
    }

    /// Merge a `TicketsMinted` batch, one ledger detail round-trip per id.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transient`] when the owning event record has not been
    /// reconciled yet (the `EventCreated` job may still be in flight) or a
    /// ledger read fails; replaying is safe because every upsert here is
    /// idempotent.
    #[tracing::instrument(skip(self, dto), fields(ledger_event_id = dto.event_id, tickets = dto.ticket_ids.len()))]
    pub async fn sync_ticket_batch(&self, dto: TicketBatchDto) -> Result<(), SyncError> {
        let Some(event) = self.store.event_by_ledger_id(dto.event_id).await? else {
            return Err(SyncError::Transient(format!(
                "no local event for ledger id {} yet",
                dto.event_id
            )));
        };
        let batch_buyer = Address::from_actor(&dto.buyer);
        let batch_minted_at = unix_to_datetime(dto.minted_at);

        for ticket_id in &dto.ticket_ids {
            let detail = self.ledger.ticket(*ticket_id).await.map_err(SyncError::from)?;
            let merge = match detail {
                Some(detail) => SyncTicketDto {
                    ticket_id: *ticket_id,
                    event_id: dto.event_id,
                    original_buyer: Address::from_actor(&detail.original_buyer),
                    current_owner: Address::from_actor(&detail.current_owner),
                    zone: detail.zone,
                    used: detail.used,
                    minted_at: unix_to_datetime(detail.minted_at),
                },
                // The detail read found nothing; fall back to the batch-level
                // buyer so the projection still converges.
                None => SyncTicketDto {
                    ticket_id: *ticket_id,
                    event_id: dto.event_id,
                    original_buyer: batch_buyer,
                    current_owner: batch_buyer,
                    zone: None,
                    used: false,
                    minted_at: batch_minted_at,
                },
            };
            self.apply_ticket(&event, merge).await?;
        }

        // Converge tickets_minted by recount rather than increment, so
        // duplicate deliveries settle on the same number.
        let confirmed = self
            .store
            .tickets_for_event(event.id)
            .await?
            .iter()
            .filter(|t| !t.is_speculative())
            .count();
        if let Some(mut fresh) = self.store.event_by_local_id(event.id).await? {
            fresh.tickets_minted = u32::try_from(confirmed).unwrap_or(u32::MAX);
            fresh.last_synced_at = Some(self.clock.now());
            self.store.update_event(&fresh).await?;
        }
        Ok(())
    }

    /// Upsert one confirmed ticket, promoting a speculative placeholder for
    /// the same `(event, owner)` when one exists instead of inserting a
    /// duplicate.
    async fn apply_ticket(
        &self,
        event: &EventRecord,
        dto: SyncTicketDto,
    ) -> Result<(), SyncError> {
        let now = self.clock.now();
        let confirmed_id = LedgerTicketId::Confirmed(dto.ticket_id);

        if let Some(mut existing) = self.store.ticket(&confirmed_id).await? {
            existing.owner = dto.current_owner;
            existing.original_buyer = dto.original_buyer;
            if dto.zone.is_some() {
                existing.zone = dto.zone;
            }
            if dto.used {
                existing.status = TicketStatus::Used;
                if existing.used_at.is_none() {
                    existing.used_at = Some(now);
                }
            }
            existing.last_synced_at = Some(now);
            self.store.upsert_ticket(&existing).await?;
            return Ok(());
        }

        let window_start = now - Duration::minutes(PENDING_TICKET_MATCH_WINDOW_MINS);
        let speculative = self
            .store
            .speculative_tickets(event.id, &dto.current_owner, window_start)
            .await?;

        let promoted = TicketRecord {
            ledger_ticket_id: confirmed_id,
            event_id: event.id,
            zone: dto
                .zone
                .clone()
                .or_else(|| speculative.first().and_then(|t| t.zone.clone())),
            owner: dto.current_owner,
            original_buyer: dto.original_buyer,
            status: if dto.used {
                TicketStatus::Used
            } else {
                TicketStatus::Active
            },
            minted_at: dto.minted_at,
            used_at: if dto.used { Some(now) } else { None },
            last_synced_at: Some(now),
        };

        match speculative.first() {
            Some(placeholder) => {
                match self
                    .store
                    .promote_ticket(&placeholder.ledger_ticket_id, &promoted)
                    .await
                {
                    Ok(()) => {
                        tracing::debug!(
                            ticket = dto.ticket_id,
                            placeholder = %placeholder.ledger_ticket_id,
                            "speculative ticket promoted"
                        );
                        Ok(())
                    }
                    // Another worker consumed the placeholder between our
                    // read and the promote; plain upsert still converges.
                    Err(StoreError::NotFound(_)) => {
                        self.store.upsert_ticket(&promoted).await?;
                        Ok(())
                    }
                    Err(other) => Err(other.into()),
                }
            }
            None => {
                self.store.upsert_ticket(&promoted).await?;
                tracing::debug!(ticket = dto.ticket_id, "ticket record created from ledger");
                Ok(())
            }
        }
    }

    /// Merge a `TicketUsed` fact; the scan timestamp is first-write-wins.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transient`] when the ticket is not locally known yet or
    /// the detail read fails.
    #[tracing::instrument(skip(self, dto), fields(ticket_id = dto.ticket_id))]
    pub async fn sync_ticket_used(&self, dto: TicketUsedDto) -> Result<(), SyncError> {
        let detail = self.ledger.ticket(dto.ticket_id).await.map_err(SyncError::from)?;

        let confirmed_id = LedgerTicketId::Confirmed(dto.ticket_id);
        let Some(mut ticket) = self.store.ticket(&confirmed_id).await? else {
            // The mint reconciliation may still be in flight.
            return Err(SyncError::Transient(format!(
                "ticket {} not locally known yet",
                dto.ticket_id
            )));
        };

        if let Some(detail) = detail {
            ticket.owner = Address::from_actor(&detail.current_owner);
            ticket.original_buyer = Address::from_actor(&detail.original_buyer);
        }
        ticket.status = TicketStatus::Used;
        if ticket.used_at.is_none() {
            ticket.used_at = Some(unix_to_datetime(dto.used_at));
        }
        ticket.last_synced_at = Some(self.clock.now());
        self.store.upsert_ticket(&ticket).await?;
        tracing::info!(ticket = dto.ticket_id, "ticket marked used");
        Ok(())
    }

    /// Merge a `TicketResold` / `TicketSold` fact: new owner, and the active
    /// listing (if any) flips to `SOLD`. Already-sold listings are left
    /// alone.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transient`] when the ticket is not locally known yet.
    #[tracing::instrument(skip(self, dto), fields(ticket_id = dto.ticket_id))]
    pub async fn sync_ticket_resale(&self, dto: TicketResaleDto) -> Result<(), SyncError> {
        let buyer = Address::from_actor(&dto.buyer);
        let now = self.clock.now();

        let confirmed_id = LedgerTicketId::Confirmed(dto.ticket_id);
        let Some(mut ticket) = self.store.ticket(&confirmed_id).await? else {
            return Err(SyncError::Transient(format!(
                "ticket {} not locally known yet",
                dto.ticket_id
            )));
        };
        ticket.owner = buyer;
        ticket.last_synced_at = Some(now);
        self.store.upsert_ticket(&ticket).await?;

        if let Some(mut listing) = self.store.active_listing(dto.ticket_id).await? {
            listing.status = ListingStatus::Sold;
            listing.sold_to = Some(buyer);
            listing.sold_at = Some(unix_to_datetime(dto.sold_at));
            self.store.upsert_listing(&listing).await?;
            tracing::info!(ticket = dto.ticket_id, "listing marked sold");
        }
        Ok(())
    }

    /// Notification-only marketplace activity; the marketplace flow already
    /// wrote the projection.
    pub fn note_listing_activity(&self, dto: &ListingActivityDto) {
        match dto {
            ListingActivityDto::Listed { ticket_id, price } => {
                tracing::debug!(ticket = ticket_id, price = %price, "ticket listed on ledger");
            }
            ListingActivityDto::Cancelled { ticket_id } => {
                tracing::debug!(ticket = ticket_id, "ledger listing cancelled");
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T, SyncError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::Permanent(format!("malformed job payload: {e}")))
}

fn unix_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
