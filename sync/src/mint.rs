//! The speculative-mint saga.
//!
//! A mint request writes locally first so the purchased tickets are visible
//! immediately, then submits the ledger transaction. The two steps are not
//! atomic across the store/ledger boundary, so the flow is an explicit
//! two-step saga: commit the speculative batch, call the ledger, and on
//! ledger failure run the compensating transaction that deletes exactly what
//! step one wrote. Both branches are surfaced as a [`MintOutcome`] so each is
//! independently testable.
//!
//! A crash between the local commit and the ledger call leaves an orphaned
//! speculative batch; nothing sweeps those up (see DESIGN.md).

use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use stagepass_core::address::Address;
use stagepass_core::environment::Clock;
use stagepass_core::error::MintError;
use stagepass_core::ledger::{LedgerClient, LedgerError, TxReceipt};
use stagepass_core::record::{LedgerTicketId, TicketRecord, TicketStatus};
use stagepass_core::store::{RemovedBatch, SpeculativeBatch, StoreError, SyncStore, ZoneAdjustment};

use crate::metrics;

/// Largest batch a single mint request may ask for.
pub const MINT_AMOUNT_CAP: u32 = 100;

/// Window of the best-effort duplicate-mint guard, in seconds.
pub const DUPLICATE_MINT_WINDOW_SECS: i64 = 90;

/// Result of one run of the saga, with both branches explicit.
#[derive(Debug)]
pub enum MintOutcome {
    /// The speculative batch stands and the ledger accepted the mint; the
    /// rows stay until `TicketsMinted` reconciliation promotes them.
    Committed(TxReceipt),
    /// The ledger call failed and the compensating transaction ran.
    RolledBack {
        /// The ledger failure that triggered compensation.
        error: LedgerError,
        /// What the compensation actually undid.
        removed: RemovedBatch,
    },
}

/// Synchronous request-time mint flow.
pub struct MintOrchestrator {
    store: Arc<dyn SyncStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
}

impl MintOrchestrator {
    /// Wire the orchestrator against its collaborators.
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

    /// Mint `amount` tickets for `event_id`, buying as `buyer` (or the
    /// requester's wallet on file when `buyer` is `None`).
    ///
    /// # Errors
    ///
    /// - [`MintError::Validation`]: bad input, unconfirmed event, missing
    ///   wallet, unknown or sold-out zone. No local writes remain.
    /// - [`MintError::Conflict`]: the same buyer already has an in-flight
    ///   speculative mint for this event (90-second window).
    /// - [`MintError::Ledger`]: the ledger call failed; the speculative
    ///   writes were compensated before this surfaces.
    /// - [`MintError::Store`]: the local store failed.
    pub async fn mint_tickets(
        &self,
        event_id: Uuid,
        requester_id: Uuid,
        amount: u32,
        buyer: Option<Address>,
        zone_names: &[String],
    ) -> Result<TxReceipt, MintError> {
        match self
            .execute(event_id, requester_id, amount, buyer, zone_names)
            .await?
        {
            MintOutcome::Committed(receipt) => Ok(receipt),
            MintOutcome::RolledBack { error, .. } => Err(MintError::Ledger(error)),
        }
    }

    /// Run the saga and report which branch was taken.
    ///
    /// # Errors
    ///
    /// Returns [`MintError`] for every failure before the ledger call; a
    /// ledger failure is not an error at this level but the
    /// [`MintOutcome::RolledBack`] branch.
    #[tracing::instrument(skip(self, buyer, zone_names), fields(%event_id, %requester_id, amount))]
    pub async fn execute(
        &self,
        event_id: Uuid,
        requester_id: Uuid,
        amount: u32,
        buyer: Option<Address>,
        zone_names: &[String],
    ) -> Result<MintOutcome, MintError> {
        if amount == 0 || amount > MINT_AMOUNT_CAP {
            return Err(MintError::Validation(format!(
                "amount must be between 1 and {MINT_AMOUNT_CAP}"
            )));
        }

        let event = self
            .store
            .event_by_local_id(event_id)
            .await?
            .ok_or_else(|| MintError::Validation(format!("event {event_id} not found")))?;
        let Some(ledger_event_id) = event.ledger_event_id.as_confirmed() else {
            return Err(MintError::Validation(
                "event is not confirmed on the ledger yet".to_string(),
            ));
        };
        if event.tickets_minted.saturating_add(amount) > event.tickets_total {
            return Err(MintError::Validation("event is sold out".to_string()));
        }

        let buyer = match buyer {
            Some(address) => address,
            None => self
                .store
                .account(requester_id)
                .await?
                .ok_or_else(|| {
                    MintError::Validation(format!("requester {requester_id} not found"))
                })?
                .wallet
                .ok_or_else(|| {
                    MintError::Validation("requester has no wallet on file".to_string())
                })?,
        };

        let zones = self.store.zones_for_event(event_id).await?;
        let requested = validate_zones(&zones, amount, zone_names)?;

        // Best-effort duplicate guard: a speculative ticket for the same
        // buyer and event inside the window means a mint is already in
        // flight. Time-windowed, not a distributed lock.
        let guard_start = self.clock.now() - Duration::seconds(DUPLICATE_MINT_WINDOW_SECS);
        let in_flight = self
            .store
            .speculative_tickets(event_id, &buyer, guard_start)
            .await?;
        if !in_flight.is_empty() {
            return Err(MintError::Conflict(format!(
                "a mint for buyer {buyer} and event {event_id} is already in flight"
            )));
        }

        // Step 1: speculative local commit. Tickets become visible as ACTIVE
        // before the ledger confirms.
        let request_id = Uuid::new_v4();
        let now = self.clock.now();
        let tickets: Vec<TicketRecord> = zone_slots(amount, zone_names)
            .map(|zone| TicketRecord {
                ledger_ticket_id: LedgerTicketId::placeholder(request_id),
                event_id,
                zone,
                owner: buyer,
                original_buyer: buyer,
                status: TicketStatus::Active,
                minted_at: now,
                used_at: None,
                last_synced_at: None,
            })
            .collect();
        let batch = SpeculativeBatch {
            request_id,
            event_id,
            tickets,
            zone_increments: requested
                .into_iter()
                .map(|(zone, count)| ZoneAdjustment { zone, count })
                .collect(),
        };
        self.store
            .create_speculative_batch(&batch)
            .await
            .map_err(|e| match e {
                // A concurrent mint won the capacity race inside the store.
                StoreError::Conflict(msg) => MintError::Validation(msg),
                other => MintError::Store(other),
            })?;
        tracing::info!(%request_id, amount, "speculative mint committed locally");

        // Step 2: the remote call.
        match self
            .ledger
            .mint_tickets(ledger_event_id, buyer.actor_id(), amount, zone_names)
            .await
        {
            Ok(receipt) => {
                metrics::record_mint_committed(amount);
                tracing::info!(%request_id, tx = %receipt.tx_hash, "ledger mint confirmed");
                Ok(MintOutcome::Committed(receipt))
            }
            Err(error) => {
                tracing::warn!(%request_id, error = %error, "ledger mint failed, compensating");
                let removed = self.store.remove_speculative_batch(request_id).await?;
                metrics::record_mint_rolled_back(amount);
                tracing::info!(
                    %request_id,
                    tickets_removed = removed.tickets_removed,
                    "speculative mint compensated"
                );
                Ok(MintOutcome::RolledBack { error, removed })
            }
        }
    }
}

/// Per-zone requested counts, validated against existence and capacity.
///
/// Zone names count with multiplicity: asking for `["VIP", "VIP"]` needs two
/// free VIP seats.
fn validate_zones(
    zones: &[stagepass_core::record::ZoneRecord],
    amount: u32,
    zone_names: &[String],
) -> Result<BTreeMap<String, u32>, MintError> {
    if zones.is_empty() {
        if !zone_names.is_empty() {
            return Err(MintError::Validation(
                "event defines no zones".to_string(),
            ));
        }
        return Ok(BTreeMap::new());
    }

    if zone_names.len() != amount as usize {
        return Err(MintError::Validation(format!(
            "expected exactly {amount} zone names, got {}",
            zone_names.len()
        )));
    }

    let mut requested: BTreeMap<String, u32> = BTreeMap::new();
    for name in zone_names {
        *requested.entry(name.clone()).or_insert(0) += 1;
    }
    for (name, count) in &requested {
        let zone = zones
            .iter()
            .find(|z| z.name == *name)
            .ok_or_else(|| MintError::Validation(format!("Zone {name} does not exist")))?;
        if zone.sold + count > zone.capacity {
            return Err(MintError::Validation(format!("Zone {name} is sold out")));
        }
    }
    Ok(requested)
}

/// One zone slot per ticket: the caller's zone names for zoned events, or
/// `amount` zone-less slots otherwise.
fn zone_slots(amount: u32, zone_names: &[String]) -> impl Iterator<Item = Option<String>> + '_ {
    let zoned = !zone_names.is_empty();
    (0..amount as usize).map(move |i| {
        if zoned {
            zone_names.get(i).cloned()
        } else {
            None
        }
    })
}
