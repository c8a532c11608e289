//! Job payload shapes consumed by the reconciler.
//!
//! The ingestor maps each decoded [`crate::event::DomainEvent`] into one of
//! these DTOs and enqueues it as a JSON job payload; the worker hands the
//! deserialized DTO to the matching reconciler entry point. Keeping the
//! queue payloads JSON makes dead letters inspectable by an operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::event::{
    DomainEvent, EventCreatedPayload, ListingCancelledPayload, TicketListedPayload,
    TicketTradePayload, TicketUsedPayload, TicketsMintedPayload,
};
use crate::ledger::{ActorId, Amount};
use crate::record::{CommissionConfig, ResaleConfig};

/// `EventCreated` reconciliation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEventDto {
    /// Ledger event id.
    pub event_id: u64,
    /// Organizer actor.
    pub organizer: ActorId,
    /// Content hash of the off-ledger metadata.
    pub metadata_hash: String,
    /// Event start, unix seconds.
    pub event_start_time: i64,
    /// Total mintable tickets.
    pub tickets_total: u32,
    /// Resale terms, when the ledger event carried them.
    pub resale: Option<ResaleConfig>,
    /// Commission split, when the ledger event carried it.
    pub commission: Option<CommissionConfig>,
}

impl From<EventCreatedPayload> for SyncEventDto {
    fn from(p: EventCreatedPayload) -> Self {
        Self {
            event_id: p.event_id,
            organizer: p.organizer,
            metadata_hash: p.metadata_hash,
            event_start_time: p.start_time,
            tickets_total: p.tickets_total,
            resale: p.resale,
            commission: p.commission,
        }
    }
}

/// `TicketsMinted` reconciliation input (the whole batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBatchDto {
    /// Ledger event id the tickets belong to.
    pub event_id: u64,
    /// Buyer actor for the whole batch.
    pub buyer: ActorId,
    /// Minted ticket ids.
    pub ticket_ids: Vec<u64>,
    /// Mint time, unix seconds.
    pub minted_at: i64,
}

impl From<TicketsMintedPayload> for TicketBatchDto {
    fn from(p: TicketsMintedPayload) -> Self {
        Self {
            event_id: p.event_id,
            buyer: p.buyer,
            ticket_ids: p.ticket_ids,
            minted_at: p.minted_at,
        }
    }
}

/// The per-ticket merge shape the reconciler upserts, built from the ledger
/// ticket detail (with address decoding already applied).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTicketDto {
    /// Confirmed ledger ticket id.
    pub ticket_id: u64,
    /// Ledger event id the ticket belongs to.
    pub event_id: u64,
    /// Address the ticket was originally minted to.
    pub original_buyer: Address,
    /// Current owner address.
    pub current_owner: Address,
    /// Zone name, when the event is zoned.
    pub zone: Option<String>,
    /// Whether the ticket has been scanned.
    pub used: bool,
    /// Mint time.
    pub minted_at: DateTime<Utc>,
}

/// `TicketUsed` reconciliation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUsedDto {
    /// Scanned ticket id.
    pub ticket_id: u64,
    /// Scan time reported by the ledger, unix seconds.
    pub used_at: i64,
}

impl From<TicketUsedPayload> for TicketUsedDto {
    fn from(p: TicketUsedPayload) -> Self {
        Self {
            ticket_id: p.ticket_id,
            used_at: p.used_at,
        }
    }
}

/// `TicketResold` / `TicketSold` reconciliation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketResaleDto {
    /// Traded ticket id.
    pub ticket_id: u64,
    /// Previous owner actor.
    pub seller: ActorId,
    /// New owner actor.
    pub buyer: ActorId,
    /// Sale price.
    pub price: Amount,
    /// Trade time, unix seconds.
    pub sold_at: i64,
}

impl From<TicketTradePayload> for TicketResaleDto {
    fn from(p: TicketTradePayload) -> Self {
        Self {
            ticket_id: p.ticket_id,
            seller: p.seller,
            buyer: p.buyer,
            price: p.price,
            sold_at: p.traded_at,
        }
    }
}

/// Notification-only marketplace activity; logged, never projected here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingActivityDto {
    /// A listing was opened.
    Listed {
        /// Listed ticket id.
        ticket_id: u64,
        /// Asking price.
        price: Amount,
    },
    /// A listing was withdrawn.
    Cancelled {
        /// Ticket whose listing was withdrawn.
        ticket_id: u64,
    },
}

impl From<TicketListedPayload> for ListingActivityDto {
    fn from(p: TicketListedPayload) -> Self {
        Self::Listed {
            ticket_id: p.ticket_id,
            price: p.price,
        }
    }
}

impl From<ListingCancelledPayload> for ListingActivityDto {
    fn from(p: ListingCancelledPayload) -> Self {
        Self::Cancelled {
            ticket_id: p.ticket_id,
        }
    }
}

/// Map a decoded domain event to the DTO its sync job will carry.
///
/// # Errors
///
/// Returns the serde error if DTO serialization fails (practically never).
pub fn job_payload_for(event: DomainEvent) -> Result<serde_json::Value, serde_json::Error> {
    match event {
        DomainEvent::EventCreated(p) => serde_json::to_value(SyncEventDto::from(p)),
        DomainEvent::TicketsMinted(p) => serde_json::to_value(TicketBatchDto::from(p)),
        DomainEvent::TicketResold(p) | DomainEvent::TicketSold(p) => {
            serde_json::to_value(TicketResaleDto::from(p))
        }
        DomainEvent::TicketUsed(p) => serde_json::to_value(TicketUsedDto::from(p)),
        DomainEvent::TicketListed(p) => serde_json::to_value(ListingActivityDto::from(p)),
        DomainEvent::ListingCancelled(p) => serde_json::to_value(ListingActivityDto::from(p)),
    }
}
