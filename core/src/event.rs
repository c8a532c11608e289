//! Ledger domain events and their wire decoding.
//!
//! Program notifications arrive as a bincode [`NotificationEnvelope`] naming
//! the emitting service and event, followed by the bincode body of the
//! per-event payload. [`DomainEvent::decode`] routes on those names; anything
//! from a foreign service, an unknown event, or with a malformed body is a
//! [`EventDecodeError`] the ingestor logs and drops.

use serde::{Deserialize, Serialize};

use crate::ledger::{ActorId, Amount};
use crate::record::{CommissionConfig, ResaleConfig};

/// Service name the ticketing program emits under.
pub const TICKETING_SERVICE: &str = "Ticketing";

/// Errors from decoding a raw notification payload.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EventDecodeError {
    /// The envelope itself did not decode.
    #[error("malformed notification envelope: {0}")]
    Envelope(String),
    /// The envelope names a service this engine does not consume.
    #[error("notification from foreign service {0:?}")]
    ForeignService(String),
    /// The envelope names an event this engine does not know.
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    /// The event body did not decode.
    #[error("malformed body for {event}: {reason}")]
    Body {
        /// Event name from the envelope.
        event: String,
        /// Underlying decode failure.
        reason: String,
    },
}

/// Wire envelope prefixing every program notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// Emitting service name.
    pub service: String,
    /// Event name within the service.
    pub event: String,
    /// Bincode-encoded event payload.
    pub body: Vec<u8>,
}

// ============================================================================
// Event payloads
// ============================================================================

/// `EventCreated`: a new event exists on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCreatedPayload {
    /// Ledger event id.
    pub event_id: u64,
    /// Organizer actor.
    pub organizer: ActorId,
    /// Content hash of the off-ledger metadata.
    pub metadata_hash: String,
    /// Event start, unix seconds.
    pub start_time: i64,
    /// Total mintable tickets.
    pub tickets_total: u32,
    /// Resale terms, when the creation carried them.
    pub resale: Option<ResaleConfig>,
    /// Commission split, when the creation carried it.
    pub commission: Option<CommissionConfig>,
}

/// `TicketsMinted`: a batch of tickets was minted to one buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketsMintedPayload {
    /// Ledger event id the tickets belong to.
    pub event_id: u64,
    /// Buyer actor for the whole batch.
    pub buyer: ActorId,
    /// Minted ticket ids.
    pub ticket_ids: Vec<u64>,
    /// Mint time, unix seconds.
    pub minted_at: i64,
}

/// `TicketResold` / `TicketSold`: ownership changed hands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTradePayload {
    /// Traded ticket id.
    pub ticket_id: u64,
    /// Previous owner.
    pub seller: ActorId,
    /// New owner.
    pub buyer: ActorId,
    /// Sale price.
    pub price: Amount,
    /// Trade time, unix seconds.
    pub traded_at: i64,
}

/// `TicketUsed`: a ticket was scanned at the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUsedPayload {
    /// Scanned ticket id.
    pub ticket_id: u64,
    /// Scan time, unix seconds.
    pub used_at: i64,
}

/// `TicketListed`: a resale listing was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketListedPayload {
    /// Listed ticket id.
    pub ticket_id: u64,
    /// Seller actor.
    pub seller: ActorId,
    /// Asking price.
    pub price: Amount,
    /// Listing time, unix seconds.
    pub listed_at: i64,
}

/// `ListingCancelled`: a resale listing was withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCancelledPayload {
    /// Ticket whose listing was withdrawn.
    pub ticket_id: u64,
    /// Cancellation time, unix seconds.
    pub cancelled_at: i64,
}

// ============================================================================
// The union
// ============================================================================

/// A decoded ticketing program event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A new event exists on the ledger.
    EventCreated(EventCreatedPayload),
    /// A batch of tickets was minted.
    TicketsMinted(TicketsMintedPayload),
    /// A ticket changed hands on the resale market.
    TicketResold(TicketTradePayload),
    /// A ticket was sold through a marketplace listing.
    TicketSold(TicketTradePayload),
    /// A ticket was scanned.
    TicketUsed(TicketUsedPayload),
    /// A resale listing was opened.
    TicketListed(TicketListedPayload),
    /// A resale listing was withdrawn.
    ListingCancelled(ListingCancelledPayload),
}

impl DomainEvent {
    /// The wire event name, as carried in the envelope.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EventCreated(_) => "EventCreated",
            Self::TicketsMinted(_) => "TicketsMinted",
            Self::TicketResold(_) => "TicketResold",
            Self::TicketSold(_) => "TicketSold",
            Self::TicketUsed(_) => "TicketUsed",
            Self::TicketListed(_) => "TicketListed",
            Self::ListingCancelled(_) => "ListingCancelled",
        }
    }

    /// Decode a raw notification payload by its (service, event) names.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] for a malformed envelope, a foreign
    /// service, an unknown event name, or a malformed body.
    pub fn decode(payload: &[u8]) -> Result<Self, EventDecodeError> {
        let envelope: NotificationEnvelope = bincode::deserialize(payload)
            .map_err(|e| EventDecodeError::Envelope(e.to_string()))?;
        if envelope.service != TICKETING_SERVICE {
            return Err(EventDecodeError::ForeignService(envelope.service));
        }
        let body = envelope.body.as_slice();
        let event = envelope.event.as_str();
        let decoded = match event {
            "EventCreated" => bincode::deserialize(body).map(Self::EventCreated),
            "TicketsMinted" => bincode::deserialize(body).map(Self::TicketsMinted),
            "TicketResold" => bincode::deserialize(body).map(Self::TicketResold),
            "TicketSold" => bincode::deserialize(body).map(Self::TicketSold),
            "TicketUsed" => bincode::deserialize(body).map(Self::TicketUsed),
            "TicketListed" => bincode::deserialize(body).map(Self::TicketListed),
            "ListingCancelled" => bincode::deserialize(body).map(Self::ListingCancelled),
            other => return Err(EventDecodeError::UnknownEvent(other.to_string())),
        };
        decoded.map_err(|e| EventDecodeError::Body {
            event: event.to_string(),
            reason: e.to_string(),
        })
    }

    /// Encode this event as a full notification payload (envelope + body).
    ///
    /// The production node does this on the other side of the wire; the
    /// engine uses it for test fixtures and the in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns the bincode error when serialization fails (practically never
    /// for these payloads).
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        let body = match self {
            Self::EventCreated(p) => bincode::serialize(p),
            Self::TicketsMinted(p) => bincode::serialize(p),
            Self::TicketResold(p) | Self::TicketSold(p) => bincode::serialize(p),
            Self::TicketUsed(p) => bincode::serialize(p),
            Self::TicketListed(p) => bincode::serialize(p),
            Self::ListingCancelled(p) => bincode::serialize(p),
        }?;
        bincode::serialize(&NotificationEnvelope {
            service: TICKETING_SERVICE.to_string(),
            event: self.name().to_string(),
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_mint() -> DomainEvent {
        DomainEvent::TicketsMinted(TicketsMintedPayload {
            event_id: 7,
            buyer: ActorId::new([3u8; 32]),
            ticket_ids: vec![100, 101, 102],
            minted_at: 1_722_470_400,
        })
    }

    #[test]
    fn envelope_round_trip() {
        let event = sample_mint();
        let wire = event.encode().unwrap();
        assert_eq!(DomainEvent::decode(&wire).unwrap(), event);
    }

    #[test]
    fn foreign_service_is_rejected() {
        let wire = bincode::serialize(&NotificationEnvelope {
            service: "Marketplace".to_string(),
            event: "EventCreated".to_string(),
            body: vec![],
        })
        .unwrap();
        assert_eq!(
            DomainEvent::decode(&wire),
            Err(EventDecodeError::ForeignService("Marketplace".to_string()))
        );
    }

    #[test]
    fn unknown_event_is_rejected() {
        let wire = bincode::serialize(&NotificationEnvelope {
            service: TICKETING_SERVICE.to_string(),
            event: "EventRenamed".to_string(),
            body: vec![],
        })
        .unwrap();
        assert_eq!(
            DomainEvent::decode(&wire),
            Err(EventDecodeError::UnknownEvent("EventRenamed".to_string()))
        );
    }

    #[test]
    fn malformed_body_is_rejected() {
        let wire = bincode::serialize(&NotificationEnvelope {
            service: TICKETING_SERVICE.to_string(),
            event: "TicketUsed".to_string(),
            body: vec![1, 2],
        })
        .unwrap();
        assert!(matches!(
            DomainEvent::decode(&wire),
            Err(EventDecodeError::Body { .. })
        ));
    }

    #[test]
    fn garbage_envelope_is_rejected() {
        assert!(matches!(
            DomainEvent::decode(&[0xff, 0xfe, 0xfd]),
            Err(EventDecodeError::Envelope(_))
        ));
    }
}
