//! Local projection records.
//!
//! These are the rows the reconciliation engine reads and writes through
//! [`crate::store::SyncStore`]. Records born from a client request before the
//! ledger confirms carry placeholder ids ([`LedgerEventId::Pending`],
//! [`LedgerTicketId::Pending`]); reconciliation later promotes them to the
//! confirmed ledger ids or the mint saga deletes them again.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::address::Address;
use crate::ledger::Amount;

/// Prefix shared by all placeholder ids.
const PENDING_PREFIX: &str = "pending-";

// ============================================================================
// Ledger-side ids with placeholder support
// ============================================================================

/// Identity of an event on the ledger, or a transient placeholder while the
/// local record awaits confirmation.
///
/// Placeholders render as `pending-<millis>-<nonce>`; at most one record may
/// own a given confirmed id.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum LedgerEventId {
    /// Real ledger id.
    Confirmed(u64),
    /// Transient placeholder token (everything after the `pending-` prefix).
    Pending(String),
}

impl LedgerEventId {
    /// Mint a fresh placeholder stamped with the creation time.
    #[must_use]
    pub fn placeholder(now: DateTime<Utc>) -> Self {
        let nonce: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self::Pending(format!("{}-{nonce:06}", now.timestamp_millis()))
    }

    /// Whether this id is still a placeholder.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The confirmed ledger id, when present.
    #[must_use]
    pub const fn as_confirmed(&self) -> Option<u64> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }
}

impl fmt::Display for LedgerEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{id}"),
            Self::Pending(token) => write!(f, "{PENDING_PREFIX}{token}"),
        }
    }
}

impl fmt::Debug for LedgerEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerEventId({self})")
    }
}

impl FromStr for LedgerEventId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(token) = s.strip_prefix(PENDING_PREFIX) {
            if token.is_empty() {
                return Err(format!("empty placeholder token: {s}"));
            }
            return Ok(Self::Pending(token.to_string()));
        }
        s.parse::<u64>()
            .map(Self::Confirmed)
            .map_err(|_| format!("invalid ledger event id: {s}"))
    }
}

/// Identity of a ticket on the ledger, or a placeholder correlating the
/// ticket to the mint request that speculatively created it.
///
/// Placeholders render as `pending-<request_id>-<nonce>`; every ticket of one
/// mint request shares the request id, so the whole batch can be promoted or
/// compensated together.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerTicketId {
    /// Real ledger id.
    Confirmed(u64),
    /// Transient placeholder.
    Pending {
        /// Mint request this ticket belongs to.
        request_id: Uuid,
        /// Disambiguates tickets within one request.
        nonce: u32,
    },
}

impl LedgerTicketId {
    /// Mint a fresh placeholder for one ticket of a mint request.
    #[must_use]
    pub fn placeholder(request_id: Uuid) -> Self {
        Self::Pending {
            request_id,
            nonce: rand::thread_rng().gen_range(0..1_000_000),
        }
    }

    /// Whether this id is still a placeholder.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// The confirmed ledger id, when present.
    #[must_use]
    pub const fn as_confirmed(&self) -> Option<u64> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending { .. } => None,
        }
    }

    /// The mint request id, when this is a placeholder.
    #[must_use]
    pub const fn request_id(&self) -> Option<Uuid> {
        match self {
            Self::Confirmed(_) => None,
            Self::Pending { request_id, .. } => Some(*request_id),
        }
    }
}

impl fmt::Display for LedgerTicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{id}"),
            Self::Pending { request_id, nonce } => {
                write!(f, "{PENDING_PREFIX}{request_id}-{nonce:06}")
            }
        }
    }
}

impl fmt::Debug for LedgerTicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerTicketId({self})")
    }
}

impl FromStr for LedgerTicketId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(token) = s.strip_prefix(PENDING_PREFIX) else {
            return s
                .parse::<u64>()
                .map(Self::Confirmed)
                .map_err(|_| format!("invalid ledger ticket id: {s}"));
        };
        let (id_part, nonce_part) = token
            .rsplit_once('-')
            .ok_or_else(|| format!("malformed placeholder: {s}"))?;
        let request_id = Uuid::parse_str(id_part)
            .map_err(|_| format!("malformed placeholder request id: {s}"))?;
        let nonce = nonce_part
            .parse::<u32>()
            .map_err(|_| format!("malformed placeholder nonce: {s}"))?;
        Ok(Self::Pending { request_id, nonce })
    }
}

macro_rules! string_serde {
    ($ty:ty, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl Visitor<'_> for IdVisitor {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_str<E: de::Error>(self, value: &str) -> Result<$ty, E> {
                        value.parse().map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(IdVisitor)
            }
        }
    };
}

string_serde!(LedgerEventId, "a ledger event id or pending placeholder");
string_serde!(LedgerTicketId, "a ledger ticket id or pending placeholder");

// ============================================================================
// Configuration fragments
// ============================================================================

/// Organizer-supplied resale terms, frozen once the event is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResaleConfig {
    /// Whether resale is allowed at all.
    pub enabled: bool,
    /// Price ceiling for resale listings.
    pub max_price: Option<Amount>,
    /// Earliest resale time, unix seconds.
    pub resale_start_time: Option<i64>,
    /// Latest resale time, unix seconds.
    pub resale_end_time: Option<i64>,
}

/// Commission split applied to marketplace sales, in whole percents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionConfig {
    /// Share paid out to the seller.
    pub seller_pct: u8,
    /// Share paid to the event organizer.
    pub organizer_pct: u8,
    /// Share kept by the platform.
    pub platform_pct: u8,
}

impl CommissionConfig {
    /// Whether the three shares add up to a full split.
    #[must_use]
    pub const fn is_valid_split(&self) -> bool {
        self.seller_pct as u16 + self.organizer_pct as u16 + self.platform_pct as u16 == 100
    }
}

impl Default for CommissionConfig {
    /// Platform default split, used on the degraded creation path when the
    /// ledger event carried no commission terms.
    fn default() -> Self {
        Self {
            seller_pct: 90,
            organizer_pct: 5,
            platform_pct: 5,
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Local projection of a ticketed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Local primary key.
    pub id: Uuid,
    /// Ledger id, or a placeholder while unconfirmed.
    pub ledger_event_id: LedgerEventId,
    /// Local account id of the organizer.
    pub organizer_id: Uuid,
    /// Content hash of the off-ledger event metadata.
    pub metadata_hash: String,
    /// Event start, unix seconds (ledger-sourced).
    pub event_start_time: i64,
    /// Total mintable tickets; organizer-authoritative, frozen on confirm.
    pub tickets_total: u32,
    /// Tickets known minted; maintained convergently by reconciliation.
    pub tickets_minted: u32,
    /// Resale terms; organizer-authoritative, frozen on confirm.
    pub resale: ResaleConfig,
    /// Commission split; organizer-authoritative, frozen on confirm.
    pub commission: CommissionConfig,
    /// When the local record was created.
    pub created_at: DateTime<Utc>,
    /// Last time a ledger event touched this record.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Whether the record still awaits ledger confirmation.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.ledger_event_id.is_pending()
    }
}

/// Ticket lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Valid for entry.
    Active,
    /// Scanned at the venue.
    Used,
    /// Invalidated.
    Cancelled,
}

impl TicketStatus {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Used => "USED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "USED" => Ok(Self::Used),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown ticket status: {other}")),
        }
    }
}

/// Local projection of a single ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Ledger id, or a placeholder correlating it to a mint request.
    pub ledger_ticket_id: LedgerTicketId,
    /// Local id of the owning event record.
    pub event_id: Uuid,
    /// Zone name, when the event is zoned.
    pub zone: Option<String>,
    /// Current owner address.
    pub owner: Address,
    /// Address the ticket was originally minted to.
    pub original_buyer: Address,
    /// Lifecycle status.
    pub status: TicketStatus,
    /// Mint time.
    pub minted_at: DateTime<Utc>,
    /// Scan time; first write wins, never overwritten.
    pub used_at: Option<DateTime<Utc>>,
    /// Last time a ledger event touched this record.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl TicketRecord {
    /// Whether the record is a speculative placeholder.
    #[must_use]
    pub const fn is_speculative(&self) -> bool {
        self.ledger_ticket_id.is_pending()
    }
}

/// Seating zone capacity counter for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    /// Local id of the owning event record.
    pub event_id: Uuid,
    /// Zone name, unique per event.
    pub name: String,
    /// Maximum tickets in this zone.
    pub capacity: u32,
    /// Tickets sold (including speculative ones awaiting confirmation).
    pub sold: u32,
}

impl ZoneRecord {
    /// Seats still available.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.sold)
    }
}

/// Marketplace listing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    /// Open for purchase.
    Active,
    /// Bought; terminal.
    Sold,
    /// Withdrawn by the seller; terminal.
    Cancelled,
}

impl ListingStatus {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Sold => "SOLD",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "SOLD" => Ok(Self::Sold),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown listing status: {other}")),
        }
    }
}

/// Local projection of a marketplace listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Listed ticket's confirmed ledger id.
    pub ticket_id: u64,
    /// Seller address.
    pub seller: Address,
    /// Asking price.
    pub price: Amount,
    /// Listing status.
    pub status: ListingStatus,
    /// Buyer, once sold.
    pub sold_to: Option<Address>,
    /// Sale time, once sold.
    pub sold_at: Option<DateTime<Utc>>,
}

/// The slice of the platform's user model this engine needs: a local account
/// with an optional wallet on file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Local primary key.
    pub id: Uuid,
    /// Wallet address on file, when the user has linked one.
    pub wallet: Option<Address>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_id_round_trips_both_forms() {
        let confirmed = LedgerEventId::Confirmed(42);
        assert_eq!(confirmed.to_string().parse::<LedgerEventId>().ok(), Some(confirmed));

        let pending = LedgerEventId::Pending("1722470400123-000042".to_string());
        let text = pending.to_string();
        assert!(text.starts_with("pending-"));
        assert_eq!(text.parse::<LedgerEventId>().ok(), Some(pending));
    }

    #[test]
    fn ticket_placeholder_keeps_its_request_id() {
        let request_id = Uuid::new_v4();
        let id = LedgerTicketId::placeholder(request_id);
        assert!(id.is_pending());
        assert_eq!(id.request_id(), Some(request_id));

        let parsed: LedgerTicketId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.request_id(), Some(request_id));
    }

    #[test]
    fn confirmed_ticket_id_parses_from_decimal() {
        assert_eq!(
            "1234".parse::<LedgerTicketId>().ok(),
            Some(LedgerTicketId::Confirmed(1234))
        );
        assert!("pending-notauuid-1".parse::<LedgerTicketId>().is_err());
    }

    #[test]
    fn default_commission_is_a_full_split() {
        assert!(CommissionConfig::default().is_valid_split());
        assert!(!CommissionConfig {
            seller_pct: 50,
            organizer_pct: 10,
            platform_pct: 10
        }
        .is_valid_split());
    }
}
