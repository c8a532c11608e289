//! Ledger-native primitives and the client seam.
//!
//! Everything the reconciliation engine knows about the ledger goes through
//! the [`LedgerClient`] trait: write operations return a [`TxReceipt`], read
//! operations return a decoded detail struct or `None`, and
//! [`LedgerClient::subscribe`] yields a [`LedgerSubscription`] delivering raw
//! push notifications. The wallet/RPC wrapper behind the trait is an external
//! collaborator; this crate only fixes its shape.
//!
//! Ledger amounts are 256-bit unsigned integers and actor identity is a
//! 32-byte key. Both are modeled as fixed-width types ([`Amount`],
//! [`ActorId`]) — never floating point, never growable buffers.

use async_trait::async_trait;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::record::{CommissionConfig, ResaleConfig};

/// Errors surfaced by the ledger client.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    /// RPC transport failure (node unreachable, timeout, dropped stream).
    #[error("ledger rpc failure: {0}")]
    Rpc(String),
    /// The program accepted the message but rejected the call.
    #[error("ledger rejected the call: {0}")]
    Rejected(String),
    /// No connection to the ledger node is currently established.
    #[error("not connected to the ledger node")]
    NotConnected,
    /// A reply or notification could not be decoded.
    #[error("failed to decode ledger data: {0}")]
    Decode(String),
}

// ============================================================================
// ActorId
// ============================================================================

/// 32-byte ledger actor identity.
///
/// The all-zero id is the broadcast destination sentinel used by program
/// event notifications.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId([u8; 32]);

impl ActorId {
    /// The broadcast destination sentinel.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Wrap a raw 32-byte key.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the broadcast sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({self})")
    }
}

impl FromStr for ActorId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = parse_hex_exact::<32>(digits)
            .ok_or_else(|| LedgerError::Decode(format!("invalid actor id: {s}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ActorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ActorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = ActorId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 0x-prefixed 64-digit hex string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ActorId, E> {
                ActorId::from_str(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

// ============================================================================
// Amount
// ============================================================================

/// Fixed-width 256-bit unsigned ledger amount, big-endian.
///
/// The engine only carries and compares amounts; it never does arithmetic on
/// them, so the representation is a plain byte array with numeric ordering
/// (big-endian bytes order exactly like the integers they encode).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Amount([u8; 32]);

impl Amount {
    /// Zero.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Wrap raw big-endian bytes.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the big-endian bytes.
    #[must_use]
    pub const fn as_be_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build from a `u128` (always fits).
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        let src = value.to_be_bytes();
        let mut i = 0;
        while i < 16 {
            bytes[16 + i] = src[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Narrow to `u128` if the upper 128 bits are zero.
    #[must_use]
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self::from_u128(u128::from(value))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self::from_u128(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.0.iter().position(|b| *b != 0);
        match first {
            None => write!(f, "0x0"),
            Some(i) => {
                write!(f, "0x{:x}", self.0[i])?;
                for byte in &self.0[i + 1..] {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| LedgerError::Decode(format!("amount missing 0x prefix: {s}")))?;
        if digits.is_empty() || digits.len() > 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(LedgerError::Decode(format!("invalid amount: {s}")));
        }
        let mut bytes = [0u8; 32];
        // Right-align the digits so short encodings parse as their value.
        let mut nibbles = [0u8; 64];
        let offset = 64 - digits.len();
        for (i, b) in digits.bytes().enumerate() {
            let value = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                _ => return Err(LedgerError::Decode(format!("invalid amount: {s}"))),
            };
            nibbles[offset + i] = value;
        }
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (nibbles[i * 2] << 4) | nibbles[i * 2 + 1];
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 0x-prefixed hex amount string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
                Amount::from_str(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(AmountVisitor)
    }
}

/// Parse exactly `N` bytes of hex, rejecting anything else.
fn parse_hex_exact<const N: usize>(digits: &str) -> Option<[u8; N]> {
    if digits.len() != N * 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(digits.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}

// ============================================================================
// Receipts, notifications, read models
// ============================================================================

/// Receipt returned by every ledger write operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash on the ledger.
    pub tx_hash: String,
    /// Hash of the block the transaction landed in.
    pub block_hash: String,
    /// Decoded program reply, or the raw reply when decoding is not possible.
    #[serde(default)]
    pub response: serde_json::Value,
}

/// One raw push message from the ledger node's notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// The program (actor) that emitted the message.
    pub source: ActorId,
    /// Destination actor; program events carry the broadcast sentinel.
    pub destination: ActorId,
    /// Encoded notification envelope (see [`crate::event`]).
    pub payload: Vec<u8>,
}

/// Decoded on-ledger event state, as returned by the `event` read op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    /// Ledger event id.
    pub id: u64,
    /// Organizer actor.
    pub organizer: ActorId,
    /// Content hash of the off-ledger event metadata.
    pub metadata_hash: String,
    /// Event start, unix seconds.
    pub start_time: i64,
    /// Total mintable tickets.
    pub tickets_total: u32,
    /// Tickets minted so far.
    pub tickets_minted: u32,
    /// Resale terms, when the program stores them.
    pub resale: Option<ResaleConfig>,
    /// Commission split, when the program stores it.
    pub commission: Option<CommissionConfig>,
}

/// Decoded on-ledger ticket state, as returned by the `ticket` read op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDetail {
    /// Ledger ticket id.
    pub id: u64,
    /// Owning ledger event id.
    pub event_id: u64,
    /// Actor the ticket was originally minted to.
    pub original_buyer: ActorId,
    /// Current owner actor.
    pub current_owner: ActorId,
    /// Zone name, when the event is zoned.
    pub zone: Option<String>,
    /// Whether the ticket has been scanned.
    pub used: bool,
    /// Mint time, unix seconds.
    pub minted_at: i64,
}

/// Arguments for the `create_event` write op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEventArgs {
    /// Content hash of the off-ledger event metadata.
    pub metadata_hash: String,
    /// Event start, unix seconds.
    pub start_time: i64,
    /// Total mintable tickets.
    pub tickets_total: u32,
    /// Resale terms to store on the program.
    pub resale: ResaleConfig,
    /// Commission split to store on the program.
    pub commission: CommissionConfig,
}

// ============================================================================
// Subscriptions
// ============================================================================

/// A live notification subscription.
///
/// Holds the receiving half of the notification channel plus the unsubscribe
/// function, modeled as a scoped resource: dropping the subscription runs the
/// disposer and detaches from the node stream.
pub struct LedgerSubscription {
    receiver: mpsc::Receiver<RawNotification>,
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl LedgerSubscription {
    /// Bundle a receiver with its unsubscribe function.
    #[must_use]
    pub fn new(
        receiver: mpsc::Receiver<RawNotification>,
        disposer: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            receiver,
            disposer: Some(disposer),
        }
    }

    /// Receive the next notification; `None` when the stream has closed.
    pub async fn recv(&mut self) -> Option<RawNotification> {
        self.receiver.recv().await
    }
}

impl Drop for LedgerSubscription {
    fn drop(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl fmt::Debug for LedgerSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerSubscription").finish_non_exhaustive()
    }
}

// ============================================================================
// Client trait
// ============================================================================

/// The ledger RPC/wallet wrapper, consumed as a given API.
///
/// Write operations submit a transaction and wait for inclusion; read
/// operations query program state; [`LedgerClient::subscribe`] attaches to the
/// node's push notification stream for one service.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The ticketing program's actor id (notification origin filter).
    fn program_id(&self) -> ActorId;

    /// Whether a node connection is currently established.
    async fn is_connected(&self) -> bool;

    /// Create an event on the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport failure or program rejection.
    async fn create_event(&self, args: CreateEventArgs) -> Result<TxReceipt, LedgerError>;

    /// Mint `amount` tickets for `event_id` to `buyer`, one per zone slot.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport failure or program rejection.
    async fn mint_tickets(
        &self,
        event_id: u64,
        buyer: ActorId,
        amount: u32,
        zones: &[String],
    ) -> Result<TxReceipt, LedgerError>;

    /// Mark a ticket used (scanned).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport failure or program rejection.
    async fn mark_used(&self, ticket_id: u64) -> Result<TxReceipt, LedgerError>;

    /// List a ticket on the resale market.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport failure or program rejection.
    async fn list_ticket(&self, ticket_id: u64, price: Amount) -> Result<TxReceipt, LedgerError>;

    /// Buy a listed ticket.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport failure or program rejection.
    async fn buy_ticket(&self, listing_id: u64) -> Result<TxReceipt, LedgerError>;

    /// Cancel a listing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport failure or program rejection.
    async fn cancel_listing(&self, listing_id: u64) -> Result<TxReceipt, LedgerError>;

    /// Read an event's program state; `None` when the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport or decode failure.
    async fn event(&self, event_id: u64) -> Result<Option<EventDetail>, LedgerError>;

    /// Read a ticket's program state; `None` when the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on transport or decode failure.
    async fn ticket(&self, ticket_id: u64) -> Result<Option<TicketDetail>, LedgerError>;

    /// Attach to the push notification stream for one service.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotConnected`] when no node connection exists.
    async fn subscribe(&self, service: &str) -> Result<LedgerSubscription, LedgerError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn actor_id_hex_round_trip() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xde;
        bytes[31] = 0x01;
        let actor = ActorId::new(bytes);
        let text = actor.to_string();
        assert!(text.starts_with("0xde"));
        assert_eq!(text.parse::<ActorId>().ok(), Some(actor));
    }

    #[test]
    fn actor_id_rejects_short_hex() {
        assert!("0xdead".parse::<ActorId>().is_err());
    }

    #[test]
    fn amount_orders_numerically() {
        let small = Amount::from(5u64);
        let large = Amount::from(1_000_000u64);
        let huge = Amount::from_be_bytes({
            let mut b = [0u8; 32];
            b[0] = 1;
            b
        });
        assert!(small < large);
        assert!(large < huge);
    }

    #[test]
    fn amount_u128_round_trip() {
        let value = 340_282_366_920_938_463_463u128;
        assert_eq!(Amount::from(value).to_u128(), Some(value));
    }

    #[test]
    fn amount_display_parse_round_trip() {
        let amount = Amount::from(0xdead_beefu64);
        assert_eq!(amount.to_string(), "0xdeadbeef");
        assert_eq!("0xdeadbeef".parse::<Amount>().ok(), Some(amount));
        assert_eq!(Amount::ZERO.to_string(), "0x0");
        assert_eq!("0x0".parse::<Amount>().ok(), Some(Amount::ZERO));
    }

    #[test]
    fn oversized_amount_does_not_narrow() {
        let mut bytes = [0u8; 32];
        bytes[3] = 7;
        assert_eq!(Amount::from_be_bytes(bytes).to_u128(), None);
    }
}
