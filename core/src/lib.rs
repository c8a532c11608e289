//! # StagePass Core
//!
//! Domain types and service seams for the StagePass ledger sync engine.
//!
//! The authoritative state of events and tickets lives on an external ledger
//! program; this workspace reconciles it into a relational read model. This
//! crate fixes the shapes both sides agree on and contains no I/O:
//!
//! - **Ledger primitives**: [`ledger::ActorId`], [`ledger::Amount`],
//!   receipts, raw notifications, and the [`ledger::LedgerClient`] seam.
//! - **Address codec**: [`address::Address`], the checksummed human encoding
//!   of an actor id.
//! - **Events**: the [`event::DomainEvent`] union and its wire decoding.
//! - **Records**: the local projection rows in [`record`], including the
//!   placeholder-id machinery for speculative writes.
//! - **Jobs**: the durable [`job::SyncJob`] shape and backoff policy.
//! - **Store seam**: the [`store::SyncStore`] repository facade.
//! - **Errors**: [`error::MintError`] and [`error::SyncError`].

pub mod address;
pub mod dto;
pub mod environment;
pub mod error;
pub mod event;
pub mod job;
pub mod ledger;
pub mod record;
pub mod store;

pub use address::Address;
pub use error::{MintError, SyncError};
pub use event::DomainEvent;
pub use job::{JobKind, SyncJob};
pub use ledger::{ActorId, Amount, LedgerClient, LedgerError, TxReceipt};
pub use record::{EventRecord, LedgerEventId, LedgerTicketId, TicketRecord};
pub use store::{StoreError, SyncStore};
