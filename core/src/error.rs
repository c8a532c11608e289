//! Engine error taxonomy.
//!
//! Only the synchronous mint path surfaces errors to a caller
//! ([`MintError`]); reconciliation failures ([`SyncError`]) are classified as
//! transient or permanent and drive queue retry/dead-letter behavior instead
//! of propagating anywhere.

use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Failure of a synchronous mint request.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MintError {
    /// Bad input; never retried.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Idempotency guard tripped; surfaced to the caller.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The ledger call failed; the speculative writes were compensated.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The local store failed before or after the ledger call.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of an asynchronous reconciliation step.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    /// Store contention or a network blip; retried with backoff.
    #[error("transient sync failure: {0}")]
    Transient(String),
    /// Missing referenced entity or malformed data; dead-lettered without
    /// retry noise.
    #[error("permanent sync failure: {0}")]
    Permanent(String),
}

impl SyncError {
    /// Whether the queue should retry this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

impl From<LedgerError> for SyncError {
    fn from(err: LedgerError) -> Self {
        match err {
            // The node will come back; replaying the job is safe.
            LedgerError::Rpc(_) | LedgerError::NotConnected => Self::Transient(err.to_string()),
            // Retrying cannot fix a rejection or a decode failure.
            LedgerError::Rejected(_) | LedgerError::Decode(_) => Self::Permanent(err.to_string()),
        }
    }
}
