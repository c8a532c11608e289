//! # StagePass Testing
//!
//! Deterministic test doubles for the ledger sync engine:
//!
//! - [`FixedClock`]: frozen, manually advanceable time, so recency-window
//!   logic (pending-record matching, the 90-second mint guard) is exact.
//! - [`InMemoryStore`]: a complete [`stagepass_core::store::SyncStore`] over
//!   hash maps, with transient-failure injection for queue retry tests.
//! - [`InMemoryLedger`]: a scriptable
//!   [`stagepass_core::ledger::LedgerClient`] that records write calls,
//!   injects failures, and pushes notifications to subscribers.
//!
//! ## Example
//!
//! ```ignore
//! let clock = Arc::new(FixedClock::at_epoch());
//! let store = Arc::new(InMemoryStore::new());
//! let ledger = Arc::new(InMemoryLedger::new(ActorId::new([9u8; 32])));
//!
//! let orchestrator = MintOrchestrator::new(store, ledger, clock, ...);
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

mod ledger;
mod store;

pub use ledger::InMemoryLedger;
pub use store::InMemoryStore;

use chrono::{DateTime, Duration, TimeZone, Utc};
use stagepass_core::environment::Clock;
use std::sync::Mutex;

/// Fixed clock for deterministic tests.
///
/// Returns the same instant until advanced, making every recency-window
/// comparison in the engine reproducible.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// A clock frozen at the given instant.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// A clock frozen at a fixed, arbitrary test epoch.
    #[must_use]
    pub fn at_epoch() -> Self {
        // 2025-06-01T12:00:00Z — nothing magic, just stable.
        Self::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_only_moves_when_advanced() {
        let clock = FixedClock::at_epoch();
        let first = clock.now();
        assert_eq!(clock.now(), first);
        clock.advance_secs(90);
        assert_eq!(clock.now(), first + Duration::seconds(90));
    }
}
