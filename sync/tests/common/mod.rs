//! Shared fixtures for the engine test suites.

#![allow(clippy::unwrap_used)]
#![allow(dead_code)] // Each integration test binary uses a subset.

use chrono::{DateTime, Utc};
use stagepass_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use stagepass_core::address::Address;
use stagepass_core::ledger::{ActorId, EventDetail, TicketDetail};
use stagepass_core::record::{
    AccountRecord, CommissionConfig, EventRecord, LedgerEventId, ResaleConfig, ZoneRecord,
};
use stagepass_core::store::SyncStore;
use stagepass_testing::{FixedClock, InMemoryLedger, InMemoryStore};

pub const PROGRAM: ActorId = ActorId::new([0xAA; 32]);

pub fn actor(n: u8) -> ActorId {
    ActorId::new([n; 32])
}

pub fn address(n: u8) -> Address {
    Address::from_actor(&actor(n))
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<FixedClock>,
}

pub fn fixture() -> Fixture {
    Fixture {
        store: Arc::new(InMemoryStore::new()),
        ledger: Arc::new(InMemoryLedger::new(PROGRAM)),
        clock: Arc::new(FixedClock::at_epoch()),
    }
}

impl Fixture {
    pub async fn seed_account(&self, wallet_seed: u8) -> Uuid {
        let account = AccountRecord {
            id: Uuid::new_v4(),
            wallet: Some(address(wallet_seed)),
        };
        self.store.insert_account(&account).await.unwrap();
        account.id
    }

    pub async fn seed_confirmed_event(
        &self,
        ledger_id: u64,
        organizer_id: Uuid,
        tickets_total: u32,
    ) -> EventRecord {
        let record = EventRecord {
            id: Uuid::new_v4(),
            ledger_event_id: LedgerEventId::Confirmed(ledger_id),
            organizer_id,
            metadata_hash: format!("hash-{ledger_id}"),
            event_start_time: 1_750_000_000,
            tickets_total,
            tickets_minted: 0,
            resale: ResaleConfig::default(),
            commission: CommissionConfig::default(),
            created_at: self.clock.now(),
            last_synced_at: None,
        };
        self.store.insert_event(&record).await.unwrap();
        record
    }

    pub async fn seed_pending_event(
        &self,
        organizer_id: Uuid,
        metadata_hash: &str,
        created_at: DateTime<Utc>,
        tickets_total: u32,
        resale: ResaleConfig,
    ) -> EventRecord {
        let record = EventRecord {
            id: Uuid::new_v4(),
            ledger_event_id: LedgerEventId::placeholder(created_at),
            organizer_id,
            metadata_hash: metadata_hash.to_string(),
            event_start_time: 1_750_000_000,
            tickets_total,
            tickets_minted: 0,
            resale,
            commission: CommissionConfig::default(),
            created_at,
            last_synced_at: None,
        };
        self.store.insert_event(&record).await.unwrap();
        record
    }

    pub async fn seed_zone(&self, event_id: Uuid, name: &str, capacity: u32, sold: u32) {
        self.store
            .insert_zone(&ZoneRecord {
                event_id,
                name: name.to_string(),
                capacity,
                sold,
            })
            .await
            .unwrap();
    }

    pub fn seed_ticket_detail(
        &self,
        ticket_id: u64,
        event_ledger_id: u64,
        owner: ActorId,
        zone: Option<&str>,
        used: bool,
    ) {
        self.ledger.put_ticket_detail(TicketDetail {
            id: ticket_id,
            event_id: event_ledger_id,
            original_buyer: owner,
            current_owner: owner,
            zone: zone.map(str::to_string),
            used,
            minted_at: self.clock.now().timestamp(),
        });
    }

    pub fn seed_event_detail(&self, ledger_id: u64, organizer: ActorId, tickets_total: u32) {
        self.ledger.put_event_detail(EventDetail {
            id: ledger_id,
            organizer,
            metadata_hash: format!("hash-{ledger_id}"),
            start_time: 1_750_000_000,
            tickets_total,
            tickets_minted: 0,
            resale: None,
            commission: None,
        });
    }
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
