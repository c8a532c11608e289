//! Ingestion tests: origin/destination filtering, decode-and-drop, the
//! bounded connectivity wait, and the full emit → ingest → reconcile path
//! through a running engine.

#![allow(clippy::unwrap_used)]

mod common;

use common::{actor, wait_until, PROGRAM};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use stagepass_core::environment::SystemClock;
use stagepass_core::event::{DomainEvent, EventCreatedPayload, TicketsMintedPayload};
use stagepass_core::ledger::{ActorId, RawNotification};
use stagepass_core::store::SyncStore;
use stagepass_sync::config::QueueConfig;
use stagepass_sync::ingest::EventIngestor;
use stagepass_sync::lifecycle::Engine;
use stagepass_sync::queue::SyncQueue;
use stagepass_testing::{InMemoryLedger, InMemoryStore};

fn test_queue_config() -> QueueConfig {
    QueueConfig {
        concurrency: 2,
        poll_interval_ms: 10,
        backoff_base_ms: 20,
        backoff_max_ms: 50,
    }
}

fn event_created(ledger_id: u64, organizer_seed: u8) -> DomainEvent {
    DomainEvent::EventCreated(EventCreatedPayload {
        event_id: ledger_id,
        organizer: actor(organizer_seed),
        metadata_hash: format!("hash-{ledger_id}"),
        start_time: 1_760_000_000,
        tickets_total: 100,
        resale: None,
        commission: None,
    })
}

#[tokio::test]
async fn emitted_events_flow_into_projections_through_the_engine() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new(PROGRAM));

    store
        .insert_account(&stagepass_core::record::AccountRecord {
            id: uuid::Uuid::new_v4(),
            wallet: Some(stagepass_core::address::Address::from_actor(&actor(7))),
        })
        .await
        .unwrap();

    let engine = Engine::start(
        store.clone(),
        ledger.clone(),
        Arc::new(SystemClock),
        &test_queue_config(),
    );

    // The ingestor subscribes asynchronously; emit only once it is attached.
    let ledger_sub = ledger.clone();
    wait_until(Duration::from_secs(2), || {
        ledger_sub.subscriber_count() == 1
    })
    .await;

    ledger.emit(&event_created(42, 7));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if store.event_by_ledger_id(42).await.unwrap().is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "event never reconciled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Follow up with a mint batch through the same pipeline.
    ledger.emit(&DomainEvent::TicketsMinted(TicketsMintedPayload {
        event_id: 42,
        buyer: actor(9),
        ticket_ids: vec![1, 2],
        minted_at: 1_760_000_100,
    }));

    let store_wait = store.clone();
    wait_until(Duration::from_secs(3), || store_wait.ticket_count() == 2).await;

    engine.shutdown().await;
    // The subscription's disposer ran on drop.
    assert_eq!(ledger.unsubscribe_count(), 1);
}

#[tokio::test]
async fn foreign_and_malformed_notifications_are_dropped() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new(PROGRAM));
    let clock = Arc::new(SystemClock);
    let queue = Arc::new(SyncQueue::new(store.clone(), clock));
    let (shutdown, _) = broadcast::channel(1);
    let handle = EventIngestor::new(ledger.clone(), queue).spawn(shutdown.subscribe());

    let ledger_sub = ledger.clone();
    wait_until(Duration::from_secs(2), || {
        ledger_sub.subscriber_count() == 1
    })
    .await;

    let valid_payload = event_created(42, 7).encode().unwrap();

    // Wrong origin program.
    ledger.emit_raw(RawNotification {
        source: actor(0x55),
        destination: ActorId::ZERO,
        payload: valid_payload.clone(),
    });
    // Directed at a specific actor instead of the broadcast sentinel.
    ledger.emit_raw(RawNotification {
        source: PROGRAM,
        destination: actor(0x66),
        payload: valid_payload,
    });
    // Garbage payload.
    ledger.emit_raw(RawNotification {
        source: PROGRAM,
        destination: ActorId::ZERO,
        payload: vec![0xde, 0xad, 0xbe, 0xef],
    });

    // Give the ingestor time to (not) act.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.job_count(), 0);

    let _ = shutdown.send(());
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test(start_paused = true)]
async fn connectivity_wait_gives_up_after_its_budget() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new(PROGRAM));
    // More denials than the attempt budget: the subscription is never
    // installed and the task ends without crashing.
    ledger.deny_connectivity_checks(100);
    let queue = Arc::new(SyncQueue::new(store, Arc::new(SystemClock)));
    let (shutdown, _) = broadcast::channel(1);

    let handle = EventIngestor::new(ledger.clone(), queue).spawn(shutdown.subscribe());
    tokio::time::timeout(Duration::from_secs(60), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(ledger.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connectivity_wait_survives_a_slow_node() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new(PROGRAM));
    ledger.deny_connectivity_checks(3);
    let queue = Arc::new(SyncQueue::new(store, Arc::new(SystemClock)));
    let (shutdown, _) = broadcast::channel(1);

    let handle = EventIngestor::new(ledger.clone(), queue).spawn(shutdown.subscribe());

    let ledger_sub = ledger.clone();
    wait_until(Duration::from_secs(30), || {
        ledger_sub.subscriber_count() == 1
    })
    .await;

    let _ = shutdown.send(());
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert_eq!(ledger.unsubscribe_count(), 1);
}
