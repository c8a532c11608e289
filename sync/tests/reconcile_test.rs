//! Reconciler tests: idempotence, the pending-record matching protocol,
//! freeze-after-confirm, and first-write-wins scan timestamps.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{actor, address, fixture, Fixture};
use stagepass_core::environment::Clock;

use stagepass_core::dto::{SyncEventDto, TicketBatchDto, TicketResaleDto, TicketUsedDto};
use stagepass_core::error::SyncError;
use stagepass_core::ledger::Amount;
use stagepass_core::record::{
    LedgerTicketId, ListingRecord, ListingStatus, ResaleConfig, TicketStatus,
};
use stagepass_core::store::SyncStore;
use stagepass_sync::reconcile::Reconciler;

fn reconciler(fx: &Fixture) -> Reconciler {
    Reconciler::new(fx.store.clone(), fx.ledger.clone(), fx.clock.clone())
}

fn event_dto(ledger_id: u64, organizer_seed: u8, hash: &str) -> SyncEventDto {
    SyncEventDto {
        event_id: ledger_id,
        organizer: actor(organizer_seed),
        metadata_hash: hash.to_string(),
        event_start_time: 1_760_000_000,
        tickets_total: 250,
        resale: None,
        commission: None,
    }
}

// ---------------------------------------------------------------------------
// EventCreated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_event_is_promoted_with_config_preserved() {
    // Scenario A: PENDING record created 5 minutes earlier, exact hash match.
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let resale = ResaleConfig {
        enabled: true,
        max_price: Some(Amount::from(1000u64)),
        resale_start_time: None,
        resale_end_time: None,
    };
    let pending = fx
        .seed_pending_event(
            organizer,
            "hash-H",
            fx.clock.now() - Duration::minutes(5),
            500,
            resale.clone(),
        )
        .await;

    reconciler(&fx)
        .sync_event(event_dto(77, 7, "hash-H"))
        .await
        .unwrap();

    let record = fx.store.event_by_local_id(pending.id).await.unwrap().unwrap();
    assert_eq!(record.ledger_event_id.as_confirmed(), Some(77));
    assert_eq!(record.tickets_total, 500);
    assert_eq!(record.resale, resale);
    assert_eq!(record.tickets_minted, 0);
    assert!(record.last_synced_at.is_some());
}

#[tokio::test]
async fn replay_never_rewrites_organizer_config() {
    // Confirmed records refresh ledger-sourced fields only.
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let resale = ResaleConfig {
        enabled: true,
        max_price: Some(Amount::from(1000u64)),
        resale_start_time: None,
        resale_end_time: None,
    };
    let pending = fx
        .seed_pending_event(organizer, "hash-H", fx.clock.now(), 500, resale.clone())
        .await;
    let engine = reconciler(&fx);
    engine.sync_event(event_dto(77, 7, "hash-H")).await.unwrap();

    // A duplicate delivery carrying different totals must not stick.
    let mut replay = event_dto(77, 7, "hash-H2");
    replay.tickets_total = 9999;
    engine.sync_event(replay).await.unwrap();

    let record = fx.store.event_by_local_id(pending.id).await.unwrap().unwrap();
    assert_eq!(record.tickets_total, 500);
    assert_eq!(record.resale, resale);
    // Ledger-sourced metadata did refresh.
    assert_eq!(record.metadata_hash, "hash-H2");
}

#[tokio::test]
async fn event_replay_is_idempotent() {
    let fx = fixture();
    fx.seed_account(7).await;
    let engine = reconciler(&fx);

    for _ in 0..3 {
        engine.sync_event(event_dto(77, 7, "hash-H")).await.unwrap();
    }

    // Exactly one record owns ledger id 77.
    let record = fx.store.event_by_ledger_id(77).await.unwrap().unwrap();
    assert_eq!(record.metadata_hash, "hash-H");
}

#[tokio::test]
async fn hash_match_beats_recency() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let older = fx
        .seed_pending_event(
            organizer,
            "hash-target",
            fx.clock.now() - Duration::minutes(20),
            100,
            ResaleConfig::default(),
        )
        .await;
    let newer = fx
        .seed_pending_event(
            organizer,
            "hash-other",
            fx.clock.now() - Duration::minutes(1),
            100,
            ResaleConfig::default(),
        )
        .await;

    reconciler(&fx)
        .sync_event(event_dto(77, 7, "hash-target"))
        .await
        .unwrap();

    let promoted = fx.store.event_by_local_id(older.id).await.unwrap().unwrap();
    assert_eq!(promoted.ledger_event_id.as_confirmed(), Some(77));
    let untouched = fx.store.event_by_local_id(newer.id).await.unwrap().unwrap();
    assert!(untouched.is_pending());
}

#[tokio::test]
async fn without_hash_match_the_most_recent_pending_wins() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let older = fx
        .seed_pending_event(
            organizer,
            "hash-a",
            fx.clock.now() - Duration::minutes(20),
            100,
            ResaleConfig::default(),
        )
        .await;
    let newer = fx
        .seed_pending_event(
            organizer,
            "hash-b",
            fx.clock.now() - Duration::minutes(2),
            100,
            ResaleConfig::default(),
        )
        .await;

    reconciler(&fx)
        .sync_event(event_dto(77, 7, "hash-from-ledger"))
        .await
        .unwrap();

    assert_eq!(
        fx.store
            .event_by_local_id(newer.id)
            .await
            .unwrap()
            .unwrap()
            .ledger_event_id
            .as_confirmed(),
        Some(77)
    );
    assert!(fx
        .store
        .event_by_local_id(older.id)
        .await
        .unwrap()
        .unwrap()
        .is_pending());
}

#[tokio::test]
async fn stale_pending_records_are_outside_the_window() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let stale = fx
        .seed_pending_event(
            organizer,
            "hash-H",
            fx.clock.now() - Duration::minutes(45),
            100,
            ResaleConfig::default(),
        )
        .await;

    reconciler(&fx)
        .sync_event(event_dto(77, 7, "hash-H"))
        .await
        .unwrap();

    // The stale record was not promoted; a fresh one was created instead.
    assert!(fx
        .store
        .event_by_local_id(stale.id)
        .await
        .unwrap()
        .unwrap()
        .is_pending());
    let created = fx.store.event_by_ledger_id(77).await.unwrap().unwrap();
    assert_ne!(created.id, stale.id);
}

#[tokio::test]
async fn ledger_only_event_uses_platform_defaults() {
    // Degraded path: nothing pending, event created directly on the ledger.
    let fx = fixture();
    fx.seed_account(7).await;

    reconciler(&fx)
        .sync_event(event_dto(88, 7, "hash-direct"))
        .await
        .unwrap();

    let record = fx.store.event_by_ledger_id(88).await.unwrap().unwrap();
    assert_eq!(record.tickets_total, 250);
    assert!(!record.resale.enabled);
    assert!(record.commission.is_valid_split());
}

#[tokio::test]
async fn unknown_organizer_is_permanent() {
    let fx = fixture();
    let err = reconciler(&fx)
        .sync_event(event_dto(77, 99, "hash-H"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Permanent(_)));
}

// ---------------------------------------------------------------------------
// TicketsMinted
// ---------------------------------------------------------------------------

fn batch_dto(event_id: u64, buyer_seed: u8, ids: &[u64]) -> TicketBatchDto {
    TicketBatchDto {
        event_id,
        buyer: actor(buyer_seed),
        ticket_ids: ids.to_vec(),
        minted_at: 1_760_000_100,
    }
}

#[tokio::test]
async fn duplicate_mint_batch_converges_to_one_record_per_ticket() {
    // Scenario D: ticket_ids [1,2,3] delivered twice → 3 records, not 6.
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let event = fx.seed_confirmed_event(42, organizer, 100).await;
    for id in [1u64, 2, 3] {
        fx.seed_ticket_detail(id, 42, actor(9), Some("GA"), false);
    }
    let engine = reconciler(&fx);

    engine.sync_ticket_batch(batch_dto(42, 9, &[1, 2, 3])).await.unwrap();
    engine.sync_ticket_batch(batch_dto(42, 9, &[1, 2, 3])).await.unwrap();

    let tickets = fx.store.tickets_for_event(event.id).await.unwrap();
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| !t.is_speculative()));
    let record = fx.store.event_by_local_id(event.id).await.unwrap().unwrap();
    assert_eq!(record.tickets_minted, 3);
}

#[tokio::test]
async fn mint_batch_promotes_speculative_placeholders() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let event = fx.seed_confirmed_event(42, organizer, 100).await;
    fx.seed_zone(event.id, "GA", 50, 0).await;

    // A speculative mint wrote two placeholders for buyer 7.
    let orchestrator = stagepass_sync::mint::MintOrchestrator::new(
        fx.store.clone(),
        fx.ledger.clone(),
        fx.clock.clone(),
    );
    orchestrator
        .mint_tickets(
            event.id,
            organizer,
            2,
            None,
            &["GA".to_string(), "GA".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(fx.store.ticket_count(), 2);

    for id in [10u64, 11] {
        fx.seed_ticket_detail(id, 42, actor(7), Some("GA"), false);
    }
    reconciler(&fx)
        .sync_ticket_batch(batch_dto(42, 7, &[10, 11]))
        .await
        .unwrap();

    // The placeholders were consumed, not duplicated.
    let tickets = fx.store.tickets_for_event(event.id).await.unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| !t.is_speculative()));
    assert_eq!(
        fx.store
            .ticket(&LedgerTicketId::Confirmed(10))
            .await
            .unwrap()
            .unwrap()
            .owner,
        address(7)
    );
}

#[tokio::test]
async fn missing_detail_falls_back_to_batch_buyer() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let event = fx.seed_confirmed_event(42, organizer, 100).await;

    // No ticket detail seeded for id 5.
    reconciler(&fx)
        .sync_ticket_batch(batch_dto(42, 9, &[5]))
        .await
        .unwrap();

    let ticket = fx
        .store
        .ticket(&LedgerTicketId::Confirmed(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.owner, address(9));
    assert_eq!(ticket.original_buyer, address(9));
    assert_eq!(ticket.status, TicketStatus::Active);
    assert_eq!(
        fx.store
            .event_by_local_id(event.id)
            .await
            .unwrap()
            .unwrap()
            .tickets_minted,
        1
    );
}

#[tokio::test]
async fn mint_batch_before_event_sync_is_transient() {
    let fx = fixture();
    let err = reconciler(&fx)
        .sync_ticket_batch(batch_dto(42, 9, &[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transient(_)));
}

#[tokio::test]
async fn ledger_read_failure_is_transient_for_the_whole_batch() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    fx.seed_confirmed_event(42, organizer, 100).await;
    fx.ledger
        .fail_next_read(stagepass_core::ledger::LedgerError::Rpc("timeout".into()));

    let err = reconciler(&fx)
        .sync_ticket_batch(batch_dto(42, 9, &[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transient(_)));
}

// ---------------------------------------------------------------------------
// TicketUsed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn used_at_is_first_write_wins() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    let event = fx.seed_confirmed_event(42, organizer, 100).await;
    fx.seed_ticket_detail(5, 42, actor(9), None, false);
    let engine = reconciler(&fx);
    engine.sync_ticket_batch(batch_dto(42, 9, &[5])).await.unwrap();

    fx.seed_ticket_detail(5, 42, actor(9), None, true);
    engine
        .sync_ticket_used(TicketUsedDto {
            ticket_id: 5,
            used_at: 1_760_000_500,
        })
        .await
        .unwrap();

    let first = fx
        .store
        .ticket(&LedgerTicketId::Confirmed(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, TicketStatus::Used);
    let first_used_at = first.used_at.unwrap();

    // A replayed scan with a different timestamp never overwrites.
    engine
        .sync_ticket_used(TicketUsedDto {
            ticket_id: 5,
            used_at: 1_760_999_999,
        })
        .await
        .unwrap();
    let replayed = fx
        .store
        .ticket(&LedgerTicketId::Confirmed(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.used_at, Some(first_used_at));
    assert_eq!(event.id, replayed.event_id);
}

#[tokio::test]
async fn scan_for_unknown_ticket_is_transient() {
    let fx = fixture();
    let err = reconciler(&fx)
        .sync_ticket_used(TicketUsedDto {
            ticket_id: 404,
            used_at: 1_760_000_500,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transient(_)));
}

// ---------------------------------------------------------------------------
// TicketResold / TicketSold
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resale_updates_owner_and_closes_the_listing() {
    let fx = fixture();
    let organizer = fx.seed_account(7).await;
    fx.seed_confirmed_event(42, organizer, 100).await;
    fx.seed_ticket_detail(5, 42, actor(9), None, false);
    let engine = reconciler(&fx);
    engine.sync_ticket_batch(batch_dto(42, 9, &[5])).await.unwrap();

    fx.store
        .upsert_listing(&ListingRecord {
            ticket_id: 5,
            seller: address(9),
            price: Amount::from(500u64),
            status: ListingStatus::Active,
            sold_to: None,
            sold_at: None,
        })
        .await
        .unwrap();

    let trade = TicketResaleDto {
        ticket_id: 5,
        seller: actor(9),
        buyer: actor(11),
        price: Amount::from(500u64),
        sold_at: 1_760_001_000,
    };
    engine.sync_ticket_resale(trade.clone()).await.unwrap();

    let ticket = fx
        .store
        .ticket(&LedgerTicketId::Confirmed(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.owner, address(11));
    // The listing flipped to SOLD with the buyer stamped.
    assert!(fx.store.active_listing(5).await.unwrap().is_none());

    // Replay: no active listing left, owner unchanged — a clean no-op.
    engine.sync_ticket_resale(trade).await.unwrap();
    let replayed = fx
        .store
        .ticket(&LedgerTicketId::Confirmed(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.owner, address(11));
}

#[tokio::test]
async fn resale_for_unknown_ticket_is_transient() {
    let fx = fixture();
    let err = reconciler(&fx)
        .sync_ticket_resale(TicketResaleDto {
            ticket_id: 404,
            seller: actor(9),
            buyer: actor(11),
            price: Amount::from(1u64),
            sold_at: 1_760_001_000,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transient(_)));
}
