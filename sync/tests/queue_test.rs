//! Queue behavior: retry with backoff, immediate dead-letter on permanent
//! failures, durable dead letters, and event-to-job mapping.

#![allow(clippy::unwrap_used)]

mod common;

use common::{actor, address, wait_until, PROGRAM};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use stagepass_core::dto::TicketUsedDto;
use stagepass_core::environment::SystemClock;
use stagepass_core::event::{DomainEvent, TicketUsedPayload};
use stagepass_core::job::{BackoffPolicy, JobKind};
use stagepass_core::ledger::TicketDetail;
use stagepass_core::record::{LedgerTicketId, TicketRecord, TicketStatus};
use stagepass_core::store::SyncStore;
use stagepass_sync::queue::{SyncQueue, SyncWorkerPool};
use stagepass_sync::reconcile::Reconciler;
use stagepass_testing::{InMemoryLedger, InMemoryStore};

struct Ctx {
    store: Arc<InMemoryStore>,
    ledger: Arc<InMemoryLedger>,
    queue: Arc<SyncQueue>,
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

/// Workers on the system clock with millisecond backoff, so retries become
/// due within the test's patience.
fn start_workers() -> Ctx {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new(PROGRAM));
    let clock = Arc::new(SystemClock);
    let queue = Arc::new(SyncQueue::new(store.clone(), clock.clone()));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        ledger.clone(),
        clock.clone(),
    ));
    let (shutdown, _) = broadcast::channel(1);
    let handles = SyncWorkerPool::new(store.clone(), clock, reconciler, queue.wake_handle())
        .with_concurrency(2)
        .with_backoff(BackoffPolicy {
            base: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
        })
        .with_poll_interval(Duration::from_millis(10))
        .spawn(&shutdown);
    Ctx {
        store,
        ledger,
        queue,
        shutdown,
        handles,
    }
}

impl Ctx {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        for handle in self.handles {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }
}

#[tokio::test]
async fn permanent_failure_dead_letters_immediately() {
    let ctx = start_workers();

    // A payload that cannot deserialize is permanent: no retry noise.
    ctx.queue
        .enqueue(JobKind::SyncEvent, serde_json::json!("not an event dto"))
        .await
        .unwrap();

    let store = ctx.store.clone();
    wait_until(Duration::from_secs(2), || store.dead_letter_count() == 1).await;
    assert_eq!(ctx.store.job_count(), 0);

    let dead = ctx.store.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.kind, JobKind::SyncEvent);
    // Parked on the first attempt, not after exhausting the budget.
    assert_eq!(dead[0].job.attempts, 0);
    assert!(dead[0].reason.contains("malformed job payload"));

    ctx.stop().await;
}

#[tokio::test]
async fn transient_failures_retry_with_backoff_then_dead_letter() {
    let ctx = start_workers();

    // Ticket 404 never exists, so every attempt is transient; the job burns
    // its three attempts and parks.
    ctx.queue
        .enqueue(
            JobKind::SyncTicketUsed,
            serde_json::to_value(TicketUsedDto {
                ticket_id: 404,
                used_at: 1_760_000_000,
            })
            .unwrap(),
        )
        .await
        .unwrap();

    let store = ctx.store.clone();
    wait_until(Duration::from_secs(3), || store.dead_letter_count() == 1).await;
    assert_eq!(ctx.store.job_count(), 0);

    let dead = ctx.store.dead_letters().await.unwrap();
    // Two retries happened before parking (attempts is the pre-failure count
    // of the final claimed copy).
    assert_eq!(dead[0].job.attempts, dead[0].job.max_attempts - 1);
    assert!(dead[0].reason.contains("not locally known"));

    ctx.stop().await;
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let ctx = start_workers();

    ctx.queue
        .enqueue(
            JobKind::SyncTicketUsed,
            serde_json::to_value(TicketUsedDto {
                ticket_id: 5,
                used_at: 1_760_000_000,
            })
            .unwrap(),
        )
        .await
        .unwrap();

    // Let the first attempt fail, then make the ticket appear (the mint
    // reconciliation "catching up").
    tokio::time::sleep(Duration::from_millis(15)).await;
    ctx.ledger.put_ticket_detail(TicketDetail {
        id: 5,
        event_id: 42,
        original_buyer: actor(9),
        current_owner: actor(9),
        zone: None,
        used: true,
        minted_at: 1_760_000_000,
    });
    ctx.store
        .upsert_ticket(&TicketRecord {
            ledger_ticket_id: LedgerTicketId::Confirmed(5),
            event_id: uuid::Uuid::new_v4(),
            zone: None,
            owner: address(9),
            original_buyer: address(9),
            status: TicketStatus::Active,
            minted_at: chrono::Utc::now(),
            used_at: None,
            last_synced_at: None,
        })
        .await
        .unwrap();

    let store = ctx.store.clone();
    wait_until(Duration::from_secs(3), || store.job_count() == 0).await;
    assert_eq!(ctx.store.dead_letter_count(), 0);

    let ticket = ctx
        .store
        .ticket(&LedgerTicketId::Confirmed(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Used);
    assert!(ticket.used_at.is_some());

    ctx.stop().await;
}

#[tokio::test]
async fn domain_events_map_to_their_job_kinds() {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(SystemClock);
    let queue = SyncQueue::new(store.clone(), clock);

    queue
        .enqueue_event(DomainEvent::TicketUsed(TicketUsedPayload {
            ticket_id: 9,
            used_at: 1_760_000_000,
        }))
        .await
        .unwrap();

    let jobs = store
        .claim_due_jobs(chrono::Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::SyncTicketUsed);
    assert_eq!(jobs[0].attempts, 0);
    assert_eq!(jobs[0].max_attempts, 3);
    let dto: TicketUsedDto = serde_json::from_value(jobs[0].payload.clone()).unwrap();
    assert_eq!(dto.ticket_id, 9);
}

#[tokio::test]
async fn listing_activity_jobs_complete_without_writes() {
    let ctx = start_workers();

    ctx.queue
        .enqueue_event(DomainEvent::TicketListed(
            stagepass_core::event::TicketListedPayload {
                ticket_id: 3,
                seller: actor(9),
                price: stagepass_core::ledger::Amount::from(100u64),
                listed_at: 1_760_000_000,
            },
        ))
        .await
        .unwrap();

    let store = ctx.store.clone();
    wait_until(Duration::from_secs(2), || store.job_count() == 0).await;
    assert_eq!(ctx.store.dead_letter_count(), 0);
    assert_eq!(ctx.store.ticket_count(), 0);

    ctx.stop().await;
}
