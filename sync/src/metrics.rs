//! Engine metrics.
//!
//! Counters for the ingest → queue → reconcile pipeline and the mint saga,
//! exported through the `metrics` facade. Exporter wiring belongs to the
//! embedding service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `stagepass_notifications_dropped_total{reason}` - Undecodable/foreign notifications
//! - `stagepass_events_ingested_total{event}` - Decoded events enqueued
//! - `stagepass_sync_jobs_total{kind, outcome}` - Job terminal outcomes
//! - `stagepass_mints_total{outcome}` - Mint saga branches
//! - `stagepass_tickets_minted_total` - Tickets confirmed by successful mints

use metrics::describe_counter;
use stagepass_core::job::JobKind;

/// Initialize and register all engine metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_engine_metrics() {
    describe_counter!(
        "stagepass_notifications_dropped_total",
        "Ledger notifications dropped before ingestion, by reason"
    );
    describe_counter!(
        "stagepass_events_ingested_total",
        "Ledger events decoded and enqueued, by event name"
    );
    describe_counter!(
        "stagepass_sync_jobs_total",
        "Sync job outcomes (enqueued, completed, retried, dead_lettered) by kind"
    );
    describe_counter!(
        "stagepass_mints_total",
        "Mint saga outcomes (committed, rolled_back)"
    );
    describe_counter!(
        "stagepass_tickets_minted_total",
        "Tickets confirmed by successful mint requests"
    );
    tracing::info!("engine metrics registered");
}

/// Record a notification dropped before ingestion.
pub fn record_notification_dropped(reason: &'static str) {
    metrics::counter!("stagepass_notifications_dropped_total", "reason" => reason).increment(1);
}

/// Record a decoded event handed to the queue.
pub fn record_event_ingested(event: &'static str) {
    metrics::counter!("stagepass_events_ingested_total", "event" => event).increment(1);
}

/// Record a job enqueued.
pub fn record_job_enqueued(kind: JobKind) {
    metrics::counter!("stagepass_sync_jobs_total", "kind" => kind.as_str(), "outcome" => "enqueued")
        .increment(1);
}

/// Record a job completed.
pub fn record_job_completed(kind: JobKind) {
    metrics::counter!("stagepass_sync_jobs_total", "kind" => kind.as_str(), "outcome" => "completed")
        .increment(1);
}

/// Record a job rescheduled after a transient failure.
pub fn record_job_retried(kind: JobKind) {
    metrics::counter!("stagepass_sync_jobs_total", "kind" => kind.as_str(), "outcome" => "retried")
        .increment(1);
}

/// Record a job parked as a dead letter.
pub fn record_job_dead_lettered(kind: JobKind) {
    metrics::counter!("stagepass_sync_jobs_total", "kind" => kind.as_str(), "outcome" => "dead_lettered")
        .increment(1);
}

/// Record a mint whose ledger call succeeded.
pub fn record_mint_committed(amount: u32) {
    metrics::counter!("stagepass_mints_total", "outcome" => "committed").increment(1);
    metrics::counter!("stagepass_tickets_minted_total").increment(u64::from(amount));
}

/// Record a mint that was compensated after a ledger failure.
pub fn record_mint_rolled_back(_amount: u32) {
    metrics::counter!("stagepass_mints_total", "outcome" => "rolled_back").increment(1);
}
