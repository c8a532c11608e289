//! Durable sync jobs and their retry policy.
//!
//! A [`SyncJob`] is one unit of reconciliation work: an event kind plus its
//! JSON payload, persisted through [`crate::store::SyncStore`] so it survives
//! a process restart. Delivery is at-least-once; every handler is an
//! idempotent upsert, so no ordering or de-duplication is attempted here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::event::DomainEvent;

/// Default retry budget per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff base.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Which reconciler entry point a job dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// `EventCreated` → event record reconciliation.
    SyncEvent,
    /// `TicketsMinted` → ticket batch reconciliation.
    SyncTicketBatch,
    /// `TicketUsed` → scan reconciliation.
    SyncTicketUsed,
    /// `TicketResold` / `TicketSold` → ownership/listing reconciliation.
    SyncTicketResale,
    /// `TicketListed` / `ListingCancelled` → notification-only.
    ListingActivity,
}

impl JobKind {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SyncEvent => "sync_event",
            Self::SyncTicketBatch => "sync_ticket_batch",
            Self::SyncTicketUsed => "sync_ticket_used",
            Self::SyncTicketResale => "sync_ticket_resale",
            Self::ListingActivity => "listing_activity",
        }
    }

    /// The job kind a decoded domain event maps to.
    #[must_use]
    pub const fn for_event(event: &DomainEvent) -> Self {
        match event {
            DomainEvent::EventCreated(_) => Self::SyncEvent,
            DomainEvent::TicketsMinted(_) => Self::SyncTicketBatch,
            DomainEvent::TicketResold(_) | DomainEvent::TicketSold(_) => Self::SyncTicketResale,
            DomainEvent::TicketUsed(_) => Self::SyncTicketUsed,
            DomainEvent::TicketListed(_) | DomainEvent::ListingCancelled(_) => {
                Self::ListingActivity
            }
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_event" => Ok(Self::SyncEvent),
            "sync_ticket_batch" => Ok(Self::SyncTicketBatch),
            "sync_ticket_used" => Ok(Self::SyncTicketUsed),
            "sync_ticket_resale" => Ok(Self::SyncTicketResale),
            "listing_activity" => Ok(Self::ListingActivity),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// One persisted unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Job id.
    pub id: Uuid,
    /// Dispatch kind.
    pub kind: JobKind,
    /// JSON payload (one of the DTOs in [`crate::dto`]).
    pub payload: serde_json::Value,
    /// Completed delivery attempts.
    pub attempts: u32,
    /// Retry budget.
    pub max_attempts: u32,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Message of the most recent failure, when any.
    pub last_error: Option<String>,
}

impl SyncJob {
    /// Build a fresh job, runnable immediately.
    #[must_use]
    pub fn new(kind: JobKind, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            run_at: now,
            created_at: now,
            last_error: None,
        }
    }

    /// Whether another delivery attempt is allowed.
    #[must_use]
    pub const fn retries_remaining(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }
}

/// A job that exhausted its retries (or failed permanently) and was parked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The job as it last ran.
    pub job: SyncJob,
    /// Final failure message.
    pub reason: String,
    /// When the job was parked.
    pub dead_at: DateTime<Utc>,
}

/// Exponential backoff schedule for job retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// First retry delay; doubles each attempt.
    pub base: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the given number of completed attempts.
    ///
    /// Attempt 1 (first retry) waits `base`, attempt 2 waits `2 * base`, and
    /// so on, capped at `max_delay`.
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let factor = 2u32.saturating_pow(exp);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(10), Duration::from_secs(60));
    }

    #[test]
    fn job_kind_storage_round_trip() {
        for kind in [
            JobKind::SyncEvent,
            JobKind::SyncTicketBatch,
            JobKind::SyncTicketUsed,
            JobKind::SyncTicketResale,
            JobKind::ListingActivity,
        ] {
            assert_eq!(kind.as_str().parse::<JobKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn fresh_job_has_full_retry_budget() {
        let now = Utc::now();
        let job = SyncJob::new(JobKind::SyncEvent, serde_json::Value::Null, now);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.retries_remaining());
        assert_eq!(job.run_at, now);
    }
}
