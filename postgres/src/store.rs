//! `SyncStore` implementation over sqlx/PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use stagepass_core::address::Address;
use stagepass_core::job::{DeadLetter, JobKind, SyncJob};
use stagepass_core::record::{
    AccountRecord, EventRecord, LedgerEventId, LedgerTicketId, ListingRecord, ListingStatus,
    TicketRecord, TicketStatus,
};
use stagepass_core::store::{
    RemovedBatch, SpeculativeBatch, StoreError, SyncStore, ZoneAdjustment,
};

/// Claimed jobs whose worker died are reclaimable after this long.
const STALE_CLAIM_SECS: i64 = 300;

/// Development/test schema. Production migrations live in the platform's
/// migration pipeline and must stay in sync with these shapes.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
    id              UUID PRIMARY KEY,
    wallet          TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS event_records (
    id               UUID PRIMARY KEY,
    ledger_event_id  TEXT NOT NULL UNIQUE,
    organizer_id     UUID NOT NULL,
    metadata_hash    TEXT NOT NULL,
    event_start_time BIGINT NOT NULL,
    tickets_total    INTEGER NOT NULL,
    tickets_minted   INTEGER NOT NULL,
    resale           JSONB NOT NULL,
    commission       JSONB NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL,
    last_synced_at   TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS event_records_pending_idx
    ON event_records (organizer_id, created_at)
    WHERE ledger_event_id LIKE 'pending-%';

CREATE TABLE IF NOT EXISTS ticket_records (
    ledger_ticket_id TEXT PRIMARY KEY,
    request_id       UUID,
    event_id         UUID NOT NULL,
    zone             TEXT,
    owner            TEXT NOT NULL,
    original_buyer   TEXT NOT NULL,
    status           TEXT NOT NULL,
    minted_at        TIMESTAMPTZ NOT NULL,
    used_at          TIMESTAMPTZ,
    last_synced_at   TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS ticket_records_event_idx ON ticket_records (event_id, minted_at);
CREATE INDEX IF NOT EXISTS ticket_records_request_idx ON ticket_records (request_id)
    WHERE request_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS zone_records (
    event_id  UUID NOT NULL,
    name      TEXT NOT NULL,
    capacity  INTEGER NOT NULL,
    sold      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (event_id, name)
);

CREATE TABLE IF NOT EXISTS listing_records (
    ticket_id  BIGINT PRIMARY KEY,
    seller     TEXT NOT NULL,
    price      TEXT NOT NULL,
    status     TEXT NOT NULL,
    sold_to    TEXT,
    sold_at    TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS sync_jobs (
    id           UUID PRIMARY KEY,
    kind         TEXT NOT NULL,
    payload      JSONB NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    run_at       TIMESTAMPTZ NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    last_error   TEXT,
    claimed_at   TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS sync_jobs_due_idx ON sync_jobs (run_at, created_at);

CREATE TABLE IF NOT EXISTS sync_dead_letters (
    id           UUID PRIMARY KEY,
    kind         TEXT NOT NULL,
    payload      JSONB NOT NULL,
    attempts     INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    run_at       TIMESTAMPTZ NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    last_error   TEXT,
    reason       TEXT NOT NULL,
    dead_at      TIMESTAMPTZ NOT NULL
);
";

/// `PostgreSQL`-backed [`SyncStore`].
#[derive(Debug, Clone)]
pub struct PgSyncStore {
    pool: PgPool,
}

impl PgSyncStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a fresh pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the database is unreachable.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::new(pool))
    }

    /// The underlying pool, for embedding services that share it.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the engine's tables when they do not exist yet.
    ///
    /// For local development and tests; production schema is migrated by the
    /// platform's migration pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when DDL execution fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        tracing::info!("sync store schema ensured");
        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(e.to_string())
        }
        // Everything else (I/O, pool exhaustion, closed connections) is
        // worth retrying.
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn decode_err(context: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("{context}: {detail}"))
}

fn row_to_account(row: &PgRow) -> Result<AccountRecord, StoreError> {
    let wallet: Option<String> = row.try_get("wallet").map_err(map_sqlx)?;
    let wallet = wallet
        .map(|w| Address::from_str(&w).map_err(|e| decode_err("account wallet", e)))
        .transpose()?;
    Ok(AccountRecord {
        id: row.try_get("id").map_err(map_sqlx)?,
        wallet,
    })
}

fn row_to_event(row: &PgRow) -> Result<EventRecord, StoreError> {
    let ledger_event_id: String = row.try_get("ledger_event_id").map_err(map_sqlx)?;
    let ledger_event_id = LedgerEventId::from_str(&ledger_event_id)
        .map_err(|e| decode_err("ledger_event_id", e))?;
    let tickets_total: i32 = row.try_get("tickets_total").map_err(map_sqlx)?;
    let tickets_minted: i32 = row.try_get("tickets_minted").map_err(map_sqlx)?;
    let resale: serde_json::Value = row.try_get("resale").map_err(map_sqlx)?;
    let commission: serde_json::Value = row.try_get("commission").map_err(map_sqlx)?;
    Ok(EventRecord {
        id: row.try_get("id").map_err(map_sqlx)?,
        ledger_event_id,
        organizer_id: row.try_get("organizer_id").map_err(map_sqlx)?,
        metadata_hash: row.try_get("metadata_hash").map_err(map_sqlx)?,
        event_start_time: row.try_get("event_start_time").map_err(map_sqlx)?,
        tickets_total: u32::try_from(tickets_total).unwrap_or(0),
        tickets_minted: u32::try_from(tickets_minted).unwrap_or(0),
        resale: serde_json::from_value(resale).map_err(|e| decode_err("resale config", e))?,
        commission: serde_json::from_value(commission)
            .map_err(|e| decode_err("commission config", e))?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        last_synced_at: row.try_get("last_synced_at").map_err(map_sqlx)?,
    })
}

fn row_to_ticket(row: &PgRow) -> Result<TicketRecord, StoreError> {
    let ledger_ticket_id: String = row.try_get("ledger_ticket_id").map_err(map_sqlx)?;
    let ledger_ticket_id = LedgerTicketId::from_str(&ledger_ticket_id)
        .map_err(|e| decode_err("ledger_ticket_id", e))?;
    let owner: String = row.try_get("owner").map_err(map_sqlx)?;
    let original_buyer: String = row.try_get("original_buyer").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    Ok(TicketRecord {
        ledger_ticket_id,
        event_id: row.try_get("event_id").map_err(map_sqlx)?,
        zone: row.try_get("zone").map_err(map_sqlx)?,
        owner: Address::from_str(&owner).map_err(|e| decode_err("ticket owner", e))?,
        original_buyer: Address::from_str(&original_buyer)
            .map_err(|e| decode_err("ticket original_buyer", e))?,
        status: TicketStatus::from_str(&status).map_err(|e| decode_err("ticket status", e))?,
        minted_at: row.try_get("minted_at").map_err(map_sqlx)?,
        used_at: row.try_get("used_at").map_err(map_sqlx)?,
        last_synced_at: row.try_get("last_synced_at").map_err(map_sqlx)?,
    })
}

fn row_to_listing(row: &PgRow) -> Result<ListingRecord, StoreError> {
    let ticket_id: i64 = row.try_get("ticket_id").map_err(map_sqlx)?;
    let seller: String = row.try_get("seller").map_err(map_sqlx)?;
    let price: String = row.try_get("price").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let sold_to: Option<String> = row.try_get("sold_to").map_err(map_sqlx)?;
    Ok(ListingRecord {
        ticket_id: u64::try_from(ticket_id)
            .map_err(|e| decode_err("listing ticket_id", e))?,
        seller: Address::from_str(&seller).map_err(|e| decode_err("listing seller", e))?,
        price: price
            .parse()
            .map_err(|e| decode_err("listing price", e))?,
        status: ListingStatus::from_str(&status)
            .map_err(|e| decode_err("listing status", e))?,
        sold_to: sold_to
            .map(|s| Address::from_str(&s).map_err(|e| decode_err("listing sold_to", e)))
            .transpose()?,
        sold_at: row.try_get("sold_at").map_err(map_sqlx)?,
    })
}

fn row_to_job(row: &PgRow) -> Result<SyncJob, StoreError> {
    let kind: String = row.try_get("kind").map_err(map_sqlx)?;
    let attempts: i32 = row.try_get("attempts").map_err(map_sqlx)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(map_sqlx)?;
    Ok(SyncJob {
        id: row.try_get("id").map_err(map_sqlx)?,
        kind: JobKind::from_str(&kind).map_err(|e| decode_err("job kind", e))?,
        payload: row.try_get("payload").map_err(map_sqlx)?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        max_attempts: u32::try_from(max_attempts).unwrap_or(0),
        run_at: row.try_get("run_at").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        last_error: row.try_get("last_error").map_err(map_sqlx)?,
    })
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn account(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let row = sqlx::query("SELECT id, wallet FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn account_by_wallet(
        &self,
        wallet: &Address,
    ) -> Result<Option<AccountRecord>, StoreError> {
        let row = sqlx::query("SELECT id, wallet FROM accounts WHERE wallet = $1")
            .bind(wallet.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO accounts (id, wallet) VALUES ($1, $2)")
            .bind(account.id)
            .bind(account.wallet.map(|w| w.to_string()))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn event_by_ledger_id(
        &self,
        ledger_id: u64,
    ) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM event_records WHERE ledger_event_id = $1")
            .bind(LedgerEventId::Confirmed(ledger_id).to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn event_by_local_id(&self, id: Uuid) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM event_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn pending_events_for_organizer(
        &self,
        organizer_id: Uuid,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT * FROM event_records
            WHERE organizer_id = $1
              AND ledger_event_id LIKE 'pending-%'
              AND created_at >= $2
            ORDER BY created_at DESC
            ",
        )
        .bind(organizer_id)
        .bind(created_after)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn insert_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO event_records (
                id, ledger_event_id, organizer_id, metadata_hash, event_start_time,
                tickets_total, tickets_minted, resale, commission, created_at, last_synced_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(record.id)
        .bind(record.ledger_event_id.to_string())
        .bind(record.organizer_id)
        .bind(&record.metadata_hash)
        .bind(record.event_start_time)
        .bind(i32::try_from(record.tickets_total).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.tickets_minted).unwrap_or(i32::MAX))
        .bind(
            serde_json::to_value(&record.resale)
                .map_err(|e| decode_err("resale config", e))?,
        )
        .bind(
            serde_json::to_value(record.commission)
                .map_err(|e| decode_err("commission config", e))?,
        )
        .bind(record.created_at)
        .bind(record.last_synced_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE event_records SET
                ledger_event_id = $2,
                metadata_hash = $3,
                event_start_time = $4,
                tickets_total = $5,
                tickets_minted = $6,
                resale = $7,
                commission = $8,
                last_synced_at = $9
            WHERE id = $1
            ",
        )
        .bind(record.id)
        .bind(record.ledger_event_id.to_string())
        .bind(&record.metadata_hash)
        .bind(record.event_start_time)
        .bind(i32::try_from(record.tickets_total).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.tickets_minted).unwrap_or(i32::MAX))
        .bind(
            serde_json::to_value(&record.resale)
                .map_err(|e| decode_err("resale config", e))?,
        )
        .bind(
            serde_json::to_value(record.commission)
                .map_err(|e| decode_err("commission config", e))?,
        )
        .bind(record.last_synced_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {}", record.id)));
        }
        Ok(())
    }

    async fn ticket(&self, id: &LedgerTicketId) -> Result<Option<TicketRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM ticket_records WHERE ledger_ticket_id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn upsert_ticket(&self, record: &TicketRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO ticket_records (
                ledger_ticket_id, request_id, event_id, zone, owner, original_buyer,
                status, minted_at, used_at, last_synced_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (ledger_ticket_id) DO UPDATE SET
                event_id = EXCLUDED.event_id,
                zone = EXCLUDED.zone,
                owner = EXCLUDED.owner,
                original_buyer = EXCLUDED.original_buyer,
                status = EXCLUDED.status,
                minted_at = EXCLUDED.minted_at,
                used_at = EXCLUDED.used_at,
                last_synced_at = EXCLUDED.last_synced_at
            ",
        )
        .bind(record.ledger_ticket_id.to_string())
        .bind(record.ledger_ticket_id.request_id())
        .bind(record.event_id)
        .bind(&record.zone)
        .bind(record.owner.to_string())
        .bind(record.original_buyer.to_string())
        .bind(record.status.as_str())
        .bind(record.minted_at)
        .bind(record.used_at)
        .bind(record.last_synced_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn promote_ticket(
        &self,
        placeholder: &LedgerTicketId,
        promoted: &TicketRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let deleted = sqlx::query("DELETE FROM ticket_records WHERE ledger_ticket_id = $1")
            .bind(placeholder.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "speculative ticket {placeholder}"
            )));
        }

        sqlx::query(
            r"
            INSERT INTO ticket_records (
                ledger_ticket_id, request_id, event_id, zone, owner, original_buyer,
                status, minted_at, used_at, last_synced_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (ledger_ticket_id) DO UPDATE SET
                owner = EXCLUDED.owner,
                original_buyer = EXCLUDED.original_buyer,
                status = EXCLUDED.status,
                last_synced_at = EXCLUDED.last_synced_at
            ",
        )
        .bind(promoted.ledger_ticket_id.to_string())
        .bind(promoted.ledger_ticket_id.request_id())
        .bind(promoted.event_id)
        .bind(&promoted.zone)
        .bind(promoted.owner.to_string())
        .bind(promoted.original_buyer.to_string())
        .bind(promoted.status.as_str())
        .bind(promoted.minted_at)
        .bind(promoted.used_at)
        .bind(promoted.last_synced_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn speculative_tickets(
        &self,
        event_id: Uuid,
        owner: &Address,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<TicketRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT * FROM ticket_records
            WHERE event_id = $1
              AND owner = $2
              AND request_id IS NOT NULL
              AND minted_at >= $3
            ORDER BY minted_at ASC
            ",
        )
        .bind(event_id)
        .bind(owner.to_string())
        .bind(created_after)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_ticket).collect()
    }

    async fn tickets_for_event(&self, event_id: Uuid) -> Result<Vec<TicketRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM ticket_records WHERE event_id = $1 ORDER BY minted_at ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_ticket).collect()
    }

    async fn create_speculative_batch(&self, batch: &SpeculativeBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // Guarded increments: the WHERE clause is the capacity check, so a
        // concurrent mint in another connection cannot oversell.
        for adj in &batch.zone_increments {
            let count = i64::from(adj.count);
            let updated = sqlx::query(
                r"
                UPDATE zone_records SET sold = sold + $3
                WHERE event_id = $1 AND name = $2 AND sold + $3 <= capacity
                ",
            )
            .bind(batch.event_id)
            .bind(&adj.zone)
            .bind(count)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            if updated.rows_affected() == 0 {
                let exists =
                    sqlx::query("SELECT 1 FROM zone_records WHERE event_id = $1 AND name = $2")
                        .bind(batch.event_id)
                        .bind(&adj.zone)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                return Err(if exists.is_some() {
                    StoreError::Conflict(format!("Zone {} is sold out", adj.zone))
                } else {
                    StoreError::NotFound(format!("zone {}", adj.zone))
                });
            }
        }

        for ticket in &batch.tickets {
            sqlx::query(
                r"
                INSERT INTO ticket_records (
                    ledger_ticket_id, request_id, event_id, zone, owner, original_buyer,
                    status, minted_at, used_at, last_synced_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(ticket.ledger_ticket_id.to_string())
            .bind(ticket.ledger_ticket_id.request_id())
            .bind(ticket.event_id)
            .bind(&ticket.zone)
            .bind(ticket.owner.to_string())
            .bind(ticket.original_buyer.to_string())
            .bind(ticket.status.as_str())
            .bind(ticket.minted_at)
            .bind(ticket.used_at)
            .bind(ticket.last_synced_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn remove_speculative_batch(
        &self,
        request_id: Uuid,
    ) -> Result<RemovedBatch, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let rows = sqlx::query(
            "DELETE FROM ticket_records WHERE request_id = $1 RETURNING event_id, zone",
        )
        .bind(request_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let mut removed = RemovedBatch::default();
        let mut per_zone: std::collections::BTreeMap<(Uuid, String), u32> =
            std::collections::BTreeMap::new();
        for row in &rows {
            removed.tickets_removed += 1;
            let zone: Option<String> = row.try_get("zone").map_err(map_sqlx)?;
            if let Some(zone) = zone {
                let event_id: Uuid = row.try_get("event_id").map_err(map_sqlx)?;
                *per_zone.entry((event_id, zone)).or_insert(0) += 1;
            }
        }

        for ((event_id, zone), count) in per_zone {
            sqlx::query(
                r"
                UPDATE zone_records SET sold = GREATEST(sold - $3, 0)
                WHERE event_id = $1 AND name = $2
                ",
            )
            .bind(event_id)
            .bind(&zone)
            .bind(i64::from(count))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            removed
                .zone_decrements
                .push(ZoneAdjustment { zone, count });
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(removed)
    }

    async fn zone(
        &self,
        event_id: Uuid,
        name: &str,
    ) -> Result<Option<stagepass_core::record::ZoneRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT event_id, name, capacity, sold FROM zone_records WHERE event_id = $1 AND name = $2",
        )
        .bind(event_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(|row| {
            let capacity: i32 = row.try_get("capacity").map_err(map_sqlx)?;
            let sold: i32 = row.try_get("sold").map_err(map_sqlx)?;
            Ok(stagepass_core::record::ZoneRecord {
                event_id: row.try_get("event_id").map_err(map_sqlx)?,
                name: row.try_get("name").map_err(map_sqlx)?,
                capacity: u32::try_from(capacity).unwrap_or(0),
                sold: u32::try_from(sold).unwrap_or(0),
            })
        })
        .transpose()
    }

    async fn zones_for_event(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<stagepass_core::record::ZoneRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_id, name, capacity, sold FROM zone_records WHERE event_id = $1 ORDER BY name",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter()
            .map(|row| {
                let capacity: i32 = row.try_get("capacity").map_err(map_sqlx)?;
                let sold: i32 = row.try_get("sold").map_err(map_sqlx)?;
                Ok(stagepass_core::record::ZoneRecord {
                    event_id: row.try_get("event_id").map_err(map_sqlx)?,
                    name: row.try_get("name").map_err(map_sqlx)?,
                    capacity: u32::try_from(capacity).unwrap_or(0),
                    sold: u32::try_from(sold).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn insert_zone(
        &self,
        zone: &stagepass_core::record::ZoneRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO zone_records (event_id, name, capacity, sold) VALUES ($1, $2, $3, $4)",
        )
        .bind(zone.event_id)
        .bind(&zone.name)
        .bind(i32::try_from(zone.capacity).unwrap_or(i32::MAX))
        .bind(i32::try_from(zone.sold).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn active_listing(&self, ticket_id: u64) -> Result<Option<ListingRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM listing_records WHERE ticket_id = $1 AND status = 'ACTIVE'",
        )
        .bind(i64::try_from(ticket_id).unwrap_or(i64::MAX))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.as_ref().map(row_to_listing).transpose()
    }

    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO listing_records (ticket_id, seller, price, status, sold_to, sold_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (ticket_id) DO UPDATE SET
                seller = EXCLUDED.seller,
                price = EXCLUDED.price,
                status = EXCLUDED.status,
                sold_to = EXCLUDED.sold_to,
                sold_at = EXCLUDED.sold_at
            ",
        )
        .bind(i64::try_from(listing.ticket_id).unwrap_or(i64::MAX))
        .bind(listing.seller.to_string())
        .bind(listing.price.to_string())
        .bind(listing.status.as_str())
        .bind(listing.sold_to.map(|a| a.to_string()))
        .bind(listing.sold_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn enqueue_job(&self, job: &SyncJob) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO sync_jobs (
                id, kind, payload, attempts, max_attempts, run_at, created_at, last_error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .bind(i32::try_from(job.max_attempts).unwrap_or(i32::MAX))
        .bind(job.run_at)
        .bind(job.created_at)
        .bind(&job.last_error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let stale_before = now - Duration::seconds(STALE_CLAIM_SECS);
        let rows = sqlx::query(
            r"
            WITH due AS (
                SELECT id FROM sync_jobs
                WHERE run_at <= $1
                  AND (claimed_at IS NULL OR claimed_at < $2)
                ORDER BY run_at, created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE sync_jobs j SET claimed_at = $1
            FROM due WHERE j.id = due.id
            RETURNING j.*
            ",
        )
        .bind(now)
        .bind(stale_before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_job).collect()
    }

    async fn complete_job(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn retry_job(
        &self,
        id: Uuid,
        attempts: u32,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE sync_jobs
            SET attempts = $2, run_at = $3, last_error = $4, claimed_at = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn dead_letter_job(
        &self,
        job: &SyncJob,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            r"
            INSERT INTO sync_dead_letters (
                id, kind, payload, attempts, max_attempts, run_at, created_at,
                last_error, reason, dead_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(i32::try_from(job.attempts).unwrap_or(i32::MAX))
        .bind(i32::try_from(job.max_attempts).unwrap_or(i32::MAX))
        .bind(job.run_at)
        .bind(job.created_at)
        .bind(&job.last_error)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("DELETE FROM sync_jobs WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        tracing::warn!(job = %job.id, kind = %job.kind, reason, "sync job parked as dead letter");
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sync_dead_letters ORDER BY dead_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter()
            .map(|row| {
                let job = row_to_job(row)?;
                Ok(DeadLetter {
                    job,
                    reason: row.try_get("reason").map_err(map_sqlx)?,
                    dead_at: row.try_get("dead_at").map_err(map_sqlx)?,
                })
            })
            .collect()
    }

    async fn pending_job_count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
