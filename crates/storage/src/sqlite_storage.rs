//! SQLite storage backend.
//!
//! Timestamps are stored as epoch nanoseconds so the candidate filter can
//! be pushed down as a plain integer comparison without losing precision;
//! the representable range is 1677 to 2262. A batch transition runs in one
//! transaction.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use lapse_core::{
    LifecycleStatus, Offer, OfferId, OfferStatus, Process, ProcessId, ProcessStatus, Time,
};
use chrono::TimeZone;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::trait_::{ensure_terminal, CandidateFilter, EntityStore, Result, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to `url` (e.g. `sqlite://lapse.db`) and ensure the schema.
    ///
    /// The database file is created if it does not exist.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS offers (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                deadline_ns INTEGER NOT NULL,
                created_at_ns INTEGER NOT NULL,
                updated_at_ns INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS processes (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                start_at_ns INTEGER NOT NULL,
                duration_minutes INTEGER NOT NULL,
                created_at_ns INTEGER NOT NULL,
                updated_at_ns INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_offers_due ON offers(status, deadline_ns)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_processes_due ON processes(status, start_at_ns)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Move live rows of `table` to `terminal` in one transaction.
    async fn transition_rows<Id: Display, St: LifecycleStatus>(
        &self,
        table: &str,
        ids: &HashSet<Id>,
        terminal: St,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE {table} SET status = ?, updated_at_ns = ? WHERE id = ? AND status = ?"
        );
        let now = to_nanos(chrono::Utc::now())?;

        let mut tx = self.pool.begin().await?;
        let mut moved = 0;
        for id in ids {
            let result = sqlx::query(&sql)
                .bind(terminal.as_str())
                .bind(now)
                .bind(id.to_string())
                .bind(St::LIVE.as_str())
                .execute(&mut *tx)
                .await?;
            moved += result.rows_affected();
        }
        tx.commit().await?;

        debug!(table, requested = ids.len(), moved, "applied transition");
        Ok(moved)
    }
}

fn to_nanos(at: Time) -> Result<i64> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| StorageError::Other(format!("timestamp not storable: {at}")))
}

fn from_nanos(ns: i64) -> Time {
    chrono::Utc.timestamp_nanos(ns)
}

fn parse_status<St: LifecycleStatus>(row: &SqliteRow) -> Result<St> {
    let raw: String = row.try_get("status")?;
    St::parse(&raw).ok_or_else(|| StorageError::Corrupt(format!("unknown status: {raw}")))
}

fn parse_id<Id>(row: &SqliteRow) -> Result<Id>
where
    Id: std::str::FromStr,
    Id::Err: Display,
{
    let raw: String = row.try_get("id")?;
    raw.parse()
        .map_err(|e| StorageError::Corrupt(format!("bad id {raw}: {e}")))
}

fn offer_from_row(row: &SqliteRow) -> Result<Offer> {
    Ok(Offer {
        id: parse_id(row)?,
        status: parse_status(row)?,
        deadline: from_nanos(row.try_get("deadline_ns")?),
        created_at: from_nanos(row.try_get("created_at_ns")?),
        updated_at: from_nanos(row.try_get("updated_at_ns")?),
    })
}

fn process_from_row(row: &SqliteRow) -> Result<Process> {
    Ok(Process {
        id: parse_id(row)?,
        status: parse_status(row)?,
        start_at: from_nanos(row.try_get("start_at_ns")?),
        duration_minutes: row.try_get("duration_minutes")?,
        created_at: from_nanos(row.try_get("created_at_ns")?),
        updated_at: from_nanos(row.try_get("updated_at_ns")?),
    })
}

#[async_trait]
impl EntityStore<Offer> for SqliteStorage {
    async fn find_candidates(&self, filter: &CandidateFilter<OfferStatus>) -> Result<Vec<Offer>> {
        let rows = sqlx::query(
            "SELECT id, status, deadline_ns, created_at_ns, updated_at_ns
             FROM offers WHERE status = ? AND deadline_ns <= ?",
        )
        .bind(filter.status.as_str())
        .bind(to_nanos(filter.cutoff)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(offer_from_row).collect()
    }

    async fn apply_transition(&self, ids: &HashSet<OfferId>, new_status: OfferStatus) -> Result<u64> {
        ensure_terminal::<Offer>(new_status)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.transition_rows("offers", ids, new_status).await
    }

    async fn insert(&self, offer: &Offer) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO offers (id, status, deadline_ns, created_at_ns, updated_at_ns)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(offer.id.to_string())
        .bind(offer.status.as_str())
        .bind(to_nanos(offer.deadline)?)
        .bind(to_nanos(offer.created_at)?)
        .bind(to_nanos(offer.updated_at)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Duplicate(offer.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: OfferId) -> Result<Option<Offer>> {
        let row = sqlx::query(
            "SELECT id, status, deadline_ns, created_at_ns, updated_at_ns FROM offers WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(offer_from_row).transpose()
    }
}

#[async_trait]
impl EntityStore<Process> for SqliteStorage {
    async fn find_candidates(&self, filter: &CandidateFilter<ProcessStatus>) -> Result<Vec<Process>> {
        // Only the start guard is pushed down; the elapsed check runs in process.
        let rows = sqlx::query(
            "SELECT id, status, start_at_ns, duration_minutes, created_at_ns, updated_at_ns
             FROM processes WHERE status = ? AND start_at_ns <= ?",
        )
        .bind(filter.status.as_str())
        .bind(to_nanos(filter.cutoff)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(process_from_row).collect()
    }

    async fn apply_transition(&self, ids: &HashSet<ProcessId>, new_status: ProcessStatus) -> Result<u64> {
        ensure_terminal::<Process>(new_status)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.transition_rows("processes", ids, new_status).await
    }

    async fn insert(&self, process: &Process) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO processes (id, status, start_at_ns, duration_minutes, created_at_ns, updated_at_ns)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(process.id.to_string())
        .bind(process.status.as_str())
        .bind(to_nanos(process.start_at)?)
        .bind(process.duration_minutes)
        .bind(to_nanos(process.created_at)?)
        .bind(to_nanos(process.updated_at)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Duplicate(process.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: ProcessId) -> Result<Option<Process>> {
        let row = sqlx::query(
            "SELECT id, status, start_at_ns, duration_minutes, created_at_ns, updated_at_ns
             FROM processes WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(process_from_row).transpose()
    }
}
