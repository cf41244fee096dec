//! SQLite durable store.
//!
//! Uses a single SQLite database file with two tables:
//! - `turns`: append-only history rows, ordered by an autoincrement id
//! - `sticky_facts`: one row per (session, key), upserted in place
//!
//! Sticky fact rows keep their rowid on update, so `ORDER BY rowid` is the
//! insertion order of the keys.

use crate::history::retained_count;
use async_trait::async_trait;
use chatrelay_core::error::MemoryError;
use chatrelay_core::message::{Role, SessionId, Turn};
use chatrelay_core::store::DurableStore;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A SQLite-backed durable store for turns and sticky facts.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite durable store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  TEXT NOT NULL,
                ts          TEXT NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, id)")
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::MigrationFailed(format!("turns index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sticky_facts (
                session_id  TEXT NOT NULL,
                key         TEXT NOT NULL,
                val         TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("sticky_facts table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, MemoryError> {
        let role: String = row
            .try_get("role")
            .map_err(|e| MemoryError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| MemoryError::QueryFailed(format!("content column: {e}")))?;
        let ts: String = row
            .try_get("ts")
            .map_err(|e| MemoryError::QueryFailed(format!("ts column: {e}")))?;

        let role = Role::from_str(&role).map_err(MemoryError::QueryFailed)?;
        let timestamp = chrono::DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Turn { role, content, timestamp })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn name(&self) -> &str { "sqlite" }

    async fn append_turn(&self, session: &SessionId, turn: &Turn) -> Result<(), MemoryError> {
        sqlx::query("INSERT INTO turns (session_id, ts, role, content) VALUES (?1, ?2, ?3, ?4)")
            .bind(session.as_str())
            .bind(turn.timestamp.to_rfc3339())
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Append failed: {e}")))?;
        Ok(())
    }

    async fn fetch_recent(&self, session: &SessionId, limit: usize) -> Result<Vec<Turn>, MemoryError> {
        let rows = sqlx::query(
            "SELECT ts, role, content FROM turns WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(session.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Fetch failed: {e}")))?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            match Self::row_to_turn(row) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!("Skipping unreadable turn row: {e}"),
            }
        }
        Ok(turns)
    }

    async fn trim_session(&self, session: &SessionId, max_rows: usize, char_budget: usize) -> Result<usize, MemoryError> {
        let rows = sqlx::query("SELECT id, content FROM turns WHERE session_id = ?1 ORDER BY id DESC")
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Trim scan failed: {e}")))?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut lengths = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row
                .try_get("id")
                .map_err(|e| MemoryError::QueryFailed(format!("id column: {e}")))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| MemoryError::QueryFailed(format!("content column: {e}")))?;
            ids.push(id);
            lengths.push(content.chars().count());
        }

        let keep = retained_count(lengths.into_iter(), max_rows, char_budget);
        if keep == ids.len() {
            return Ok(0);
        }

        // Everything at or below the newest dropped id goes
        let cutoff = ids[keep];
        let result = sqlx::query("DELETE FROM turns WHERE session_id = ?1 AND id <= ?2")
            .bind(session.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Trim failed: {e}")))?;

        Ok(result.rows_affected() as usize)
    }

    async fn clear_session(&self, session: &SessionId) -> Result<usize, MemoryError> {
        let result = sqlx::query("DELETE FROM turns WHERE session_id = ?1")
            .bind(session.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Clear failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn upsert_fact(&self, session: &SessionId, key: &str, value: &str) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO sticky_facts (session_id, key, val) VALUES (?1, ?2, ?3)
            ON CONFLICT(session_id, key) DO UPDATE SET val = excluded.val
            "#,
        )
        .bind(session.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Fact upsert failed: {e}")))?;
        Ok(())
    }

    async fn load_facts(&self, session: &SessionId) -> Result<Vec<(String, String)>, MemoryError> {
        let rows = sqlx::query("SELECT key, val FROM sticky_facts WHERE session_id = ?1 ORDER BY rowid")
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Fact load failed: {e}")))?;

        rows.iter()
            .map(|row| {
                let key: String = row
                    .try_get("key")
                    .map_err(|e| MemoryError::QueryFailed(format!("key column: {e}")))?;
                let val: String = row
                    .try_get("val")
                    .map_err(|e| MemoryError::QueryFailed(format!("val column: {e}")))?;
                Ok((key, val))
            })
            .collect()
    }

    async fn clear_facts(&self, session: &SessionId) -> Result<usize, MemoryError> {
        let result = sqlx::query("DELETE FROM sticky_facts WHERE session_id = ?1")
            .bind(session.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Fact clear failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }
}
