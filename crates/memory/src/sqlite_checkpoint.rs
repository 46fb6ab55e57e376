//! SQLite checkpoint store.
//!
//! One row per thread; `put` overwrites. Lets a suspended run be resumed
//! from another process.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use snak_core::checkpoint::{Checkpoint, CheckpointStore, RunStatus};
use snak_core::error::CheckpointError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, CheckpointError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| CheckpointError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // A single connection keeps `sqlite::memory:` to one database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to open SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id   TEXT PRIMARY KEY,
                status      TEXT NOT NULL,
                state       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| CheckpointError::Storage(format!("checkpoints table: {e}")))?;

        info!("SQLite checkpoint store initialized at {path}");
        Ok(Self { pool })
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, CheckpointError> {
        let column = |name: &str| -> Result<String, CheckpointError> {
            row.try_get(name)
                .map_err(|e| CheckpointError::Storage(format!("{name} column: {e}")))
        };
        let thread_id = column("thread_id")?;
        let corrupt = |e: serde_json::Error| CheckpointError::Corrupt {
            thread_id: thread_id.clone(),
            reason: e.to_string(),
        };
        let status: RunStatus = serde_json::from_str(&column("status")?).map_err(corrupt)?;
        let state: serde_json::Value = serde_json::from_str(&column("state")?).map_err(corrupt)?;
        let updated_at = chrono::DateTime::parse_from_rfc3339(&column("updated_at")?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Checkpoint {
            thread_id,
            status,
            state,
            updated_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ?1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("SELECT failed: {e}")))?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let encode = |e: serde_json::Error| CheckpointError::Corrupt {
            thread_id: checkpoint.thread_id.clone(),
            reason: e.to_string(),
        };
        let status = serde_json::to_string(&checkpoint.status).map_err(encode)?;
        let state = serde_json::to_string(&checkpoint.state).map_err(encode)?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, status, state, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(thread_id) DO UPDATE SET
                status = excluded.status,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(status)
        .bind(state)
        .bind(checkpoint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(format!("UPSERT failed: {e}")))?;

        debug!(thread_id = %checkpoint.thread_id, "Stored checkpoint");
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM checkpoints")
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(format!("DELETE failed: {e}")))?;
        Ok(())
    }
}
