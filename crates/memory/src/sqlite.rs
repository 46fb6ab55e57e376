//! SQLite iteration store with FTS5 keyword recall.
//!
//! Uses a single SQLite database file with two tables:
//! - `iterations`: one row per completed question/answer exchange
//! - `iterations_fts`: FTS5 virtual table for ranked keyword search (BM25)
//!
//! Triggers keep the FTS index in sync on insert/delete.

use async_trait::async_trait;
use chrono::Utc;
use snak_core::error::MemoryError;
use snak_core::memory::{Iteration, IterationStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A persistent iteration store backed by SQLite.
pub struct SqliteIterationStore {
    pool: SqlitePool,
}

impl SqliteIterationStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
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
        info!("SQLite iteration store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS iterations (
                iid         INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id    TEXT NOT NULL,
                question    TEXT NOT NULL,
                answer      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("iterations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS iterations_fts USING fts5(
                question,
                answer,
                content='iterations',
                content_rowid='iid',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("FTS5 table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS iterations_ai AFTER INSERT ON iterations BEGIN
                INSERT INTO iterations_fts(rowid, question, answer)
                VALUES (new.iid, new.question, new.answer);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("insert trigger: {e}")))?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS iterations_ad AFTER DELETE ON iterations BEGIN
                INSERT INTO iterations_fts(iterations_fts, rowid, question, answer)
                VALUES ('delete', old.iid, old.question, old.answer);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("delete trigger: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_iterations_agent ON iterations(agent_id, iid)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_iteration(row: &sqlx::sqlite::SqliteRow) -> Result<Iteration, MemoryError> {
        let agent_id: String = row
            .try_get("agent_id")
            .map_err(|e| MemoryError::QueryFailed(format!("agent_id column: {e}")))?;
        let question: String = row
            .try_get("question")
            .map_err(|e| MemoryError::QueryFailed(format!("question column: {e}")))?;
        let answer: String = row
            .try_get("answer")
            .map_err(|e| MemoryError::QueryFailed(format!("answer column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| MemoryError::QueryFailed(format!("created_at column: {e}")))?;

        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Iteration {
            agent_id,
            question,
            answer,
            created_at,
        })
    }

    /// Build an FTS5 query matching any of the words, with prefix matching.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|clean| !clean.is_empty())
            .map(|clean| format!("\"{clean}\"*"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[async_trait]
impl IterationStore for SqliteIterationStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_iteration(&self, iteration: Iteration) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO iterations (agent_id, question, answer, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&iteration.agent_id)
        .bind(&iteration.question)
        .bind(&iteration.answer)
        .bind(iteration.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(agent_id = %iteration.agent_id, "Stored iteration");
        Ok(())
    }

    async fn count_iterations(&self, agent_id: &str) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM iterations WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| MemoryError::QueryFailed(format!("count column: {e}")))?;
        Ok(n.max(0) as usize)
    }

    async fn delete_oldest_iteration(&self, agent_id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM iterations
            WHERE iid = (SELECT MIN(iid) FROM iterations WHERE agent_id = ?1)
            "#,
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_iterations(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM iterations WHERE agent_id = ?1 ORDER BY iid DESC LIMIT ?2",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Recent query: {e}")))?;

        let mut iterations = rows
            .iter()
            .map(Self::row_to_iteration)
            .collect::<Result<Vec<_>, _>>()?;
        iterations.reverse();
        Ok(iterations)
    }

    async fn search_iterations(
        &self,
        agent_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Iteration>, MemoryError> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT i.*, bm25(iterations_fts) AS rank
            FROM iterations_fts f
            JOIN iterations i ON i.iid = f.rowid
            WHERE iterations_fts MATCH ?1 AND i.agent_id = ?2
            ORDER BY rank
            LIMIT ?3
            "#,
        )
        .bind(&fts_query)
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter().map(Self::row_to_iteration).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteIterationStore {
        SqliteIterationStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_and_count() {
        let db = test_store().await;
        db.insert_iteration(Iteration::new("a", "q1", "a1"))
            .await
            .unwrap();
        db.insert_iteration(Iteration::new("a", "q2", "a2"))
            .await
            .unwrap();
        db.insert_iteration(Iteration::new("b", "q3", "a3"))
            .await
            .unwrap();
        assert_eq!(db.count_iterations("a").await.unwrap(), 2);
        assert_eq!(db.count_iterations("b").await.unwrap(), 1);
        assert_eq!(db.count_iterations("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_oldest_is_per_agent() {
        let db = test_store().await;
        db.insert_iteration(Iteration::new("a", "old", "x"))
            .await
            .unwrap();
        db.insert_iteration(Iteration::new("b", "other", "x"))
            .await
            .unwrap();
        db.insert_iteration(Iteration::new("a", "new", "x"))
            .await
            .unwrap();

        assert!(db.delete_oldest_iteration("a").await.unwrap());
        let recent = db.recent_iterations("a", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].question, "new");
        assert_eq!(db.count_iterations("b").await.unwrap(), 1);
        assert!(!db.delete_oldest_iteration("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn recent_is_oldest_first_within_limit() {
        let db = test_store().await;
        for i in 0..4 {
            db.insert_iteration(Iteration::new("a", format!("q{i}"), "x"))
                .await
                .unwrap();
        }
        let recent = db.recent_iterations("a", 3).await.unwrap();
        let questions: Vec<_> = recent.iter().map(|i| i.question.as_str()).collect();
        assert_eq!(questions, vec!["q1", "q2", "q3"]);
    }

    #[tokio::test]
    async fn fts5_search_scoped_to_agent() {
        let db = test_store().await;
        db.insert_iteration(Iteration::new("a", "What is my balance", "12 STRK"))
            .await
            .unwrap();
        db.insert_iteration(Iteration::new("b", "balance of Bob", "3 ETH"))
            .await
            .unwrap();
        db.insert_iteration(Iteration::new("a", "Deploy a contract", "deployed"))
            .await
            .unwrap();

        let hits = db.search_iterations("a", "balance", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].answer, "12 STRK");
    }

    #[tokio::test]
    async fn fts5_search_after_delete() {
        let db = test_store().await;
        db.insert_iteration(Iteration::new("a", "ephemeral question", "gone"))
            .await
            .unwrap();
        db.delete_oldest_iteration("a").await.unwrap();
        let hits = db.search_iterations("a", "ephemeral", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn sanitize_fts_query_joins_with_or() {
        assert_eq!(
            SqliteIterationStore::sanitize_fts_query("hello! @world#"),
            "\"hello\"* OR \"world\"*"
        );
        assert_eq!(SqliteIterationStore::sanitize_fts_query("   "), "");
    }
}
