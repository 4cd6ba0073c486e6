// src/client/store.rs

use sqlx::SqlitePool;
use sqlx::prelude::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The only stored status. Terminal states (confirmed, definitively
/// rejected) are deletion, never a stored status.
pub const STATUS_PENDING: &str = "pending";

/// An attempt not yet confirmed by the server, owned by the local durable
/// store for the lifetime of the unsynced window.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueuedAttempt {
    /// `{presentationKey}:{answerId}` — at most one pending record exists
    /// per key.
    pub id: String,
    pub presentation_key: String,
    pub presentation_id: i64,
    pub answer_id: i64,
    pub question_id: i64,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl QueuedAttempt {
    pub fn storage_key(presentation_key: &str, answer_id: i64) -> String {
        format!("{}:{}", presentation_key, answer_id)
    }

    /// Rows missing either id are purged by the synchronizer without a
    /// network call.
    pub fn is_structurally_valid(&self) -> bool {
        self.presentation_id > 0 && self.answer_id > 0
    }
}

/// Durable key-value store for not-yet-confirmed attempts plus a small
/// presentation-data cache. Backed by its own SQLite file so an app restart
/// (or a dead network) never loses a submission.
#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    /// Opens (creating if missing) the store at `path`.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests and ephemeral sessions.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queued_attempts (
                id TEXT PRIMARY KEY,
                presentation_key TEXT NOT NULL,
                presentation_id INTEGER NOT NULL,
                answer_id INTEGER NOT NULL,
                question_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queued_attempts_key_status
             ON queued_attempts(presentation_key, status)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS presentation_cache (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Idempotent enqueue: an existing pending record for this key is
    /// returned unchanged; otherwise a new pending record is inserted.
    /// The bool is true when a record was created.
    pub async fn enqueue(
        &self,
        presentation_id: i64,
        answer_id: i64,
        question_id: i64,
        presentation_key: &str,
    ) -> Result<(QueuedAttempt, bool), sqlx::Error> {
        let id = QueuedAttempt::storage_key(presentation_key, answer_id);

        if let Some(existing) = self.get(&id).await? {
            return Ok((existing, false));
        }

        let now = chrono::Utc::now();
        let record = sqlx::query_as::<_, QueuedAttempt>(
            "INSERT INTO queued_attempts
                (id, presentation_key, presentation_id, answer_id, question_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, presentation_key, presentation_id, answer_id, question_id, status, created_at, updated_at",
        )
        .bind(&id)
        .bind(presentation_key)
        .bind(presentation_id)
        .bind(answer_id)
        .bind(question_id)
        .bind(STATUS_PENDING)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok((record, true))
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueuedAttempt>, sqlx::Error> {
        sqlx::query_as::<_, QueuedAttempt>(
            "SELECT id, presentation_key, presentation_id, answer_id, question_id, status, created_at, updated_at
             FROM queued_attempts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// All pending records for one presentation key, oldest first.
    pub async fn pending_for_key(
        &self,
        presentation_key: &str,
    ) -> Result<Vec<QueuedAttempt>, sqlx::Error> {
        sqlx::query_as::<_, QueuedAttempt>(
            "SELECT id, presentation_key, presentation_id, answer_id, question_id, status, created_at, updated_at
             FROM queued_attempts
             WHERE presentation_key = ? AND status = ?
             ORDER BY created_at, id",
        )
        .bind(presentation_key)
        .bind(STATUS_PENDING)
        .fetch_all(&self.pool)
        .await
    }

    /// Closes the underlying pool. Subsequent operations error; the
    /// synchronizer's degraded direct-submit path takes over.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Removes a record; confirmed sync and definitive rejection both land here.
    pub async fn delete(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM queued_attempts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Presentation-data cache collaborator: plain get/put keyed blobs so the
    /// embedding app can render offline.
    pub async fn put_cached_presentation(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO presentation_cache (key, payload, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(payload.to_string())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cached_presentation(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, sqlx::Error> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM presentation_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payload.and_then(|raw| serde_json::from_str(&raw).ok()))
    }
}
