//! SQLite idempotency store.
//!
//! A single `messages` table keyed by the platform message id. The claim
//! is one `INSERT ... ON CONFLICT DO NOTHING` statement, so two concurrent
//! deliveries of the same message id cannot both win — the unique
//! constraint is the gate, not a separate existence check.

use async_trait::async_trait;
use chrono::Utc;
use larkrelay_core::error::StoreError;
use larkrelay_core::message::InboundMessage;
use larkrelay_core::store::IdempotencyStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable SQLite-backed idempotency store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at a file path.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite idempotency store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id   TEXT PRIMARY KEY,
                message_type TEXT NOT NULL,
                content      TEXT NOT NULL,
                chat_type    TEXT NOT NULL,
                chat_id      TEXT NOT NULL,
                received_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for SqliteStore {
    async fn claim(&self, message: &InboundMessage) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (message_id, message_type, content, chat_type, chat_id, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(message_id) DO NOTHING
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.message_type)
        .bind(&message.content)
        .bind(&message.chat_type)
        .bind(&message.chat_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        let claimed = result.rows_affected() == 1;
        if !claimed {
            debug!(message_id = %message.message_id, "Duplicate delivery rejected");
        }
        Ok(claimed)
    }

    async fn has_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM messages WHERE message_id = ?1")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT failed: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(cnt > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn make_message(id: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.into(),
            message_type: "text".into(),
            content: r#"{"text":"hello"}"#.into(),
            chat_type: "p2p".into(),
            chat_id: "chat_1".into(),
        }
    }

    #[tokio::test]
    async fn first_claim_succeeds() {
        let store = test_store().await;
        assert!(store.claim(&make_message("m1")).await.unwrap());
        assert!(store.has_processed("m1").await.unwrap());
    }

    #[tokio::test]
    async fn second_claim_is_rejected() {
        let store = test_store().await;
        assert!(store.claim(&make_message("m1")).await.unwrap());
        assert!(!store.claim(&make_message("m1")).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_ids_claim_independently() {
        let store = test_store().await;
        assert!(store.claim(&make_message("m1")).await.unwrap());
        assert!(store.claim(&make_message("m2")).await.unwrap());
        assert!(!store.has_processed("m3").await.unwrap());
    }

    #[tokio::test]
    async fn message_fields_persisted_verbatim() {
        let store = test_store().await;
        let msg = InboundMessage {
            message_id: "om_x".into(),
            message_type: "image".into(),
            content: r#"{"image_key":"img_v2"}"#.into(),
            chat_type: "group".into(),
            chat_id: "oc_y".into(),
        };
        store.claim(&msg).await.unwrap();

        let row = sqlx::query("SELECT * FROM messages WHERE message_id = 'om_x'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let content: String = row.try_get("content").unwrap();
        let chat_type: String = row.try_get("chat_type").unwrap();
        assert_eq!(content, r#"{"image_key":"img_v2"}"#);
        assert_eq!(chat_type, "group");
    }

    #[tokio::test]
    async fn concurrent_claims_yield_one_winner() {
        let store = Arc::new(test_store().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim(&make_message("contested")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent claim must win");
    }

    #[tokio::test]
    async fn claims_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("test.sqlite3").display());

        {
            let store = SqliteStore::new(&path).await.unwrap();
            assert!(store.claim(&make_message("persistent")).await.unwrap());
        }

        let reopened = SqliteStore::new(&path).await.unwrap();
        assert!(reopened.has_processed("persistent").await.unwrap());
        assert!(!reopened.claim(&make_message("persistent")).await.unwrap());
    }
}
