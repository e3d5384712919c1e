//! libSQL-backed queue store

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{decode_queue, encode_queue, QueueStore, QUEUE_STATE_KEY};
use crate::db::Database;
use crate::error::Result;
use crate::models::PendingProduct;

/// Persists the queue as one row of the `local_state` table
#[derive(Clone)]
pub struct LibSqlQueueStore {
    db: Arc<Mutex<Database>>,
}

impl LibSqlQueueStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path).await?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn read_raw(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT value FROM local_state WHERE key = ?",
                [QUEUE_STATE_KEY],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl QueueStore for LibSqlQueueStore {
    async fn load(&self) -> Result<Vec<PendingProduct>> {
        let Some(raw) = self.read_raw().await? else {
            return Ok(Vec::new());
        };
        let queue = decode_queue(&raw);
        tracing::debug!("Loaded {} pending products from local store", queue.len());
        Ok(queue)
    }

    async fn save(&self, queue: &[PendingProduct]) -> Result<()> {
        let payload = encode_queue(queue)?;
        let updated_at = chrono::Utc::now().timestamp_millis();
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT OR REPLACE INTO local_state (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![QUEUE_STATE_KEY, payload, updated_at],
            )
            .await?;
        Ok(())
    }
}
