//! In-memory queue store used by tests and ephemeral sessions

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{decode_queue, encode_queue, QueueStore};
use crate::error::{Error, Result};
use crate::models::PendingProduct;

/// Keeps the serialized queue in memory, with the same encoding as disk stores
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    raw: Mutex<Option<String>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already serialized payload (possibly corrupt)
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
            ..Self::default()
        }
    }

    /// Start from a list of entries
    pub fn with_entries(queue: &[PendingProduct]) -> Result<Self> {
        Ok(Self::with_raw(encode_queue(queue)?))
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (simulates a full or read-only disk)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Entries as they are currently persisted
    pub fn persisted(&self) -> Vec<PendingProduct> {
        self.raw
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_deref()
            .map(decode_queue)
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<PendingProduct>> {
        Ok(self.persisted())
    }

    async fn save(&self, queue: &[PendingProduct]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Database("simulated save failure".to_string()));
        }
        let payload = encode_queue(queue)?;
        *self
            .raw
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(payload);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
