//! Local durable queue of pending products.
//!
//! The queue is persisted wholesale: every save replaces the full list under a
//! single well-known key, and every load reads it back in enqueue order.

mod libsql_store;
mod memory;
mod staging;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::PendingProduct;

pub use libsql_store::LibSqlQueueStore;
pub use memory::MemoryQueueStore;
pub use staging::ImageStaging;

/// Storage key holding the serialized pending list
pub const QUEUE_STATE_KEY: &str = "pending_products";

/// Persistence sink for the pending queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Restore the queue in enqueue order.
    ///
    /// Unreadable entries are dropped with a warning; only storage failures
    /// are returned as errors.
    async fn load(&self) -> Result<Vec<PendingProduct>>;

    /// Atomically replace the persisted queue with `queue`
    async fn save(&self, queue: &[PendingProduct]) -> Result<()>;
}

/// Serialize the queue as a JSON array
pub fn encode_queue(queue: &[PendingProduct]) -> Result<String> {
    Ok(serde_json::to_string(queue)?)
}

/// Parse a stored queue, salvaging every entry that still decodes.
///
/// A payload that is not a JSON array is discarded entirely. Duplicate temp
/// ids keep their first occurrence.
pub fn decode_queue(raw: &str) -> Vec<PendingProduct> {
    let values = match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(values) => values,
        Err(error) => {
            tracing::warn!("Discarding unreadable pending queue: {error}");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut queue = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<PendingProduct>(value) {
            Ok(entry) => {
                if seen.insert(entry.temp_id.clone()) {
                    queue.push(entry);
                } else {
                    tracing::warn!("Dropping duplicate pending entry {}", entry.temp_id);
                }
            }
            Err(error) => {
                tracing::warn!("Dropping corrupt pending entry at index {index}: {error}");
            }
        }
    }
    queue
}
