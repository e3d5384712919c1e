//! Remote document store contract.
//!
//! The reconciliation engine only talks to the remote through `RemoteStore`.
//! `InMemoryRemoteStore` implements it in-process; `HttpRemoteStore` talks to
//! a REST document API.

mod http;
mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::{NewProduct, Product};

pub use http::{diff_snapshots, HttpRemoteStore};
pub use memory::InMemoryRemoteStore;

/// Outcome of one record inside a batch: server id or failure message
pub type ItemResult = std::result::Result<String, String>;

/// A change to the confirmed collection
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(Product),
    Modified(Product),
    Removed { id: String },
}

/// One delivery from the change feed
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeFeed {
    /// Ordered events, delivered at least once
    Batch(Vec<ChangeEvent>),
    /// The feed stopped; no further items follow
    Dropped(String),
}

type UnsubscribeFn = Box<dyn FnOnce() + Send + Sync>;

/// Live subscription to the change feed. Dropping it unsubscribes.
pub struct ChangeSubscription {
    receiver: mpsc::UnboundedReceiver<ChangeFeed>,
    on_unsubscribe: Option<UnsubscribeFn>,
}

impl ChangeSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<ChangeFeed>) -> Self {
        Self {
            receiver,
            on_unsubscribe: None,
        }
    }

    /// Run `cleanup` when the subscription ends
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(cleanup));
        self
    }

    /// Next feed item, or `None` once the remote closed the feed
    pub async fn next(&mut self) -> Option<ChangeFeed> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(cleanup) = self.on_unsubscribe.take() {
            cleanup();
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChangeSubscription")
            .field("has_cleanup", &self.on_unsubscribe.is_some())
            .finish_non_exhaustive()
    }
}

/// Operations the engine needs from the remote document and blob store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create one record; the server assigns id and creation time
    async fn create_record(&self, record: NewProduct) -> Result<String>;

    /// Whether `create_records_batch` commits atomically on this adapter
    fn supports_batch(&self) -> bool {
        false
    }

    /// Create several records at once.
    ///
    /// `Err` means the whole batch failed. `Ok` carries one result per input,
    /// in input order.
    async fn create_records_batch(&self, records: Vec<NewProduct>) -> Result<Vec<ItemResult>> {
        let _ = records;
        Err(Error::Commit(
            "batch commit is not supported by this remote".to_string(),
        ))
    }

    /// All confirmed records
    async fn list_records(&self) -> Result<Vec<Product>>;

    /// Subscribe to changes. The first batch lists existing records as `Added`.
    async fn subscribe_changes(&self) -> Result<ChangeSubscription>;

    /// Upload image bytes and return their blob URL
    async fn upload_blob(
        &self,
        bytes: Vec<u8>,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<String>;

    /// Find the company lookup entity by case-insensitive name, creating it if absent
    async fn find_or_create_lookup(&self, name: &str) -> Result<String>;
}
