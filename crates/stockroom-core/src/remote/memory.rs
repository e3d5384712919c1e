//! In-process remote store with failure injection

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use super::{ChangeEvent, ChangeFeed, ChangeSubscription, ItemResult, RemoteStore};
use crate::error::{Error, Result};
use crate::models::{NewProduct, Product};
use crate::util::{normalize_lookup_key, sanitize_file_name};

/// Remote store kept entirely in memory.
///
/// Clones share the same server state, so several engines can act as
/// separate devices against one "server".
#[derive(Clone, Default)]
pub struct InMemoryRemoteStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ServerState>,
    fail_creates: AtomicBool,
    fail_uploads: AtomicBool,
    fail_lookups: AtomicBool,
    batch_mode: AtomicBool,
    drop_client_ref: AtomicBool,
    hold_changes: AtomicBool,
    create_delay_ms: AtomicU64,
    create_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
}

#[derive(Default)]
struct ServerState {
    records: Vec<Product>,
    lookups: HashMap<String, String>,
    blobs: HashMap<String, Vec<u8>>,
    subscribers: Vec<mpsc::UnboundedSender<ChangeFeed>>,
    held: Vec<ChangeEvent>,
    failing_names: HashSet<String>,
    next_id: u64,
}

impl ServerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every create and batch commit (simulated network error)
    pub fn set_fail_creates(&self, fail: bool) {
        self.inner.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.inner.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.inner.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Advertise atomic batch commits
    pub fn set_batch_mode(&self, enabled: bool) {
        self.inner.batch_mode.store(enabled, Ordering::SeqCst);
    }

    /// Reject records with this name inside otherwise successful batches
    pub fn fail_batch_item(&self, name: impl Into<String>) {
        self.state().failing_names.insert(name.into());
    }

    /// Behave like a server that does not store client idempotency keys
    pub fn set_drop_client_ref(&self, drop_ref: bool) {
        self.inner.drop_client_ref.store(drop_ref, Ordering::SeqCst);
    }

    /// Delay every create call, to keep a sync pass in flight
    pub fn set_create_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.create_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Buffer change events instead of delivering them. Releasing the hold
    /// delivers everything buffered as one batch.
    pub fn set_hold_changes(&self, hold: bool) {
        self.inner.hold_changes.store(hold, Ordering::SeqCst);
        if !hold {
            let mut state = self.state();
            let held = std::mem::take(&mut state.held);
            if !held.is_empty() {
                broadcast(&mut state, held);
            }
        }
    }

    pub fn create_calls(&self) -> usize {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.inner.batch_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.inner.upload_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.inner.lookup_calls.load(Ordering::SeqCst)
    }

    /// Confirmed records in insertion order
    pub fn records(&self) -> Vec<Product> {
        self.state().records.clone()
    }

    pub fn blob(&self, url: &str) -> Option<Vec<u8>> {
        self.state().blobs.get(url).cloned()
    }

    /// Simulate a write made by another device
    pub fn insert_external(&self, record: NewProduct) -> Product {
        let mut state = self.state();
        let product = self.commit(&mut state, record);
        self.emit(&mut state, vec![ChangeEvent::Added(product.clone())]);
        product
    }

    /// Delete a record and announce it on the feed
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|record| record.id != id);
        let removed = state.records.len() != before;
        if removed {
            self.emit(&mut state, vec![ChangeEvent::Removed { id: id.to_string() }]);
        }
        removed
    }

    /// Push raw events to subscribers without touching stored records
    pub fn emit_events(&self, events: Vec<ChangeEvent>) {
        let mut state = self.state();
        self.emit(&mut state, events);
    }

    /// Terminate every open subscription with a `Dropped` item
    pub fn drop_streams(&self, reason: &str) {
        let mut state = self.state();
        for subscriber in state.subscribers.drain(..) {
            let _ = subscriber.send(ChangeFeed::Dropped(reason.to_string()));
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(&self, state: &mut ServerState, mut record: NewProduct) -> Product {
        if self.inner.drop_client_ref.load(Ordering::SeqCst) {
            record.client_ref = None;
        }
        let id = format!("srv-{}", state.next_id());
        let mut product = record.into_product(id);
        product.created_at = Utc::now();
        state.records.push(product.clone());
        product
    }

    /// Id of a record already created with the same client idempotency key
    fn replayed(&self, state: &ServerState, record: &NewProduct) -> Option<String> {
        if self.inner.drop_client_ref.load(Ordering::SeqCst) {
            return None;
        }
        let client_ref = record.client_ref.as_deref()?;
        state
            .records
            .iter()
            .find(|existing| existing.client_ref.as_deref() == Some(client_ref))
            .map(|existing| existing.id.clone())
    }

    fn emit(&self, state: &mut ServerState, events: Vec<ChangeEvent>) {
        if self.inner.hold_changes.load(Ordering::SeqCst) {
            state.held.extend(events);
        } else {
            broadcast(state, events);
        }
    }

    async fn simulate_latency(&self) {
        let millis = self.inner.create_delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

fn broadcast(state: &mut ServerState, events: Vec<ChangeEvent>) {
    state
        .subscribers
        .retain(|subscriber| subscriber.send(ChangeFeed::Batch(events.clone())).is_ok());
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create_record(&self, record: NewProduct) -> Result<String> {
        self.inner.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.inner.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::Submit("simulated network error".to_string()));
        }

        let mut state = self.state();
        if let Some(id) = self.replayed(&state, &record) {
            return Ok(id);
        }
        let product = self.commit(&mut state, record);
        self.emit(&mut state, vec![ChangeEvent::Added(product.clone())]);
        Ok(product.id)
    }

    fn supports_batch(&self) -> bool {
        self.inner.batch_mode.load(Ordering::SeqCst)
    }

    async fn create_records_batch(&self, records: Vec<NewProduct>) -> Result<Vec<ItemResult>> {
        self.inner.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.inner.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::Commit("simulated commit failure".to_string()));
        }

        let mut state = self.state();
        let mut results = Vec::with_capacity(records.len());
        let mut events = Vec::new();
        for record in records {
            if state.failing_names.contains(&record.name) {
                results.push(Err(format!("record '{}' rejected", record.name)));
                continue;
            }
            if let Some(id) = self.replayed(&state, &record) {
                results.push(Ok(id));
                continue;
            }
            let product = self.commit(&mut state, record);
            results.push(Ok(product.id.clone()));
            events.push(ChangeEvent::Added(product));
        }
        if !events.is_empty() {
            self.emit(&mut state, events);
        }
        Ok(results)
    }

    async fn list_records(&self) -> Result<Vec<Product>> {
        Ok(self.records())
    }

    async fn subscribe_changes(&self) -> Result<ChangeSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let snapshot = state
            .records
            .iter()
            .cloned()
            .map(ChangeEvent::Added)
            .collect();
        tx.send(ChangeFeed::Batch(snapshot))
            .map_err(|error| Error::Stream(error.to_string()))?;
        state.subscribers.push(tx);
        Ok(ChangeSubscription::new(rx))
    }

    async fn upload_blob(
        &self,
        bytes: Vec<u8>,
        name: &str,
        _content_type: Option<&str>,
    ) -> Result<String> {
        self.inner.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Upload("simulated upload failure".to_string()));
        }
        let mut state = self.state();
        let url = format!(
            "memory://blobs/{}-{}",
            state.next_id(),
            sanitize_file_name(name)
        );
        state.blobs.insert(url.clone(), bytes);
        Ok(url)
    }

    async fn find_or_create_lookup(&self, name: &str) -> Result<String> {
        self.inner.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::LookupResolution(
                "simulated lookup failure".to_string(),
            ));
        }
        let key = normalize_lookup_key(name);
        if key.is_empty() {
            return Err(Error::LookupResolution(
                "lookup name cannot be empty".to_string(),
            ));
        }
        let mut state = self.state();
        if let Some(id) = state.lookups.get(&key) {
            return Ok(id.clone());
        }
        let id = format!("co-{}", state.next_id());
        state.lookups.insert(key, id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            company: None,
            company_id: None,
            cost_price: 10.0,
            selling_price: 15.0,
            max_discount: 0.0,
            image_url: None,
            created_at: Utc::now(),
            client_ref: None,
        }
    }

    fn keyed(name: &str, client_ref: &str) -> NewProduct {
        NewProduct {
            client_ref: Some(client_ref.to_string()),
            ..request(name)
        }
    }

    #[tokio::test]
    async fn subscription_starts_with_snapshot_then_live_events() {
        let remote = InMemoryRemoteStore::new();
        remote.create_record(request("Existing")).await.unwrap();

        let mut subscription = remote.subscribe_changes().await.unwrap();
        match subscription.next().await.unwrap() {
            ChangeFeed::Batch(events) => {
                assert_eq!(events.len(), 1);
                assert!(matches!(&events[0], ChangeEvent::Added(p) if p.name == "Existing"));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        let id = remote.create_record(request("Live")).await.unwrap();
        match subscription.next().await.unwrap() {
            ChangeFeed::Batch(events) => {
                assert!(matches!(&events[0], ChangeEvent::Added(p) if p.id == id));
            }
            other => panic!("expected live event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookups_match_case_insensitively() {
        let remote = InMemoryRemoteStore::new();
        let first = remote.find_or_create_lookup("Acme Corp").await.unwrap();
        let second = remote.find_or_create_lookup("  acme   CORP ").await.unwrap();
        let other = remote.find_or_create_lookup("Globex").await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn batch_reports_per_item_failures() {
        let remote = InMemoryRemoteStore::new();
        remote.fail_batch_item("Broken");

        let results = remote
            .create_records_batch(vec![request("Fine"), request("Broken")])
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(remote.records().len(), 1);
    }

    #[tokio::test]
    async fn held_changes_are_released_together() {
        let remote = InMemoryRemoteStore::new();
        let mut subscription = remote.subscribe_changes().await.unwrap();
        let _snapshot = subscription.next().await;

        remote.set_hold_changes(true);
        remote.create_record(request("A")).await.unwrap();
        remote.create_record(request("B")).await.unwrap();
        remote.set_hold_changes(false);

        match subscription.next().await.unwrap() {
            ChangeFeed::Batch(events) => assert_eq!(events.len(), 2),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_client_ref_is_not_stored() {
        let remote = InMemoryRemoteStore::new();
        remote.set_drop_client_ref(true);
        remote
            .create_record(keyed("Mug", "local-1-00000000"))
            .await
            .unwrap();
        assert_eq!(remote.records()[0].client_ref, None);
    }

    #[tokio::test]
    async fn repeated_client_ref_returns_existing_record() {
        let remote = InMemoryRemoteStore::new();
        let first = remote
            .create_record(keyed("Mug", "local-1-0000000a"))
            .await
            .unwrap();
        let again = remote
            .create_record(keyed("Mug", "local-1-0000000a"))
            .await
            .unwrap();
        let other = remote
            .create_record(keyed("Mug", "local-1-0000000b"))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(remote.records().len(), 2);
        assert_eq!(remote.create_calls(), 3);
    }
}
