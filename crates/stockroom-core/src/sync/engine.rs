//! The reconciliation engine.
//!
//! `SyncEngine` owns the pending queue and the confirmed record map. Adds are
//! applied locally and published at once; a background pass then drains the
//! queue into the remote store while the change feed retires entries the
//! server has confirmed. Durable writes go through a single persistence task
//! so callers never wait on storage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};

use super::listener::ChangeListener;
use super::network::NetworkState;
use super::notify::{Notification, NotificationKind};
use super::pass::{bounded, PassReport, PassSink, SyncPass};
use super::state::{Applied, ReconcileState};
use super::status::SyncStatus;
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{PendingProduct, Product, ProductEntry, ProductInput, StagedImage, TempId};
use crate::queue::{ImageStaging, QueueStore};
use crate::remote::{ChangeEvent, RemoteStore};

const NOTIFICATION_CAPACITY: usize = 64;

/// Why a sync attempt did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another pass is running
    InFlight,
    Offline,
    /// No remote store is configured
    NoRemote,
    /// Nothing is queued
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(PassReport),
    Skipped(SkipReason),
}

enum PersistJob {
    Stage { image: StagedImage, bytes: Vec<u8> },
    Save(Vec<PendingProduct>),
    Release(Vec<StagedImage>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the reconciliation engine. Clones share the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<ReconcileState>,
    remote: Option<Arc<dyn RemoteStore>>,
    settings: SyncSettings,
    staging: ImageStaging,
    persist: mpsc::UnboundedSender<PersistJob>,
    syncing: AtomicBool,
    online: AtomicBool,
    idle: Notify,
    products: watch::Sender<Vec<ProductEntry>>,
    status: watch::Sender<SyncStatus>,
    notifications: broadcast::Sender<Notification>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("has_remote", &self.inner.remote.is_some())
            .field("online", &self.is_online())
            .field("syncing", &self.is_syncing())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Restore the durable queue and start the engine.
    ///
    /// The engine starts offline; a `NetworkMonitor` or `set_online` brings it
    /// online. Without a remote the engine only keeps products locally.
    pub async fn start(
        store: Arc<dyn QueueStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        settings: SyncSettings,
    ) -> Result<Self> {
        let restored = store.load().await?;
        tracing::info!("Restored {} pending product(s)", restored.len());

        let mut state = ReconcileState::new(settings.match_tolerance);
        state.restore(restored);

        let staging = ImageStaging::new(settings.staging_dir.clone());
        let (persist, jobs) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        tokio::spawn(run_persister(
            store,
            staging.clone(),
            jobs,
            notifications.clone(),
        ));

        let (products, _) = watch::channel(state.merged_view());
        let (status, _) = watch::channel(SyncStatus::offline(state.pending_count()));

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                remote,
                settings,
                staging,
                persist,
                syncing: AtomicBool::new(false),
                online: AtomicBool::new(false),
                idle: Notify::new(),
                products,
                status,
                notifications,
            }),
        })
    }

    /// Validate and queue a new product.
    ///
    /// Returns as soon as the entry is in the merged view; persistence and
    /// the sync attempt continue in the background.
    pub fn add_product(&self, input: ProductInput) -> Result<PendingProduct> {
        let mut valid = input.validate()?;
        let created_at = Utc::now();
        let temp_id = TempId::generate(created_at);

        let (image, bytes) = match valid.image.take() {
            Some(payload) => {
                let (image, bytes) = self.inner.staging.plan(&temp_id, payload);
                (Some(image), bytes)
            }
            None => (None, None),
        };
        let entry = PendingProduct::new(temp_id, valid, image, created_at);

        {
            let mut state = self.inner.state();
            if let (Some(image), Some(bytes)) = (&entry.image, bytes) {
                self.inner.submit_job(PersistJob::Stage {
                    image: image.clone(),
                    bytes,
                });
            }
            state.enqueue(entry.clone());
            self.inner.publish(&state, true);
        }

        tracing::info!("Saved {} locally as {}", entry.name, entry.temp_id);
        self.inner.notify(
            Notification::new(NotificationKind::SavedLocally, Some(&entry.name))
                .for_entry(&entry.temp_id),
        );
        self.trigger_sync();
        Ok(entry)
    }

    /// Run one sync pass unless one is running, the engine is offline, or
    /// nothing is queued
    pub async fn attempt_sync(&self) -> SyncOutcome {
        let Some(remote) = self.inner.remote.clone() else {
            return SyncOutcome::Skipped(SkipReason::NoRemote);
        };
        if !self.is_online() {
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        let Some(_flight) = FlightGuard::acquire(&self.inner) else {
            tracing::debug!("Sync already in flight");
            return SyncOutcome::Skipped(SkipReason::InFlight);
        };

        let entries = self.inner.state().queue().to_vec();
        if entries.is_empty() {
            return SyncOutcome::Skipped(SkipReason::Empty);
        }

        // Staged image bytes must be on disk before the pass reads them.
        self.flush().await;

        tracing::info!("Syncing {} pending product(s)", entries.len());
        let report = SyncPass::new(remote.as_ref(), &self.inner.settings)
            .run(entries, self.inner.as_ref())
            .await;

        {
            let state = self.inner.state();
            self.inner.publish(&state, true);
        }
        if report.failed == 0 {
            self.inner.update_status(|status| {
                status.last_synced_at = Some(Utc::now());
                status.last_error = None;
            });
        }
        if report.synced > 0 {
            let detail = format!("{} product(s)", report.synced);
            self.inner
                .notify(Notification::new(NotificationKind::Synced, Some(&detail)));
        }

        tracing::info!(
            "Sync pass finished: {} synced, {} failed",
            report.synced,
            report.failed
        );
        SyncOutcome::Completed(report)
    }

    /// Start a sync attempt in the background
    pub fn trigger_sync(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, sync deferred");
            return;
        };
        let engine = self.clone();
        handle.spawn(async move {
            engine.attempt_sync().await;
        });
    }

    /// Like `attempt_sync`, but waits out a pass that is already running and
    /// then tries again
    pub async fn sync_and_wait(&self) -> SyncOutcome {
        loop {
            let idle = self.inner.idle.notified();
            match self.attempt_sync().await {
                SyncOutcome::Skipped(SkipReason::InFlight) => idle.await,
                outcome => return outcome,
            }
        }
    }

    /// Apply one batch of change feed events
    pub fn apply_changes(&self, events: Vec<ChangeEvent>) {
        let applied = {
            let mut state = self.inner.state();
            let applied = state.apply_changes(events);
            self.inner.publish(&state, applied.queue_changed());
            applied
        };
        self.after_apply(applied);
    }

    /// Surface a dropped change feed. Existing data stays valid.
    pub fn report_stream_error(&self, reason: &str) {
        tracing::warn!("Change feed dropped: {reason}");
        self.inner
            .notify(Notification::from_error(&Error::Stream(reason.to_string())));
    }

    /// Replace the confirmed records with a full listing from the remote
    pub async fn refresh(&self) -> Result<usize> {
        let remote = self.remote()?;
        let records = bounded(
            "list",
            self.inner.settings.create_timeout,
            remote.list_records(),
        )
        .await?;

        let applied = {
            let mut state = self.inner.state();
            let applied = state.replace_confirmed(&records);
            self.inner.publish(&state, applied.queue_changed());
            applied
        };
        self.after_apply(applied);
        Ok(records.len())
    }

    /// Subscribe to the remote change feed and apply it in the background
    pub async fn listen(&self) -> Result<ChangeListener> {
        let remote = self.remote()?;
        ChangeListener::attach(self.clone(), remote.as_ref()).await
    }

    /// Wait until every queued write has reached durable storage
    pub async fn flush(&self) {
        let (done, finished) = oneshot::channel();
        if self.inner.persist.send(PersistJob::Flush(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// Record a connectivity change
    pub fn set_online(&self, online: bool) {
        self.apply_connectivity(online, true);
    }

    pub(crate) fn apply_connectivity(&self, online: bool, announce: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        self.inner.update_status(|_| {});
        if was_online == online {
            return;
        }

        if online {
            tracing::info!("Network online");
            if announce {
                self.inner
                    .notify(Notification::new(NotificationKind::BackOnline, None));
            }
            self.trigger_sync();
        } else {
            tracing::info!("Network offline");
            if announce {
                self.inner
                    .notify(Notification::new(NotificationKind::WentOffline, None));
            }
        }
    }

    /// Current merged view, newest first
    pub fn products(&self) -> Vec<ProductEntry> {
        self.inner.products.borrow().clone()
    }

    pub fn subscribe_products(&self) -> watch::Receiver<Vec<ProductEntry>> {
        self.inner.products.subscribe()
    }

    /// Queued entries in enqueue order
    pub fn pending(&self) -> Vec<PendingProduct> {
        self.inner.state().queue().to_vec()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state().pending_count()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn network_state(&self) -> NetworkState {
        NetworkState::from(self.is_online())
    }

    pub fn has_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    fn remote(&self) -> Result<Arc<dyn RemoteStore>> {
        self.inner
            .remote
            .clone()
            .ok_or_else(|| Error::InvalidConfig("no remote store is configured".to_string()))
    }

    fn after_apply(&self, applied: Applied) {
        if applied.queue_changed() {
            tracing::info!(
                "Change feed retired {} and purged {} pending product(s)",
                applied.retired.len(),
                applied.purged.len()
            );
        }
        if !applied.released.is_empty() {
            self.inner.submit_job(PersistJob::Release(applied.released));
        }
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ReconcileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the merged view and pending count; optionally schedule a save.
    ///
    /// Called with the state lock held so saves reach the writer in order.
    fn publish(&self, state: &ReconcileState, persist: bool) {
        if persist {
            self.submit_job(PersistJob::Save(state.queue().to_vec()));
        }
        self.products.send_replace(state.merged_view());
        let pending = state.pending_count();
        self.update_status(|status| status.pending = pending);
    }

    fn update_status(&self, change: impl FnOnce(&mut SyncStatus)) {
        let online = self.online.load(Ordering::SeqCst);
        let syncing = self.syncing.load(Ordering::SeqCst);
        self.status.send_modify(|status| {
            change(status);
            status.refresh_state(online, syncing);
        });
    }

    fn submit_job(&self, job: PersistJob) {
        if self.persist.send(job).is_err() {
            tracing::warn!("Persistence writer is gone, queue change not saved");
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }
}

impl PassSink for Inner {
    fn submitted(&self, ids: &[TempId]) {
        let mut state = self.state();
        state.mark_submitted(ids);
        self.publish(&state, true);
    }

    fn image_dropped(&self, id: &TempId) {
        let mut state = self.state();
        if state.clear_image(id).is_some() {
            self.publish(&state, true);
        }
    }

    fn synced(&self, id: &TempId, record: Product) {
        let mut state = self.state();
        state.mark_synced(id, record);
        self.publish(&state, true);
    }

    fn failed(&self, ids: &[TempId], error: &Error) {
        let message = error.to_string();
        {
            let mut state = self.state();
            for id in ids {
                state.requeue_failed(id, &message);
            }
            self.publish(&state, true);
        }
        self.update_status(|status| status.last_error = Some(message));

        let mut notification = Notification::from_error(error);
        if let [id] = ids {
            notification = notification.for_entry(id);
        }
        self.notify(notification);
    }

    fn warned(&self, id: &TempId, error: &Error) {
        self.notify(Notification::from_error(error).for_entry(id));
    }
}

/// Single-flight guard; releasing it wakes `sync_and_wait` callers
struct FlightGuard<'a> {
    inner: &'a Inner,
}

impl<'a> FlightGuard<'a> {
    fn acquire(inner: &'a Inner) -> Option<Self> {
        inner
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        inner.update_status(|_| {});
        Some(Self { inner })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.syncing.store(false, Ordering::SeqCst);
        self.inner.update_status(|_| {});
        self.inner.idle.notify_waiters();
    }
}

async fn run_persister(
    store: Arc<dyn QueueStore>,
    staging: ImageStaging,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
    notifications: broadcast::Sender<Notification>,
) {
    let mut carried = None;
    loop {
        let job = match carried.take() {
            Some(job) => job,
            None => match jobs.recv().await {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            PersistJob::Save(mut queue) => {
                // Only the newest snapshot matters; stop at the first other job.
                while let Ok(next) = jobs.try_recv() {
                    match next {
                        PersistJob::Save(newer) => queue = newer,
                        other => {
                            carried = Some(other);
                            break;
                        }
                    }
                }
                match store.save(&queue).await {
                    Ok(()) => tracing::debug!("Persisted {} pending product(s)", queue.len()),
                    Err(error) => {
                        tracing::warn!("Failed to persist pending queue: {error}");
                        let _ = notifications.send(Notification::from_error(&error));
                    }
                }
            }
            PersistJob::Stage { image, bytes } => {
                if let Err(error) = staging.write(&image, &bytes).await {
                    tracing::warn!(
                        "Failed to stage image {}: {error}",
                        image.path.display()
                    );
                    let _ = notifications.send(Notification::from_error(&error));
                }
            }
            PersistJob::Release(images) => {
                for image in &images {
                    ImageStaging::release(image).await;
                }
            }
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Persistence writer stopped");
}
