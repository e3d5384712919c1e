//! Connectivity tracking.
//!
//! A `Connectivity` source answers "are we online" synchronously and
//! announces transitions. `NetworkMonitor` forwards both to the engine, which
//! syncs on every Offline -> Online transition.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::engine::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl From<bool> for NetworkState {
    fn from(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Platform connectivity signal
pub trait Connectivity: Send + Sync {
    /// Synchronous check of the current state
    fn is_online(&self) -> bool;

    /// Receiver that changes whenever connectivity flips
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity driven by explicit calls; used by hosts that learn about the
/// network themselves, and by tests
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Forwards connectivity transitions to the engine
#[derive(Debug)]
pub struct NetworkMonitor {
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Take the initial state from a synchronous check, then follow changes.
    ///
    /// Starting online triggers the first sync attempt.
    pub fn spawn(engine: SyncEngine, connectivity: &dyn Connectivity) -> Self {
        let mut changes = connectivity.subscribe();
        let initial = connectivity.is_online();
        let _ = changes.borrow_and_update();
        engine.apply_connectivity(initial, false);

        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                engine.set_online(online);
            }
        });
        Self { task }
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
