//! Sync status shown by clients.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Unified sync state used by every client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub pending: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub const fn offline(pending: usize) -> Self {
        Self {
            state: SyncState::Offline,
            pending,
            last_synced_at: None,
            last_error: None,
        }
    }

    /// Recompute `state` from connectivity and pass activity
    pub fn refresh_state(&mut self, online: bool, syncing: bool) {
        self.state = if !online {
            SyncState::Offline
        } else if syncing {
            SyncState::Syncing
        } else if self.last_error.is_some() {
            SyncState::Error
        } else {
            SyncState::Synced
        };
    }
}
