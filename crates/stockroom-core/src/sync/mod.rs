//! Offline-first reconciliation.
//!
//! Adding a product is split in two phases. Phase one validates the input,
//! queues it and publishes the merged view synchronously. Phase two is a
//! best-effort `SyncPass` that drains the queue into the remote store and is
//! retried on the next trigger. Change feed events retire queued entries once
//! the server has confirmed them.

mod engine;
mod listener;
pub mod matching;
mod network;
pub mod notify;
mod pass;
mod state;
mod status;

pub use engine::{SkipReason, SyncEngine, SyncOutcome};
pub use listener::ChangeListener;
pub use matching::MatchKind;
pub use network::{Connectivity, ManualConnectivity, NetworkMonitor, NetworkState};
pub use notify::{Notification, NotificationKind, Severity};
pub use pass::{PassReport, PassSink, SyncPass};
pub use state::{Applied, ReconcileState};
pub use status::{SyncState, SyncStatus};
