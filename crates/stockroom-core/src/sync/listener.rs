//! Feeds the remote change stream into the engine.

use tokio::task::JoinHandle;

use super::engine::SyncEngine;
use crate::error::Result;
use crate::remote::{ChangeFeed, ChangeSubscription, RemoteStore};

/// Background task applying change feed batches to an engine.
///
/// Stopping or dropping the listener unsubscribes from the feed. Reconnecting
/// after a drop is up to the caller.
#[derive(Debug)]
pub struct ChangeListener {
    task: JoinHandle<()>,
}

impl ChangeListener {
    /// Subscribe to `remote` and start applying its changes to `engine`
    pub async fn attach(engine: SyncEngine, remote: &dyn RemoteStore) -> Result<Self> {
        match remote.subscribe_changes().await {
            Ok(subscription) => Ok(Self::spawn(engine, subscription)),
            Err(error) => {
                engine.report_stream_error(&error.to_string());
                Err(error)
            }
        }
    }

    /// Apply an existing subscription to `engine`
    pub fn spawn(engine: SyncEngine, mut subscription: ChangeSubscription) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match subscription.next().await {
                    Some(ChangeFeed::Batch(events)) => {
                        tracing::debug!("Applying {} change event(s)", events.len());
                        engine.apply_changes(events);
                    }
                    Some(ChangeFeed::Dropped(reason)) => {
                        engine.report_stream_error(&reason);
                        break;
                    }
                    None => {
                        engine.report_stream_error("change feed closed");
                        break;
                    }
                }
            }
        });
        Self { task }
    }

    /// Whether the feed has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
