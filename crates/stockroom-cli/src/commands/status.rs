use std::path::Path;

use serde::Serialize;
use stockroom_core::{SyncState, SyncStatus};

use crate::commands::common::{format_sync_timestamp, Session};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub remote: Option<String>,
    pub reachable: bool,
    #[serde(flatten)]
    pub status: SyncStatus,
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let session = Session::open(db_path).await?;
    let reachable = match session.remote.as_ref() {
        Some(remote) => remote.ping().await,
        None => false,
    };
    let mut status = session.engine.status();
    status.refresh_state(reachable, false);

    let item = StatusItem {
        remote: session.remote_url().map(ToString::to_string),
        reachable,
        status,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        for line in format_status_lines(&item) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_status_lines(item: &StatusItem) -> Vec<String> {
    let remote = match (item.remote.as_deref(), item.reachable) {
        (None, _) => "not configured".to_string(),
        (Some(url), true) => format!("{url} (reachable)"),
        (Some(url), false) => format!("{url} (unreachable)"),
    };
    let state = match item.status.state {
        SyncState::Offline => "offline",
        SyncState::Syncing => "syncing",
        SyncState::Synced => "synced",
        SyncState::Error => "error",
    };
    let mut lines = vec![
        format!("State:    {state}"),
        format!("Remote:   {remote}"),
        format!("Pending:  {}", item.status.pending),
    ];
    if let Some(synced_at) = item.status.last_synced_at {
        lines.push(format!("Synced:   {}", format_sync_timestamp(synced_at)));
    }
    if let Some(error) = item.status.last_error.as_deref() {
        lines.push(format!("Error:    {error}"));
    }
    lines
}
