use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stockroom_core::config::SyncSettings;
use stockroom_core::queue::LibSqlQueueStore;
use stockroom_core::remote::{HttpRemoteStore, RemoteStore};
use stockroom_core::sync::{PassReport, SkipReason, SyncOutcome};
use stockroom_core::{PendingProduct, ProductEntry, SyncEngine};

use crate::error::CliError;

const ENV_DB_PATH: &str = "STOCKROOM_DB_PATH";
const ENV_STAGING_DIR: &str = "STOCKROOM_STAGING_DIR";

/// An engine opened on the local queue, plus the remote it would sync with
pub struct Session {
    pub engine: SyncEngine,
    pub remote: Option<Arc<HttpRemoteStore>>,
}

impl Session {
    pub async fn open(db_path: &Path) -> Result<Self, CliError> {
        let mut settings = SyncSettings::from_env()?;
        if env::var_os(ENV_STAGING_DIR).is_none() {
            settings = settings.with_staging_dir(staging_dir_for(db_path));
        }

        let store = LibSqlQueueStore::open(db_path).await?;
        let remote = HttpRemoteStore::from_settings(&settings)?.map(Arc::new);
        let shared = remote
            .clone()
            .map(|remote| remote as Arc<dyn RemoteStore>);
        let engine = SyncEngine::start(Arc::new(store), shared, settings).await?;

        Ok(Self { engine, remote })
    }

    /// Ping the remote and, when it answers, replace the confirmed products
    /// with its listing. Returns whether the remote is reachable.
    pub async fn load_remote(&self) -> bool {
        let Some(remote) = self.remote.as_ref() else {
            return false;
        };
        if !remote.ping().await {
            tracing::info!("Remote at {} is unreachable", remote.base_url());
            return false;
        }
        if let Err(error) = self.engine.refresh().await {
            tracing::warn!("Failed to load remote products: {error}");
        }
        true
    }

    /// Like `load_remote`, then mark the engine online so it starts syncing
    pub async fn connect(&self) -> bool {
        let reachable = self.load_remote().await;
        if reachable {
            self.engine.set_online(true);
        }
        reachable
    }

    /// Drain the queue and wait for the writes to reach disk
    pub async fn sync(&self) -> SyncRun {
        let queued = self.engine.pending_count();
        let outcome = self.engine.sync_and_wait().await;
        self.engine.flush().await;
        SyncRun { queued, outcome }
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote.as_ref().map(|remote| remote.base_url())
    }
}

/// The outcome of an explicit sync, with the queue size seen before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRun {
    pub queued: usize,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Serialize)]
pub struct ProductListItem {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub max_discount: f64,
    pub image: Option<String>,
    pub created_at: i64,
    pub relative_time: String,
    pub pending: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingListItem {
    pub temp_id: String,
    pub name: String,
    pub company: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub created_at: i64,
    pub submitted: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub fn product_to_list_item(entry: &ProductEntry, now: DateTime<Utc>) -> ProductListItem {
    ProductListItem {
        id: entry.id.clone(),
        name: entry.name.clone(),
        company: entry.company.clone(),
        cost_price: entry.cost_price,
        selling_price: entry.selling_price,
        max_discount: entry.max_discount,
        image: entry.image.clone(),
        created_at: entry.created_at.timestamp_millis(),
        relative_time: format_relative_time(
            entry.created_at.timestamp_millis(),
            now.timestamp_millis(),
        ),
        pending: entry.is_pending,
    }
}

pub fn pending_to_list_item(pending: &PendingProduct) -> PendingListItem {
    PendingListItem {
        temp_id: pending.temp_id.to_string(),
        name: pending.name.clone(),
        company: pending.company.clone(),
        cost_price: pending.cost_price,
        selling_price: pending.selling_price,
        created_at: pending.created_at.timestamp_millis(),
        submitted: pending.submitted,
        attempts: pending.attempts,
        last_error: pending.last_error.clone(),
    }
}

pub fn format_product_lines(entries: &[ProductEntry], now: DateTime<Utc>) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let marker = if entry.is_pending { "*" } else { " " };
            let company = entry.company.as_deref().unwrap_or("-");
            let relative_time = format_relative_time(
                entry.created_at.timestamp_millis(),
                now.timestamp_millis(),
            );
            format!(
                "{marker} {name:<28}  {company:<16}  {cost:>9.2}  {selling:>9.2}  {relative_time}",
                name = truncate(&entry.name, 28),
                company = truncate(company, 16),
                cost = entry.cost_price,
                selling = entry.selling_price,
            )
        })
        .collect()
}

pub fn format_pending_lines(queue: &[PendingProduct], now: DateTime<Utc>) -> Vec<String> {
    queue
        .iter()
        .map(|pending| {
            let relative_time = format_relative_time(
                pending.created_at.timestamp_millis(),
                now.timestamp_millis(),
            );
            let mut line = format!(
                "{id}  {name:<28}  {relative_time:<8}  attempts={attempts}",
                id = pending.temp_id,
                name = truncate(&pending.name, 28),
                attempts = pending.attempts,
            );
            if let Some(error) = pending.last_error.as_deref() {
                line.push_str("  last_error=");
                line.push_str(error);
            }
            line
        })
        .collect()
}

pub fn format_outcome(run: &SyncRun) -> String {
    match &run.outcome {
        SyncOutcome::Completed(report) => format_report(report),
        // A pass started by going online, or a refresh, emptied the queue
        // before this one ran. Its counts are not known here.
        SyncOutcome::Skipped(SkipReason::Empty) if run.queued > 0 => {
            "Queue already drained".to_string()
        }
        SyncOutcome::Skipped(SkipReason::Empty) => "Nothing to sync".to_string(),
        SyncOutcome::Skipped(SkipReason::Offline) => "Offline, sync skipped".to_string(),
        SyncOutcome::Skipped(SkipReason::NoRemote) => "No remote configured".to_string(),
        SyncOutcome::Skipped(SkipReason::InFlight) => "Sync already running".to_string(),
    }
}

fn format_report(report: &PassReport) -> String {
    let mut summary = format!("Synced {} of {} product(s)", report.synced, report.attempted);
    if report.failed > 0 {
        summary.push_str(&format!(", {} will retry", report.failed));
    }
    if report.warnings > 0 {
        summary.push_str(&format!(", {} warning(s)", report.warnings));
    }
    summary
}

pub fn format_sync_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < year {
        format!("{}w ago", diff / week)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(width.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Guess an image MIME type from the file extension
pub fn content_type_for(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => return None,
    };
    Some(content_type.to_string())
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("stockroom")
        .join("stockroom.db")
}

pub fn staging_dir_for(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("staging"), |parent| parent.join("staging"))
}
