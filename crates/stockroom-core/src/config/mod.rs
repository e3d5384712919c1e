//! Runtime configuration for the sync engine.
//!
//! `SyncSettings` carries every tunable of the reconciliation engine and the
//! remote adapter. Values come from `Default` and can be overridden by
//! `STOCKROOM_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const ENV_API_BASE_URL: &str = "STOCKROOM_API_BASE_URL";
const ENV_API_TOKEN: &str = "STOCKROOM_API_TOKEN";
const ENV_TOLERANCE_SECS: &str = "STOCKROOM_MATCH_TOLERANCE_SECS";
const ENV_BATCH_SIZE: &str = "STOCKROOM_BATCH_SIZE";
const ENV_CREATE_TIMEOUT_SECS: &str = "STOCKROOM_CREATE_TIMEOUT_SECS";
const ENV_UPLOAD_TIMEOUT_SECS: &str = "STOCKROOM_UPLOAD_TIMEOUT_SECS";
const ENV_LOOKUP_TIMEOUT_SECS: &str = "STOCKROOM_LOOKUP_TIMEOUT_SECS";
const ENV_POLL_INTERVAL_SECS: &str = "STOCKROOM_POLL_INTERVAL_SECS";
const ENV_STAGING_DIR: &str = "STOCKROOM_STAGING_DIR";

const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5);
const DEFAULT_BATCH_SIZE: usize = 20;
const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables for reconciliation and remote calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Maximum creation-time distance for heuristic pending/confirmed matching
    pub match_tolerance: Duration,
    /// Maximum number of records per batch commit
    pub batch_size: usize,
    /// Deadline for create and batch commit calls
    pub create_timeout: Duration,
    /// Deadline for blob uploads
    pub upload_timeout: Duration,
    /// Deadline for company lookup resolution
    pub lookup_timeout: Duration,
    /// Interval between polls for adapters without a push feed
    pub poll_interval: Duration,
    /// Directory for staged image payloads
    pub staging_dir: PathBuf,
    /// Remote API base URL, when a remote is configured
    pub api_base_url: Option<String>,
    /// Bearer token for the remote API
    pub api_token: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            match_tolerance: DEFAULT_TOLERANCE,
            batch_size: DEFAULT_BATCH_SIZE,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            staging_dir: env::temp_dir().join("stockroom-staging"),
            api_base_url: None,
            api_token: None,
        }
    }
}

impl SyncSettings {
    /// Load settings from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        parse_settings(|key| env::var(key).ok())
    }

    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_match_tolerance(mut self, tolerance: Duration) -> Self {
        self.match_tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Whether a remote API is configured
    pub const fn has_remote(&self) -> bool {
        self.api_base_url.is_some()
    }
}

fn parse_settings(lookup: impl Fn(&str) -> Option<String>) -> Result<SyncSettings> {
    let mut settings = SyncSettings::default();
    let value = |key: &str| normalize_text_option(lookup(key));

    if let Some(url) = value(ENV_API_BASE_URL) {
        if !is_http_url(&url) {
            return Err(Error::InvalidConfig(format!(
                "{ENV_API_BASE_URL} must start with http:// or https://"
            )));
        }
        settings.api_base_url = Some(url.trim_end_matches('/').to_string());
    }
    settings.api_token = value(ENV_API_TOKEN);

    if let Some(raw) = value(ENV_TOLERANCE_SECS) {
        settings.match_tolerance = parse_secs(ENV_TOLERANCE_SECS, &raw)?;
    }
    if let Some(raw) = value(ENV_BATCH_SIZE) {
        settings.batch_size = raw
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "{ENV_BATCH_SIZE} must be a positive integer (got '{raw}')"
                ))
            })?;
    }
    if let Some(raw) = value(ENV_CREATE_TIMEOUT_SECS) {
        settings.create_timeout = parse_timeout(ENV_CREATE_TIMEOUT_SECS, &raw)?;
    }
    if let Some(raw) = value(ENV_UPLOAD_TIMEOUT_SECS) {
        settings.upload_timeout = parse_timeout(ENV_UPLOAD_TIMEOUT_SECS, &raw)?;
    }
    if let Some(raw) = value(ENV_LOOKUP_TIMEOUT_SECS) {
        settings.lookup_timeout = parse_timeout(ENV_LOOKUP_TIMEOUT_SECS, &raw)?;
    }
    if let Some(raw) = value(ENV_POLL_INTERVAL_SECS) {
        settings.poll_interval = parse_timeout(ENV_POLL_INTERVAL_SECS, &raw)?;
    }
    if let Some(dir) = value(ENV_STAGING_DIR) {
        settings.staging_dir = PathBuf::from(dir);
    }

    Ok(settings)
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    raw.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "{key} must be a non-negative number of seconds (got '{raw}')"
            ))
        })
}

fn parse_timeout(key: &str, raw: &str) -> Result<Duration> {
    let duration = parse_secs(key, raw)?;
    if duration.is_zero() {
        return Err(Error::InvalidConfig(format!("{key} must be greater than zero")));
    }
    Ok(duration)
}
