use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stockroom_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Image path has no file name: {0}")]
    InvalidImagePath(String),
    #[error("Remote is unreachable at {0}. Pending products stay on this device.")]
    Unreachable(String),
    #[error("Sync is not configured. Set STOCKROOM_API_BASE_URL (and STOCKROOM_API_TOKEN if required).")]
    SyncNotConfigured,
}
