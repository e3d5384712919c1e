//! User-facing notifications.
//!
//! What failed is decided by the error type; how it is presented is decided by
//! the `RULES` table. The engine never formats toast text anywhere else.

use std::fmt;

use serde::Serialize;

use crate::error::Error;
use crate::models::TempId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SavedLocally,
    Synced,
    LookupFailed,
    UploadFailed,
    SubmitFailed,
    CommitFailed,
    StreamDropped,
    PersistFailed,
    WentOffline,
    BackOnline,
}

struct Rule {
    kind: NotificationKind,
    severity: Severity,
    title: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        kind: NotificationKind::SavedLocally,
        severity: Severity::Info,
        title: "Saved locally",
    },
    Rule {
        kind: NotificationKind::Synced,
        severity: Severity::Success,
        title: "Synced",
    },
    Rule {
        kind: NotificationKind::LookupFailed,
        severity: Severity::Warning,
        title: "Saved without company",
    },
    Rule {
        kind: NotificationKind::UploadFailed,
        severity: Severity::Warning,
        title: "Saved without image",
    },
    Rule {
        kind: NotificationKind::SubmitFailed,
        severity: Severity::Error,
        title: "Sync failed, will retry",
    },
    Rule {
        kind: NotificationKind::CommitFailed,
        severity: Severity::Error,
        title: "Batch sync failed, will retry",
    },
    Rule {
        kind: NotificationKind::StreamDropped,
        severity: Severity::Warning,
        title: "Live updates paused",
    },
    Rule {
        kind: NotificationKind::PersistFailed,
        severity: Severity::Error,
        title: "Could not save pending products",
    },
    Rule {
        kind: NotificationKind::WentOffline,
        severity: Severity::Warning,
        title: "Offline, changes are kept on this device",
    },
    Rule {
        kind: NotificationKind::BackOnline,
        severity: Severity::Info,
        title: "Back online, syncing",
    },
];

/// Severity and title for a notification kind
pub fn describe(kind: NotificationKind) -> (Severity, &'static str) {
    RULES
        .iter()
        .find(|rule| rule.kind == kind)
        .map_or((Severity::Info, "Notice"), |rule| (rule.severity, rule.title))
}

/// Notification kind for a sync-time error
pub fn kind_for(error: &Error) -> NotificationKind {
    match error {
        Error::LookupResolution(_) => NotificationKind::LookupFailed,
        Error::Upload(_) => NotificationKind::UploadFailed,
        Error::Commit(_) => NotificationKind::CommitFailed,
        Error::Stream(_) => NotificationKind::StreamDropped,
        Error::Timeout { operation, .. } => match *operation {
            "upload" => NotificationKind::UploadFailed,
            "lookup" => NotificationKind::LookupFailed,
            "batch commit" => NotificationKind::CommitFailed,
            _ => NotificationKind::SubmitFailed,
        },
        Error::Database(_)
        | Error::LibSql(_)
        | Error::Io(_)
        | Error::Serialization(_) => NotificationKind::PersistFailed,
        Error::Validation(_) | Error::Submit(_) | Error::Http(_) | Error::InvalidConfig(_) => {
            NotificationKind::SubmitFailed
        }
    }
}

/// A toast-style, non-blocking message for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub message: String,
    /// Pending entry the notification is about, if any
    pub temp_id: Option<TempId>,
}

impl Notification {
    pub fn new(kind: NotificationKind, detail: Option<&str>) -> Self {
        let (severity, title) = describe(kind);
        let message = match detail.map(str::trim).filter(|detail| !detail.is_empty()) {
            Some(detail) => format!("{title}: {detail}"),
            None => title.to_string(),
        };
        Self {
            kind,
            severity,
            message,
            temp_id: None,
        }
    }

    /// Notification for a sync-time error
    pub fn from_error(error: &Error) -> Self {
        Self::new(kind_for(error), Some(&error.to_string()))
    }

    #[must_use]
    pub fn for_entry(mut self, temp_id: &TempId) -> Self {
        self.temp_id = Some(temp_id.clone());
        self
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
