//! Pending (not yet confirmed) product model

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::{NewProduct, ValidProduct};
use crate::error::Error;

const TEMP_ID_PREFIX: &str = "local-";

fn temp_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^local-\d+-[0-9a-f]{8}$").expect("Invalid regex"))
}

/// Locally generated identifier for a queued product.
///
/// Format is `local-<unix-ms>-<8 hex chars>`, which never collides with the
/// opaque ids handed out by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TempId(String);

impl TempId {
    /// Generate a new id stamped with `now`
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{TEMP_ID_PREFIX}{}-{}",
            now.timestamp_millis().max(0),
            &suffix[..8]
        ))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` has the shape of a temporary id
    #[must_use]
    pub fn is_temp_id(value: &str) -> bool {
        temp_id_pattern().is_match(value)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TempId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_temp_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::Validation(format!("not a temporary id: {s}")))
        }
    }
}

impl TryFrom<String> for TempId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TempId> for String {
    fn from(value: TempId) -> Self {
        value.0
    }
}

/// Image bytes staged on the local filesystem, waiting for upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedImage {
    /// Local path holding the bytes
    pub path: PathBuf,
    /// Original file name, used as the blob name on upload
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Whether the file was written by the staging area (and may be removed)
    #[serde(default)]
    pub owned: bool,
}

/// A product created on this device that the server has not confirmed yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingProduct {
    pub temp_id: TempId,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    #[serde(default)]
    pub max_discount: f64,
    #[serde(default)]
    pub image: Option<StagedImage>,
    /// Client creation time, also sent to the server
    pub created_at: DateTime<Utc>,
    /// Set once a create request for this entry has been sent.
    ///
    /// Field matching only considers entries whose write is under way in this
    /// process; the flag alone survives failures and restarts.
    #[serde(default)]
    pub submitted: bool,
    /// Number of sync passes that tried and failed to submit this entry
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingProduct {
    /// Build a queue entry from validated input
    #[must_use]
    pub fn new(
        temp_id: TempId,
        product: ValidProduct,
        image: Option<StagedImage>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            temp_id,
            name: product.name,
            company: product.company,
            cost_price: product.cost_price,
            selling_price: product.selling_price,
            max_discount: product.max_discount,
            image,
            created_at,
            submitted: false,
            attempts: 0,
            last_error: None,
        }
    }

    /// Create request for this entry, tagged with its temp id as idempotency key
    #[must_use]
    pub fn to_new_product(
        &self,
        company_id: Option<String>,
        image_url: Option<String>,
    ) -> NewProduct {
        NewProduct {
            name: self.name.clone(),
            company: self.company.clone(),
            company_id,
            cost_price: self.cost_price,
            selling_price: self.selling_price,
            max_discount: self.max_discount,
            image_url,
            created_at: self.created_at,
            client_ref: Some(self.temp_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductInput;
    use chrono::TimeZone;

    #[test]
    fn temp_ids_are_unique_and_well_formed() {
        let now = Utc::now();
        let first = TempId::generate(now);
        let second = TempId::generate(now);
        assert_ne!(first, second);
        assert!(TempId::is_temp_id(first.as_str()));
        assert!(first.as_str().starts_with("local-"));
    }

    #[test]
    fn temp_id_rejects_server_ids() {
        assert!("srv-123".parse::<TempId>().is_err());
        assert!("local-abc-12345678".parse::<TempId>().is_err());
        assert!("local-1700000000000-0a1b2c3d".parse::<TempId>().is_ok());
    }

    #[test]
    fn pending_product_roundtrips_through_json() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let valid = ProductInput::new("Mug", 10.0, 15.0)
            .with_company("Acme")
            .validate()
            .unwrap();
        let pending = PendingProduct::new(TempId::generate(created_at), valid, None, created_at);

        let json = serde_json::to_string(&pending).unwrap();
        assert!(json.contains("2024-05-01T10:00:00Z"));
        let parsed: PendingProduct = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, pending);
    }

    #[test]
    fn new_product_carries_temp_id_as_client_ref() {
        let created_at = Utc::now();
        let valid = ProductInput::new("Mug", 10.0, 15.0).validate().unwrap();
        let pending = PendingProduct::new(TempId::generate(created_at), valid, None, created_at);

        let request = pending.to_new_product(Some("co-1".to_string()), None);
        assert_eq!(request.client_ref.as_deref(), Some(pending.temp_id.as_str()));
        assert_eq!(request.company_id.as_deref(), Some("co-1"));
        assert_eq!(request.created_at, created_at);
    }
}
