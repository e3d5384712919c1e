//! REST document API client implementing `RemoteStore`.
//!
//! Records live under `/v1/products`; company lookups under
//! `/v1/lookups/companies`; images go through backend-issued presigned
//! uploads. The API has no push feed, so the change stream polls the
//! collection and diffs consecutive snapshots.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ChangeEvent, ChangeFeed, ChangeSubscription, ItemResult, RemoteStore};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{NewProduct, Product};
use crate::util::{compact_text, is_http_url, normalize_lookup_key, sanitize_file_name};

const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP client for the Stockroom document API
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(&base_url.into())?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            token,
            client,
            poll_interval,
        })
    }

    /// Build a client from settings; `None` when no remote is configured
    pub fn from_settings(settings: &SyncSettings) -> Result<Option<Self>> {
        let Some(base_url) = settings.api_base_url.clone() else {
            return Ok(None);
        };
        Self::new(base_url, settings.api_token.clone(), settings.poll_interval).map(Some)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the API answers its health check
    pub async fn ping(&self) -> bool {
        let response = self
            .request(Method::GET, "/v1/health")
            .timeout(PING_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Remote health check failed: {error}");
                false
            }
        }
    }

    fn request(&self, method: Method, route: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, route))
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_records(&self) -> Result<Vec<Product>> {
        let response = self
            .request(Method::GET, "/v1/products")
            .send()
            .await
            .map_err(|error| Error::Stream(format!("list request failed: {error}")))?;
        let response = ensure_success(response, Error::Stream).await?;
        let payload = response
            .json::<ListResponse>()
            .await
            .map_err(|error| Error::Stream(format!("invalid list response: {error}")))?;
        Ok(payload.records)
    }

    async fn find_lookup(&self, key: &str) -> Result<Option<String>> {
        let route = format!(
            "/v1/lookups/companies?key={}",
            urlencoding::encode(key)
        );
        let response = self
            .request(Method::GET, &route)
            .send()
            .await
            .map_err(|error| Error::LookupResolution(format!("lookup request failed: {error}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, Error::LookupResolution).await?;
        let payload = response
            .json::<IdResponse>()
            .await
            .map_err(|error| Error::LookupResolution(format!("invalid lookup response: {error}")))?;
        Ok(Some(payload.id))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_record(&self, record: NewProduct) -> Result<String> {
        let response = self
            .request(Method::POST, "/v1/products")
            .json(&record)
            .send()
            .await
            .map_err(|error| Error::Submit(format!("create request failed: {error}")))?;
        let response = ensure_success(response, Error::Submit).await?;
        let payload = response
            .json::<IdResponse>()
            .await
            .map_err(|error| Error::Submit(format!("invalid create response: {error}")))?;
        Ok(payload.id)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn create_records_batch(&self, records: Vec<NewProduct>) -> Result<Vec<ItemResult>> {
        let expected = records.len();
        let response = self
            .request(Method::POST, "/v1/products:batch")
            .json(&BatchRequest { records })
            .send()
            .await
            .map_err(|error| Error::Commit(format!("batch request failed: {error}")))?;
        let response = ensure_success(response, Error::Commit).await?;
        let payload = response
            .json::<BatchResponse>()
            .await
            .map_err(|error| Error::Commit(format!("invalid batch response: {error}")))?;

        if payload.results.len() != expected {
            return Err(Error::Commit(format!(
                "batch response has {} results for {expected} records",
                payload.results.len()
            )));
        }

        Ok(payload
            .results
            .into_iter()
            .map(|item| match (item.id, item.error) {
                (Some(id), None) => Ok(id),
                (_, Some(error)) => Err(error),
                (None, None) => Err("result carried neither id nor error".to_string()),
            })
            .collect())
    }

    async fn list_records(&self) -> Result<Vec<Product>> {
        self.fetch_records().await
    }

    async fn subscribe_changes(&self) -> Result<ChangeSubscription> {
        let initial = self.fetch_records().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let snapshot = diff_snapshots(&HashMap::new(), &initial);
        let mut known = index_records(initial);
        tx.send(ChangeFeed::Batch(snapshot))
            .map_err(|error| Error::Stream(error.to_string()))?;

        let store = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = tx.closed() => break,
                }
                match store.fetch_records().await {
                    Ok(records) => {
                        let events = diff_snapshots(&known, &records);
                        known = index_records(records);
                        if !events.is_empty() && tx.send(ChangeFeed::Batch(events)).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(ChangeFeed::Dropped(error.to_string()));
                        break;
                    }
                }
            }
            tracing::debug!("Product poll feed stopped");
        });
        let abort = task.abort_handle();

        Ok(ChangeSubscription::new(rx).with_cleanup(move || abort.abort()))
    }

    async fn upload_blob(
        &self,
        bytes: Vec<u8>,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<String> {
        let object_key = format!(
            "products/{}-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::now_v7(),
            sanitize_file_name(name)
        );
        let content_type = content_type.unwrap_or("application/octet-stream");

        let response = self
            .request(Method::POST, "/v1/media/presign/upload")
            .json(&serde_json::json!({
                "object_key": object_key,
                "content_type": content_type,
            }))
            .send()
            .await
            .map_err(|error| Error::Upload(format!("failed to request signed URL: {error}")))?;
        let response = ensure_success(response, Error::Upload).await?;
        let presigned = response
            .json::<PresignResponse>()
            .await
            .map_err(|error| Error::Upload(format!("invalid signed URL response: {error}")))?;

        let method = Method::from_bytes(presigned.operation.method.as_bytes())
            .map_err(|error| Error::Upload(format!("unsupported HTTP method: {error}")))?;
        let mut request = self.client.request(method, &presigned.operation.url);
        for (name, value) in presigned.operation.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            request = request.header(name, value);
        }
        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|error| Error::Upload(format!("upload request failed: {error}")))?;
        ensure_success(response, Error::Upload).await?;

        Ok(presigned.public_url)
    }

    async fn find_or_create_lookup(&self, name: &str) -> Result<String> {
        let key = normalize_lookup_key(name);
        if key.is_empty() {
            return Err(Error::LookupResolution(
                "lookup name cannot be empty".to_string(),
            ));
        }
        if let Some(id) = self.find_lookup(&key).await? {
            return Ok(id);
        }

        let response = self
            .request(Method::POST, "/v1/lookups/companies")
            .json(&serde_json::json!({ "name": name.trim(), "key": key }))
            .send()
            .await
            .map_err(|error| Error::LookupResolution(format!("create lookup failed: {error}")))?;
        let response = ensure_success(response, Error::LookupResolution).await?;
        let payload = response
            .json::<IdResponse>()
            .await
            .map_err(|error| Error::LookupResolution(format!("invalid lookup response: {error}")))?;
        Ok(payload.id)
    }
}

/// Changes that turn `previous` into `current`.
///
/// New ids become `Added` (in `current` order), changed records `Modified`,
/// and ids missing from `current` become `Removed` (sorted by id).
pub fn diff_snapshots(previous: &HashMap<String, Product>, current: &[Product]) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for record in current {
        match previous.get(&record.id) {
            None => events.push(ChangeEvent::Added(record.clone())),
            Some(known) if known != record => events.push(ChangeEvent::Modified(record.clone())),
            Some(_) => {}
        }
    }

    let mut removed: Vec<&String> = previous
        .keys()
        .filter(|id| !current.iter().any(|record| &record.id == *id))
        .collect();
    removed.sort();
    events.extend(
        removed
            .into_iter()
            .map(|id| ChangeEvent::Removed { id: id.clone() }),
    );
    events
}

fn index_records(records: Vec<Product>) -> HashMap<String, Product> {
    records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect()
}

async fn ensure_success(
    response: reqwest::Response,
    wrap: fn(String) -> Error,
) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(wrap(parse_api_error(status, &body)))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} (HTTP {})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} (HTTP {})", status.as_u16())
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let base = raw.trim().trim_end_matches('/').to_string();
    if base.is_empty() {
        return Err(Error::InvalidConfig(
            "API base URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(&base) {
        return Err(Error::InvalidConfig(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Ok(base)
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    records: Vec<Product>,
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    records: Vec<NewProduct>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    operation: PresignedOperation,
    public_url: String,
}

#[derive(Debug, Deserialize)]
struct PresignedOperation {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<(String, String)>,
}
