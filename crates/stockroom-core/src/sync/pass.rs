//! One sync pass: drain a queue snapshot into the remote store.
//!
//! The pass never touches engine state directly. It reports progress through
//! a `PassSink`, so it can run against any state owner and be tested alone.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{NewProduct, PendingProduct, Product, StagedImage, TempId};
use crate::queue::ImageStaging;
use crate::remote::RemoteStore;
use crate::util::normalize_lookup_key;

/// Receives the progress of a pass as it happens
pub trait PassSink: Send + Sync {
    /// Create requests for `ids` are about to be sent
    fn submitted(&self, ids: &[TempId]);
    /// The staged image of `id` was discarded
    fn image_dropped(&self, id: &TempId);
    /// The remote confirmed `id` as `record`
    fn synced(&self, id: &TempId, record: Product);
    /// Creating `ids` failed; they stay queued
    fn failed(&self, ids: &[TempId], error: &Error);
    /// Non-fatal problem while preparing `id`
    fn warned(&self, id: &TempId, error: &Error);
}

/// Counters for one pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub warnings: usize,
}

pub struct SyncPass<'a> {
    remote: &'a dyn RemoteStore,
    settings: &'a SyncSettings,
    lookups: HashMap<String, std::result::Result<String, String>>,
    report: PassReport,
}

impl<'a> SyncPass<'a> {
    pub fn new(remote: &'a dyn RemoteStore, settings: &'a SyncSettings) -> Self {
        Self {
            remote,
            settings,
            lookups: HashMap::new(),
            report: PassReport::default(),
        }
    }

    /// Submit `entries` in order. Each entry is attempted at most once.
    pub async fn run(mut self, entries: Vec<PendingProduct>, sink: &dyn PassSink) -> PassReport {
        self.report.attempted = entries.len();
        if self.remote.supports_batch() {
            let size = self.settings.batch_size.max(1);
            for chunk in entries.chunks(size) {
                self.submit_batch(chunk, sink).await;
            }
        } else {
            for entry in &entries {
                self.submit_one(entry, sink).await;
            }
        }
        self.report
    }

    async fn submit_one(&mut self, entry: &PendingProduct, sink: &dyn PassSink) {
        let request = self.prepare(entry, sink).await;
        sink.submitted(std::slice::from_ref(&entry.temp_id));

        let created = bounded(
            "create",
            self.settings.create_timeout,
            self.remote.create_record(request.clone()),
        )
        .await;
        match created {
            Ok(id) => self.confirm(entry, request.into_product(id), sink).await,
            Err(error) => self.fail(std::slice::from_ref(&entry.temp_id), &error, sink),
        }
    }

    async fn submit_batch(&mut self, chunk: &[PendingProduct], sink: &dyn PassSink) {
        let mut requests = Vec::with_capacity(chunk.len());
        for entry in chunk {
            requests.push(self.prepare(entry, sink).await);
        }
        let ids: Vec<TempId> = chunk.iter().map(|entry| entry.temp_id.clone()).collect();
        sink.submitted(&ids);

        let committed = bounded(
            "batch commit",
            self.settings.create_timeout,
            self.remote.create_records_batch(requests.clone()),
        )
        .await;

        match committed {
            Ok(results) if results.len() == chunk.len() => {
                for ((entry, request), result) in chunk.iter().zip(requests).zip(results) {
                    match result {
                        Ok(id) => self.confirm(entry, request.into_product(id), sink).await,
                        Err(message) => self.fail(
                            std::slice::from_ref(&entry.temp_id),
                            &Error::Submit(message),
                            sink,
                        ),
                    }
                }
            }
            Ok(results) => {
                let error = Error::Commit(format!(
                    "expected {} results, received {}",
                    chunk.len(),
                    results.len()
                ));
                self.fail(&ids, &error, sink);
            }
            Err(error @ (Error::Commit(_) | Error::Timeout { .. })) => {
                self.fail(&ids, &error, sink);
            }
            Err(other) => self.fail(&ids, &Error::Commit(other.to_string()), sink),
        }
    }

    async fn prepare(&mut self, entry: &PendingProduct, sink: &dyn PassSink) -> NewProduct {
        let company_id = match entry.company.as_deref() {
            Some(company) => self.resolve_company(entry, company, sink).await,
            None => None,
        };
        let image_url = match &entry.image {
            Some(image) => self.upload_image(entry, image, sink).await,
            None => None,
        };
        entry.to_new_product(company_id, image_url)
    }

    async fn resolve_company(
        &mut self,
        entry: &PendingProduct,
        company: &str,
        sink: &dyn PassSink,
    ) -> Option<String> {
        let key = normalize_lookup_key(company);
        let resolved = match self.lookups.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let resolved = bounded(
                    "lookup",
                    self.settings.lookup_timeout,
                    self.remote.find_or_create_lookup(company),
                )
                .await
                .map_err(|error| error.to_string());
                self.lookups.insert(key, resolved.clone());
                resolved
            }
        };

        match resolved {
            Ok(id) => Some(id),
            Err(message) => {
                tracing::warn!(
                    "Company lookup for {} failed, saving without it: {message}",
                    entry.temp_id
                );
                self.report.warnings += 1;
                sink.warned(&entry.temp_id, &Error::LookupResolution(message));
                None
            }
        }
    }

    async fn upload_image(
        &mut self,
        entry: &PendingProduct,
        image: &StagedImage,
        sink: &dyn PassSink,
    ) -> Option<String> {
        let bytes = match ImageStaging::read(image).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(
                    "Image for {} is unavailable at {}, saving without it: {error}",
                    entry.temp_id,
                    image.path.display()
                );
                sink.image_dropped(&entry.temp_id);
                return None;
            }
        };

        let uploaded = bounded(
            "upload",
            self.settings.upload_timeout,
            self.remote
                .upload_blob(bytes, &image.file_name, image.content_type.as_deref()),
        )
        .await;
        match uploaded {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::warn!(
                    "Image upload for {} failed, saving without it: {error}",
                    entry.temp_id
                );
                self.report.warnings += 1;
                sink.warned(&entry.temp_id, &error);
                sink.image_dropped(&entry.temp_id);
                ImageStaging::release(image).await;
                None
            }
        }
    }

    async fn confirm(&mut self, entry: &PendingProduct, record: Product, sink: &dyn PassSink) {
        tracing::debug!("Synced {} as {}", entry.temp_id, record.id);
        self.report.synced += 1;
        sink.synced(&entry.temp_id, record);
        if let Some(image) = &entry.image {
            ImageStaging::release(image).await;
        }
    }

    fn fail(&mut self, ids: &[TempId], error: &Error, sink: &dyn PassSink) {
        tracing::warn!("Failed to sync {} pending product(s): {error}", ids.len());
        self.report.failed += ids.len();
        sink.failed(ids, error);
    }
}

/// Await `future`, failing with `Error::Timeout` after `after`
pub async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    future: impl Future<Output = Result<T>> + Send,
) -> Result<T> {
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation, after }),
    }
}
