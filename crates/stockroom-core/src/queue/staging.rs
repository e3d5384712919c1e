//! Local staging area for image payloads awaiting upload

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{ImagePayload, ImageSource, StagedImage, TempId};
use crate::util::sanitize_file_name;

/// Directory where image bytes are kept until their product is synced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStaging {
    dir: PathBuf,
}

impl ImageStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Assign a local reference for `payload` without touching the disk.
    ///
    /// Returns the reference and, for in-memory payloads, the bytes that must
    /// be written to `reference.path` before the upload can read them.
    pub fn plan(&self, temp_id: &TempId, payload: ImagePayload) -> (StagedImage, Option<Vec<u8>>) {
        let file_name = payload.file_name.trim().to_string();
        match payload.source {
            ImageSource::Path(path) => (
                StagedImage {
                    path,
                    file_name,
                    content_type: payload.content_type,
                    owned: false,
                },
                None,
            ),
            ImageSource::Bytes(bytes) => {
                let staged_name = format!("{temp_id}-{}", sanitize_file_name(&file_name));
                (
                    StagedImage {
                        path: self.dir.join(staged_name),
                        file_name,
                        content_type: payload.content_type,
                        owned: true,
                    },
                    Some(bytes),
                )
            }
        }
    }

    /// Write staged bytes to disk
    pub async fn write(&self, image: &StagedImage, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&image.path, bytes).await?;
        Ok(())
    }

    /// Read the bytes behind a staged reference
    pub async fn read(image: &StagedImage) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&image.path).await?)
    }

    /// Remove a staged file owned by the staging area. Borrowed files are kept.
    pub async fn release(image: &StagedImage) {
        if !image.owned {
            return;
        }
        match tokio::fs::remove_file(&image.path).await {
            Ok(()) => tracing::debug!("Released staged image {}", image.path.display()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(
                "Failed to release staged image {}: {error}",
                image.path.display()
            ),
        }
    }
}
