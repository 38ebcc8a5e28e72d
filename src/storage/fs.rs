use async_trait::async_trait;
use log::{debug, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{content_locator, derived_locator, DerivedKind, EvidenceStore, StoreError};
use crate::models::EvidenceLocator;

/// Content-addressed evidence files under a root directory.
///
/// `sha256-<hex>` for originals, `<namespace>/sha256-<hex>` for derived
/// artifacts. Writes go through a temporary file and a rename so readers never
/// observe a partial blob.
pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", root.display(), e)))?;
        info!("Evidence store rooted at {}", root.display());
        Ok(Self { root })
    }

    /// Store an original blob
    pub async fn put(&self, bytes: Vec<u8>) -> Result<EvidenceLocator, StoreError> {
        let locator = content_locator(&bytes);
        self.write(&locator, &bytes).await?;
        Ok(locator)
    }

    fn path_of(&self, locator: &EvidenceLocator) -> Result<PathBuf, StoreError> {
        let valid = !locator.as_str().is_empty()
            && locator.as_str().split('/').all(|segment| {
                !segment.is_empty()
                    && segment != ".."
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            });
        if !valid {
            return Err(StoreError::NotFound(locator.to_string()));
        }
        Ok(self.root.join(locator.as_str()))
    }

    async fn write(&self, locator: &EvidenceLocator, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_of(locator)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!("Stored {} ({} bytes)", locator, bytes.len());
        Ok(())
    }
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn fetch(&self, locator: &EvidenceLocator) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            // The uploader may not have finished writing yet
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotYetAvailable(locator.to_string()))
            }
            Err(e) => Err(StoreError::Unavailable(format!("{}: {}", locator, e))),
        }
    }

    async fn put_derived(
        &self,
        parent: &EvidenceLocator,
        kind: DerivedKind,
        bytes: Vec<u8>,
    ) -> Result<EvidenceLocator, StoreError> {
        let parent_path = self.path_of(parent)?;
        if !tokio::fs::try_exists(&parent_path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(parent.to_string()));
        }
        let locator = derived_locator(kind, &bytes);
        self.write(&locator, &bytes).await?;
        Ok(locator)
    }
}
