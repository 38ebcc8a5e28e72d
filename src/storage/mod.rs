//! Evidence Store Adapter.
//!
//! Durable storage of media blobs and their derived artifacts lives outside
//! the core. The core only reads originals by locator and writes derived
//! objects (redacted copies) next to them; it never assumes exclusive access.

pub mod fs;
pub mod memory;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::error::Error;
use crate::models::EvidenceLocator;

pub use fs::FsEvidenceStore;
pub use memory::MemoryEvidenceStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Written but not yet readable; retry later
    #[error("blob {0} is not yet retrievable")]
    NotYetAvailable(String),

    #[error("evidence store unavailable: {0}")]
    Unavailable(String),

    #[error("blob {0} does not exist")]
    NotFound(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotYetAvailable(_) | Self::Unavailable(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(locator) => Error::NotFound(format!("evidence blob {}", locator)),
            other => Error::StorageUnavailable(other.to_string()),
        }
    }
}

/// Kind of artifact derived from an original blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    Redacted,
}

impl DerivedKind {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Redacted => "redacted",
        }
    }
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Read the bytes behind a locator
    async fn fetch(&self, locator: &EvidenceLocator) -> Result<Vec<u8>, StoreError>;

    /// Store a derived artifact as its own object; the parent is left untouched
    async fn put_derived(
        &self,
        parent: &EvidenceLocator,
        kind: DerivedKind,
        bytes: Vec<u8>,
    ) -> Result<EvidenceLocator, StoreError>;
}

/// Hex SHA-256 digest of a blob
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed locator of an original blob
pub fn content_locator(bytes: &[u8]) -> EvidenceLocator {
    EvidenceLocator(format!("sha256-{}", digest(bytes)))
}

/// Locator of a derived artifact. Always distinct from the parent, even when
/// the derived bytes are identical to the original.
pub fn derived_locator(kind: DerivedKind, bytes: &[u8]) -> EvidenceLocator {
    EvidenceLocator(format!("{}/sha256-{}", kind.namespace(), digest(bytes)))
}

/// Fetch with exponential backoff while the store reports a transient condition
pub async fn fetch_with_retry(
    store: &dyn EvidenceStore,
    locator: &EvidenceLocator,
    attempts: u32,
    base_delay: Duration,
) -> Result<Vec<u8>, StoreError> {
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut attempt = 1;

    loop {
        match store.fetch(locator).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(
                    "Fetch of {} failed ({}), retry {}/{} in {:?}",
                    locator, e, attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("Giving up on {} after {} attempts: {}", locator, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
