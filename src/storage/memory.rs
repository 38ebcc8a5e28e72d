use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{content_locator, derived_locator, DerivedKind, EvidenceStore, StoreError};
use crate::models::EvidenceLocator;

struct Blob {
    bytes: Vec<u8>,
    /// Reads that still fail with NotYetAvailable
    hidden_reads: u32,
}

/// In-process evidence store that can simulate read-after-write latency
#[derive(Default)]
pub struct MemoryEvidenceStore {
    blobs: RwLock<HashMap<EvidenceLocator, Blob>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an original blob, immediately readable
    pub async fn put(&self, bytes: Vec<u8>) -> EvidenceLocator {
        self.put_with_latency(bytes, 0).await
    }

    /// Store an original blob that only becomes readable after `hidden_reads` fetches
    pub async fn put_with_latency(&self, bytes: Vec<u8>, hidden_reads: u32) -> EvidenceLocator {
        let locator = content_locator(&bytes);
        self.blobs
            .write()
            .await
            .insert(locator.clone(), Blob { bytes, hidden_reads });
        locator
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, locator: &EvidenceLocator) -> bool {
        self.blobs.read().await.contains_key(locator)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn fetch(&self, locator: &EvidenceLocator) -> Result<Vec<u8>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }

        let mut blobs = self.blobs.write().await;
        let blob = blobs
            .get_mut(locator)
            .ok_or_else(|| StoreError::NotFound(locator.to_string()))?;
        if blob.hidden_reads > 0 {
            blob.hidden_reads -= 1;
            return Err(StoreError::NotYetAvailable(locator.to_string()));
        }
        Ok(blob.bytes.clone())
    }

    async fn put_derived(
        &self,
        parent: &EvidenceLocator,
        kind: DerivedKind,
        bytes: Vec<u8>,
    ) -> Result<EvidenceLocator, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }

        let mut blobs = self.blobs.write().await;
        if !blobs.contains_key(parent) {
            return Err(StoreError::NotFound(parent.to_string()));
        }
        let locator = derived_locator(kind, &bytes);
        blobs.insert(
            locator.clone(),
            Blob {
                bytes,
                hidden_reads: 0,
            },
        );
        Ok(locator)
    }
}
