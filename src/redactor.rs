//! Privacy Redactor.
//!
//! Masks detected faces and stores the result as its own derived object. Any
//! failure leaves the item `redaction_pending`, which keeps it hidden from
//! everyone below manager until it is redacted or an admin overrides.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::Error;
use crate::models::{EvidenceItem, FaceRegion, FaceScan, MediaKind, RedactionResult, RedactionState};
use crate::storage::{DerivedKind, EvidenceStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MaskError(pub String);

/// Obscures the given regions of an image or video
#[async_trait]
pub trait Masker: Send + Sync {
    async fn mask(
        &self,
        blob: &[u8],
        media_kind: MediaKind,
        regions: &[FaceRegion],
    ) -> Result<Vec<u8>, MaskError>;
}

pub struct PrivacyRedactor {
    masker: Arc<dyn Masker>,
    store: Arc<dyn EvidenceStore>,
}

impl PrivacyRedactor {
    pub fn new(masker: Arc<dyn Masker>, store: Arc<dyn EvidenceStore>) -> Self {
        Self { masker, store }
    }

    /// Produce the redaction state for `item` given the face scan of its latest analysis
    pub async fn redact(&self, item: &EvidenceItem, blob: &[u8], faces: &FaceScan) -> RedactionState {
        match self.try_redact(item, blob, faces).await {
            Ok(result) => {
                info!(
                    "Redacted evidence {}: {} face(s) masked, stored as {}",
                    item.id, result.faces_masked, result.locator
                );
                RedactionState::Redacted(result)
            }
            Err(e) => {
                warn!("Evidence {} held for redaction: {}", item.id, e);
                let reason = match e {
                    Error::RedactionFailure(reason) => reason,
                    other => other.to_string(),
                };
                RedactionState::RedactionPending { reason }
            }
        }
    }

    async fn try_redact(&self, item: &EvidenceItem, blob: &[u8], faces: &FaceScan) -> crate::error::Result<RedactionResult> {
        let regions = match faces {
            FaceScan::Completed { regions } => regions,
            FaceScan::Failed { reason } => {
                return Err(Error::RedactionFailure(format!("face detection failed: {}", reason)));
            }
        };

        let masked = if regions.is_empty() {
            blob.to_vec()
        } else {
            self.masker
                .mask(blob, item.media_kind, regions)
                .await
                .map_err(|e| Error::RedactionFailure(format!("masking failed: {}", e)))?
        };

        let locator = self
            .store
            .put_derived(&item.locator, DerivedKind::Redacted, masked)
            .await
            .map_err(|e| Error::RedactionFailure(format!("storing redacted copy failed: {}", e)))?;
        Ok(RedactionResult {
            locator,
            faces_masked: regions.len(),
            completed_at: Utc::now(),
        })
    }
}

#[derive(Serialize)]
struct MaskRequest<'a> {
    image_base64: String,
    media_kind: MediaKind,
    blur_regions: &'a [FaceRegion],
    return_base64: bool,
}

#[derive(Deserialize)]
struct MaskResponse {
    #[serde(alias = "image_base64", alias = "result_image")]
    processed_image_base64: Option<String>,
}

/// Masker backed by the remote inference service
pub struct HttpMasker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMasker {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/redact", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Masker for HttpMasker {
    async fn mask(
        &self,
        blob: &[u8],
        media_kind: MediaKind,
        regions: &[FaceRegion],
    ) -> Result<Vec<u8>, MaskError> {
        let request = MaskRequest {
            image_base64: STANDARD.encode(blob),
            media_kind,
            blur_regions: regions,
            return_base64: true,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| MaskError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MaskError(format!("inference service returned {}", response.status())));
        }

        let body: MaskResponse = response
            .json()
            .await
            .map_err(|e| MaskError(format!("malformed response: {}", e)))?;
        let encoded = body
            .processed_image_base64
            .ok_or_else(|| MaskError("response carried no processed image".to_string()))?;
        // Some deployments answer with a data URI
        let encoded = encoded.rsplit(',').next().unwrap_or(&encoded);
        STANDARD
            .decode(encoded)
            .map_err(|e| MaskError(format!("invalid base64: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{authorize, Capability, Resource};
    use crate::models::{Actor, EvidenceLocator, Role, Scope};
    use crate::storage::MemoryEvidenceStore;
    use uuid::Uuid;

    struct InvertingMasker;

    #[async_trait]
    impl Masker for InvertingMasker {
        async fn mask(
            &self,
            blob: &[u8],
            _media_kind: MediaKind,
            _regions: &[FaceRegion],
        ) -> Result<Vec<u8>, MaskError> {
            Ok(blob.iter().map(|b| !b).collect())
        }
    }

    struct BrokenMasker;

    #[async_trait]
    impl Masker for BrokenMasker {
        async fn mask(
            &self,
            _blob: &[u8],
            _media_kind: MediaKind,
            _regions: &[FaceRegion],
        ) -> Result<Vec<u8>, MaskError> {
            Err(MaskError("GPU out of memory".to_string()))
        }
    }

    fn region() -> FaceRegion {
        FaceRegion {
            frame_offset_ms: 0,
            x: 1,
            y: 2,
            width: 30,
            height: 30,
            confidence: 0.9,
        }
    }

    async fn item(store: &MemoryEvidenceStore) -> EvidenceItem {
        let locator = store.put(b"photo".to_vec()).await;
        EvidenceItem::new(Uuid::new_v4(), locator, MediaKind::Image, Utc::now())
    }

    #[tokio::test]
    async fn masked_copy_is_a_distinct_object() -> anyhow::Result<()> {
        let store = Arc::new(MemoryEvidenceStore::new());
        let item = item(&store).await;
        let redactor = PrivacyRedactor::new(Arc::new(InvertingMasker), store.clone());

        let state = redactor
            .redact(&item, b"photo", &FaceScan::Completed { regions: vec![region()] })
            .await;

        let RedactionState::Redacted(result) = state else {
            panic!("expected redacted state, got {:?}", state);
        };
        assert_eq!(result.faces_masked, 1);
        assert_ne!(result.locator, item.locator);
        assert!(store.contains(&item.locator).await);
        Ok(())
    }

    #[tokio::test]
    async fn no_faces_still_produces_a_derived_object() -> anyhow::Result<()> {
        let store = Arc::new(MemoryEvidenceStore::new());
        let item = item(&store).await;
        let redactor = PrivacyRedactor::new(Arc::new(BrokenMasker), store.clone());

        let state = redactor
            .redact(&item, b"photo", &FaceScan::Completed { regions: Vec::new() })
            .await;

        assert!(matches!(state, RedactionState::Redacted(ref r) if r.locator != item.locator));
        Ok(())
    }

    #[tokio::test]
    async fn failures_close_the_gate() -> anyhow::Result<()> {
        let store = Arc::new(MemoryEvidenceStore::new());
        let mut item = item(&store).await;
        let redactor = PrivacyRedactor::new(Arc::new(BrokenMasker), store.clone());

        let state = redactor
            .redact(&item, b"photo", &FaceScan::Completed { regions: vec![region()] })
            .await;
        assert_eq!(
            state,
            RedactionState::RedactionPending {
                reason: "masking failed: GPU out of memory".to_string()
            }
        );
        let failure = redactor
            .try_redact(&item, b"photo", &FaceScan::Completed { regions: vec![region()] })
            .await;
        assert!(matches!(failure, Err(Error::RedactionFailure(_))));

        let state = PrivacyRedactor::new(Arc::new(InvertingMasker), store.clone())
            .redact(&item, b"photo", &FaceScan::Failed { reason: "model crashed".to_string() })
            .await;
        assert_eq!(state.label(), "redaction_pending");

        item.redaction = state;
        let viewer = Actor::new("Ada", Role::Viewer, Scope::institution("unilag"));
        let incident_like = Resource {
            institution: "unilag",
            location_key: Some("block-b"),
            reporter: Some(viewer.id),
            evidence: Some(crate::access::EvidenceGate::of(&item)),
        };
        assert!(!authorize(&viewer, Capability::ViewEvidence, &incident_like).is_allowed());
        assert!(item.public_locator().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_parent_keeps_item_pending() -> anyhow::Result<()> {
        let store = Arc::new(MemoryEvidenceStore::new());
        let item = EvidenceItem::new(
            Uuid::new_v4(),
            EvidenceLocator("sha256-gone".to_string()),
            MediaKind::Image,
            Utc::now(),
        );
        let redactor = PrivacyRedactor::new(Arc::new(InvertingMasker), store);

        let state = redactor
            .redact(&item, b"photo", &FaceScan::Completed { regions: vec![region()] })
            .await;
        assert!(matches!(state, RedactionState::RedactionPending { .. }));
        Ok(())
    }
}
