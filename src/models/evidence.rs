use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use super::incident::{Category, GeoPoint, Severity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Opaque, content-addressed reference into the evidence store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EvidenceLocator(pub String);

impl EvidenceLocator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EvidenceLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Analyzer model version stamped on every result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ModelVersion(pub String);

impl Display for ModelVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskMarkerKind {
    WeaponPresent,
    StolenItemMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskMarker {
    pub kind: RiskMarkerKind,
    pub label: String,
    pub confidence: f32,
    /// Offset of the frame that produced the strongest detection
    pub frame_offset_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    pub frame_offset_ms: u64,
}

/// Pixel region of a detected face, relative to the frame it was found in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FaceRegion {
    pub frame_offset_ms: u64,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

/// Face detection outcome for a whole evidence item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FaceScan {
    Completed { regions: Vec<FaceRegion> },
    Failed { reason: String },
}

impl FaceScan {
    pub fn regions(&self) -> Option<&[FaceRegion]> {
        match self {
            Self::Completed { regions } => Some(regions),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SceneMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub coordinates: Option<GeoPoint>,
    pub frames_sampled: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Completed,
    AnalysisFailed { reason: String },
}

/// Findings extracted from one evidence item by one analyzer version.
///
/// Never mutated once produced; re-analysis appends a new result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub evidence_id: Uuid,
    pub analyzer_version: ModelVersion,
    /// SHA-256 of the analyzed bytes
    pub input_digest: String,
    pub produced_at: DateTime<Utc>,
    pub outcome: AnalysisOutcome,
    pub objects: Vec<DetectedObject>,
    /// Markers at or above their configured threshold
    pub risk_markers: Vec<RiskMarker>,
    /// Below-threshold candidates, visible to managers only
    pub low_confidence_markers: Vec<RiskMarker>,
    pub faces: FaceScan,
    pub suggested_category: Option<Category>,
    pub suggested_severity: Option<Severity>,
    pub scene: SceneMetadata,
}

impl AnalysisResult {
    pub fn failed(
        evidence_id: Uuid,
        analyzer_version: ModelVersion,
        input_digest: String,
        reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            evidence_id,
            analyzer_version,
            input_digest,
            produced_at: Utc::now(),
            outcome: AnalysisOutcome::AnalysisFailed {
                reason: reason.clone(),
            },
            objects: Vec::new(),
            risk_markers: Vec::new(),
            low_confidence_markers: Vec::new(),
            faces: FaceScan::Failed { reason },
            suggested_category: None,
            suggested_severity: None,
            scene: SceneMetadata::default(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::AnalysisFailed { .. })
    }

    pub fn has_marker(&self, kind: RiskMarkerKind) -> bool {
        self.risk_markers.iter().any(|m| m.kind == kind)
    }
}

/// Where an evidence item stands with respect to analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    /// Blob was not yet readable; the sweeper will retry
    Deferred { reason: String, attempts: u32 },
    Completed,
    /// Media could not be analyzed; flagged for manual review
    Failed { reason: String },
    Skipped { reason: String },
}

impl AnalysisState {
    /// Whether an analysis pass has completed or been explicitly skipped
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "analysis_pending",
            Self::Deferred { .. } => "analysis_deferred",
            Self::Completed => "analyzed",
            Self::Failed { .. } => "analysis_failed",
            Self::Skipped { .. } => "analysis_skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedactionResult {
    pub locator: EvidenceLocator,
    pub faces_masked: usize,
    pub completed_at: DateTime<Utc>,
}

/// Privacy gate of an evidence item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RedactionState {
    NotStarted,
    Redacted(RedactionResult),
    /// Fail-closed: hidden from non-staff until redacted or overridden
    RedactionPending { reason: String },
    Overridden {
        by: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl RedactionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "redaction_not_started",
            Self::Redacted(_) => "redacted",
            Self::RedactionPending { .. } => "redaction_pending",
            Self::Overridden { .. } => "redaction_overridden",
        }
    }
}

/// One media artifact attached to an incident
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub locator: EvidenceLocator,
    pub media_kind: MediaKind,
    pub captured_at: DateTime<Utc>,
    pub analysis_state: AnalysisState,
    /// Every analysis ever produced for this item, oldest first
    pub analyses: Vec<AnalysisResult>,
    pub redaction: RedactionState,
}

impl EvidenceItem {
    pub fn new(
        incident_id: Uuid,
        locator: EvidenceLocator,
        media_kind: MediaKind,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            incident_id,
            locator,
            media_kind,
            captured_at,
            analysis_state: AnalysisState::Pending,
            analyses: Vec::new(),
            redaction: RedactionState::NotStarted,
        }
    }

    pub fn latest_analysis(&self) -> Option<&AnalysisResult> {
        self.analyses.last()
    }

    /// Locator non-staff may see, if any
    pub fn public_locator(&self) -> Option<&EvidenceLocator> {
        match &self.redaction {
            RedactionState::Redacted(result) => Some(&result.locator),
            RedactionState::Overridden { .. } => Some(&self.locator),
            _ => None,
        }
    }
}
