pub mod actor;
pub mod alert;
pub mod evidence;
pub mod hotspot;
pub mod incident;

pub use actor::{Actor, ActorRef, Permission, Role, Scope};
pub use alert::{
    AlertEvent, AlertMessage, AlertReason, AlertRecord, Channel, DeliveryAttempt, DeliveryStatus,
    OperationalIssue, Recipient,
};
pub use evidence::{
    AnalysisOutcome, AnalysisResult, AnalysisState, DetectedObject, EvidenceItem, EvidenceLocator,
    FaceRegion, FaceScan, MediaKind, ModelVersion, RedactionResult, RedactionState, RiskMarker,
    RiskMarkerKind, SceneMetadata,
};
pub use hotspot::{BucketKey, HotspotCluster};
pub use incident::{
    AuditAction, AuditEntry, AuditLog, Category, Escalation, GeoPoint, Incident, IncidentAction,
    IncidentStatus, Location, NoteKind, Reporter, Severity, SeverityBand, SourceKind,
};
