use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use super::actor::ActorRef;
use super::evidence::EvidenceItem;

static LOCATION_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;(/]").unwrap());

/// Incident category
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Theft,
    Vandalism,
    UnauthorizedAccess,
    CultActivity,
    Cyber,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Theft,
        Category::Vandalism,
        Category::UnauthorizedAccess,
        Category::CultActivity,
        Category::Cyber,
        Category::Other,
    ];
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Theft => write!(f, "theft"),
            Self::Vandalism => write!(f, "vandalism"),
            Self::UnauthorizedAccess => write!(f, "unauthorized-access"),
            Self::CultActivity => write!(f, "cult-activity"),
            Self::Cyber => write!(f, "cyber"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Severity score, always within 0..=100
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MAX: Severity = Severity(100);

    pub fn new(value: u8) -> Option<Self> {
        (value <= 100).then_some(Self(value))
    }

    /// Clamp an arbitrary score into range
    pub fn clamped(value: f64) -> Self {
        Self(value.round().clamp(0.0, 100.0) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn band(&self) -> SeverityBand {
        match self.0 {
            0..=24 => SeverityBand::Low,
            25..=49 => SeverityBand::Medium,
            50..=74 => SeverityBand::High,
            _ => SeverityBand::Critical,
        }
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Severity::new(value).ok_or_else(|| format!("severity {} is outside 0-100", value))
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.0
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display band of a severity score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBand {
    Low,
    Medium,
    High,
    Critical,
}

impl Display for SeverityBand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle status of an incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Submitted,
    Triaged,
    Investigating,
    Resolved,
    Rejected,
}

impl IncidentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }
}

impl Display for IncidentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Triaged => write!(f, "triaged"),
            Self::Investigating => write!(f, "investigating"),
            Self::Resolved => write!(f, "resolved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Lifecycle action requested on an incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentAction {
    Triage,
    StartInvestigation,
    Resolve,
    Reject,
    Reopen,
}

impl Display for IncidentAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Triage => write!(f, "triage"),
            Self::StartInvestigation => write!(f, "start investigation"),
            Self::Resolve => write!(f, "resolve"),
            Self::Reject => write!(f, "reject"),
            Self::Reopen => write!(f, "reopen"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Free-text location plus the coarse spatial key derived from it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub label: String,
    pub key: String,
    pub coordinates: Option<GeoPoint>,
}

impl Location {
    pub fn new(label: &str, coordinates: Option<GeoPoint>) -> Self {
        Self {
            label: label.trim().to_string(),
            key: location_key(label),
            coordinates,
        }
    }
}

/// Coarse spatial key for a free-text location.
///
/// "Block B, Room 12" and "block b" both map to `block-b`.
pub fn location_key(label: &str) -> String {
    let head = LOCATION_SEPARATOR
        .split(label)
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let key = head
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if key.is_empty() {
        "unknown".to_string()
    } else {
        key
    }
}

/// Who reported the incident
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reporter {
    Identified { user_id: Uuid, name: String },
    Anonymous,
    LiveFeed { feed_id: String },
}

impl Reporter {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Identified { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Identified { name, .. } => name.clone(),
            Self::Anonymous => "Anonymous".to_string(),
            Self::LiveFeed { feed_id } => format!("Live feed {}", feed_id),
        }
    }
}

/// Where the incident came from; decides alerting behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    EvidenceUpload,
    LiveFeed { feed_id: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Internal,
    Resolution,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escalation {
    pub police_reference: String,
    pub escalated_at: DateTime<Utc>,
}

/// What an audit entry records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAction {
    Submitted,
    StatusChanged {
        action: IncidentAction,
        from: IncidentStatus,
        to: IncidentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    SeverityChanged {
        from: Severity,
        to: Severity,
        reason: String,
    },
    CategoryChanged {
        from: Option<Category>,
        to: Category,
    },
    InvestigatorAssigned {
        investigator: Uuid,
    },
    NoteAdded {
        kind: NoteKind,
        note: String,
    },
    EvidenceAnalyzed {
        evidence_id: Uuid,
        analyzer_version: String,
        failed: bool,
    },
    AnalysisSkipped {
        evidence_id: Uuid,
        reason: String,
    },
    AnalysisDeferred {
        evidence_id: Uuid,
        reason: String,
    },
    EvidenceRedacted {
        evidence_id: Uuid,
        faces_masked: usize,
    },
    RedactionPending {
        evidence_id: Uuid,
        reason: String,
    },
    RedactionOverridden {
        evidence_id: Uuid,
        reason: String,
    },
    EvidenceUnlocked {
        evidence_id: Uuid,
    },
    MarkedFalsePositive,
    Escalated {
        police_reference: String,
    },
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub seq: u64,
    pub actor: ActorRef,
    pub action: AuditAction,
    pub at: DateTime<Utc>,
}

/// Append-only audit log of an incident
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AuditLog(Vec<AuditEntry>);

impl AuditLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn append(&mut self, actor: ActorRef, action: AuditAction, at: DateTime<Utc>) -> &AuditEntry {
        let seq = self.0.len() as u64 + 1;
        self.0.push(AuditEntry {
            seq,
            actor,
            action,
            at,
        });
        &self.0[self.0.len() - 1]
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.0.last()
    }

    /// Whether `self` is `previous` with zero or more entries appended
    pub fn extends(&self, previous: &AuditLog) -> bool {
        self.0.len() >= previous.0.len() && self.0[..previous.0.len()] == previous.0[..]
    }

    /// Entries appended after `previous`; empty when `self` does not extend it
    pub fn appended_since<'a>(&'a self, previous: &AuditLog) -> &'a [AuditEntry] {
        if self.extends(previous) {
            &self.0[previous.0.len()..]
        } else {
            &[]
        }
    }

    pub(crate) fn from_entries(entries: Vec<AuditEntry>) -> Self {
        Self(entries)
    }
}

/// A reported security event with its evidence and history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: Uuid,
    /// Human readable reference, INC-YYYYMMDD-NNNN
    pub reference: String,
    pub institution: String,
    pub title: String,
    pub description: String,
    pub location: Location,
    pub reported_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub declared_category: Option<Category>,
    pub declared_severity: Option<Severity>,
    pub category: Option<Category>,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub source: SourceKind,
    pub reporter: Reporter,
    pub assigned_investigator: Option<Uuid>,
    pub evidence: Vec<EvidenceItem>,
    pub tags: Vec<String>,
    pub false_positive: bool,
    pub escalation: Option<Escalation>,
    pub archived: bool,
    pub audit_log: AuditLog,
}

impl Incident {
    pub fn evidence_item(&self, evidence_id: Uuid) -> Option<&EvidenceItem> {
        self.evidence.iter().find(|e| e.id == evidence_id)
    }

    pub fn evidence_item_mut(&mut self, evidence_id: Uuid) -> Option<&mut EvidenceItem> {
        self.evidence.iter_mut().find(|e| e.id == evidence_id)
    }

    /// Evidence items still waiting for an analysis pass
    pub fn unanalyzed_evidence(&self) -> Vec<Uuid> {
        self.evidence
            .iter()
            .filter(|e| !e.analysis_state.is_settled())
            .map(|e| e.id)
            .collect()
    }

    pub fn analysis_pending(&self) -> bool {
        !self.unanalyzed_evidence().is_empty()
    }

    /// Highest severity suggested by the latest analysis of each evidence item
    pub fn analyzer_severity(&self) -> Option<Severity> {
        self.evidence
            .iter()
            .filter_map(|e| e.latest_analysis())
            .filter_map(|a| a.suggested_severity)
            .max()
    }

    /// Category suggested by analysis, picking the most severe suggestion
    pub fn analyzer_category(&self) -> Option<Category> {
        self.evidence
            .iter()
            .filter_map(|e| e.latest_analysis())
            .filter_map(|a| {
                a.suggested_category
                    .map(|c| (a.suggested_severity.unwrap_or_default(), c))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, c)| c)
    }

    /// Severity as known right now. Once triaged, `severity` is authoritative
    /// and manual adjustments in either direction stick.
    pub fn effective_severity(&self) -> Severity {
        if self.status != IncidentStatus::Submitted {
            return self.severity;
        }
        [self.declared_severity, self.analyzer_severity()]
            .into_iter()
            .flatten()
            .fold(self.severity, Severity::max)
    }

    /// Category as known right now
    pub fn effective_category(&self) -> Option<Category> {
        self.category
            .or(self.declared_category)
            .or_else(|| self.analyzer_category())
    }

    /// Highest confidence surfaced weapon marker across the latest analyses
    pub fn weapon_marker_confidence(&self) -> Option<f32> {
        self.evidence
            .iter()
            .filter_map(|e| e.latest_analysis())
            .flat_map(|a| a.risk_markers.iter())
            .filter(|m| m.kind == super::evidence::RiskMarkerKind::WeaponPresent)
            .map(|m| m.confidence)
            .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.max(c))))
    }

    pub fn is_live_feed(&self) -> bool {
        matches!(self.source, SourceKind::LiveFeed { .. })
    }

    /// When the incident first left `submitted`
    pub fn triaged_at(&self) -> Option<DateTime<Utc>> {
        self.audit_log.entries().iter().find_map(|e| match &e.action {
            AuditAction::StatusChanged {
                to: IncidentStatus::Triaged,
                ..
            } => Some(e.at),
            _ => None,
        })
    }

    /// When the incident last entered `resolved`
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        if self.status != IncidentStatus::Resolved {
            return None;
        }
        self.audit_log.entries().iter().rev().find_map(|e| match &e.action {
            AuditAction::StatusChanged {
                to: IncidentStatus::Resolved,
                ..
            } => Some(e.at),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_keys_are_coarse() {
        assert_eq!(location_key("Block B"), "block-b");
        assert_eq!(location_key("  Block B, Room 12 "), "block-b");
        assert_eq!(location_key("Main Library (2nd floor)"), "main-library");
        assert_eq!(location_key(",,"), "unknown");
    }

    #[test]
    fn location_keys_keep_non_latin_letters() {
        assert_eq!(location_key("Amphithéâtre Sud"), "amphithéâtre-sud");
        assert_ne!(location_key("図書館"), location_key("体育館"));
        assert_ne!(location_key("図書館"), "unknown");
    }

    #[test]
    fn severity_bands_follow_score() {
        assert_eq!(Severity::new(10).unwrap().band(), SeverityBand::Low);
        assert_eq!(Severity::new(25).unwrap().band(), SeverityBand::Medium);
        assert_eq!(Severity::new(74).unwrap().band(), SeverityBand::High);
        assert_eq!(Severity::MAX.band(), SeverityBand::Critical);
        assert!(Severity::new(101).is_none());
        assert_eq!(Severity::clamped(140.2), Severity::MAX);
    }

    #[test]
    fn audit_log_extension_is_prefix_based() {
        let mut log = AuditLog::new();
        log.append(ActorRef::system(), AuditAction::Submitted, Utc::now());
        let snapshot = log.clone();
        log.append(ActorRef::system(), AuditAction::Archived, Utc::now());

        assert!(log.extends(&snapshot));
        assert!(!snapshot.extends(&log));
        assert_eq!(log.appended_since(&snapshot).len(), 1);
        assert_eq!(log.entries()[1].seq, 2);
    }
}
