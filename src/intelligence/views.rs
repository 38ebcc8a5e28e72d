use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{self, Capability, Resource};
use crate::models::{
    Actor, AuditEntry, Category, DetectedObject, Escalation, EvidenceItem, EvidenceLocator,
    Incident, IncidentStatus, MediaKind, RiskMarker, Severity, SeverityBand, SourceKind,
};

/// One row of the incident list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentSummary {
    pub id: Uuid,
    pub reference: String,
    pub title: String,
    pub status: IncidentStatus,
    pub category: Option<Category>,
    pub severity: Severity,
    pub band: SeverityBand,
    pub location: String,
    pub location_key: String,
    pub reported_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub reporter: String,
    pub evidence_count: usize,
    pub analysis_pending: bool,
    pub false_positive: bool,
    pub archived: bool,
}

impl From<&Incident> for IncidentSummary {
    fn from(incident: &Incident) -> Self {
        let severity = incident.effective_severity();
        Self {
            id: incident.id,
            reference: incident.reference.clone(),
            title: incident.title.clone(),
            status: incident.status,
            category: incident.effective_category(),
            severity,
            band: severity.band(),
            location: incident.location.label.clone(),
            location_key: incident.location.key.clone(),
            reported_at: incident.reported_at,
            occurred_at: incident.occurred_at,
            reporter: incident.reporter.display_name(),
            evidence_count: incident.evidence.len(),
            analysis_pending: incident.analysis_pending(),
            false_positive: incident.false_positive,
            archived: incident.archived,
        }
    }
}

/// Evidence as the viewing actor may see it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceView {
    pub id: Uuid,
    pub media_kind: MediaKind,
    pub captured_at: DateTime<Utc>,
    pub analysis: String,
    pub redaction: String,
    /// Redacted copy, or the original after an admin override; never the raw original otherwise
    pub locator: Option<EvidenceLocator>,
    pub analyzer_version: Option<String>,
    pub objects: Vec<DetectedObject>,
    pub risk_markers: Vec<RiskMarker>,
    /// Below-threshold candidates, staff only
    pub low_confidence_markers: Vec<RiskMarker>,
    pub faces_detected: Option<usize>,
}

impl EvidenceView {
    pub fn of(actor: &Actor, incident: &Incident, item: &EvidenceItem) -> Option<Self> {
        let resource = Resource::evidence(incident, item);
        if !access::authorize(actor, Capability::ViewEvidence, &resource).is_allowed() {
            return None;
        }
        let staff = actor.role.is_staff();
        let latest = item.latest_analysis();
        Some(Self {
            id: item.id,
            media_kind: item.media_kind,
            captured_at: item.captured_at,
            analysis: item.analysis_state.label().to_string(),
            redaction: item.redaction.label().to_string(),
            locator: item.public_locator().cloned(),
            analyzer_version: latest.map(|a| a.analyzer_version.0.clone()),
            objects: latest.map(|a| a.objects.clone()).unwrap_or_default(),
            risk_markers: latest.map(|a| a.risk_markers.clone()).unwrap_or_default(),
            low_confidence_markers: match (staff, latest) {
                (true, Some(a)) => a.low_confidence_markers.clone(),
                _ => Vec::new(),
            },
            faces_detected: latest.and_then(|a| a.faces.regions()).map(|r| r.len()),
        })
    }
}

/// Incident detail page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentView {
    #[serde(flatten)]
    pub summary: IncidentSummary,
    pub description: String,
    pub tags: Vec<String>,
    pub source: SourceKind,
    pub assigned_investigator: Option<Uuid>,
    pub escalation: Option<Escalation>,
    /// Items the actor may not see are counted but not listed
    pub evidence: Vec<EvidenceView>,
    pub hidden_evidence: usize,
    /// Staff only
    pub audit_log: Vec<AuditEntry>,
}

impl IncidentView {
    pub fn of(actor: &Actor, incident: &Incident) -> Self {
        let evidence: Vec<EvidenceView> = incident
            .evidence
            .iter()
            .filter_map(|item| EvidenceView::of(actor, incident, item))
            .collect();
        let staff = actor.role.is_staff();
        Self {
            summary: IncidentSummary::from(incident),
            description: incident.description.clone(),
            tags: incident.tags.clone(),
            source: incident.source.clone(),
            assigned_investigator: if staff { incident.assigned_investigator } else { None },
            escalation: if staff { incident.escalation.clone() } else { None },
            hidden_evidence: incident.evidence.len() - evidence.len(),
            evidence,
            audit_log: if staff {
                incident.audit_log.entries().to_vec()
            } else {
                Vec::new()
            },
        }
    }
}

/// Dashboard list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentFilter {
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub band: Option<SeverityBand>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &Incident) -> bool {
        (self.include_archived || !incident.archived)
            && self.status.map_or(true, |s| incident.status == s)
            && self.category.map_or(true, |c| incident.effective_category() == Some(c))
            && self.band.map_or(true, |b| incident.effective_severity().band() == b)
            && self
                .location
                .as_deref()
                .map_or(true, |l| incident.location.key == crate::models::incident::location_key(l))
    }
}
