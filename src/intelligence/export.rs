use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    AuditEntry, Category, Escalation, EvidenceLocator, Incident, IncidentStatus, MediaKind, Severity,
};

pub const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub media_kind: MediaKind,
    pub captured_at: DateTime<Utc>,
    pub analysis: String,
    pub redaction: String,
    pub viewable_locator: Option<EvidenceLocator>,
    pub analyzer_versions: Vec<String>,
    pub risk_markers: Vec<String>,
}

/// Stable structured record of one incident for report generation.
///
/// Field order is fixed by the struct and every collection is ordered, so the
/// same incident always serializes to the same bytes.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentExport {
    pub format_version: u32,
    pub id: Uuid,
    pub reference: String,
    pub institution: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub location_key: String,
    pub reported_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
    pub reporter: String,
    pub status: IncidentStatus,
    pub category: Option<Category>,
    pub severity: Severity,
    pub severity_band: String,
    pub tags: Vec<String>,
    pub false_positive: bool,
    pub escalation: Option<Escalation>,
    pub archived: bool,
    pub evidence: Vec<EvidenceRecord>,
    pub audit_log: Vec<AuditEntry>,
}

impl From<&Incident> for IncidentExport {
    fn from(incident: &Incident) -> Self {
        let mut tags = incident.tags.clone();
        tags.sort();
        let mut evidence: Vec<EvidenceRecord> = incident
            .evidence
            .iter()
            .map(|item| {
                let mut markers: Vec<String> = item
                    .latest_analysis()
                    .map(|a| {
                        a.risk_markers
                            .iter()
                            .map(|m| format!("{:?}:{}:{:.3}", m.kind, m.label, m.confidence))
                            .collect()
                    })
                    .unwrap_or_default();
                markers.sort();
                EvidenceRecord {
                    id: item.id,
                    media_kind: item.media_kind,
                    captured_at: item.captured_at,
                    analysis: item.analysis_state.label().to_string(),
                    redaction: item.redaction.label().to_string(),
                    viewable_locator: item.public_locator().cloned(),
                    analyzer_versions: item.analyses.iter().map(|a| a.analyzer_version.0.clone()).collect(),
                    risk_markers: markers,
                }
            })
            .collect();
        evidence.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));

        let severity = incident.effective_severity();
        Self {
            format_version: EXPORT_FORMAT_VERSION,
            id: incident.id,
            reference: incident.reference.clone(),
            institution: incident.institution.clone(),
            title: incident.title.clone(),
            description: incident.description.clone(),
            location: incident.location.label.clone(),
            location_key: incident.location.key.clone(),
            reported_at: incident.reported_at,
            occurred_at: incident.occurred_at,
            reporter: incident.reporter.display_name(),
            status: incident.status,
            category: incident.effective_category(),
            severity,
            severity_band: severity.band().to_string(),
            tags,
            false_positive: incident.false_positive,
            escalation: incident.escalation.clone(),
            archived: incident.archived,
            evidence,
            audit_log: incident.audit_log.entries().to_vec(),
        }
    }
}
