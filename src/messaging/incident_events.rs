use crate::messaging::event::{EventMessage, EventType};
use crate::messaging::publisher::EventPublisher;
use crate::models::{AlertEvent, AnalysisResult, HotspotCluster, Incident, IncidentStatus};
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Helper for publishing pipeline events.
///
/// Publishing is best effort: a failure is logged and never reaches the
/// operation that produced the event.
#[derive(Clone)]
pub struct DomainEvents {
    publisher: Arc<dyn EventPublisher>,
}

impl DomainEvents {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    async fn emit<T: Serialize>(&self, event_type: EventType, source_id: Option<Uuid>, payload: T) {
        let event = match EventMessage::new(event_type.clone(), source_id, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to build {} event: {}", event_type, e);
                return;
            }
        };
        let routing_key = event.routing_key();
        match self.publisher.publish_event(event).await {
            Ok(()) => debug!("Published {}", routing_key),
            Err(e) => warn!("Failed to publish {}: {}", routing_key, e),
        }
    }

    pub async fn incident_submitted(&self, incident: &Incident) {
        let payload = serde_json::json!({
            "reference": incident.reference,
            "institution": incident.institution,
            "location": incident.location.key,
            "source": incident.source,
            "evidence_count": incident.evidence.len(),
        });
        self.emit(EventType::IncidentSubmitted, Some(incident.id), payload).await;
    }

    pub async fn status_changed(&self, incident: &Incident, from: IncidentStatus) {
        let payload = serde_json::json!({
            "reference": incident.reference,
            "from": from,
            "to": incident.status,
            "severity": incident.severity,
        });
        self.emit(EventType::IncidentStatusChanged, Some(incident.id), payload).await;
    }

    pub async fn incident_archived(&self, incident: &Incident) {
        let payload = serde_json::json!({ "reference": incident.reference });
        self.emit(EventType::IncidentArchived, Some(incident.id), payload).await;
    }

    pub async fn evidence_analyzed(&self, incident_id: Uuid, result: &AnalysisResult) {
        let payload = serde_json::json!({
            "evidence_id": result.evidence_id,
            "analyzer_version": result.analyzer_version,
            "failed": result.is_failed(),
            "risk_markers": result.risk_markers,
            "suggested_severity": result.suggested_severity,
        });
        self.emit(EventType::EvidenceAnalyzed, Some(incident_id), payload).await;
    }

    pub async fn redaction_pending(&self, incident_id: Uuid, evidence_id: Uuid, reason: &str) {
        let payload = serde_json::json!({ "evidence_id": evidence_id, "reason": reason });
        self.emit(EventType::EvidenceRedactionPending, Some(incident_id), payload).await;
    }

    pub async fn hotspot_updated(&self, cluster: &HotspotCluster) {
        let payload = serde_json::json!({
            "cluster": cluster.id,
            "score": cluster.score,
            "incidents": cluster.incident_count(),
            "last_recomputed": cluster.last_recomputed,
        });
        self.emit(EventType::HotspotUpdated, None, payload).await;
    }

    pub async fn alert_emitted(&self, alert: &AlertEvent) {
        self.emit(EventType::AlertEmitted, Some(alert.id), alert).await;
    }

    pub async fn alert_delivered(&self, alert: &AlertEvent, attempts: usize) {
        let payload = serde_json::json!({ "incident_id": alert.incident_id, "attempts": attempts });
        self.emit(EventType::AlertDelivered, Some(alert.id), payload).await;
    }

    pub async fn alert_delivery_failed(&self, alert: &AlertEvent, detail: &str) {
        let payload = serde_json::json!({ "incident_id": alert.incident_id, "detail": detail });
        self.emit(EventType::AlertDeliveryFailed, Some(alert.id), payload).await;
    }

    pub async fn system_startup(&self) {
        let payload = serde_json::json!({ "version": env!("CARGO_PKG_VERSION") });
        self.emit(EventType::SystemStartup, None, payload).await;
    }

    pub async fn system_shutdown(&self) {
        self.emit(EventType::SystemShutdown, None, serde_json::json!({})).await;
    }
}
