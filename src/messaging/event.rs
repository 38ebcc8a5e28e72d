use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::models::Channel;

/// Event types published by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Incident events
    IncidentSubmitted,
    IncidentStatusChanged,
    IncidentArchived,

    // Evidence events
    EvidenceAnalyzed,
    EvidenceRedactionPending,

    // Intelligence events
    HotspotUpdated,

    // Alert events
    AlertEmitted,
    AlertDelivered,
    AlertDeliveryFailed,
    /// Hand-off to the delivery collaborator for one channel
    AlertDeliver(Channel),

    // System events
    SystemStartup,
    SystemShutdown,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncidentSubmitted => write!(f, "incident.submitted"),
            Self::IncidentStatusChanged => write!(f, "incident.status_changed"),
            Self::IncidentArchived => write!(f, "incident.archived"),
            Self::EvidenceAnalyzed => write!(f, "evidence.analyzed"),
            Self::EvidenceRedactionPending => write!(f, "evidence.redaction_pending"),
            Self::HotspotUpdated => write!(f, "hotspot.updated"),
            Self::AlertEmitted => write!(f, "alert.emitted"),
            Self::AlertDelivered => write!(f, "alert.delivered"),
            Self::AlertDeliveryFailed => write!(f, "alert.delivery_failed"),
            Self::AlertDeliver(channel) => write!(f, "alert.deliver.{}", channel),
            Self::SystemStartup => write!(f, "system.startup"),
            Self::SystemShutdown => write!(f, "system.shutdown"),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    pub event_type: EventType,
    /// Incident or alert the event is about
    pub source_id: Option<Uuid>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Routing key on the topic exchange.
    ///
    /// Delivery hand-offs are routed by channel only so each transport binds
    /// one queue; everything else carries its source id.
    pub fn routing_key(&self) -> String {
        match (&self.event_type, &self.source_id) {
            (EventType::AlertDeliver(_), _) | (_, None) => self.event_type.to_string(),
            (_, Some(id)) => format!("{}.{}", self.event_type, id),
        }
    }
}
