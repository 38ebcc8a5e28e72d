use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use super::actor::Role;
use super::incident::{Category, Severity};

/// Delivery channel handed to the transport collaborator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
    Sms,
    Push,
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::InApp => write!(f, "in_app"),
            Self::Sms => write!(f, "sms"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// What caused the alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertReason {
    LiveDetection { feed_id: String },
    EmergencySeverity { severity: Severity },
    WeaponMarker { confidence: f32 },
    EmergencyCategory { category: Category },
}

impl Display for AlertReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LiveDetection { feed_id } => write!(f, "live detection on feed {}", feed_id),
            Self::EmergencySeverity { severity } => {
                write!(f, "severity {} at or above emergency threshold", severity)
            }
            Self::WeaponMarker { confidence } => {
                write!(f, "weapon detected (confidence {:.2})", confidence)
            }
            Self::EmergencyCategory { category } => write!(f, "emergency category {}", category),
        }
    }
}

/// A recipient resolved at emission time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
}

/// A routed notification; immutable once emitted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub incident_reference: String,
    pub institution: String,
    pub location_key: String,
    pub reason: AlertReason,
    pub severity: Severity,
    pub recipients: Vec<Recipient>,
    pub message: AlertMessage,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One try at handing an alert to one recipient over one channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAttempt {
    pub alert_id: Uuid,
    pub recipient: Uuid,
    pub channel: Channel,
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// An emitted alert together with its delivery history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    pub event: AlertEvent,
    pub status: DeliveryStatus,
    pub attempts: Vec<DeliveryAttempt>,
}

/// Alert that exhausted its delivery attempts, surfaced to admins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationalIssue {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub incident_id: Uuid,
    pub institution: String,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
}
