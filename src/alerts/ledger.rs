use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{AlertEvent, AlertRecord, DeliveryAttempt, DeliveryStatus, OperationalIssue};

/// Emitted alerts with their delivery history, plus issues raised for admins.
///
/// Events are immutable once recorded; attempts and the final status are
/// appended alongside them.
#[derive(Default)]
pub struct AlertLedger {
    records: RwLock<BTreeMap<Uuid, AlertRecord>>,
    issues: RwLock<Vec<OperationalIssue>>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: AlertEvent) {
        self.records.write().await.insert(
            event.id,
            AlertRecord {
                event,
                status: DeliveryStatus::Pending,
                attempts: Vec::new(),
            },
        );
    }

    pub async fn add_attempt(&self, attempt: DeliveryAttempt) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&attempt.alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {}", attempt.alert_id)))?;
        record.attempts.push(attempt);
        Ok(())
    }

    /// Settle a pending alert; a settled status is never changed again
    pub async fn settle(&self, alert_id: Uuid, status: DeliveryStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {}", alert_id)))?;
        if record.status != DeliveryStatus::Pending {
            return Err(Error::Validation(format!(
                "alert {} is already {}",
                alert_id, record.status
            )));
        }
        record.status = status;
        Ok(())
    }

    pub async fn raise_issue(&self, event: &AlertEvent, detail: String) -> OperationalIssue {
        let issue = OperationalIssue {
            id: Uuid::new_v4(),
            alert_id: event.id,
            incident_id: event.incident_id,
            institution: event.institution.clone(),
            detail,
            raised_at: Utc::now(),
        };
        self.issues.write().await.push(issue.clone());
        issue
    }

    pub async fn get(&self, alert_id: Uuid) -> Option<AlertRecord> {
        self.records.read().await.get(&alert_id).cloned()
    }

    /// Alerts of an institution, newest first
    pub async fn alerts(&self, institution: &str) -> Vec<AlertRecord> {
        let mut alerts: Vec<AlertRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.event.institution == institution)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| {
            b.event
                .created_at
                .cmp(&a.event.created_at)
                .then(a.event.id.cmp(&b.event.id))
        });
        alerts
    }

    pub async fn for_incident(&self, incident_id: Uuid) -> Vec<AlertRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.event.incident_id == incident_id)
            .cloned()
            .collect()
    }

    pub async fn issues(&self, institution: &str) -> Vec<OperationalIssue> {
        self.issues
            .read()
            .await
            .iter()
            .filter(|i| i.institution == institution)
            .cloned()
            .collect()
    }
}
