use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::mem::discriminant;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::directory::{RecipientDirectory, StaffMember};
use crate::config::AlertingConfig;
use crate::error::Result;
use crate::models::{
    AlertEvent, AlertMessage, AlertReason, Category, Incident, IncidentStatus, Recipient, Role,
    Severity, SourceKind,
};

/// Why an incident should alert, or `None` for a report entry only.
///
/// Live-feed incidents always alert. Upload-sourced incidents alert only
/// when they cross an emergency condition.
pub fn decide(config: &AlertingConfig, incident: &Incident) -> Option<AlertReason> {
    if let SourceKind::LiveFeed { feed_id } = &incident.source {
        return Some(AlertReason::LiveDetection {
            feed_id: feed_id.clone(),
        });
    }

    let severity = incident.effective_severity();
    if severity.value() >= config.emergency_severity_threshold {
        return Some(AlertReason::EmergencySeverity { severity });
    }
    if config.weapon_marker_is_emergency {
        if let Some(confidence) = incident.weapon_marker_confidence() {
            return Some(AlertReason::WeaponMarker { confidence });
        }
    }
    incident
        .effective_category()
        .filter(|c| config.emergency_categories.contains(c))
        .map(|category| AlertReason::EmergencyCategory { category })
}

/// Recipients for an incident at `location_key`.
///
/// Staff responsible for the location come first; without any, institution-wide
/// admins; without those, every admin of the institution. Band preferences
/// apply to the first two tiers only so an alert is never left unaddressed
/// while an admin exists.
pub fn select_recipients<'a>(
    staff: &'a [StaffMember],
    location_key: &str,
    severity: Severity,
) -> Vec<&'a StaffMember> {
    let band = severity.band();
    let located: Vec<&StaffMember> = staff
        .iter()
        .filter(|m| m.role.is_staff() && m.responsible_for(location_key) && m.wants(band))
        .collect();
    if !located.is_empty() {
        return located;
    }

    let wide_admins: Vec<&StaffMember> = staff
        .iter()
        .filter(|m| m.role == Role::Admin && m.is_institution_wide() && m.wants(band))
        .collect();
    if !wide_admins.is_empty() {
        return wide_admins;
    }

    staff.iter().filter(|m| m.role == Role::Admin).collect()
}

fn message(incident: &Incident, reason: &AlertReason, severity: Severity) -> AlertMessage {
    let category = incident
        .effective_category()
        .unwrap_or(Category::Other);
    AlertMessage {
        title: format!(
            "[{}] {} {} at {}",
            severity.band().to_string().to_uppercase(),
            incident.reference,
            category,
            incident.location.label
        ),
        body: format!(
            "{}\n\nReason: {}\nSeverity: {}\nOccurred: {}\nReported by: {}",
            incident.description,
            reason,
            severity,
            incident.occurred_at.to_rfc3339(),
            incident.reporter.display_name()
        ),
    }
}

struct Emitted {
    at: DateTime<Utc>,
    reasons: Vec<AlertReason>,
}

/// Alert Routing Engine: decides whether and whom to alert
pub struct AlertRouter {
    config: AlertingConfig,
    directory: Arc<dyn RecipientDirectory>,
    emitted: Mutex<HashMap<Uuid, Emitted>>,
}

impl AlertRouter {
    pub fn new(config: AlertingConfig, directory: Arc<dyn RecipientDirectory>) -> Self {
        Self {
            config,
            directory,
            emitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AlertingConfig {
        &self.config
    }

    /// Evaluate an incident event. Returns the emitted alert, if any.
    ///
    /// An incident alerts at most once per cooldown window, and never twice for
    /// the same kind of reason.
    pub async fn evaluate(&self, incident: &Incident) -> Result<Option<AlertEvent>> {
        if incident.archived || incident.status == IncidentStatus::Rejected {
            return Ok(None);
        }
        let reason = match decide(&self.config, incident) {
            Some(reason) => reason,
            None => {
                debug!(
                    "Incident {} below emergency threshold; report entry only",
                    incident.reference
                );
                return Ok(None);
            }
        };

        let now = Utc::now();
        let mut emitted = self.emitted.lock().await;
        if let Some(previous) = emitted.get(&incident.id) {
            let cooling = now - previous.at < Duration::minutes(self.config.cooldown_minutes);
            let repeated = previous
                .reasons
                .iter()
                .any(|r| discriminant(r) == discriminant(&reason));
            if cooling || repeated {
                debug!("Alert for incident {} suppressed ({})", incident.reference, reason);
                return Ok(None);
            }
        }

        let staff = self.directory.staff(&incident.institution).await?;
        let severity = incident.effective_severity();
        let recipients: Vec<Recipient> = select_recipients(&staff, &incident.location.key, severity)
            .into_iter()
            .map(|m| Recipient {
                user_id: m.id,
                name: m.name.clone(),
                role: m.role,
                channels: if m.channels.is_empty() {
                    self.config.default_channels.clone()
                } else {
                    m.channels.clone()
                },
            })
            .collect();

        let alert = AlertEvent {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            incident_reference: incident.reference.clone(),
            institution: incident.institution.clone(),
            location_key: incident.location.key.clone(),
            message: message(incident, &reason, severity),
            reason: reason.clone(),
            severity,
            recipients,
            created_at: now,
        };

        let entry = emitted.entry(incident.id).or_insert(Emitted {
            at: now,
            reasons: Vec::new(),
        });
        entry.at = now;
        entry.reasons.push(reason);

        info!(
            "Alert {} emitted for incident {} ({}) to {} recipient(s)",
            alert.id,
            incident.reference,
            alert.reason,
            alert.recipients.len()
        );
        Ok(Some(alert))
    }

    /// Drop cooldown tracking for an archived incident
    pub async fn forget(&self, incident_id: Uuid) {
        self.emitted.lock().await.remove(&incident_id);
    }
}
