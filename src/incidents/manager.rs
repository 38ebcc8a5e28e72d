use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::lifecycle::{self, Rejection};
use super::store::IncidentStore;
use crate::access::{self, Capability, Resource};
use crate::error::{Error, Result};
use crate::models::{
    Actor, ActorRef, AnalysisOutcome, AnalysisResult, AnalysisState, AuditAction, Category, Escalation,
    EvidenceItem, EvidenceLocator, GeoPoint, Incident, IncidentAction, IncidentStatus, Location,
    MediaKind, NoteKind, RedactionState, Reporter, Severity, SourceKind,
};
use crate::utils::KeyedLocks;

/// Clock skew tolerated on reported occurrence times
const FUTURE_SKEW_MINUTES: i64 = 5;
const TITLE_MAX_CHARS: usize = 80;

/// Evidence reference handed over by the reporting collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceUpload {
    pub locator: EvidenceLocator,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// A crowdsourced report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub title: String,
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub severity: Option<u8>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<EvidenceUpload>,
}

/// A detection raised by a live-monitoring feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveDetection {
    pub feed_id: String,
    pub institution: String,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub severity: Option<u8>,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceUpload>,
}

/// Returned to the submitter immediately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub incident_id: Uuid,
    pub reference: String,
    pub status: IncidentStatus,
    pub analysis_pending: bool,
}

impl SubmissionReceipt {
    pub fn of(incident: &Incident) -> Self {
        Self {
            incident_id: incident.id,
            reference: incident.reference.clone(),
            status: incident.status,
            analysis_pending: incident.analysis_pending(),
        }
    }
}

fn non_empty(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} is required", what)));
    }
    Ok(value.to_string())
}

fn parse_severity(value: Option<u8>) -> Result<Option<Severity>> {
    value
        .map(|v| Severity::try_from(v).map_err(Error::Validation))
        .transpose()
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

fn default_title(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or_default();
    first_line.chars().take(TITLE_MAX_CHARS).collect()
}

fn ensure_open(incident: &Incident) -> Result<()> {
    if incident.archived {
        return Err(Error::Validation(format!("incident {} is archived", incident.reference)));
    }
    Ok(())
}

fn apply_transition(
    incident: &mut Incident,
    by: ActorRef,
    action: IncidentAction,
    reason: Option<String>,
) -> Result<IncidentStatus> {
    let to = lifecycle::require(incident, action)?;
    let from = incident.status;
    incident.status = to;
    incident.audit_log.append(
        by,
        AuditAction::StatusChanged {
            action,
            from,
            to,
            reason,
        },
        Utc::now(),
    );
    info!("Incident {} {} -> {}", incident.reference, from, to);
    Ok(from)
}

/// Triage transition plus the initial classification it fixes
fn triage_in_place(incident: &mut Incident, by: ActorRef) -> Result<()> {
    apply_transition(incident, by.clone(), IncidentAction::Triage, None)?;

    let severity = incident
        .declared_severity
        .unwrap_or_default()
        .max(incident.analyzer_severity().unwrap_or_default());
    if severity != incident.severity {
        incident.audit_log.append(
            by.clone(),
            AuditAction::SeverityChanged {
                from: incident.severity,
                to: severity,
                reason: "initial triage".to_string(),
            },
            Utc::now(),
        );
        incident.severity = severity;
    }

    let category = incident
        .declared_category
        .or_else(|| incident.analyzer_category())
        .unwrap_or(Category::Other);
    if incident.category != Some(category) {
        incident.audit_log.append(
            by,
            AuditAction::CategoryChanged {
                from: incident.category,
                to: category,
            },
            Utc::now(),
        );
        incident.category = Some(category);
    }
    Ok(())
}

/// Incident Record Manager: owns incident records and their lifecycle
pub struct IncidentManager {
    store: Arc<dyn IncidentStore>,
    locks: KeyedLocks<Uuid>,
}

impl IncidentManager {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Load without a capability check, for internal callers
    pub async fn fetch(&self, id: Uuid) -> Result<Incident> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("incident {}", id)))
    }

    /// Load, mutate and save one incident while holding its lock.
    ///
    /// All audit appends for an incident go through here, which keeps them
    /// strictly ordered per incident.
    async fn update<F, T>(&self, id: Uuid, apply: F) -> Result<(Incident, T)>
    where
        F: FnOnce(&mut Incident) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.locks.lock(&id).await;
        let mut incident = self.fetch(id).await?;
        let value = apply(&mut incident)?;
        self.store.save(&incident).await?;
        Ok((incident, value))
    }

    async fn create(&self, mut incident: Incident, by: ActorRef) -> Result<Incident> {
        incident.reference = self.store.next_reference(incident.reported_at.date_naive()).await?;
        incident
            .audit_log
            .append(by, AuditAction::Submitted, incident.reported_at);
        self.store.insert(&incident).await?;
        info!(
            "Incident {} ({}) submitted at {} with {} evidence item(s)",
            incident.reference,
            incident.id,
            incident.location.key,
            incident.evidence.len()
        );
        Ok(incident)
    }

    pub async fn submit(&self, actor: &Actor, submission: Submission) -> Result<Incident> {
        access::require(
            actor,
            Capability::SubmitReport,
            &Resource::institution(&actor.scope.institution),
        )?;

        let description = non_empty(&submission.description, "description")?;
        let location = non_empty(&submission.location, "location")?;
        let declared_severity = parse_severity(submission.severity)?;
        let now = Utc::now();
        let occurred_at = submission.occurred_at.unwrap_or(now);
        if occurred_at > now + Duration::minutes(FUTURE_SKEW_MINUTES) {
            return Err(Error::Validation("occurrence time is in the future".to_string()));
        }
        let title = match submission.title.trim() {
            "" => default_title(&description),
            title => title.to_string(),
        };

        let (reporter, by) = if submission.anonymous {
            (Reporter::Anonymous, ActorRef::anonymous())
        } else {
            (
                Reporter::Identified {
                    user_id: actor.id,
                    name: actor.name.clone(),
                },
                actor.audit_ref(),
            )
        };

        let id = Uuid::new_v4();
        let incident = Incident {
            id,
            reference: String::new(),
            institution: actor.scope.institution.clone(),
            title,
            description,
            location: Location::new(&location, submission.coordinates),
            reported_at: now,
            occurred_at,
            declared_category: submission.category,
            declared_severity,
            category: None,
            severity: declared_severity.unwrap_or_default(),
            status: IncidentStatus::Submitted,
            source: SourceKind::EvidenceUpload,
            reporter,
            assigned_investigator: None,
            evidence: submission
                .evidence
                .into_iter()
                .map(|u| EvidenceItem::new(id, u.locator, u.media_kind, u.captured_at.unwrap_or(now)))
                .collect(),
            tags: normalize_tags(submission.tags),
            false_positive: false,
            escalation: None,
            archived: false,
            audit_log: Default::default(),
        };
        self.create(incident, by).await
    }

    /// Record an incident raised by a live-monitoring feed
    pub async fn submit_live(&self, detection: LiveDetection) -> Result<Incident> {
        let feed_id = non_empty(&detection.feed_id, "feed id")?;
        let institution = non_empty(&detection.institution, "institution")?;
        let location = non_empty(&detection.location, "location")?;
        let declared_severity = parse_severity(detection.severity)?;
        let now = Utc::now();

        let description = match detection.description.trim() {
            "" => format!("Detection on live feed {}", feed_id),
            description => description.to_string(),
        };

        let id = Uuid::new_v4();
        let incident = Incident {
            id,
            reference: String::new(),
            institution,
            title: format!("Live detection at {}", location),
            description,
            location: Location::new(&location, detection.coordinates),
            reported_at: now,
            occurred_at: detection.occurred_at.min(now),
            declared_category: detection.category,
            declared_severity,
            category: None,
            severity: declared_severity.unwrap_or_default(),
            status: IncidentStatus::Submitted,
            source: SourceKind::LiveFeed {
                feed_id: feed_id.clone(),
            },
            reporter: Reporter::LiveFeed {
                feed_id: feed_id.clone(),
            },
            assigned_investigator: None,
            evidence: detection
                .evidence
                .into_iter()
                .map(|u| EvidenceItem::new(id, u.locator, u.media_kind, u.captured_at.unwrap_or(now)))
                .collect(),
            tags: vec!["live-feed".to_string()],
            false_positive: false,
            escalation: None,
            archived: false,
            audit_log: Default::default(),
        };
        self.create(incident, ActorRef::live_feed(&feed_id)).await
    }

    /// Analysis completion callback
    pub async fn record_analysis(&self, incident_id: Uuid, result: AnalysisResult) -> Result<Incident> {
        let (incident, _) = self
            .update(incident_id, |incident| {
                if incident.status == IncidentStatus::Rejected {
                    return Err(Error::Validation(format!(
                        "incident {} was rejected; analysis discarded",
                        incident.reference
                    )));
                }
                let evidence_id = result.evidence_id;
                let failed = result.is_failed();
                let action = AuditAction::EvidenceAnalyzed {
                    evidence_id,
                    analyzer_version: result.analyzer_version.0.clone(),
                    failed,
                };

                let item = incident
                    .evidence_item_mut(evidence_id)
                    .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
                item.analysis_state = match &result.outcome {
                    AnalysisOutcome::Completed => AnalysisState::Completed,
                    AnalysisOutcome::AnalysisFailed { reason } => {
                        AnalysisState::Failed {
                            reason: reason.clone(),
                        }
                    }
                };
                if let Some(captured_at) = result.scene.captured_at {
                    item.captured_at = captured_at;
                }
                item.analyses.push(result);

                incident.audit_log.append(ActorRef::system(), action, Utc::now());
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    /// Evidence could not be read yet; leave it for the sweeper
    pub async fn defer_analysis(&self, incident_id: Uuid, evidence_id: Uuid, reason: &str) -> Result<Incident> {
        let (incident, _) = self
            .update(incident_id, |incident| {
                let item = incident
                    .evidence_item_mut(evidence_id)
                    .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
                let attempts = match &item.analysis_state {
                    AnalysisState::Pending => 1,
                    AnalysisState::Deferred { attempts, .. } => attempts + 1,
                    settled => {
                        return Err(Error::Validation(format!(
                            "evidence {} is already {}",
                            evidence_id,
                            settled.label()
                        )))
                    }
                };
                item.analysis_state = AnalysisState::Deferred {
                    reason: reason.to_string(),
                    attempts,
                };
                incident.audit_log.append(
                    ActorRef::system(),
                    AuditAction::AnalysisDeferred {
                        evidence_id,
                        reason: reason.to_string(),
                    },
                    Utc::now(),
                );
                Ok(())
            })
            .await?;
        warn!("Analysis of evidence {} deferred: {}", evidence_id, reason);
        Ok(incident)
    }

    /// Explicitly skip analysis of one evidence item
    pub async fn skip_analysis(
        &self,
        actor: &Actor,
        incident_id: Uuid,
        evidence_id: Uuid,
        reason: &str,
    ) -> Result<Incident> {
        let reason = non_empty(reason, "skip reason")?;
        let (incident, _) = self
            .update(incident_id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                ensure_open(incident)?;
                let item = incident
                    .evidence_item_mut(evidence_id)
                    .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
                if item.analysis_state.is_settled() {
                    return Err(Error::Validation(format!(
                        "evidence {} is already {}",
                        evidence_id,
                        item.analysis_state.label()
                    )));
                }
                item.analysis_state = AnalysisState::Skipped {
                    reason: reason.clone(),
                };
                incident.audit_log.append(
                    actor.audit_ref(),
                    AuditAction::AnalysisSkipped {
                        evidence_id,
                        reason: reason.clone(),
                    },
                    Utc::now(),
                );
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    /// Store the redactor's verdict for one evidence item
    pub async fn record_redaction(
        &self,
        incident_id: Uuid,
        evidence_id: Uuid,
        state: RedactionState,
    ) -> Result<Incident> {
        let (incident, _) = self
            .update(incident_id, |incident| {
                let item = incident
                    .evidence_item_mut(evidence_id)
                    .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
                let action = match &state {
                    RedactionState::Redacted(result) => AuditAction::EvidenceRedacted {
                        evidence_id,
                        faces_masked: result.faces_masked,
                    },
                    RedactionState::RedactionPending { reason } => {
                        if matches!(item.redaction, RedactionState::Overridden { .. }) {
                            debug!("Evidence {} stays overridden despite: {}", evidence_id, reason);
                            return Ok(());
                        }
                        AuditAction::RedactionPending {
                            evidence_id,
                            reason: reason.clone(),
                        }
                    }
                    other => {
                        return Err(Error::Internal(format!(
                            "redactor cannot produce {}",
                            other.label()
                        )))
                    }
                };
                item.redaction = state;
                incident.audit_log.append(ActorRef::system(), action, Utc::now());
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    /// Admin releases evidence whose redaction could not complete
    pub async fn override_redaction(
        &self,
        actor: &Actor,
        incident_id: Uuid,
        evidence_id: Uuid,
        reason: &str,
    ) -> Result<Incident> {
        let reason = non_empty(reason, "override reason")?;
        let (incident, _) = self
            .update(incident_id, |incident| {
                access::require(actor, Capability::OverrideRedaction, &Resource::incident(incident))?;
                let item = incident
                    .evidence_item_mut(evidence_id)
                    .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
                match item.redaction {
                    RedactionState::RedactionPending { .. } | RedactionState::NotStarted => {}
                    ref other => {
                        return Err(Error::Validation(format!(
                            "evidence {} is {}, nothing to override",
                            evidence_id,
                            other.label()
                        )))
                    }
                }
                item.redaction = RedactionState::Overridden {
                    by: actor.id,
                    reason: reason.clone(),
                    at: Utc::now(),
                };
                incident.audit_log.append(
                    actor.audit_ref(),
                    AuditAction::RedactionOverridden {
                        evidence_id,
                        reason: reason.clone(),
                    },
                    Utc::now(),
                );
                Ok(())
            })
            .await?;
        warn!("Redaction of evidence {} overridden by {}", evidence_id, actor.name);
        Ok(incident)
    }

    pub async fn triage(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                triage_in_place(incident, actor.audit_ref())
            })
            .await?;
        Ok(incident)
    }

    /// Triage performed by the pipeline once analysis has settled
    pub async fn auto_triage(&self, id: Uuid) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| triage_in_place(incident, ActorRef::system()))
            .await?;
        Ok(incident)
    }

    pub async fn assign(&self, actor: &Actor, id: Uuid, investigator: Uuid) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                ensure_open(incident)?;
                if incident.status == IncidentStatus::Rejected {
                    return Err(Error::Validation(format!(
                        "incident {} is rejected",
                        incident.reference
                    )));
                }
                incident.assigned_investigator = Some(investigator);
                incident.audit_log.append(
                    actor.audit_ref(),
                    AuditAction::InvestigatorAssigned { investigator },
                    Utc::now(),
                );
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    pub async fn start_investigation(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        self.transition(actor, id, IncidentAction::StartInvestigation, None)
            .await
    }

    pub async fn add_note(&self, actor: &Actor, id: Uuid, kind: NoteKind, note: &str) -> Result<Incident> {
        let note = non_empty(note, "note")?;
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                ensure_open(incident)?;
                incident.audit_log.append(
                    actor.audit_ref(),
                    AuditAction::NoteAdded { kind, note },
                    Utc::now(),
                );
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    /// Resolve; `false_positive` records a false alarm
    pub async fn resolve(&self, actor: &Actor, id: Uuid, false_positive: bool) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                apply_transition(incident, actor.audit_ref(), IncidentAction::Resolve, None)?;
                if false_positive {
                    incident.false_positive = true;
                    incident.audit_log.append(
                        actor.audit_ref(),
                        AuditAction::MarkedFalsePositive,
                        Utc::now(),
                    );
                }
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    pub async fn reject(&self, actor: &Actor, id: Uuid, reason: &str) -> Result<Incident> {
        self.transition(actor, id, IncidentAction::Reject, Some(reason)).await
    }

    pub async fn reopen(&self, actor: &Actor, id: Uuid, reason: &str) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                let reason = reason_for(incident, IncidentAction::Reopen, Some(reason))?;
                apply_transition(incident, actor.audit_ref(), IncidentAction::Reopen, reason)?;
                incident.false_positive = false;
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    async fn transition(
        &self,
        actor: &Actor,
        id: Uuid,
        action: IncidentAction,
        reason: Option<&str>,
    ) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                let reason = reason_for(incident, action, reason)?;
                apply_transition(incident, actor.audit_ref(), action, reason)
            })
            .await?;
        Ok(incident)
    }

    pub async fn adjust_severity(&self, actor: &Actor, id: Uuid, value: u8, reason: &str) -> Result<Incident> {
        let severity = Severity::try_from(value).map_err(Error::Validation)?;
        let reason = non_empty(reason, "reason")?;
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                ensure_classifiable(incident)?;
                if incident.severity != severity {
                    incident.audit_log.append(
                        actor.audit_ref(),
                        AuditAction::SeverityChanged {
                            from: incident.severity,
                            to: severity,
                            reason,
                        },
                        Utc::now(),
                    );
                    incident.severity = severity;
                }
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    pub async fn adjust_category(&self, actor: &Actor, id: Uuid, category: Category) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                ensure_classifiable(incident)?;
                if incident.category != Some(category) {
                    incident.audit_log.append(
                        actor.audit_ref(),
                        AuditAction::CategoryChanged {
                            from: incident.category,
                            to: category,
                        },
                        Utc::now(),
                    );
                    incident.category = Some(category);
                }
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    /// Hand the incident to the police
    pub async fn escalate(&self, actor: &Actor, id: Uuid, police_reference: &str) -> Result<Incident> {
        let police_reference = non_empty(police_reference, "police reference")?;
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ManageIncident, &Resource::incident(incident))?;
                ensure_classifiable(incident)?;
                incident.escalation = Some(Escalation {
                    police_reference: police_reference.clone(),
                    escalated_at: Utc::now(),
                });
                incident.audit_log.append(
                    actor.audit_ref(),
                    AuditAction::Escalated { police_reference },
                    Utc::now(),
                );
                Ok(())
            })
            .await?;
        Ok(incident)
    }

    /// Retrieve the original, unredacted blob locator; always audited
    pub async fn unlock_evidence(&self, actor: &Actor, id: Uuid, evidence_id: Uuid) -> Result<EvidenceLocator> {
        let (_, locator) = self
            .update(id, |incident| {
                let item = incident
                    .evidence_item(evidence_id)
                    .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
                access::require(actor, Capability::UnlockEvidence, &Resource::evidence(incident, item))?;
                let locator = item.locator.clone();
                incident.audit_log.append(
                    actor.audit_ref(),
                    AuditAction::EvidenceUnlocked { evidence_id },
                    Utc::now(),
                );
                Ok(locator)
            })
            .await?;
        info!("Evidence {} unlocked by {}", evidence_id, actor.name);
        Ok(locator)
    }

    /// Locator the actor may view: the redacted copy, or the original after an admin override
    pub async fn evidence_locator(&self, actor: &Actor, id: Uuid, evidence_id: Uuid) -> Result<EvidenceLocator> {
        let incident = self.fetch(id).await?;
        let item = incident
            .evidence_item(evidence_id)
            .ok_or_else(|| Error::NotFound(format!("evidence {}", evidence_id)))?;
        access::require(actor, Capability::ViewEvidence, &Resource::evidence(&incident, item))?;
        item.public_locator().cloned().ok_or_else(|| {
            Error::Authorization(format!(
                "evidence {} is {}; the original requires an explicit unlock",
                evidence_id,
                item.redaction.label()
            ))
        })
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        let incident = self.fetch(id).await?;
        access::require(actor, Capability::ViewIncident, &Resource::incident(&incident))?;
        Ok(incident)
    }

    /// Incidents the actor may view
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Incident>> {
        Ok(self
            .store
            .list(&actor.scope.institution)
            .await?
            .into_iter()
            .filter(|i| {
                access::authorize(actor, Capability::ViewIncident, &Resource::incident(i)).is_allowed()
            })
            .collect())
    }

    /// Live incidents with evidence still waiting for analysis, across institutions
    pub async fn unsettled(&self) -> Result<Vec<Incident>> {
        Ok(self
            .store
            .all()
            .await?
            .into_iter()
            .filter(|i| !i.archived && i.status != IncidentStatus::Rejected && i.analysis_pending())
            .collect())
    }

    /// Retire a closed incident; its history stays intact
    pub async fn archive(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        let (incident, _) = self
            .update(id, |incident| {
                access::require(actor, Capability::ArchiveIncident, &Resource::incident(incident))?;
                ensure_open(incident)?;
                if !incident.status.is_terminal() {
                    return Err(Error::Validation(format!(
                        "incident {} is {}; only closed incidents can be archived",
                        incident.reference, incident.status
                    )));
                }
                incident.archived = true;
                incident
                    .audit_log
                    .append(actor.audit_ref(), AuditAction::Archived, Utc::now());
                Ok(())
            })
            .await?;
        info!("Incident {} archived", incident.reference);
        Ok(incident)
    }
}

/// Reject and reopen must say why
fn reason_for(incident: &Incident, action: IncidentAction, reason: Option<&str>) -> Result<Option<String>> {
    match action {
        IncidentAction::Reject | IncidentAction::Reopen => match reason.map(str::trim) {
            Some(reason) if !reason.is_empty() => Ok(Some(reason.to_string())),
            _ => Err(Error::TransitionRejected {
                from: incident.status,
                action,
                reason: Rejection::MissingReason,
            }),
        },
        _ => Ok(reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty())),
    }
}

/// Manual classification only applies to triaged, live incidents
fn ensure_classifiable(incident: &Incident) -> Result<()> {
    ensure_open(incident)?;
    match incident.status {
        IncidentStatus::Submitted => Err(Error::Validation(format!(
            "incident {} has not been triaged yet",
            incident.reference
        ))),
        IncidentStatus::Rejected => Err(Error::Validation(format!(
            "incident {} is rejected",
            incident.reference
        ))),
        _ => Ok(()),
    }
}
