//! Background analysis jobs.

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Pipeline;
use crate::error::{Error, Result};
use crate::models::{AnalysisResult, EvidenceItem, Incident, IncidentStatus, RedactionState};
use crate::storage;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cancellation tokens per incident and the evidence items being worked on
pub struct JobRegistry {
    root: CancellationToken,
    incidents: Mutex<HashMap<Uuid, CancellationToken>>,
    running: Mutex<HashSet<Uuid>>,
}

impl JobRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            incidents: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
        }
    }

    fn token(&self, incident_id: Uuid) -> CancellationToken {
        guard(&self.incidents)
            .entry(incident_id)
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// Claim an evidence item; false when a job for it is already running
    fn claim(&self, evidence_id: Uuid) -> bool {
        guard(&self.running).insert(evidence_id)
    }

    fn release(&self, incident_id: Uuid, evidence_id: Uuid, evidence: &[Uuid]) {
        let mut running = guard(&self.running);
        running.remove(&evidence_id);
        // Forget the incident token once none of its items is in flight
        if !evidence.iter().any(|id| running.contains(id)) {
            drop(running);
            let mut incidents = guard(&self.incidents);
            if incidents.get(&incident_id).map_or(false, |t| !t.is_cancelled()) {
                incidents.remove(&incident_id);
            }
        }
    }

    /// Cancel every job of an incident. Returns true if any token existed.
    pub fn cancel(&self, incident_id: Uuid) -> bool {
        match guard(&self.incidents).remove(&incident_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> usize {
        guard(&self.running).len()
    }
}

impl Pipeline {
    /// Spawn one job per unsettled evidence item. Returns the number spawned.
    pub(super) fn schedule_analysis(self: &Arc<Self>, incident: &Incident) -> usize {
        if incident.archived || incident.status == IncidentStatus::Rejected {
            return 0;
        }
        let evidence: Vec<Uuid> = incident.unanalyzed_evidence();
        let token = self.jobs.token(incident.id);
        let mut spawned = 0;

        for evidence_id in evidence.iter().copied() {
            if !self.jobs.claim(evidence_id) {
                continue;
            }
            let pipeline = self.clone();
            let token = token.clone();
            let incident_id = incident.id;
            let siblings = evidence.clone();
            self.tracker.spawn(async move {
                let outcome = tokio::select! {
                    _ = token.cancelled() => {
                        info!("Analysis of evidence {} cancelled; partial results discarded", evidence_id);
                        Ok(())
                    }
                    outcome = pipeline.analyze_evidence(incident_id, evidence_id) => outcome,
                };
                if let Err(e) = outcome {
                    warn!("Analysis job for evidence {} failed: {}", evidence_id, e);
                }
                pipeline.jobs.release(incident_id, evidence_id, &siblings);
            });
            spawned += 1;
        }
        spawned
    }

    /// Fetch, analyze and redact one evidence item, then run the write hooks
    async fn analyze_evidence(&self, incident_id: Uuid, evidence_id: Uuid) -> Result<()> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("analysis worker pool closed".to_string()))?;

        let incident = self.incidents.fetch(incident_id).await?;
        if incident.archived || incident.status == IncidentStatus::Rejected {
            return Ok(());
        }
        let item = match incident.evidence_item(evidence_id) {
            Some(item) if !item.analysis_state.is_settled() => item.clone(),
            _ => return Ok(()),
        };

        let blob = match storage::fetch_with_retry(
            self.store.as_ref(),
            &item.locator,
            self.storage.read_attempts,
            Duration::from_millis(self.storage.read_retry_delay_ms),
        )
        .await
        {
            Ok(blob) => blob,
            Err(e) if e.is_transient() => {
                self.incidents
                    .defer_analysis(incident_id, evidence_id, &e.to_string())
                    .await?;
                info!("Analysis of evidence {} deferred: {}", evidence_id, e);
                return Ok(());
            }
            Err(e) => {
                let failure = Error::AnalysisFailure(format!("evidence unreadable: {}", e));
                return self.fail_analysis(incident_id, &item, failure).await;
            }
        };

        let result = match self
            .analyzer
            .analyze(evidence_id, &blob, item.media_kind, &self.profile)
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_transient() => {
                self.incidents
                    .defer_analysis(incident_id, evidence_id, &e.to_string())
                    .await?;
                info!("Analysis of evidence {} deferred: {}", evidence_id, e);
                return Ok(());
            }
            Err(e) => return self.fail_analysis(incident_id, &item, e).await,
        };
        self.complete(incident_id, &item, &blob, result).await
    }

    /// Settle the item as unanalyzed so the incident proceeds to manual review
    async fn fail_analysis(&self, incident_id: Uuid, item: &EvidenceItem, failure: Error) -> Result<()> {
        warn!("Analysis of evidence {} failed: {}", item.id, failure);
        let reason = match failure {
            Error::AnalysisFailure(reason) => reason,
            other => other.to_string(),
        };
        let result = AnalysisResult::failed(item.id, self.profile.model_version.clone(), String::new(), reason);
        self.complete(incident_id, item, &[], result).await
    }

    async fn complete(
        &self,
        incident_id: Uuid,
        item: &EvidenceItem,
        blob: &[u8],
        result: AnalysisResult,
    ) -> Result<()> {
        let faces = result.faces.clone();
        let incident = match self.incidents.record_analysis(incident_id, result).await {
            Ok(incident) => incident,
            Err(Error::Validation(reason)) => {
                info!("Analysis of evidence {} discarded: {}", item.id, reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some(latest) = incident.evidence_item(item.id).and_then(|i| i.latest_analysis()) {
            self.events.evidence_analyzed(incident_id, latest).await;
        }

        let state = self.redactor.redact(item, blob, &faces).await;
        let pending = match &state {
            RedactionState::RedactionPending { reason } => Some(reason.clone()),
            _ => None,
        };
        let incident = self.incidents.record_redaction(incident_id, item.id, state).await?;
        if let Some(reason) = pending {
            self.events.redaction_pending(incident_id, item.id, &reason).await;
        }

        let incident = self.maybe_auto_triage(incident).await;
        debug!(
            "Evidence {} of incident {} processed; {} item(s) still unanalyzed",
            item.id,
            incident.reference,
            incident.unanalyzed_evidence().len()
        );
        self.after_write(&incident).await;
        Ok(())
    }
}
