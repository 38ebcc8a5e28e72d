//! Wiring of the core services.
//!
//! Submission returns as soon as the record exists; analysis, redaction,
//! hotspot recompute and alert delivery follow as background work. Failures
//! in that work never roll back the incident record.

pub mod jobs;
#[cfg(test)]
mod tests;

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::alerts::{AlertDispatcher, AlertRouter};
use crate::analyzer::{AnalysisProfile, MediaAnalyzer};
use crate::config::{AnalyzerConfig, PipelineConfig, StorageConfig};
use crate::error::Result;
use crate::hotspots::HotspotEngine;
use crate::incidents::{IncidentManager, LiveDetection, Submission, SubmissionReceipt};
use crate::intelligence::IntelligenceService;
use crate::messaging::DomainEvents;
use crate::models::{
    Actor, AuditAction, Category, EvidenceLocator, Incident, IncidentStatus, NoteKind,
};
use crate::redactor::PrivacyRedactor;
use crate::storage::EvidenceStore;

use jobs::JobRegistry;

/// Services the pipeline drives
pub struct PipelineParts {
    pub incidents: Arc<IncidentManager>,
    pub store: Arc<dyn EvidenceStore>,
    pub analyzer: Arc<MediaAnalyzer>,
    pub redactor: Arc<PrivacyRedactor>,
    pub hotspots: Arc<HotspotEngine>,
    pub router: Arc<AlertRouter>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub events: DomainEvents,
}

pub struct Pipeline {
    settings: PipelineConfig,
    storage: StorageConfig,
    profile: AnalysisProfile,
    incidents: Arc<IncidentManager>,
    store: Arc<dyn EvidenceStore>,
    analyzer: Arc<MediaAnalyzer>,
    redactor: Arc<PrivacyRedactor>,
    hotspots: Arc<HotspotEngine>,
    router: Arc<AlertRouter>,
    dispatcher: Arc<AlertDispatcher>,
    events: DomainEvents,
    jobs: JobRegistry,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// `from` of the latest status change in the audit log
fn last_transition_from(incident: &Incident) -> Option<IncidentStatus> {
    incident.audit_log.entries().iter().rev().find_map(|e| match e.action {
        AuditAction::StatusChanged { from, .. } => Some(from),
        _ => None,
    })
}

impl Pipeline {
    pub fn new(
        settings: PipelineConfig,
        storage: StorageConfig,
        analyzer_config: &AnalyzerConfig,
        parts: PipelineParts,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            permits: Arc::new(Semaphore::new(settings.analysis_workers.max(1))),
            settings,
            storage,
            profile: AnalysisProfile::from(analyzer_config),
            incidents: parts.incidents,
            store: parts.store,
            analyzer: parts.analyzer,
            redactor: parts.redactor,
            hotspots: parts.hotspots,
            router: parts.router,
            dispatcher: parts.dispatcher,
            events: parts.events,
            jobs: JobRegistry::new(shutdown.clone()),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn incidents(&self) -> &Arc<IncidentManager> {
        &self.incidents
    }

    pub fn hotspots(&self) -> &Arc<HotspotEngine> {
        &self.hotspots
    }

    pub fn events(&self) -> &DomainEvents {
        &self.events
    }

    /// Read-only facade over the same state
    pub fn intelligence(&self) -> IntelligenceService {
        IntelligenceService::new(
            self.incidents.clone(),
            self.hotspots.clone(),
            self.dispatcher.ledger().clone(),
        )
    }

    /// Accept a crowdsourced report. Analysis runs in the background.
    pub async fn submit(self: &Arc<Self>, actor: &Actor, submission: Submission) -> Result<SubmissionReceipt> {
        let incident = self.incidents.submit(actor, submission).await?;
        Ok(self.accepted(incident).await)
    }

    /// Accept a detection from a live-monitoring feed; these always alert
    pub async fn ingest_live_detection(self: &Arc<Self>, detection: LiveDetection) -> Result<SubmissionReceipt> {
        let incident = self.incidents.submit_live(detection).await?;
        Ok(self.accepted(incident).await)
    }

    async fn accepted(self: &Arc<Self>, incident: Incident) -> SubmissionReceipt {
        let receipt = SubmissionReceipt::of(&incident);
        self.events.incident_submitted(&incident).await;
        self.after_write(&incident).await;
        self.schedule_analysis(&incident);
        receipt
    }

    /// Re-evaluate hotspots and alerting after any write
    async fn after_write(&self, incident: &Incident) {
        self.hotspots.notify_incident(incident);
        match self.router.evaluate(incident).await {
            Ok(Some(alert)) => {
                let dispatcher = self.dispatcher.clone();
                self.tracker.spawn(async move {
                    dispatcher.dispatch(alert).await;
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Alert routing for incident {} failed: {}", incident.reference, e),
        }
    }

    /// Publish the status change of a transition and run the write hooks
    async fn transitioned(&self, incident: Incident) -> Incident {
        if let Some(from) = last_transition_from(&incident) {
            self.events.status_changed(&incident, from).await;
        }
        self.after_write(&incident).await;
        incident
    }

    async fn maybe_auto_triage(&self, incident: Incident) -> Incident {
        if !self.settings.auto_triage
            || incident.status != IncidentStatus::Submitted
            || incident.analysis_pending()
        {
            return incident;
        }
        match self.incidents.auto_triage(incident.id).await {
            Ok(triaged) => {
                self.events.status_changed(&triaged, IncidentStatus::Submitted).await;
                triaged
            }
            Err(e) => {
                debug!("Incident {} left for manual triage: {}", incident.reference, e);
                incident
            }
        }
    }

    pub async fn triage(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        let incident = self.incidents.triage(actor, id).await?;
        Ok(self.transitioned(incident).await)
    }

    pub async fn assign(&self, actor: &Actor, id: Uuid, investigator: Uuid) -> Result<Incident> {
        let incident = self.incidents.assign(actor, id, investigator).await?;
        Ok(incident)
    }

    pub async fn start_investigation(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        let incident = self.incidents.start_investigation(actor, id).await?;
        Ok(self.transitioned(incident).await)
    }

    pub async fn add_note(&self, actor: &Actor, id: Uuid, kind: NoteKind, note: &str) -> Result<Incident> {
        self.incidents.add_note(actor, id, kind, note).await
    }

    pub async fn resolve(&self, actor: &Actor, id: Uuid, false_positive: bool) -> Result<Incident> {
        let incident = self.incidents.resolve(actor, id, false_positive).await?;
        Ok(self.transitioned(incident).await)
    }

    /// Reject a report; analysis still in flight is cancelled and discarded
    pub async fn reject(&self, actor: &Actor, id: Uuid, reason: &str) -> Result<Incident> {
        let incident = self.incidents.reject(actor, id, reason).await?;
        if self.jobs.cancel(id) {
            info!("Cancelled analysis of rejected incident {}", incident.reference);
        }
        Ok(self.transitioned(incident).await)
    }

    pub async fn reopen(&self, actor: &Actor, id: Uuid, reason: &str) -> Result<Incident> {
        let incident = self.incidents.reopen(actor, id, reason).await?;
        Ok(self.transitioned(incident).await)
    }

    pub async fn adjust_severity(&self, actor: &Actor, id: Uuid, value: u8, reason: &str) -> Result<Incident> {
        let incident = self.incidents.adjust_severity(actor, id, value, reason).await?;
        self.after_write(&incident).await;
        Ok(incident)
    }

    pub async fn adjust_category(&self, actor: &Actor, id: Uuid, category: Category) -> Result<Incident> {
        let incident = self.incidents.adjust_category(actor, id, category).await?;
        self.after_write(&incident).await;
        Ok(incident)
    }

    pub async fn escalate(&self, actor: &Actor, id: Uuid, police_reference: &str) -> Result<Incident> {
        self.incidents.escalate(actor, id, police_reference).await
    }

    /// Mark an evidence item as not needing analysis, then triage if that was the last one
    pub async fn skip_analysis(&self, actor: &Actor, id: Uuid, evidence_id: Uuid, reason: &str) -> Result<Incident> {
        let incident = self.incidents.skip_analysis(actor, id, evidence_id, reason).await?;
        let incident = self.maybe_auto_triage(incident).await;
        self.after_write(&incident).await;
        Ok(incident)
    }

    pub async fn override_redaction(&self, actor: &Actor, id: Uuid, evidence_id: Uuid, reason: &str) -> Result<Incident> {
        self.incidents.override_redaction(actor, id, evidence_id, reason).await
    }

    pub async fn unlock_evidence(&self, actor: &Actor, id: Uuid, evidence_id: Uuid) -> Result<EvidenceLocator> {
        self.incidents.unlock_evidence(actor, id, evidence_id).await
    }

    pub async fn evidence_locator(&self, actor: &Actor, id: Uuid, evidence_id: Uuid) -> Result<EvidenceLocator> {
        self.incidents.evidence_locator(actor, id, evidence_id).await
    }

    /// Retention: archive a closed incident and drop it from derived state
    pub async fn archive_incident(&self, actor: &Actor, id: Uuid) -> Result<Incident> {
        let incident = self.incidents.archive(actor, id).await?;
        self.jobs.cancel(id);
        self.hotspots.notify_incident(&incident);
        self.router.forget(id).await;
        self.events.incident_archived(&incident).await;
        Ok(incident)
    }

    /// Start analysis jobs for every deferred or orphaned evidence item
    pub async fn sweep_deferred(self: &Arc<Self>) -> Result<usize> {
        let mut scheduled = 0;
        for incident in self.incidents.unsettled().await? {
            scheduled += self.schedule_analysis(&incident);
        }
        if scheduled > 0 {
            info!("Sweeper re-enqueued {} analysis job(s)", scheduled);
        }
        Ok(scheduled)
    }

    /// Spawn hotspot workers and the deferred-analysis sweeper
    pub fn start_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = self.hotspots.clone().start(self.shutdown.child_token());

        let pipeline = self.clone();
        let cancel = self.shutdown.child_token();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(pipeline.settings.sweep_interval_secs.max(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = pipeline.sweep_deferred().await {
                            warn!("Deferred analysis sweep failed: {}", e);
                        }
                    }
                }
            }
            info!("Analysis sweeper stopped");
        }));
        handles
    }

    /// Wait for every background job started so far, then settle hotspots
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        self.hotspots.run_pending().await;
    }

    /// Cancel background work and wait for in-flight jobs to stop
    pub async fn shutdown(&self) {
        info!("Shutting down pipeline");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
