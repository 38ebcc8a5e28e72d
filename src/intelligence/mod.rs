//! Intelligence Query Service: read-only views for the dashboard.
//!
//! Every query is filtered through the capability check; nothing here
//! mutates an incident.

pub mod export;
pub mod stats;
pub mod views;
#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::access::{self, Capability, Resource};
use crate::alerts::AlertLedger;
use crate::error::Result;
use crate::hotspots::HotspotEngine;
use crate::incidents::IncidentManager;
use crate::models::{Actor, AlertRecord, HotspotCluster, OperationalIssue};

pub use export::IncidentExport;
pub use stats::IncidentStatistics;
pub use views::{EvidenceView, IncidentFilter, IncidentSummary, IncidentView};

pub struct IntelligenceService {
    incidents: Arc<IncidentManager>,
    hotspots: Arc<HotspotEngine>,
    alerts: Arc<AlertLedger>,
}

impl IntelligenceService {
    pub fn new(incidents: Arc<IncidentManager>, hotspots: Arc<HotspotEngine>, alerts: Arc<AlertLedger>) -> Self {
        Self {
            incidents,
            hotspots,
            alerts,
        }
    }

    /// Incidents visible to the actor, newest report first
    pub async fn list_incidents(&self, actor: &Actor, filter: &IncidentFilter) -> Result<Vec<IncidentSummary>> {
        let mut incidents: Vec<IncidentSummary> = self
            .incidents
            .list(actor)
            .await?
            .iter()
            .filter(|i| filter.matches(i))
            .map(IncidentSummary::from)
            .collect();
        incidents.sort_by(|a, b| b.reported_at.cmp(&a.reported_at).then(a.id.cmp(&b.id)));
        Ok(incidents)
    }

    pub async fn incident(&self, actor: &Actor, id: Uuid) -> Result<IncidentView> {
        let incident = self.incidents.get(actor, id).await?;
        Ok(IncidentView::of(actor, &incident))
    }

    /// Ranked hotspots within the actor's scope
    pub async fn hotspots(&self, actor: &Actor, window_days: Option<u32>, limit: usize) -> Result<Vec<HotspotCluster>> {
        access::require(
            actor,
            Capability::ViewIntelligence,
            &Resource::institution(&actor.scope.institution),
        )?;
        let mut top: Vec<HotspotCluster> = self
            .hotspots
            .top(&actor.scope.institution, window_days, usize::MAX)
            .await
            .into_iter()
            .filter(|c| actor.scope.covers(&c.bucket.institution, &c.bucket.spatial))
            .collect();
        top.truncate(limit);
        Ok(top)
    }

    /// Alerts for locations in the actor's scope, newest first
    pub async fn alerts(&self, actor: &Actor) -> Result<Vec<AlertRecord>> {
        access::require(
            actor,
            Capability::ViewIntelligence,
            &Resource::institution(&actor.scope.institution),
        )?;
        Ok(self
            .alerts
            .alerts(&actor.scope.institution)
            .await
            .into_iter()
            .filter(|r| actor.scope.covers(&r.event.institution, &r.event.location_key))
            .collect())
    }

    /// Exhausted deliveries and other problems admins must act on
    pub async fn operational_issues(&self, actor: &Actor) -> Result<Vec<OperationalIssue>> {
        access::require(
            actor,
            Capability::ViewOperationalIssues,
            &Resource::institution(&actor.scope.institution),
        )?;
        Ok(self.alerts.issues(&actor.scope.institution).await)
    }

    /// Statistics over the incidents the actor can see, optionally since a point in time
    pub async fn statistics(&self, actor: &Actor, since: Option<DateTime<Utc>>) -> Result<IncidentStatistics> {
        access::require(
            actor,
            Capability::ViewIntelligence,
            &Resource::institution(&actor.scope.institution),
        )?;
        let incidents: Vec<_> = self
            .incidents
            .list(actor)
            .await?
            .into_iter()
            .filter(|i| since.map_or(true, |s| i.reported_at >= s))
            .collect();
        Ok(stats::compute(&incidents, Utc::now()))
    }

    /// Deterministic export of one incident including its full audit log
    pub async fn export(&self, actor: &Actor, id: Uuid) -> Result<String> {
        let incident = self.incidents.fetch(id).await?;
        access::require(actor, Capability::ExportIncident, &Resource::incident(&incident))?;
        Ok(serde_json::to_string_pretty(&IncidentExport::from(&incident))?)
    }
}
