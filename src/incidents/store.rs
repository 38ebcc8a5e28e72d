use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Incident;

/// Persistence seam for incident records.
///
/// Implementations must refuse a save whose audit log is not an extension of
/// the stored one.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert(&self, incident: &Incident) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Incident>>;

    async fn save(&self, incident: &Incident) -> Result<()>;

    /// All incidents of an institution, oldest report first
    async fn list(&self, institution: &str) -> Result<Vec<Incident>>;

    /// Incidents of an institution at one spatial key
    async fn list_at(&self, institution: &str, location_key: &str) -> Result<Vec<Incident>>;

    /// Every incident regardless of institution
    async fn all(&self) -> Result<Vec<Incident>>;

    /// Next `INC-YYYYMMDD-NNNN` reference for the given reporting day
    async fn next_reference(&self, day: NaiveDate) -> Result<String>;
}

pub fn format_reference(day: NaiveDate, sequence: u32) -> String {
    format!("INC-{}-{:04}", day.format("%Y%m%d"), sequence)
}

#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<HashMap<Uuid, Incident>>,
    sequences: Mutex<HashMap<NaiveDate, u32>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn insert(&self, incident: &Incident) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        if incidents.contains_key(&incident.id) {
            return Err(Error::Validation(format!("incident {} already exists", incident.id)));
        }
        incidents.insert(incident.id, incident.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.incidents.read().await.get(&id).cloned())
    }

    async fn save(&self, incident: &Incident) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        let stored = incidents
            .get_mut(&incident.id)
            .ok_or_else(|| Error::NotFound(format!("incident {}", incident.id)))?;
        if !incident.audit_log.extends(&stored.audit_log) {
            return Err(Error::Internal(format!(
                "refusing to rewrite audit history of incident {}",
                incident.id
            )));
        }
        *stored = incident.clone();
        Ok(())
    }

    async fn list(&self, institution: &str) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .read()
            .await
            .values()
            .filter(|i| i.institution == institution)
            .cloned()
            .collect();
        incidents.sort_by(|a, b| a.reported_at.cmp(&b.reported_at).then(a.id.cmp(&b.id)));
        Ok(incidents)
    }

    async fn list_at(&self, institution: &str, location_key: &str) -> Result<Vec<Incident>> {
        Ok(self
            .list(institution)
            .await?
            .into_iter()
            .filter(|i| i.location.key == location_key)
            .collect())
    }

    async fn all(&self) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = self.incidents.read().await.values().cloned().collect();
        incidents.sort_by(|a, b| a.reported_at.cmp(&b.reported_at).then(a.id.cmp(&b.id)));
        Ok(incidents)
    }

    async fn next_reference(&self, day: NaiveDate) -> Result<String> {
        let mut sequences = self.sequences.lock().await;
        let sequence = sequences.entry(day).or_insert(0);
        *sequence += 1;
        Ok(format_reference(day, *sequence))
    }
}
