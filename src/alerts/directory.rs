use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{DirectoryConfig, StaffEntry};
use crate::error::Result;
use crate::models::incident::location_key;
use crate::models::{Channel, Role, SeverityBand};

/// Staff member as the recipient directory knows them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffMember {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub institution: String,
    /// Spatial keys; empty means institution-wide
    pub locations: Vec<String>,
    pub channels: Vec<Channel>,
    pub min_band: Option<SeverityBand>,
}

impl StaffMember {
    pub fn is_institution_wide(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn responsible_for(&self, key: &str) -> bool {
        self.locations.iter().any(|l| location_key(l) == key)
    }

    /// Whether this person wants alerts of the given band
    pub fn wants(&self, band: SeverityBand) -> bool {
        self.min_band.map_or(true, |min| band >= min)
    }
}

impl From<&StaffEntry> for StaffMember {
    fn from(entry: &StaffEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            role: entry.role,
            institution: entry.institution.clone(),
            locations: entry.locations.iter().map(|l| location_key(l)).collect(),
            channels: entry.channels.clone(),
            min_band: entry.min_band,
        }
    }
}

/// Source of alert recipients, owned by the identity collaborator
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn staff(&self, institution: &str) -> Result<Vec<StaffMember>>;
}

/// Directory backed by the `[directory]` config section
pub struct StaticDirectory {
    members: Vec<StaffMember>,
}

impl StaticDirectory {
    pub fn new(members: Vec<StaffMember>) -> Self {
        Self { members }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self::new(config.staff.iter().map(StaffMember::from).collect())
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn staff(&self, institution: &str) -> Result<Vec<StaffMember>> {
        Ok(self
            .members
            .iter()
            .filter(|m| m.institution == institution)
            .cloned()
            .collect())
    }
}
