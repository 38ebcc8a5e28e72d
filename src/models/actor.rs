use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use super::incident::location_key;

/// Actor role, ordered from least to most privileged
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Manager,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Managers and admins
    pub fn is_staff(&self) -> bool {
        *self >= Role::Manager
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::Manager => write!(f, "manager"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Institution and location scope of an actor.
///
/// An empty `locations` list means the actor is responsible for the whole
/// institution. Entries may be keys or display names; both compare by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub institution: String,
    #[serde(default)]
    pub locations: Vec<String>,
}

impl Scope {
    pub fn institution(institution: &str) -> Self {
        Self {
            institution: institution.to_string(),
            locations: Vec::new(),
        }
    }

    pub fn with_locations(institution: &str, locations: &[&str]) -> Self {
        Self {
            institution: institution.to_string(),
            locations: locations.iter().map(|l| location_key(l)).collect(),
        }
    }

    pub fn is_institution_wide(&self) -> bool {
        self.locations.is_empty()
    }

    /// Whether this scope covers the given institution and spatial key
    pub fn covers(&self, institution: &str, key: &str) -> bool {
        if self.institution != institution {
            return false;
        }
        self.is_institution_wide() || self.locations.iter().any(|l| location_key(l) == key)
    }
}

/// Explicit permissions granted on top of the role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    UnlockEvidence,
}

/// The caller of a core operation, as supplied by the identity collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub scope: Scope,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Actor {
    pub fn new(name: &str, role: Role, scope: Scope) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            scope,
            permissions: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
        self
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn audit_ref(&self) -> ActorRef {
        ActorRef {
            id: Some(self.id),
            role: Some(self.role),
            label: self.name.clone(),
        }
    }
}

/// Actor as recorded in audit entries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorRef {
    pub id: Option<Uuid>,
    pub role: Option<Role>,
    pub label: String,
}

impl ActorRef {
    pub fn system() -> Self {
        Self {
            id: None,
            role: None,
            label: "system".to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: None,
            role: None,
            label: "anonymous".to_string(),
        }
    }

    pub fn live_feed(feed_id: &str) -> Self {
        Self {
            id: None,
            role: None,
            label: format!("feed:{}", feed_id),
        }
    }
}

impl Display for ActorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}
