//! Capability checks.
//!
//! Every core operation asks [`authorize`] before touching a resource; no
//! other module inspects roles directly.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Actor, EvidenceItem, Incident, Permission, RedactionState, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SubmitReport,
    ViewIncident,
    ManageIncident,
    /// See evidence as non-privileged viewers see it (redacted)
    ViewEvidence,
    /// Retrieve the original, unredacted blob
    UnlockEvidence,
    OverrideRedaction,
    ViewIntelligence,
    ViewOperationalIssues,
    ExportIncident,
    ArchiveIncident,
}

/// Evidence privacy gate as seen by the capability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceGate {
    Cleared,
    Restricted,
}

impl EvidenceGate {
    pub fn of(item: &EvidenceItem) -> Self {
        match item.redaction {
            RedactionState::Redacted(_) | RedactionState::Overridden { .. } => Self::Cleared,
            RedactionState::NotStarted | RedactionState::RedactionPending { .. } => Self::Restricted,
        }
    }
}

/// The thing an actor wants to act on
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    pub institution: &'a str,
    pub location_key: Option<&'a str>,
    pub reporter: Option<Uuid>,
    pub evidence: Option<EvidenceGate>,
}

impl<'a> Resource<'a> {
    pub fn institution(institution: &'a str) -> Self {
        Self {
            institution,
            location_key: None,
            reporter: None,
            evidence: None,
        }
    }

    pub fn incident(incident: &'a Incident) -> Self {
        Self {
            institution: &incident.institution,
            location_key: Some(&incident.location.key),
            reporter: incident.reporter.user_id(),
            evidence: None,
        }
    }

    pub fn evidence(incident: &'a Incident, item: &EvidenceItem) -> Self {
        Self {
            evidence: Some(EvidenceGate::of(item)),
            ..Self::incident(incident)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

fn in_scope(actor: &Actor, resource: &Resource<'_>) -> bool {
    match resource.location_key {
        Some(key) => actor.scope.covers(resource.institution, key),
        None => actor.scope.institution == resource.institution,
    }
}

fn own_report(actor: &Actor, resource: &Resource<'_>) -> bool {
    resource.reporter == Some(actor.id)
}

/// Decide whether `actor` may exercise `capability` on `resource`
pub fn authorize(actor: &Actor, capability: Capability, resource: &Resource<'_>) -> Decision {
    if actor.scope.institution != resource.institution {
        return Decision::Deny(format!(
            "{} is not scoped to institution {}",
            actor.name, resource.institution
        ));
    }

    let staff_in_scope = actor.role.is_staff() && in_scope(actor, resource);
    let allowed = match capability {
        Capability::SubmitReport => true,
        Capability::ViewIncident => staff_in_scope || own_report(actor, resource),
        Capability::ManageIncident | Capability::ExportIncident => staff_in_scope,
        Capability::ViewEvidence => {
            staff_in_scope
                || (own_report(actor, resource) && resource.evidence == Some(EvidenceGate::Cleared))
        }
        Capability::UnlockEvidence => {
            staff_in_scope
                && (actor.role == Role::Admin || actor.has_permission(Permission::UnlockEvidence))
        }
        Capability::OverrideRedaction | Capability::ArchiveIncident => actor.role == Role::Admin,
        Capability::ViewIntelligence => actor.role.is_staff(),
        Capability::ViewOperationalIssues => actor.role == Role::Admin,
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(format!(
            "{} ({}) may not {:?} here",
            actor.name, actor.role, capability
        ))
    }
}

/// [`authorize`] as a `Result`, for use with `?`
pub fn require(actor: &Actor, capability: Capability, resource: &Resource<'_>) -> Result<()> {
    match authorize(actor, capability, resource) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(Error::Authorization(reason)),
    }
}
