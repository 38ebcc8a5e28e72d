//! Incident lifecycle state machine.
//!
//! ```text
//! submitted -> triaged -> investigating -> resolved
//!     |           |             ^              |
//!     +-----------+--> rejected +---reopen-----+
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{AuditAction, AuditLog, Incident, IncidentAction, IncidentStatus, NoteKind};

/// Why a guard vetoed a transition
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("not a legal transition")]
    IllegalTransition,

    #[error("analysis has not settled for evidence {evidence:?}")]
    AnalysisPending { evidence: Vec<Uuid> },

    #[error("an incident without evidence needs a reporter-supplied category and severity")]
    MissingReporterClassification,

    #[error("no investigator assigned")]
    MissingInvestigator,

    #[error("no resolution note recorded since the investigation started")]
    MissingResolutionNote,

    #[error("a reason is required")]
    MissingReason,

    #[error("incident is archived")]
    Archived,
}

/// Target state of `action` from `from`, if the table allows it
pub fn target(from: IncidentStatus, action: IncidentAction) -> Option<IncidentStatus> {
    use IncidentAction::*;
    use IncidentStatus::*;

    match (from, action) {
        (Submitted, Triage) => Some(Triaged),
        (Triaged, StartInvestigation) => Some(Investigating),
        (Investigating, Resolve) => Some(Resolved),
        (Submitted | Triaged, Reject) => Some(Rejected),
        (Resolved, Reopen) => Some(Investigating),
        _ => None,
    }
}

/// Check the transition table and guards; returns the target state
pub fn check(incident: &Incident, action: IncidentAction) -> std::result::Result<IncidentStatus, Rejection> {
    if incident.archived {
        return Err(Rejection::Archived);
    }
    let to = target(incident.status, action).ok_or(Rejection::IllegalTransition)?;

    match action {
        IncidentAction::Triage => {
            if incident.evidence.is_empty() {
                if incident.declared_category.is_none() || incident.declared_severity.is_none() {
                    return Err(Rejection::MissingReporterClassification);
                }
            } else {
                let unsettled = incident.unanalyzed_evidence();
                if !unsettled.is_empty() {
                    return Err(Rejection::AnalysisPending { evidence: unsettled });
                }
            }
        }
        IncidentAction::StartInvestigation => {
            if incident.assigned_investigator.is_none() {
                return Err(Rejection::MissingInvestigator);
            }
        }
        IncidentAction::Resolve => {
            if !has_resolution_note(&incident.audit_log) {
                return Err(Rejection::MissingResolutionNote);
            }
        }
        IncidentAction::Reject | IncidentAction::Reopen => {}
    }

    Ok(to)
}

/// [`check`] as the crate error type
pub fn require(incident: &Incident, action: IncidentAction) -> Result<IncidentStatus> {
    check(incident, action).map_err(|reason| Error::TransitionRejected {
        from: incident.status,
        action,
        reason,
    })
}

/// A non-empty resolution note appended after the latest entry into `investigating`
fn has_resolution_note(log: &AuditLog) -> bool {
    log.entries()
        .iter()
        .rev()
        .take_while(|entry| {
            !matches!(
                entry.action,
                AuditAction::StatusChanged {
                    to: IncidentStatus::Investigating,
                    ..
                }
            )
        })
        .any(|entry| match &entry.action {
            AuditAction::NoteAdded {
                kind: NoteKind::Resolution,
                note,
            } => !note.trim().is_empty(),
            _ => false,
        })
}

/// Rebuild the current status from the audit log alone
pub fn replay(log: &AuditLog) -> Result<IncidentStatus> {
    let mut status = IncidentStatus::Submitted;
    for entry in log.entries() {
        if let AuditAction::StatusChanged { action, from, to, .. } = &entry.action {
            if *from != status || target(*from, *action) != Some(*to) {
                return Err(Error::Internal(format!(
                    "audit entry {} records {} -> {} via {} while replayed state is {}",
                    entry.seq, from, to, action, status
                )));
            }
            status = *to;
        }
    }
    Ok(status)
}
