use super::*;
use crate::error::Error;
use crate::models::{
    Actor, AnalysisResult, AuditAction, Category, EvidenceLocator, FaceScan, IncidentStatus,
    MediaKind, ModelVersion, NoteKind, Permission, RedactionState, Role, Scope, Severity,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

fn manager() -> IncidentManager {
    IncidentManager::new(Arc::new(MemoryIncidentStore::new()))
}

fn student() -> Actor {
    Actor::new("Tolu", Role::Viewer, Scope::institution("unilag"))
}

fn security_manager() -> Actor {
    Actor::new("Bola", Role::Manager, Scope::with_locations("unilag", &["block-b"]))
}

fn admin() -> Actor {
    Actor::new("Dayo", Role::Admin, Scope::institution("unilag"))
}

fn report(category: Option<Category>, severity: Option<u8>) -> Submission {
    Submission {
        description: "Laptop taken from reading room".to_string(),
        location: "Block B, Room 12".to_string(),
        category,
        severity,
        ..Default::default()
    }
}

fn with_photo(mut submission: Submission) -> Submission {
    submission.evidence.push(EvidenceUpload {
        locator: EvidenceLocator("sha256-photo".to_string()),
        media_kind: MediaKind::Image,
        captured_at: None,
    });
    submission
}

fn completed_analysis(evidence_id: Uuid, severity: u8) -> AnalysisResult {
    let mut result = AnalysisResult::failed(
        evidence_id,
        ModelVersion("detector-1".to_string()),
        "digest".to_string(),
        String::new(),
    );
    result.outcome = crate::models::AnalysisOutcome::Completed;
    result.faces = FaceScan::Completed { regions: Vec::new() };
    result.suggested_severity = Severity::new(severity);
    result.suggested_category = Some(Category::Theft);
    result
}

fn rejection(err: Error) -> Rejection {
    err.rejection().cloned().expect("expected a transition rejection")
}

#[tokio::test]
async fn submission_starts_submitted_with_reference() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager.submit(&student(), with_photo(report(None, None))).await?;

    assert_eq!(incident.status, IncidentStatus::Submitted);
    assert!(incident.reference.starts_with("INC-"));
    assert!(incident.reference.ends_with("-0001"));
    assert_eq!(incident.location.key, "block-b");
    assert!(SubmissionReceipt::of(&incident).analysis_pending);
    assert_eq!(incident.title, "Laptop taken from reading room");
    Ok(())
}

#[tokio::test]
async fn malformed_submissions_never_enter_the_lifecycle() -> anyhow::Result<()> {
    let manager = manager();
    let mut empty = report(None, None);
    empty.description = "   ".to_string();
    assert!(matches!(
        manager.submit(&student(), empty).await,
        Err(Error::Validation(_))
    ));

    assert!(matches!(
        manager.submit(&student(), report(None, Some(140))).await,
        Err(Error::Validation(_))
    ));

    let mut future = report(None, None);
    future.occurred_at = Some(Utc::now() + chrono::Duration::days(1));
    assert!(matches!(
        manager.submit(&student(), future).await,
        Err(Error::Validation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn evidence_free_triage_needs_reporter_classification() -> anyhow::Result<()> {
    let manager = manager();
    let unclassified = manager.submit(&student(), report(Some(Category::Theft), None)).await?;
    let err = manager.triage(&security_manager(), unclassified.id).await.unwrap_err();
    assert_eq!(rejection(err), Rejection::MissingReporterClassification);

    let classified = manager
        .submit(&student(), report(Some(Category::Theft), Some(40)))
        .await?;
    let triaged = manager.triage(&security_manager(), classified.id).await?;
    assert_eq!(triaged.status, IncidentStatus::Triaged);
    assert_eq!(triaged.severity, Severity::new(40).unwrap());
    assert_eq!(triaged.category, Some(Category::Theft));
    Ok(())
}

#[tokio::test]
async fn triage_waits_for_analysis_and_takes_max_severity() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager
        .submit(&student(), with_photo(report(None, Some(30))))
        .await?;
    let evidence_id = incident.evidence[0].id;

    let err = manager.triage(&security_manager(), incident.id).await.unwrap_err();
    assert!(matches!(rejection(err), Rejection::AnalysisPending { .. }));

    manager
        .record_analysis(incident.id, completed_analysis(evidence_id, 62))
        .await?;
    let triaged = manager.triage(&security_manager(), incident.id).await?;

    assert_eq!(triaged.severity, Severity::new(62).unwrap());
    assert_eq!(triaged.category, Some(Category::Theft));
    assert!(triaged
        .audit_log
        .entries()
        .iter()
        .any(|e| matches!(e.action, AuditAction::SeverityChanged { .. })));
    Ok(())
}

#[tokio::test]
async fn skipped_or_failed_analysis_unblocks_triage() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager
        .submit(&student(), with_photo(with_photo(report(None, None))))
        .await?;
    let (first, second) = (incident.evidence[0].id, incident.evidence[1].id);

    let failed = AnalysisResult::failed(
        first,
        ModelVersion("detector-1".to_string()),
        "digest".to_string(),
        "unsupported codec".to_string(),
    );
    manager.record_analysis(incident.id, failed).await?;
    manager
        .skip_analysis(&security_manager(), incident.id, second, "blank frame")
        .await?;

    let triaged = manager.triage(&security_manager(), incident.id).await?;
    assert_eq!(triaged.status, IncidentStatus::Triaged);
    assert_eq!(triaged.category, Some(Category::Other));
    Ok(())
}

#[tokio::test]
async fn full_lifecycle_is_replay_consistent() -> anyhow::Result<()> {
    let manager = manager();
    let officer = security_manager();
    let incident = manager
        .submit(&student(), report(Some(Category::Vandalism), Some(20)))
        .await?;
    let id = incident.id;

    manager.triage(&officer, id).await?;
    let err = manager.start_investigation(&officer, id).await.unwrap_err();
    assert_eq!(rejection(err), Rejection::MissingInvestigator);

    manager.assign(&officer, id, officer.id).await?;
    manager.start_investigation(&officer, id).await?;

    let err = manager.resolve(&officer, id, false).await.unwrap_err();
    assert_eq!(rejection(err), Rejection::MissingResolutionNote);

    manager.add_note(&officer, id, NoteKind::Internal, "CCTV requested").await?;
    assert!(manager.resolve(&officer, id, false).await.is_err());
    manager
        .add_note(&officer, id, NoteKind::Resolution, "Graffiti cleaned, culprit identified")
        .await?;
    manager.resolve(&officer, id, true).await?;

    let reopened = manager.reopen(&officer, id, "culprit appealed").await?;
    assert_eq!(reopened.status, IncidentStatus::Investigating);
    assert!(!reopened.false_positive);
    assert_eq!(replay(&reopened.audit_log)?, reopened.status);

    let err = manager.resolve(&officer, id, false).await.unwrap_err();
    assert_eq!(rejection(err), Rejection::MissingResolutionNote);
    Ok(())
}

#[tokio::test]
async fn rejection_only_from_submitted_or_triaged() -> anyhow::Result<()> {
    let manager = manager();
    let officer = security_manager();
    let incident = manager
        .submit(&student(), report(Some(Category::Other), Some(5)))
        .await?;

    let err = manager.reject(&officer, incident.id, " ").await.unwrap_err();
    assert_eq!(rejection(err), Rejection::MissingReason);

    let rejected = manager.reject(&officer, incident.id, "duplicate of INC-1").await?;
    assert_eq!(rejected.status, IncidentStatus::Rejected);

    let err = manager.reopen(&officer, incident.id, "oops").await.unwrap_err();
    assert_eq!(rejection(err), Rejection::IllegalTransition);
    assert_eq!(replay(&rejected.audit_log)?, IncidentStatus::Rejected);
    Ok(())
}

#[tokio::test]
async fn viewers_cannot_manage_and_see_only_their_reports() -> anyhow::Result<()> {
    let manager = manager();
    let reporter = student();
    let other = student();
    let incident = manager
        .submit(&reporter, report(Some(Category::Theft), Some(10)))
        .await?;
    let mut anonymous = report(Some(Category::Theft), Some(10));
    anonymous.anonymous = true;
    manager.submit(&reporter, anonymous).await?;

    assert!(matches!(
        manager.triage(&reporter, incident.id).await,
        Err(Error::Authorization(_))
    ));
    assert!(manager.get(&reporter, incident.id).await.is_ok());
    assert!(manager.get(&other, incident.id).await.is_err());
    assert_eq!(manager.list(&reporter).await?.len(), 1);
    assert_eq!(manager.list(&admin()).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn pending_redaction_hides_evidence_below_manager() -> anyhow::Result<()> {
    let manager = manager();
    let reporter = student();
    let incident = manager.submit(&reporter, with_photo(report(None, None))).await?;
    let evidence_id = incident.evidence[0].id;

    manager
        .record_redaction(
            incident.id,
            evidence_id,
            RedactionState::RedactionPending {
                reason: "face detection failed".to_string(),
            },
        )
        .await?;

    assert!(matches!(
        manager.evidence_locator(&reporter, incident.id, evidence_id).await,
        Err(Error::Authorization(_))
    ));
    assert!(manager
        .unlock_evidence(&reporter, incident.id, evidence_id)
        .await
        .is_err());

    let released = manager
        .override_redaction(&admin(), incident.id, evidence_id, "no bystanders in frame")
        .await?;
    assert_eq!(released.evidence[0].redaction.label(), "redaction_overridden");
    let locator = manager.evidence_locator(&reporter, incident.id, evidence_id).await?;
    assert_eq!(locator, EvidenceLocator("sha256-photo".to_string()));
    Ok(())
}

#[tokio::test]
async fn every_unlock_is_audited() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager.submit(&student(), with_photo(report(None, None))).await?;
    let evidence_id = incident.evidence[0].id;

    assert!(manager
        .unlock_evidence(&security_manager(), incident.id, evidence_id)
        .await
        .is_err());

    let investigator = security_manager().with_permission(Permission::UnlockEvidence);
    let locator = manager
        .unlock_evidence(&investigator, incident.id, evidence_id)
        .await?;
    assert_eq!(locator.as_str(), "sha256-photo");

    let stored = manager.fetch(incident.id).await?;
    let unlocked = stored
        .audit_log
        .entries()
        .iter()
        .filter(|e| matches!(e.action, AuditAction::EvidenceUnlocked { .. }))
        .count();
    assert_eq!(unlocked, 1);
    Ok(())
}

#[tokio::test]
async fn store_refuses_audit_rewrites() -> anyhow::Result<()> {
    let store = Arc::new(MemoryIncidentStore::new());
    let manager = IncidentManager::new(store.clone());
    let incident = manager
        .submit(&student(), report(Some(Category::Cyber), Some(15)))
        .await?;
    manager.triage(&security_manager(), incident.id).await?;

    let stale = incident.clone();
    assert!(store.save(&stale).await.is_err());
    Ok(())
}

#[tokio::test]
async fn concurrent_updates_keep_audit_order() -> anyhow::Result<()> {
    let manager = Arc::new(manager());
    let incident = manager
        .submit(&student(), report(Some(Category::Theft), Some(15)))
        .await?;
    let officer = Arc::new(security_manager());
    let id = incident.id;

    let mut handles = Vec::new();
    for n in 0..20 {
        let (manager, officer) = (manager.clone(), officer.clone());
        handles.push(tokio::spawn(async move {
            manager
                .add_note(&officer, id, NoteKind::Internal, &format!("note {}", n))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let stored = manager.fetch(incident.id).await?;
    assert_eq!(stored.audit_log.len(), 21);
    let seqs: Vec<u64> = stored.audit_log.entries().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=21).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn manual_adjustments_are_logged_after_triage() -> anyhow::Result<()> {
    let manager = manager();
    let officer = security_manager();
    let incident = manager
        .submit(&student(), report(Some(Category::Theft), Some(15)))
        .await?;

    assert!(manager
        .adjust_severity(&officer, incident.id, 80, "repeat offender")
        .await
        .is_err());

    manager.triage(&officer, incident.id).await?;
    let adjusted = manager
        .adjust_severity(&officer, incident.id, 80, "repeat offender")
        .await?;
    let adjusted_category = manager
        .adjust_category(&officer, adjusted.id, Category::CultActivity)
        .await?;
    let escalated = manager
        .escalate(&officer, adjusted_category.id, "LAG/2024/0042")
        .await?;

    assert_eq!(escalated.severity, Severity::new(80).unwrap());
    assert_eq!(escalated.category, Some(Category::CultActivity));
    assert_eq!(
        escalated.escalation.as_ref().map(|e| e.police_reference.as_str()),
        Some("LAG/2024/0042")
    );
    Ok(())
}

#[tokio::test]
async fn downgraded_severity_sticks_for_every_reader() -> anyhow::Result<()> {
    let manager = manager();
    let officer = security_manager();
    let incident = manager
        .submit(&student(), report(Some(Category::Theft), Some(80)))
        .await?;
    let triaged = manager.triage(&officer, incident.id).await?;
    assert_eq!(triaged.effective_severity(), Severity::new(80).unwrap());

    let downgraded = manager
        .adjust_severity(&officer, incident.id, 20, "bag was found")
        .await?;

    let low = Severity::new(20).unwrap();
    assert_eq!(downgraded.severity, low);
    assert_eq!(downgraded.effective_severity(), low);
    assert_eq!(crate::intelligence::IncidentSummary::from(&downgraded).severity, low);

    let alerting = crate::config::AlertingConfig {
        emergency_severity_threshold: 70,
        emergency_categories: Vec::new(),
        weapon_marker_is_emergency: true,
        max_delivery_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        cooldown_minutes: 5,
        default_channels: Vec::new(),
    };
    assert!(crate::alerts::router::decide(&alerting, &downgraded).is_none());
    Ok(())
}

#[tokio::test]
async fn archive_requires_closed_incident_and_admin() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager
        .submit(&student(), report(Some(Category::Other), Some(1)))
        .await?;

    assert!(manager.archive(&admin(), incident.id).await.is_err());
    manager
        .reject(&security_manager(), incident.id, "prank")
        .await?;
    assert!(manager.archive(&security_manager(), incident.id).await.is_err());

    let archived = manager.archive(&admin(), incident.id).await?;
    assert!(archived.archived);
    assert_eq!(replay(&archived.audit_log)?, IncidentStatus::Rejected);
    Ok(())
}

#[tokio::test]
async fn analysis_for_rejected_incident_is_discarded() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager.submit(&student(), with_photo(report(None, None))).await?;
    let evidence_id = incident.evidence[0].id;
    manager
        .reject(&security_manager(), incident.id, "spam")
        .await?;

    assert!(manager
        .record_analysis(incident.id, completed_analysis(evidence_id, 50))
        .await
        .is_err());
    let stored = manager.fetch(incident.id).await?;
    assert!(stored.evidence[0].analyses.is_empty());
    Ok(())
}

#[tokio::test]
async fn live_feed_incidents_carry_their_feed() -> anyhow::Result<()> {
    let manager = manager();
    let incident = manager
        .submit_live(LiveDetection {
            feed_id: "cam-07".to_string(),
            institution: "unilag".to_string(),
            location: "Block B".to_string(),
            coordinates: None,
            occurred_at: Utc::now(),
            category: Some(Category::UnauthorizedAccess),
            severity: Some(60),
            description: String::new(),
            evidence: Vec::new(),
        })
        .await?;

    assert!(incident.is_live_feed());
    assert_eq!(incident.reporter.display_name(), "Live feed cam-07");
    assert_eq!(incident.audit_log.entries()[0].actor.label, "feed:cam-07");
    Ok(())
}
