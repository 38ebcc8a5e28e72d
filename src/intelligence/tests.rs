use super::*;
use crate::alerts::AlertLedger;
use crate::config::{DecayModel, HotspotConfig};
use crate::error::Error;
use crate::hotspots::HotspotEngine;
use crate::incidents::{EvidenceUpload, IncidentManager, MemoryIncidentStore, Submission};
use crate::models::{
    Actor, Category, EvidenceLocator, Incident, IncidentStatus, MediaKind, NoteKind,
    RedactionResult, RedactionState, Role, Scope,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Fixture {
    manager: Arc<IncidentManager>,
    engine: Arc<HotspotEngine>,
    service: IntelligenceService,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryIncidentStore::new());
    let manager = Arc::new(IncidentManager::new(store.clone()));
    let engine = Arc::new(HotspotEngine::new(
        HotspotConfig {
            windows_days: vec![30],
            decay: DecayModel::Linear { zero_after_days: 60.0 },
            category_weights: BTreeMap::new(),
            recompute_workers: 1,
            refresh_interval_secs: 300,
        },
        store,
    ));
    let service = IntelligenceService::new(manager.clone(), engine.clone(), Arc::new(AlertLedger::new()));
    Fixture {
        manager,
        engine,
        service,
    }
}

fn viewer() -> Actor {
    Actor::new("Tolu", Role::Viewer, Scope::institution("unilag"))
}

fn block_b_manager() -> Actor {
    Actor::new("Bola", Role::Manager, Scope::with_locations("unilag", &["block-b"]))
}

fn admin() -> Actor {
    Actor::new("Dayo", Role::Admin, Scope::institution("unilag"))
}

async fn file(f: &Fixture, by: &Actor, location: &str, photo: bool) -> anyhow::Result<Incident> {
    let mut submission = Submission {
        description: "Projector stolen from lecture hall".to_string(),
        location: location.to_string(),
        category: Some(Category::Theft),
        severity: Some(40),
        ..Default::default()
    };
    if photo {
        submission.evidence.push(EvidenceUpload {
            locator: EvidenceLocator("sha256-original".to_string()),
            media_kind: MediaKind::Image,
            captured_at: None,
        });
    }
    Ok(f.manager.submit(by, submission).await?)
}

#[tokio::test]
async fn listings_follow_scope() -> anyhow::Result<()> {
    let f = fixture();
    let reporter = viewer();
    file(&f, &reporter, "Block B", false).await?;
    file(&f, &viewer(), "Block B", false).await?;
    file(&f, &viewer(), "Block C", false).await?;

    let filter = IncidentFilter::default();
    assert_eq!(f.service.list_incidents(&reporter, &filter).await?.len(), 1);
    assert_eq!(f.service.list_incidents(&block_b_manager(), &filter).await?.len(), 2);
    assert_eq!(f.service.list_incidents(&admin(), &filter).await?.len(), 3);

    let only_c = IncidentFilter {
        location: Some("Block C".to_string()),
        ..Default::default()
    };
    assert_eq!(f.service.list_incidents(&admin(), &only_c).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn pending_redaction_hides_evidence_from_reporters() -> anyhow::Result<()> {
    let f = fixture();
    let reporter = viewer();
    let incident = file(&f, &reporter, "Block B", true).await?;
    let evidence_id = incident.evidence[0].id;
    f.manager
        .record_redaction(
            incident.id,
            evidence_id,
            RedactionState::RedactionPending {
                reason: "face detection failed".to_string(),
            },
        )
        .await?;

    let view = f.service.incident(&reporter, incident.id).await?;
    assert!(view.evidence.is_empty());
    assert_eq!(view.hidden_evidence, 1);
    assert!(view.audit_log.is_empty());

    // Staff see the item but still no raw locator
    let view = f.service.incident(&block_b_manager(), incident.id).await?;
    assert_eq!(view.evidence.len(), 1);
    assert_eq!(view.evidence[0].redaction, "redaction_pending");
    assert!(view.evidence[0].locator.is_none());
    assert!(!view.audit_log.is_empty());
    Ok(())
}

#[tokio::test]
async fn redacted_locator_is_shown_never_the_original() -> anyhow::Result<()> {
    let f = fixture();
    let reporter = viewer();
    let incident = file(&f, &reporter, "Block B", true).await?;
    let redacted = EvidenceLocator("redacted/sha256-masked".to_string());
    f.manager
        .record_redaction(
            incident.id,
            incident.evidence[0].id,
            RedactionState::Redacted(RedactionResult {
                locator: redacted.clone(),
                faces_masked: 2,
                completed_at: Utc::now(),
            }),
        )
        .await?;

    let view = f.service.incident(&reporter, incident.id).await?;
    assert_eq!(view.evidence[0].locator.as_ref(), Some(&redacted));
    let export = f.service.export(&admin(), incident.id).await?;
    assert!(!export.contains("sha256-original"));
    Ok(())
}

#[tokio::test]
async fn export_is_deterministic_and_complete() -> anyhow::Result<()> {
    let f = fixture();
    let incident = file(&f, &viewer(), "Block B", false).await?;
    let manager = block_b_manager();
    f.manager.triage(&manager, incident.id).await?;
    f.manager
        .add_note(&manager, incident.id, NoteKind::Internal, "CCTV requested")
        .await?;

    let first = f.service.export(&manager, incident.id).await?;
    let second = f.service.export(&manager, incident.id).await?;
    assert_eq!(first, second);

    let parsed: serde_json::Value = serde_json::from_str(&first)?;
    assert_eq!(parsed["reference"], incident.reference.as_str());
    assert!(parsed["audit_log"].as_array().map_or(0, |a| a.len()) >= 3);

    let err = f.service.export(&viewer(), incident.id).await.unwrap_err();
    assert!(matches!(err, Error::Authorization(_)));
    Ok(())
}

#[tokio::test]
async fn statistics_cover_bands_and_false_positives() -> anyhow::Result<()> {
    let f = fixture();
    let admin = admin();
    let investigator = block_b_manager();
    let a = file(&f, &viewer(), "Block B", false).await?;
    let b = file(&f, &viewer(), "Block B", false).await?;
    file(&f, &viewer(), "Library", false).await?;

    for (incident, false_positive) in [(&a, true), (&b, false)] {
        f.manager.triage(&admin, incident.id).await?;
        f.manager.assign(&admin, incident.id, investigator.id).await?;
        f.manager.start_investigation(&admin, incident.id).await?;
        f.manager
            .add_note(&admin, incident.id, NoteKind::Resolution, "Handled")
            .await?;
        f.manager.resolve(&admin, incident.id, false_positive).await?;
    }

    let stats = f.service.statistics(&admin, None).await?;
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status.get("resolved"), Some(&2));
    assert_eq!(stats.by_band.get("medium"), Some(&3));
    assert_eq!(stats.false_positive_rate, Some(0.5));
    assert_eq!(stats.busiest_location.as_deref(), Some("block-b"));
    assert!(stats.avg_hours_to_resolve.is_some());

    assert!(f.service.statistics(&viewer(), None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn hotspots_and_issues_respect_roles() -> anyhow::Result<()> {
    let f = fixture();
    for location in ["Block B", "Block C", "Block C"] {
        let incident = file(&f, &viewer(), location, false).await?;
        f.engine.notify_incident(&incident);
    }
    f.engine.run_pending().await;

    let all = f.service.hotspots(&admin(), Some(30), 10).await?;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].bucket.spatial, "block-c");

    let scoped = f.service.hotspots(&block_b_manager(), None, 10).await?;
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].bucket.spatial, "block-b");

    assert!(f.service.hotspots(&viewer(), None, 10).await.is_err());
    assert!(f.service.operational_issues(&block_b_manager()).await.is_err());
    assert!(f.service.operational_issues(&admin()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_status_filter() -> anyhow::Result<()> {
    let f = fixture();
    let incident = file(&f, &viewer(), "Block B", false).await?;
    f.manager.reject(&admin(), incident.id, "duplicate").await?;

    let filter = IncidentFilter {
        status: Some(IncidentStatus::Rejected),
        ..Default::default()
    };
    assert_eq!(f.service.list_incidents(&admin(), &filter).await?.len(), 1);
    Ok(())
}
