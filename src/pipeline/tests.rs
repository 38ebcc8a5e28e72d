use super::*;
use crate::alerts::{AlertDispatcher, AlertLedger, AlertRouter, AlertTransport, StaffMember, StaticDirectory};
use crate::analyzer::{Detection, Detector, DetectorError, Frame, FrameDetections, MediaAnalyzer, NoVideoSampler, Region};
use crate::config::{AlertingConfig, AnalyzerConfig, DecayModel, HotspotConfig, PipelineConfig, StorageConfig};
use crate::error::Error;
use crate::incidents::{replay, EvidenceUpload, IncidentManager, MemoryIncidentStore, Submission};
use crate::intelligence::IncidentFilter;
use crate::messaging::{DomainEvents, EventType, MemoryPublisher};
use crate::models::{
    Actor, AlertMessage, AnalysisState, Category, Channel, DeliveryStatus, EvidenceLocator, FaceRegion, MediaKind,
    ModelVersion, Permission, RedactionState, Recipient, Role, Scope,
};
use crate::redactor::{MaskError, Masker, PrivacyRedactor};
use crate::storage::MemoryEvidenceStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// Answers every frame with the same detections, optionally waiting for a gate first
struct StubDetector {
    detections: FrameDetections,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl StubDetector {
    fn new(detections: FrameDetections) -> Self {
        Self {
            detections,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Detector for StubDetector {
    async fn detect(&self, _frame: &Frame, _model: &ModelVersion) -> std::result::Result<FrameDetections, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.detections.clone())
    }
}

struct BlurMasker;

#[async_trait]
impl Masker for BlurMasker {
    async fn mask(&self, blob: &[u8], _kind: MediaKind, _regions: &[FaceRegion]) -> std::result::Result<Vec<u8>, MaskError> {
        let mut masked = blob.to_vec();
        masked.extend_from_slice(b"blurred");
        Ok(masked)
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, Channel)>>,
}

#[async_trait]
impl AlertTransport for RecordingTransport {
    async fn send(&self, _alert: Uuid, recipient: &Recipient, _message: &AlertMessage, channel: Channel) -> Result<()> {
        self.sent.lock().unwrap().push((recipient.name.clone(), channel));
        Ok(())
    }
}

fn staff(name: &str, role: Role, locations: &[&str]) -> StaffMember {
    StaffMember {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role,
        institution: "unilag".to_string(),
        locations: locations.iter().map(|l| l.to_string()).collect(),
        channels: vec![Channel::InApp],
        min_band: None,
    }
}

struct Harness {
    pipeline: Arc<Pipeline>,
    store: Arc<MemoryEvidenceStore>,
    ledger: Arc<AlertLedger>,
    transport: Arc<RecordingTransport>,
    publisher: Arc<MemoryPublisher>,
    detector: Arc<StubDetector>,
}

fn harness(detector: StubDetector) -> Harness {
    let store = Arc::new(MemoryEvidenceStore::new());
    let incidents_store = Arc::new(MemoryIncidentStore::new());
    let publisher = Arc::new(MemoryPublisher::new());
    let events = DomainEvents::new(publisher.clone());
    let detector = Arc::new(detector);
    let ledger = Arc::new(AlertLedger::new());
    let transport = Arc::new(RecordingTransport::default());

    let alerting = AlertingConfig {
        emergency_severity_threshold: 70,
        emergency_categories: vec![Category::CultActivity],
        weapon_marker_is_emergency: true,
        max_delivery_attempts: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 2,
        cooldown_minutes: 5,
        default_channels: vec![Channel::Email],
    };
    let directory = StaticDirectory::new(vec![
        staff("Bola", Role::Manager, &["block-b"]),
        staff("Emeka", Role::Manager, &["block-b"]),
        staff("Funmi", Role::Manager, &["library"]),
        staff("Dayo", Role::Admin, &[]),
    ]);
    let analyzer_config = AnalyzerConfig {
        model_version: ModelVersion("detector-test".to_string()),
        video_sample_interval_ms: 1000,
        max_sampled_frames: 10,
        weapon_marker_threshold: 0.8,
        stolen_item_threshold: 0.7,
        weapon_labels: vec!["knife".to_string()],
    };

    let parts = PipelineParts {
        incidents: Arc::new(IncidentManager::new(incidents_store.clone())),
        store: store.clone(),
        analyzer: Arc::new(MediaAnalyzer::new(detector.clone(), Arc::new(NoVideoSampler))),
        redactor: Arc::new(PrivacyRedactor::new(Arc::new(BlurMasker), store.clone())),
        hotspots: Arc::new(
            HotspotEngine::new(
                HotspotConfig {
                    windows_days: vec![30],
                    decay: DecayModel::Exponential { half_life_days: 14.0 },
                    category_weights: BTreeMap::new(),
                    recompute_workers: 1,
                    refresh_interval_secs: 300,
                },
                incidents_store,
            )
            .with_events(events.clone()),
        ),
        router: Arc::new(AlertRouter::new(alerting.clone(), Arc::new(directory))),
        dispatcher: Arc::new(
            AlertDispatcher::new(alerting, transport.clone(), ledger.clone()).with_events(events.clone()),
        ),
        events,
    };
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        StorageConfig {
            read_attempts: 2,
            read_retry_delay_ms: 1,
            ..Default::default()
        },
        &analyzer_config,
        parts,
    );

    Harness {
        pipeline: Arc::new(pipeline),
        store,
        ledger,
        transport,
        publisher,
        detector,
    }
}

fn quiet_scene() -> FrameDetections {
    FrameDetections {
        objects: vec![Detection::new("backpack", 0.9)],
        faces: Ok(vec![Detection::new("face", 0.9).at(Region {
            x: 4,
            y: 4,
            width: 20,
            height: 20,
        })]),
        ..Default::default()
    }
}

fn reporter() -> Actor {
    Actor::new("Kemi", Role::Viewer, Scope::institution("unilag"))
}

fn admin() -> Actor {
    Actor::new("Dayo", Role::Admin, Scope::institution("unilag"))
}

async fn theft_report(h: &Harness, severity: u8, tag: &[u8]) -> Submission {
    let mut bytes = JPEG.to_vec();
    bytes.extend_from_slice(tag);
    let locator = h.store.put(bytes).await;
    Submission {
        description: "Laptop stolen from the reading room".to_string(),
        location: "Block B".to_string(),
        category: Some(Category::Theft),
        severity: Some(severity),
        evidence: vec![EvidenceUpload {
            locator,
            media_kind: MediaKind::Image,
            captured_at: None,
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn submission_returns_before_analysis_completes() -> anyhow::Result<()> {
    let gate = Arc::new(Notify::new());
    let h = harness(StubDetector {
        gate: Some(gate.clone()),
        ..StubDetector::new(quiet_scene())
    });

    let receipt = h.pipeline.submit(&reporter(), theft_report(&h, 20, b"a").await).await?;
    assert_eq!(receipt.status, IncidentStatus::Submitted);
    assert!(receipt.analysis_pending);

    gate.notify_one();
    h.pipeline.drain().await;

    let incident = h.pipeline.incidents().fetch(receipt.incident_id).await?;
    assert_eq!(incident.status, IncidentStatus::Triaged);
    assert!(matches!(incident.evidence[0].redaction, RedactionState::Redacted(_)));
    assert_eq!(h.publisher.count(&EventType::EvidenceAnalyzed).await, 1);
    Ok(())
}

#[tokio::test]
async fn low_severity_theft_produces_a_record_but_no_alert() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    h.pipeline.submit(&reporter(), theft_report(&h, 30, b"b").await).await?;
    h.pipeline.drain().await;

    assert!(h.ledger.alerts("unilag").await.is_empty());
    assert!(h.transport.sent.lock().unwrap().is_empty());
    let listed = h
        .pipeline
        .intelligence()
        .list_incidents(&admin(), &IncidentFilter::default())
        .await?;
    assert_eq!(listed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn emergency_theft_alerts_block_b_managers_exactly_once() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    h.pipeline.submit(&reporter(), theft_report(&h, 80, b"c").await).await?;
    h.pipeline.drain().await;

    let alerts = h.ledger.alerts("unilag").await;
    assert_eq!(alerts.len(), 1);
    let mut names: Vec<String> = alerts[0].event.recipients.iter().map(|r| r.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["Bola".to_string(), "Emeka".to_string()]);
    assert_eq!(alerts[0].status, DeliveryStatus::Sent);
    assert_eq!(h.transport.sent.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn weapon_found_by_analysis_triggers_an_alert() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(FrameDetections {
        objects: vec![Detection::new("knife", 0.92)],
        ..Default::default()
    }));
    h.pipeline.submit(&reporter(), theft_report(&h, 10, b"d").await).await?;
    h.pipeline.drain().await;

    let alerts = h.ledger.alerts("unilag").await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(h.publisher.count(&EventType::AlertDelivered).await, 1);
    Ok(())
}

#[tokio::test]
async fn failed_face_detection_keeps_evidence_from_viewers() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(FrameDetections {
        faces: Err("face model crashed".to_string()),
        ..Default::default()
    }));
    let student = reporter();
    let receipt = h.pipeline.submit(&student, theft_report(&h, 20, b"e").await).await?;
    h.pipeline.drain().await;

    let incident = h.pipeline.incidents().fetch(receipt.incident_id).await?;
    let evidence_id = incident.evidence[0].id;
    assert!(matches!(incident.evidence[0].redaction, RedactionState::RedactionPending { .. }));

    let denied = h.pipeline.evidence_locator(&student, incident.id, evidence_id).await;
    assert!(matches!(denied, Err(Error::Authorization(_))));
    assert_eq!(h.publisher.count(&EventType::EvidenceRedactionPending).await, 1);

    // Unlocking works for a permitted manager and is audited
    let manager = Actor::new("Bola", Role::Manager, Scope::with_locations("unilag", &["block-b"]))
        .with_permission(Permission::UnlockEvidence);
    let original = h.pipeline.unlock_evidence(&manager, incident.id, evidence_id).await?;
    assert_eq!(original, incident.evidence[0].locator);

    h.pipeline
        .override_redaction(&admin(), incident.id, evidence_id, "no bystanders in frame")
        .await?;
    assert!(h.pipeline.evidence_locator(&student, incident.id, evidence_id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn rejecting_cancels_in_flight_analysis() -> anyhow::Result<()> {
    let gate = Arc::new(Notify::new());
    let h = harness(StubDetector {
        gate: Some(gate.clone()),
        ..StubDetector::new(quiet_scene())
    });
    let receipt = h.pipeline.submit(&reporter(), theft_report(&h, 20, b"f").await).await?;

    // Wait until the detector is actually running
    while h.detector.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    h.pipeline.reject(&admin(), receipt.incident_id, "duplicate of an earlier report").await?;
    gate.notify_one();
    h.pipeline.drain().await;

    let incident = h.pipeline.incidents().fetch(receipt.incident_id).await?;
    assert_eq!(incident.status, IncidentStatus::Rejected);
    assert!(incident.evidence[0].analyses.is_empty());
    assert_eq!(incident.evidence[0].analysis_state, AnalysisState::Pending);
    assert_eq!(replay(&incident.audit_log)?, incident.status);
    Ok(())
}

#[tokio::test]
async fn unreadable_blobs_are_deferred_then_swept() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    let mut submission = theft_report(&h, 20, b"g").await;
    let mut late = JPEG.to_vec();
    late.extend_from_slice(b"late");
    submission.evidence[0].locator = h.store.put_with_latency(late, 3).await;

    let receipt = h.pipeline.submit(&reporter(), submission).await?;
    h.pipeline.drain().await;
    let incident = h.pipeline.incidents().fetch(receipt.incident_id).await?;
    assert!(matches!(
        incident.evidence[0].analysis_state,
        AnalysisState::Deferred { attempts: 1, .. }
    ));
    assert_eq!(incident.status, IncidentStatus::Submitted);

    assert_eq!(h.pipeline.sweep_deferred().await?, 1);
    h.pipeline.drain().await;
    let incident = h.pipeline.incidents().fetch(receipt.incident_id).await?;
    assert_eq!(incident.evidence[0].analysis_state, AnalysisState::Completed);
    assert_eq!(incident.status, IncidentStatus::Triaged);
    Ok(())
}

#[tokio::test]
async fn missing_blobs_settle_as_failed_analysis() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    let mut submission = theft_report(&h, 20, b"m").await;
    submission.evidence[0].locator = EvidenceLocator("sha256-never-uploaded".to_string());

    let receipt = h.pipeline.submit(&reporter(), submission).await?;
    h.pipeline.drain().await;
    let incident = h.pipeline.incidents().fetch(receipt.incident_id).await?;

    let AnalysisState::Failed { reason } = &incident.evidence[0].analysis_state else {
        panic!("expected failed analysis, got {:?}", incident.evidence[0].analysis_state);
    };
    assert!(reason.starts_with("evidence unreadable"));
    assert_eq!(incident.evidence[0].redaction.label(), "redaction_pending");
    assert!(!incident.analysis_pending());
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn full_lifecycle_replays_to_current_status() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    let admin = admin();
    let receipt = h.pipeline.submit(&reporter(), theft_report(&h, 40, b"h").await).await?;
    h.pipeline.drain().await;
    let id = receipt.incident_id;

    h.pipeline.assign(&admin, id, Uuid::new_v4()).await?;
    h.pipeline.start_investigation(&admin, id).await?;
    h.pipeline.add_note(&admin, id, NoteKind::Resolution, "Laptop recovered").await?;
    h.pipeline.resolve(&admin, id, false).await?;
    h.pipeline.reopen(&admin, id, "Owner reports a second device missing").await?;
    let incident = h.pipeline.incidents().fetch(id).await?;

    assert_eq!(incident.status, IncidentStatus::Investigating);
    assert_eq!(replay(&incident.audit_log)?, incident.status);
    assert!(h.publisher.count(&EventType::IncidentStatusChanged).await >= 4);
    Ok(())
}

#[tokio::test]
async fn archiving_drops_the_incident_from_hotspots() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    let admin = admin();
    let receipt = h.pipeline.submit(&reporter(), theft_report(&h, 40, b"i").await).await?;
    h.pipeline.drain().await;
    assert_eq!(h.pipeline.hotspots().clusters("unilag", None).await.len(), 1);

    let id = receipt.incident_id;
    h.pipeline.reject(&admin, id, "test report").await?;
    h.pipeline.archive_incident(&admin, id).await?;
    h.pipeline.drain().await;

    assert!(h.pipeline.hotspots().clusters("unilag", None).await.is_empty());
    let incident = h.pipeline.incidents().fetch(id).await?;
    assert!(incident.archived);
    assert_eq!(replay(&incident.audit_log)?, incident.status);
    assert_eq!(h.publisher.count(&EventType::IncidentArchived).await, 1);
    Ok(())
}

#[tokio::test]
async fn live_detections_alert_immediately() -> anyhow::Result<()> {
    let h = harness(StubDetector::new(quiet_scene()));
    let receipt = h
        .pipeline
        .ingest_live_detection(crate::incidents::LiveDetection {
            feed_id: "cam-12".to_string(),
            institution: "unilag".to_string(),
            location: "Library".to_string(),
            coordinates: None,
            occurred_at: chrono::Utc::now(),
            category: Some(Category::UnauthorizedAccess),
            severity: Some(20),
            description: "Door forced open".to_string(),
            evidence: Vec::new(),
        })
        .await?;
    h.pipeline.drain().await;

    let alerts = h.ledger.alerts("unilag").await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].event.incident_id, receipt.incident_id);
    assert_eq!(alerts[0].event.recipients[0].name, "Funmi");
    Ok(())
}
