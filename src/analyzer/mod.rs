//! Media Analyzer.
//!
//! Turns one evidence blob into an [`AnalysisResult`]: detected objects,
//! face regions, risk markers and a suggested category / severity. Unreadable
//! media yields a result tagged `analysis_failed` instead of an error, so the
//! incident carries on unanalyzed. The only error is an unreachable detector,
//! which the caller treats as transient.

pub mod detector;
pub mod media;
pub mod sampler;


use chrono::Utc;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AnalyzerConfig;
use crate::error::{Error, Result};
use crate::models::{
    AnalysisOutcome, AnalysisResult, Category, DetectedObject, FaceRegion, FaceScan, MediaKind,
    ModelVersion, RiskMarker, RiskMarkerKind, SceneMetadata, Severity,
};
use crate::storage;

pub use detector::{Detection, Detector, DetectorError, FrameDetections, HttpDetector, Region};
pub use media::{sniff, MediaFormat};
pub use sampler::{sample_offsets, DecodeError, FrameSampler, NoVideoSampler};

#[cfg(feature = "gst")]
pub use sampler::GstFrameSampler;

/// Minimum confidence for an object label to suggest a category
const CATEGORY_HINT_CONFIDENCE: f32 = 0.5;
const CATEGORY_HINT_SEVERITY: u8 = 30;

/// Objects that hint at a category on their own
const LABEL_CATEGORIES: &[(&str, Category)] = &[
    ("spray_can", Category::Vandalism),
    ("graffiti", Category::Vandalism),
    ("broken_window", Category::Vandalism),
    ("crowbar", Category::UnauthorizedAccess),
    ("bolt_cutter", Category::UnauthorizedAccess),
    ("ski_mask", Category::UnauthorizedAccess),
];

/// A decoded still frame handed to the detector
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub offset_ms: u64,
    /// Encoded image (JPEG / PNG)
    pub image: Vec<u8>,
}

/// Analysis parameters for one call; the model version is never ambient
#[derive(Debug, Clone)]
pub struct AnalysisProfile {
    pub model_version: ModelVersion,
    pub sample_interval_ms: u64,
    pub max_frames: u32,
    pub weapon_threshold: f32,
    pub stolen_item_threshold: f32,
    pub weapon_labels: BTreeSet<String>,
}

impl From<&AnalyzerConfig> for AnalysisProfile {
    fn from(config: &AnalyzerConfig) -> Self {
        Self {
            model_version: config.model_version.clone(),
            sample_interval_ms: config.video_sample_interval_ms,
            max_frames: config.max_sampled_frames,
            weapon_threshold: config.weapon_marker_threshold,
            stolen_item_threshold: config.stolen_item_threshold,
            weapon_labels: config
                .weapon_labels
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
        }
    }
}

/// Strongest sighting of something across frames: highest confidence, earliest frame on ties
fn keep_strongest(slot: &mut Option<(f32, u64)>, confidence: f32, offset_ms: u64) {
    match slot {
        Some((best, at)) if *best > confidence || (*best == confidence && *at <= offset_ms) => {}
        _ => *slot = Some((confidence, offset_ms)),
    }
}

#[derive(Default)]
struct Aggregate {
    objects: BTreeMap<String, Option<(f32, u64)>>,
    weapons: BTreeMap<String, Option<(f32, u64)>>,
    stolen: BTreeMap<String, Option<(f32, u64)>>,
    faces: Vec<FaceRegion>,
    face_failure: Option<String>,
}

impl Aggregate {
    fn add(&mut self, offset_ms: u64, detections: FrameDetections, profile: &AnalysisProfile) {
        for object in detections.objects {
            let label = object.label.to_lowercase();
            if profile.weapon_labels.contains(&label) {
                keep_strongest(
                    self.weapons.entry(label.clone()).or_default(),
                    object.confidence,
                    offset_ms,
                );
            }
            keep_strongest(self.objects.entry(label).or_default(), object.confidence, offset_ms);
        }

        for item in detections.stolen_item_matches {
            keep_strongest(
                self.stolen.entry(item.label.to_lowercase()).or_default(),
                item.confidence,
                offset_ms,
            );
        }

        match detections.faces {
            Ok(faces) => self.faces.extend(faces.into_iter().filter_map(|face| {
                face.region.map(|r| FaceRegion {
                    frame_offset_ms: offset_ms,
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                    confidence: face.confidence,
                })
            })),
            Err(reason) => {
                self.face_failure.get_or_insert(format!("frame {}ms: {}", offset_ms, reason));
            }
        }
    }

    fn markers(
        found: BTreeMap<String, Option<(f32, u64)>>,
        kind: RiskMarkerKind,
        threshold: f32,
        surfaced: &mut Vec<RiskMarker>,
        low_confidence: &mut Vec<RiskMarker>,
    ) {
        for (label, best) in found {
            let Some((confidence, frame_offset_ms)) = best else {
                continue;
            };
            let marker = RiskMarker {
                kind,
                label,
                confidence,
                frame_offset_ms,
            };
            if confidence >= threshold {
                surfaced.push(marker);
            } else {
                low_confidence.push(marker);
            }
        }
    }
}

pub struct MediaAnalyzer {
    detector: Arc<dyn Detector>,
    sampler: Arc<dyn FrameSampler>,
}

impl MediaAnalyzer {
    pub fn new(detector: Arc<dyn Detector>, sampler: Arc<dyn FrameSampler>) -> Self {
        Self { detector, sampler }
    }

    /// Analyze one evidence blob with the given profile
    pub async fn analyze(
        &self,
        evidence_id: Uuid,
        blob: &[u8],
        media_kind: MediaKind,
        profile: &AnalysisProfile,
    ) -> Result<AnalysisResult> {
        let input_digest = storage::digest(blob);
        let failed = |reason: String| -> Result<AnalysisResult> {
            warn!("Analysis of evidence {} failed: {}", evidence_id, reason);
            Ok(AnalysisResult::failed(
                evidence_id,
                profile.model_version.clone(),
                input_digest.clone(),
                reason,
            ))
        };

        let format = match sniff(blob) {
            Some(format) => format,
            None => return failed("unrecognised media format".to_string()),
        };
        if format.kind() != media_kind {
            return failed(format!(
                "declared {} but content is {:?}",
                media_kind, format
            ));
        }

        let frames = match media_kind {
            MediaKind::Image => vec![Frame {
                offset_ms: 0,
                image: blob.to_vec(),
            }],
            MediaKind::Video => {
                let sampled = async {
                    let duration = self.sampler.probe_duration(blob).await?;
                    let offsets =
                        sample_offsets(duration, profile.sample_interval_ms, profile.max_frames);
                    self.sampler.frames_at(blob, &offsets).await
                };
                match sampled.await {
                    Ok(frames) if !frames.is_empty() => frames,
                    Ok(_) => return failed("video yielded no frames".to_string()),
                    Err(e) => return failed(e.to_string()),
                }
            }
        };

        let mut aggregate = Aggregate::default();
        for frame in &frames {
            match self.detector.detect(frame, &profile.model_version).await {
                Ok(detections) => aggregate.add(frame.offset_ms, detections, profile),
                Err(DetectorError::Rejected(reason)) => return failed(reason),
                Err(DetectorError::Unavailable(reason)) => {
                    return Err(Error::ServiceUnavailable(reason))
                }
            }
        }

        let result = build_result(
            evidence_id,
            input_digest.clone(),
            blob,
            frames.len() as u32,
            aggregate,
            profile,
        );
        info!(
            "Analyzed evidence {} with {}: {} markers, {} low-confidence, {} objects",
            evidence_id,
            profile.model_version,
            result.risk_markers.len(),
            result.low_confidence_markers.len(),
            result.objects.len()
        );
        Ok(result)
    }
}

fn build_result(
    evidence_id: Uuid,
    input_digest: String,
    blob: &[u8],
    frames_sampled: u32,
    aggregate: Aggregate,
    profile: &AnalysisProfile,
) -> AnalysisResult {
    let Aggregate {
        objects,
        weapons,
        stolen,
        mut faces,
        face_failure,
    } = aggregate;

    let mut risk_markers = Vec::new();
    let mut low_confidence_markers = Vec::new();
    Aggregate::markers(
        weapons,
        RiskMarkerKind::WeaponPresent,
        profile.weapon_threshold,
        &mut risk_markers,
        &mut low_confidence_markers,
    );
    Aggregate::markers(
        stolen,
        RiskMarkerKind::StolenItemMatch,
        profile.stolen_item_threshold,
        &mut risk_markers,
        &mut low_confidence_markers,
    );

    let objects: Vec<DetectedObject> = objects
        .into_iter()
        .filter_map(|(label, best)| {
            best.map(|(confidence, frame_offset_ms)| DetectedObject {
                label,
                confidence,
                frame_offset_ms,
            })
        })
        .collect();

    let (suggested_category, suggested_severity) = suggest(&objects, &risk_markers);

    faces.sort_by(|a, b| {
        (a.frame_offset_ms, a.y, a.x).cmp(&(b.frame_offset_ms, b.y, b.x))
    });
    let faces = match face_failure {
        Some(reason) => FaceScan::Failed { reason },
        None => FaceScan::Completed { regions: faces },
    };

    AnalysisResult {
        id: Uuid::new_v4(),
        evidence_id,
        analyzer_version: profile.model_version.clone(),
        input_digest,
        produced_at: Utc::now(),
        outcome: AnalysisOutcome::Completed,
        objects,
        risk_markers,
        low_confidence_markers,
        faces,
        suggested_category,
        suggested_severity,
        scene: SceneMetadata {
            captured_at: media::exif_capture_time(blob),
            coordinates: None,
            frames_sampled,
        },
    }
}

/// Category and severity contribution from surfaced findings only
fn suggest(objects: &[DetectedObject], markers: &[RiskMarker]) -> (Option<Category>, Option<Severity>) {
    let mut category = None;
    let mut severity: Option<Severity> = None;
    let mut raise = |value: Severity| {
        severity = Some(severity.map_or(value, |s| s.max(value)));
    };

    for marker in markers {
        match marker.kind {
            RiskMarkerKind::WeaponPresent => {
                raise(Severity::clamped(70.0 + 30.0 * marker.confidence as f64));
            }
            RiskMarkerKind::StolenItemMatch => {
                raise(Severity::clamped(40.0 + 20.0 * marker.confidence as f64));
                category = Some(Category::Theft);
            }
        }
    }

    if category.is_none() {
        category = objects
            .iter()
            .filter(|o| o.confidence >= CATEGORY_HINT_CONFIDENCE)
            .find_map(|o| {
                LABEL_CATEGORIES
                    .iter()
                    .find(|(label, _)| *label == o.label)
                    .map(|(_, c)| *c)
            });
        if category.is_some() {
            if let Some(hint) = Severity::new(CATEGORY_HINT_SEVERITY) {
                raise(hint);
            }
        }
    }

    (category, severity)
}
