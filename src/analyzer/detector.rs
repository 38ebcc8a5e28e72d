use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::Frame;
use crate::models::ModelVersion;

/// Bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub region: Option<Region>,
}

impl Detection {
    pub fn new(label: &str, confidence: f32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            region: None,
        }
    }

    pub fn at(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

/// Raw detector output for a single frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub objects: Vec<Detection>,
    /// Matches against the registry of reported stolen items
    pub stolen_item_matches: Vec<Detection>,
    /// Face boxes, or why face detection could not run on this frame
    pub faces: Result<Vec<Detection>, String>,
}

impl Default for FrameDetections {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            stolen_item_matches: Vec::new(),
            faces: Ok(Vec::new()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// The detector could not make sense of the frame
    #[error("frame rejected by detector: {0}")]
    Rejected(String),

    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

/// Object / face / stolen-item detection over a single decoded frame
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame, model: &ModelVersion)
        -> Result<FrameDetections, DetectorError>;
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image_base64: String,
    model_version: &'a str,
    detection_types: [&'static str; 3],
    return_base64: bool,
}

#[derive(Deserialize)]
struct WireDetection {
    #[serde(alias = "class")]
    label: String,
    confidence: f32,
    /// x, y, width, height
    #[serde(default)]
    bbox: Option<[u32; 4]>,
}

impl From<WireDetection> for Detection {
    fn from(wire: WireDetection) -> Self {
        Self {
            label: wire.label.to_lowercase(),
            confidence: wire.confidence,
            region: wire.bbox.map(|[x, y, width, height]| Region {
                x,
                y,
                width,
                height,
            }),
        }
    }
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
    #[serde(default)]
    stolen_item_matches: Vec<WireDetection>,
    #[serde(default)]
    faces: Vec<WireDetection>,
    #[serde(default)]
    face_error: Option<String>,
}

/// Detector backed by the remote inference service
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetector {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/process/image", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(
        &self,
        frame: &Frame,
        model: &ModelVersion,
    ) -> Result<FrameDetections, DetectorError> {
        let request = DetectRequest {
            image_base64: STANDARD.encode(&frame.image),
            model_version: &model.0,
            detection_types: ["object", "face", "stolen_item"],
            return_base64: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| DetectorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::UNSUPPORTED_MEDIA_TYPE
        {
            let body = response.text().await.unwrap_or_default();
            return Err(DetectorError::Rejected(body));
        }
        if !status.is_success() {
            return Err(DetectorError::Unavailable(format!(
                "inference service returned {}",
                status
            )));
        }

        let body: DetectResponse = response
            .json()
            .await
            .map_err(|e| DetectorError::Unavailable(format!("malformed response: {}", e)))?;
        debug!(
            "Frame at {}ms: {} detections, {} faces",
            frame.offset_ms,
            body.detections.len(),
            body.faces.len()
        );

        let faces = match body.face_error {
            Some(reason) => Err(reason),
            None => Ok(body.faces.into_iter().map(Detection::from).collect()),
        };
        Ok(FrameDetections {
            objects: body.detections.into_iter().map(Detection::from).collect(),
            stolen_item_matches: body
                .stolen_item_matches
                .into_iter()
                .map(Detection::from)
                .collect(),
            faces,
        })
    }
}
