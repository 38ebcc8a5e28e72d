use async_trait::async_trait;
use thiserror::Error;

use super::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported media: {0}")]
    Unsupported(String),

    #[error("corrupt media: {0}")]
    Corrupt(String),
}

/// Video decoding seam; the analyzer decides which offsets to sample
#[async_trait]
pub trait FrameSampler: Send + Sync {
    /// Length of the video in milliseconds
    async fn probe_duration(&self, video: &[u8]) -> Result<u64, DecodeError>;

    /// Encoded still images at the requested offsets, in the same order
    async fn frames_at(&self, video: &[u8], offsets_ms: &[u64]) -> Result<Vec<Frame>, DecodeError>;
}

/// Sampler used when no video decoder is configured; every video fails analysis
pub struct NoVideoSampler;

#[async_trait]
impl FrameSampler for NoVideoSampler {
    async fn probe_duration(&self, _video: &[u8]) -> Result<u64, DecodeError> {
        Err(DecodeError::Unsupported("no video decoder configured".to_string()))
    }

    async fn frames_at(&self, _video: &[u8], _offsets_ms: &[u64]) -> Result<Vec<Frame>, DecodeError> {
        Err(DecodeError::Unsupported("no video decoder configured".to_string()))
    }
}

/// Fixed-interval sample offsets covering `duration_ms`, at most `max_frames`
pub fn sample_offsets(duration_ms: u64, interval_ms: u64, max_frames: u32) -> Vec<u64> {
    let interval_ms = interval_ms.max(1);
    let mut offsets = vec![0];
    let mut next = interval_ms;
    while next < duration_ms && offsets.len() < max_frames as usize {
        offsets.push(next);
        next += interval_ms;
    }
    offsets.truncate(max_frames.max(1) as usize);
    offsets
}

#[cfg(feature = "gst")]
pub use gst_sampler::GstFrameSampler;

#[cfg(feature = "gst")]
mod gst_sampler {
    use async_trait::async_trait;
    use gst::prelude::*;
    use gstreamer as gst;
    use gstreamer_app as gst_app;
    use log::{debug, warn};
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    use super::{DecodeError, Frame, FrameSampler};

    const PREROLL_TIMEOUT_SECS: u64 = 10;

    /// Decodes video with GStreamer and snapshots frames as JPEG
    pub struct GstFrameSampler {
        scratch_dir: PathBuf,
    }

    impl GstFrameSampler {
        pub fn new(scratch_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
            gst::init()?;
            std::fs::create_dir_all(scratch_dir.as_ref())?;
            Ok(Self {
                scratch_dir: scratch_dir.as_ref().to_path_buf(),
            })
        }

        async fn with_scratch_file<T, F>(&self, video: &[u8], work: F) -> Result<T, DecodeError>
        where
            T: Send + 'static,
            F: FnOnce(&Path) -> Result<T, DecodeError> + Send + 'static,
        {
            let path = self.scratch_dir.join(format!("sample-{}", Uuid::new_v4()));
            tokio::fs::write(&path, video)
                .await
                .map_err(|e| DecodeError::Unsupported(format!("scratch write failed: {}", e)))?;

            let job_path = path.clone();
            let result = tokio::task::spawn_blocking(move || work(&job_path))
                .await
                .map_err(|e| DecodeError::Corrupt(format!("decoder panicked: {}", e)))?;

            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove scratch file {}: {}", path.display(), e);
            }
            result
        }
    }

    fn open(path: &Path) -> Result<(gst::Pipeline, gst_app::AppSink), DecodeError> {
        let description = format!(
            "filesrc location=\"{}\" ! decodebin ! videoconvert ! jpegenc ! appsink name=sink sync=false",
            path.display()
        );
        let pipeline = gst::parse::launch(&description)
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| DecodeError::Unsupported("not a pipeline".to_string()))?;
        let sink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| DecodeError::Unsupported("appsink missing".to_string()))?;

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
        result.map_err(|_| DecodeError::Corrupt("stream could not be prerolled".to_string()))?;
        Ok((pipeline, sink))
    }

    fn close(pipeline: &gst::Pipeline) {
        if let Err(e) = pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop sampling pipeline: {}", e);
        }
    }

    #[async_trait]
    impl FrameSampler for GstFrameSampler {
        async fn probe_duration(&self, video: &[u8]) -> Result<u64, DecodeError> {
            self.with_scratch_file(video, |path| {
                let (pipeline, _sink) = open(path)?;
                let duration = pipeline.query_duration::<gst::ClockTime>();
                close(&pipeline);
                duration
                    .map(|d| d.mseconds())
                    .ok_or_else(|| DecodeError::Corrupt("unknown duration".to_string()))
            })
            .await
        }

        async fn frames_at(
            &self,
            video: &[u8],
            offsets_ms: &[u64],
        ) -> Result<Vec<Frame>, DecodeError> {
            let offsets = offsets_ms.to_vec();
            self.with_scratch_file(video, move |path| {
                let (pipeline, sink) = open(path)?;
                let mut frames = Vec::with_capacity(offsets.len());

                for offset_ms in offsets {
                    let seeked = pipeline.seek_simple(
                        gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                        gst::ClockTime::from_mseconds(offset_ms),
                    );
                    if let Err(e) = seeked {
                        close(&pipeline);
                        return Err(DecodeError::Corrupt(format!("seek to {}ms failed: {}", offset_ms, e)));
                    }

                    let sample = sink
                        .try_pull_preroll(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS))
                        .ok_or_else(|| DecodeError::Corrupt(format!("no frame at {}ms", offset_ms)));
                    let sample = match sample {
                        Ok(sample) => sample,
                        Err(e) => {
                            close(&pipeline);
                            return Err(e);
                        }
                    };
                    let image = sample
                        .buffer()
                        .and_then(|buffer| buffer.map_readable().ok().map(|map| map.as_slice().to_vec()))
                        .unwrap_or_default();
                    debug!("Sampled frame at {}ms ({} bytes)", offset_ms, image.len());
                    frames.push(Frame { offset_ms, image });
                }

                close(&pipeline);
                Ok(frames)
            })
            .await
        }
    }
}
