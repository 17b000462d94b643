//! Webcam capture using nokhwa
//!
//! The camera is opened on the capture thread and every frame is decoded
//! to RGBA before delivery.

use crate::capture::traits::{CameraInfo, Resolution};
use crate::capture::worker::CaptureThread;
use crate::muxer::clock::MediaClock;
use crate::recorder::source::{
    CaptureSource, RecordingError, RecordingResult, Sample, SampleHandler, SourceConfig,
    SourceEventSender, SourceKind, VideoFrame,
};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// Consecutive failed reads before the camera counts as lost
const MAX_CONSECUTIVE_FAILURES: u32 = 60;

/// Get list of available cameras
pub fn get_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                CameraInfo {
                    id,
                    name: info.human_name().to_string(),
                    supported_resolutions: vec![
                        Resolution {
                            width: 1920,
                            height: 1080,
                        },
                        Resolution {
                            width: 1280,
                            height: 720,
                        },
                        Resolution {
                            width: 640,
                            height: 480,
                        },
                    ],
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Map a configured device id onto a nokhwa index
fn camera_index(device_id: Option<&str>) -> CameraIndex {
    match device_id {
        Some(id) => match id.parse::<u32>() {
            Ok(idx) => CameraIndex::Index(idx),
            Err(_) => CameraIndex::String(id.to_string()),
        },
        None => CameraIndex::Index(0),
    }
}

/// Webcam capture source
pub struct CameraSource {
    clock: MediaClock,
    index: Option<CameraIndex>,
    handler: Option<SampleHandler>,
    events: Option<SourceEventSender>,
    thread: Option<CaptureThread>,
}

impl CameraSource {
    pub fn new(clock: MediaClock) -> Self {
        Self {
            clock,
            index: None,
            handler: None,
            events: None,
            thread: None,
        }
    }
}

#[async_trait]
impl CaptureSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn set_sample_handler(&mut self, handler: SampleHandler) {
        self.handler = Some(handler);
    }

    fn set_event_sender(&mut self, events: SourceEventSender) {
        self.events = Some(events);
    }

    async fn configure(&mut self, config: &SourceConfig) -> RecordingResult<()> {
        let cameras = get_cameras();
        if cameras.is_empty() {
            return Err(RecordingError::DeviceNotFound("No cameras found".to_string()));
        }
        if let Some(id) = &config.device_id {
            if !cameras.iter().any(|c| &c.id == id || &c.name == id) {
                return Err(RecordingError::DeviceNotFound(format!("Camera {} not found", id)));
            }
        }

        self.index = Some(camera_index(config.device_id.as_deref()));
        tracing::info!("Camera source configured: {:?}", self.index);
        Ok(())
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.is_running() {
            return Err(RecordingError::AlreadyRecording);
        }
        let index = self.index.clone().ok_or_else(|| {
            RecordingError::ConfigurationError("Camera source not configured".to_string())
        })?;
        let handler = self.handler.clone().ok_or_else(|| {
            RecordingError::ConfigurationError("No sample handler set".to_string())
        })?;
        let clock = self.clock;

        let thread = CaptureThread::spawn(SourceKind::Camera, self.events.clone(), move |mut ctx| {
            let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

            let mut camera = match Camera::new(index.clone(), format) {
                Ok(c) => c,
                Err(e) => {
                    ctx.startup_failed(RecordingError::DeviceNotFound(format!(
                        "Failed to open camera {:?}: {}",
                        index, e
                    )));
                    return;
                }
            };
            if let Err(e) = camera.open_stream() {
                ctx.startup_failed(RecordingError::CaptureError(format!(
                    "Failed to open camera stream: {}",
                    e
                )));
                return;
            }

            let camera_format = camera.camera_format();
            tracing::info!(
                "Webcam opened: {}x{} @ {}fps, format={:?}",
                camera_format.resolution().width(),
                camera_format.resolution().height(),
                camera_format.frame_rate(),
                camera_format.format()
            );
            ctx.ready();

            let mut failures = 0u32;
            let mut frame_count = 0u64;

            while ctx.is_running() {
                // Blocks until the camera delivers; the device sets the pace
                let decoded = camera
                    .frame()
                    .and_then(|buffer| buffer.decode_image::<RgbAFormat>());
                match decoded {
                    Ok(image) => {
                        failures = 0;
                        let pts = clock.now();
                        let (width, height) = (image.width(), image.height());
                        handler(Sample::Video(VideoFrame::new(image.into_raw(), width, height, pts)));
                        frame_count += 1;
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::debug!("Failed to capture camera frame: {}", e);
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            ctx.fail(format!("Camera stopped delivering frames: {}", e));
                            break;
                        }
                    }
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }
            tracing::info!("Webcam capture thread stopped after {} frames", frame_count);
        })
        .await?;

        self.thread = Some(thread);
        tracing::info!("Webcam capture started");
        Ok(())
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        let thread = self.thread.take().ok_or(RecordingError::NotRecording)?;
        thread.stop().await;
        tracing::info!("Webcam capture stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| t.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_index_parsing() {
        assert_eq!(camera_index(None), CameraIndex::Index(0));
        assert_eq!(camera_index(Some("2")), CameraIndex::Index(2));
        assert_eq!(
            camera_index(Some("FaceTime HD Camera")),
            CameraIndex::String("FaceTime HD Camera".to_string())
        );
    }
}
