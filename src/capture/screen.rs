//! Screen capture using xcap
//!
//! The monitor is polled at the configured frame rate on a dedicated
//! thread. Each poll yields one RGBA frame stamped on the media clock.

use crate::capture::traits::DisplayInfo;
use crate::capture::worker::CaptureThread;
use crate::muxer::clock::MediaClock;
use crate::recorder::source::{
    CaptureSource, RecordingError, RecordingResult, Sample, SampleHandler, SourceConfig,
    SourceEventSender, SourceKind, VideoFrame,
};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use xcap::Monitor;

/// Consecutive failed grabs before the display counts as lost
const MAX_CONSECUTIVE_FAILURES: u32 = 30;

const DEFAULT_FPS: u32 = 30;

/// Get list of available displays
pub fn get_displays() -> RecordingResult<Vec<DisplayInfo>> {
    let monitors = Monitor::all()
        .map_err(|e| RecordingError::CaptureError(format!("Failed to list displays: {}", e)))?;

    Ok(monitors
        .iter()
        .map(|m| {
            let frequency = m.frequency();
            DisplayInfo {
                id: m.id(),
                name: m.name().to_string(),
                width: m.width(),
                height: m.height(),
                scale_factor: m.scale_factor() as f64,
                is_primary: m.is_primary(),
                refresh_rate: (frequency > 0.0).then(|| frequency.round() as u32),
            }
        })
        .collect())
}

fn find_monitor(display_id: u32) -> RecordingResult<Monitor> {
    Monitor::all()
        .map_err(|e| RecordingError::CaptureError(format!("Failed to list displays: {}", e)))?
        .into_iter()
        .find(|m| m.id() == display_id)
        .ok_or_else(|| RecordingError::DeviceNotFound(format!("Display {} not found", display_id)))
}

/// Screen capture source
pub struct ScreenSource {
    clock: MediaClock,
    display_id: Option<u32>,
    fps: u32,
    handler: Option<SampleHandler>,
    events: Option<SourceEventSender>,
    thread: Option<CaptureThread>,
}

impl ScreenSource {
    pub fn new(clock: MediaClock) -> Self {
        Self {
            clock,
            display_id: None,
            fps: DEFAULT_FPS,
            handler: None,
            events: None,
            thread: None,
        }
    }
}

#[async_trait]
impl CaptureSource for ScreenSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Screen
    }

    fn set_sample_handler(&mut self, handler: SampleHandler) {
        self.handler = Some(handler);
    }

    fn set_event_sender(&mut self, events: SourceEventSender) {
        self.events = Some(events);
    }

    async fn configure(&mut self, config: &SourceConfig) -> RecordingResult<()> {
        let displays = get_displays()?;
        let requested = match &config.device_id {
            Some(id) => Some(id.parse::<u32>().map_err(|_| {
                RecordingError::ConfigurationError(format!("Invalid display id: {}", id))
            })?),
            None => None,
        };

        let selected = match requested {
            Some(id) => displays.iter().find(|d| d.id == id).ok_or_else(|| {
                RecordingError::DeviceNotFound(format!("Display {} not found", id))
            })?,
            None => displays
                .iter()
                .find(|d| d.is_primary)
                .or_else(|| displays.first())
                .ok_or_else(|| RecordingError::DeviceNotFound("No displays found".to_string()))?,
        };

        self.display_id = Some(selected.id);
        if config.frame_rate > 0 {
            self.fps = config.frame_rate;
        }

        tracing::info!(
            "Screen source configured: {} ({}x{}) @ {}fps",
            selected.name,
            selected.width,
            selected.height,
            self.fps
        );
        Ok(())
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.is_running() {
            return Err(RecordingError::AlreadyRecording);
        }
        let display_id = self.display_id.ok_or_else(|| {
            RecordingError::ConfigurationError("Screen source not configured".to_string())
        })?;
        let handler = self.handler.clone().ok_or_else(|| {
            RecordingError::ConfigurationError("No sample handler set".to_string())
        })?;

        let clock = self.clock;
        let interval = Duration::from_secs_f64(1.0 / self.fps as f64);

        let thread = CaptureThread::spawn(SourceKind::Screen, self.events.clone(), move |mut ctx| {
            let monitor = match find_monitor(display_id) {
                Ok(m) => m,
                Err(e) => {
                    ctx.startup_failed(e);
                    return;
                }
            };
            ctx.ready();

            let mut failures = 0u32;
            let mut frame_count = 0u64;
            let mut next = Instant::now();

            while ctx.is_running() {
                let pts = clock.now();
                match monitor.capture_image() {
                    Ok(image) => {
                        failures = 0;
                        let (width, height) = (image.width(), image.height());
                        handler(Sample::Video(VideoFrame::new(image.into_raw(), width, height, pts)));
                        frame_count += 1;
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::debug!("Failed to capture display {}: {}", display_id, e);
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            ctx.fail(format!("Display {} stopped delivering frames: {}", display_id, e));
                            break;
                        }
                    }
                }

                next += interval;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    // Fell behind; don't try to catch up with a burst
                    next = now;
                }
            }

            tracing::info!("Screen capture thread stopped after {} frames", frame_count);
        })
        .await?;

        self.thread = Some(thread);
        tracing::info!("Screen capture started on display {}", display_id);
        Ok(())
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        let thread = self.thread.take().ok_or(RecordingError::NotRecording)?;
        thread.stop().await;
        tracing::info!("Screen capture stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| t.is_running())
    }
}
