//! Command-line recorder
//!
//! Records the screen (plus camera and audio as configured) until the
//! duration elapses or Ctrl+C is pressed.

use anyhow::{Context, Result};
use clap::Parser;
use screenstudio_recorder::capture::NativeBackend;
use screenstudio_recorder::muxer::{FfmpegSinkFactory, MediaClock, Muxer, QualityPreset};
use screenstudio_recorder::recorder::source::CaptureBackend;
use screenstudio_recorder::recorder::{RecordingCoordinator, RecordingResult, RecordingState};
use screenstudio_recorder::settings::RecorderSettings;
use screenstudio_recorder::utils::AppError;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn parse_quality(value: &str) -> Result<QualityPreset, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown quality '{}', expected 720p, 1080p or 2160p", value))
}

#[derive(Parser)]
#[command(name = "screenstudio-recorder")]
#[command(about = "Record the screen with an optional camera bubble and audio")]
struct Args {
    /// Settings file (JSON); flags override its values
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long, requires = "settings")]
    save_settings: bool,

    /// List displays, cameras and audio inputs, then exit
    #[arg(long)]
    list_devices: bool,

    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Pause this many seconds after the recording starts
    #[arg(long)]
    pause_after: Option<u64>,

    /// How long to stay paused
    #[arg(long, default_value = "2")]
    pause_for: u64,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// File name prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Output quality: 720p, 1080p or 2160p
    #[arg(short, long, value_parser = parse_quality)]
    quality: Option<QualityPreset>,

    /// Frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Countdown seconds before capture starts
    #[arg(long)]
    countdown: Option<u32>,

    /// Display id to record (default: primary)
    #[arg(long)]
    display: Option<u32>,

    /// Composite the camera as a bubble; optionally pick the device
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    camera: Option<String>,

    /// Record the microphone; optionally pick the device
    #[arg(long, num_args = 0..=1, default_missing_value = "", conflicts_with = "no_mic")]
    mic: Option<String>,

    /// Don't record the microphone
    #[arg(long)]
    no_mic: bool,

    /// Record system audio
    #[arg(long)]
    system_audio: bool,

    /// Path to the ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl Args {
    fn apply(&self, settings: &mut RecorderSettings) {
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(prefix) = &self.prefix {
            settings.file_prefix = prefix.clone();
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(countdown) = self.countdown {
            settings.countdown_seconds = countdown;
        }
        if self.display.is_some() {
            settings.display_id = self.display;
        }
        if let Some(device) = &self.camera {
            settings.capture_camera = true;
            settings.camera_device_id = (!device.is_empty()).then(|| device.clone());
        }
        if let Some(device) = &self.mic {
            settings.capture_microphone = true;
            settings.microphone_device_id = (!device.is_empty()).then(|| device.clone());
        }
        if self.no_mic {
            settings.capture_microphone = false;
        }
        if self.system_audio {
            settings.capture_system_audio = true;
        }
    }
}

/// Log an error with its stable code before it leaves `main`
fn report(error: impl Into<AppError>) -> AppError {
    let error = error.into();
    tracing::error!(code = error.code(), "{}", error);
    error
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Pause,
    Resume,
    Stop,
}

/// Decide whether the run loop goes on after a scheduled pause or resume
///
/// A failed action is logged, not fatal: a source loss may already have
/// finalized the recording.
fn after_scheduled(action: Action, result: RecordingResult<()>, state: RecordingState) -> ControlFlow<()> {
    if let Err(e) = result {
        tracing::warn!("Scheduled {:?} skipped: {}", action, e);
    }
    if state == RecordingState::Idle {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

fn list_devices(backend: &NativeBackend) -> Result<()> {
    println!("Displays:");
    for display in backend.displays()? {
        println!(
            "  {} {} ({}x{} @{}x){}",
            display.id,
            display.name,
            display.width,
            display.height,
            display.scale_factor,
            if display.is_primary { " [primary]" } else { "" }
        );
    }
    println!("Cameras:");
    for camera in backend.cameras() {
        println!("  {} {}", camera.id, camera.name);
    }
    println!("Audio inputs:");
    for device in backend.audio_input_devices() {
        println!(
            "  {}{}",
            device.name,
            if device.is_default { " [default]" } else { "" }
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    screenstudio_recorder::init_tracing();

    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => RecorderSettings::load(path)
            .map_err(report)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => RecorderSettings::default(),
    };
    args.apply(&mut settings);
    settings.validate().map_err(report)?;

    if args.save_settings {
        if let Some(path) = &args.settings {
            settings.save(path).map_err(report)?;
            tracing::info!("Saved settings to {}", path.display());
        }
    }

    let clock = MediaClock::new();
    let backend = Arc::new(NativeBackend::new(clock));

    if args.list_devices {
        return list_devices(&backend);
    }

    tracing::info!("Screen recorder v{}", env!("CARGO_PKG_VERSION"));

    let muxer = Arc::new(Muxer::new(Arc::new(FfmpegSinkFactory::with_binary(&args.ffmpeg))));
    let mut coordinator = RecordingCoordinator::new(backend, muxer, clock, settings);

    coordinator
        .start()
        .await
        .map_err(report)
        .context("Failed to start recording")?;

    let started = Instant::now();
    let mut schedule = Vec::new();
    if let Some(after) = args.pause_after {
        let pause_at = started + Duration::from_secs(after);
        schedule.push((pause_at, Action::Pause));
        schedule.push((pause_at + Duration::from_secs(args.pause_for), Action::Resume));
    }
    if let Some(duration) = args.duration {
        schedule.push((started + Duration::from_secs(duration), Action::Stop));
    }
    schedule.sort_by_key(|(at, _)| *at);
    let mut schedule = schedule.into_iter().peekable();

    match args.duration {
        Some(d) => tracing::info!("Recording for {} seconds, press Ctrl+C to stop early", d),
        None => tracing::info!("Recording, press Ctrl+C to stop"),
    }

    loop {
        let next = schedule.peek().copied();
        let timer = async {
            match next {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = coordinator.next_source_event() => {
                if let Some(event) = event {
                    coordinator.handle_source_event(event).await;
                }
                if coordinator.state() == RecordingState::Idle {
                    break;
                }
            }
            _ = timer => {
                let Some((_, action)) = schedule.next() else { continue };
                let result = match action {
                    Action::Pause => coordinator.pause().await,
                    Action::Resume => coordinator.resume().await,
                    Action::Stop => break,
                };
                if after_scheduled(action, result, coordinator.state()).is_break() {
                    break;
                }
            }
        }
    }

    if coordinator.state() != RecordingState::Idle {
        let completed = coordinator
            .stop()
            .await
            .map_err(report)
            .context("Failed to finalize recording")?;
        tracing::info!(
            "Recorded {:.1}s, video {} frames written / {} dropped",
            completed.duration.as_secs_f64(),
            coordinator.muxer().stats().video_appended,
            coordinator.muxer().stats().video_dropped
        );
        println!("{}", completed.output_path.display());
        return Ok(());
    }

    if let Some(error) = coordinator.take_last_error() {
        tracing::error!("Recording ended early: {}", error);
    }
    match coordinator.last_recording() {
        Some(completed) => {
            println!("{}", completed.output_path.display());
            Ok(())
        }
        None => anyhow::bail!("Recording ended without a finalized file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenstudio_recorder::recorder::RecordingError;

    #[test]
    fn test_flags_override_settings() {
        let args = Args::parse_from([
            "screenstudio-recorder",
            "--quality",
            "720p",
            "--camera",
            "--no-mic",
            "--system-audio",
            "--fps",
            "60",
        ]);
        let mut settings = RecorderSettings::default();
        args.apply(&mut settings);

        assert_eq!(settings.quality, QualityPreset::Hd720);
        assert!(settings.capture_camera);
        assert_eq!(settings.camera_device_id, None);
        assert!(!settings.capture_microphone);
        assert!(settings.capture_system_audio);
        assert_eq!(settings.fps, 60);
    }

    #[test]
    fn test_device_ids_from_flags() {
        let args = Args::parse_from(["screenstudio-recorder", "--camera", "1", "--mic", "USB Mic"]);
        let mut settings = RecorderSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.camera_device_id.as_deref(), Some("1"));
        assert_eq!(settings.microphone_device_id.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn test_report_keeps_error_code() {
        let error = report(RecordingError::NotRecording);
        assert_eq!(error.code(), "RECORDING_ERROR");
    }

    #[test]
    fn test_failed_pause_after_source_loss_ends_loop() {
        let result = Err(RecordingError::InvalidState {
            operation: "pause",
            state: RecordingState::Idle.to_string(),
        });
        assert!(after_scheduled(Action::Pause, result, RecordingState::Idle).is_break());
    }

    #[test]
    fn test_scheduled_actions_keep_loop_running() {
        assert!(after_scheduled(Action::Pause, Ok(()), RecordingState::Paused).is_continue());
        let result = Err(RecordingError::InvalidState {
            operation: "resume",
            state: RecordingState::Recording.to_string(),
        });
        assert!(after_scheduled(Action::Resume, result, RecordingState::Recording).is_continue());
    }

    #[test]
    fn test_bad_quality_rejected() {
        assert!(parse_quality("4k").is_err());
        assert_eq!(parse_quality("2160p"), Ok(QualityPreset::Uhd2160));
    }
}
