//! Audio capture using cpal
//!
//! The microphone is an ordinary input stream. System audio is captured
//! by opening an input stream on the default output device, which cpal's
//! WASAPI backend turns into loopback capture.

use crate::capture::traits::AudioDeviceInfo;
use crate::capture::worker::{CaptureThread, StopReporter};
use crate::muxer::clock::MediaClock;
use crate::recorder::source::{
    AudioFrame, CaptureSource, RecordingError, RecordingResult, Sample, SampleHandler,
    SourceConfig, SourceEventSender, SourceKind,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::time::Duration;

/// List audio input devices
pub fn get_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|device| device.name().ok())
            .map(|name| AudioDeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                is_input: true,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate audio input devices: {}", e);
            Vec::new()
        }
    }
}

/// Which device an audio source opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioEndpoint {
    Microphone,
    Loopback,
}

impl AudioEndpoint {
    fn kind(&self) -> SourceKind {
        match self {
            AudioEndpoint::Microphone => SourceKind::Microphone,
            AudioEndpoint::Loopback => SourceKind::SystemAudio,
        }
    }
}

/// Resolve the device and its native format
fn open_device(endpoint: AudioEndpoint, name: Option<&str>) -> RecordingResult<(Device, SampleFormat, StreamConfig)> {
    let host = cpal::default_host();

    let device = match (endpoint, name) {
        (AudioEndpoint::Microphone, Some(name)) => host
            .input_devices()
            .map_err(|e| RecordingError::CaptureError(format!("Failed to list input devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| RecordingError::DeviceNotFound(format!("Microphone {} not found", name)))?,
        (AudioEndpoint::Microphone, None) => host
            .default_input_device()
            .ok_or_else(|| RecordingError::DeviceNotFound("No default input device".to_string()))?,
        (AudioEndpoint::Loopback, _) => host
            .default_output_device()
            .ok_or_else(|| RecordingError::DeviceNotFound("No default output device".to_string()))?,
    };

    let supported = match endpoint {
        AudioEndpoint::Microphone => device.default_input_config(),
        AudioEndpoint::Loopback => device.default_output_config(),
    }
    .map_err(|e| RecordingError::ConfigurationError(format!("Failed to get audio config: {}", e)))?;

    Ok((device, supported.sample_format(), supported.into()))
}

/// Build an input stream converting every sample to f32
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    clock: MediaClock,
    handler: SampleHandler,
    reporter: StopReporter,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let sample_rate = config.sample_rate.0;

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if data.is_empty() {
                return;
            }
            let samples = data.iter().map(|&s| s.to_sample::<f32>()).collect();
            let mut frame = AudioFrame::new(samples, channels, sample_rate, Duration::ZERO);
            // Stamp the block at its first sample
            frame.pts = clock.now().saturating_sub(frame.duration());
            handler(Sample::Audio(frame));
        },
        move |err| reporter.fail(format!("Audio stream error: {}", err)),
        None,
    )
}

/// Shared implementation of the microphone and system audio sources
struct AudioCapture {
    endpoint: AudioEndpoint,
    clock: MediaClock,
    device_name: Option<String>,
    configured: bool,
    handler: Option<SampleHandler>,
    events: Option<SourceEventSender>,
    thread: Option<CaptureThread>,
}

impl AudioCapture {
    fn new(endpoint: AudioEndpoint, clock: MediaClock) -> Self {
        Self {
            endpoint,
            clock,
            device_name: None,
            configured: false,
            handler: None,
            events: None,
            thread: None,
        }
    }

    fn configure(&mut self, config: &SourceConfig) -> RecordingResult<()> {
        if self.endpoint == AudioEndpoint::Loopback && !cfg!(target_os = "windows") {
            return Err(RecordingError::ConfigurationError(
                "System audio loopback is only supported with WASAPI".to_string(),
            ));
        }

        let (device, format, stream_config) = open_device(self.endpoint, config.device_id.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::info!(
            "{} source configured: {} ({}Hz, {}ch, {:?})",
            self.endpoint.kind(),
            name,
            stream_config.sample_rate.0,
            stream_config.channels,
            format
        );

        self.device_name = config.device_id.clone();
        self.configured = true;
        Ok(())
    }

    async fn start(&mut self) -> RecordingResult<()> {
        if self.is_running() {
            return Err(RecordingError::AlreadyRecording);
        }
        if !self.configured {
            return Err(RecordingError::ConfigurationError(format!(
                "{} source not configured",
                self.endpoint.kind()
            )));
        }
        let handler = self.handler.clone().ok_or_else(|| {
            RecordingError::ConfigurationError("No sample handler set".to_string())
        })?;

        let endpoint = self.endpoint;
        let device_name = self.device_name.clone();
        let clock = self.clock;

        let thread = CaptureThread::spawn(endpoint.kind(), self.events.clone(), move |mut ctx| {
            let (device, format, config) = match open_device(endpoint, device_name.as_deref()) {
                Ok(opened) => opened,
                Err(e) => {
                    ctx.startup_failed(e);
                    return;
                }
            };

            let reporter = ctx.reporter();
            let stream = match format {
                SampleFormat::F32 => build_stream::<f32>(&device, &config, clock, handler, reporter),
                SampleFormat::I16 => build_stream::<i16>(&device, &config, clock, handler, reporter),
                SampleFormat::U16 => build_stream::<u16>(&device, &config, clock, handler, reporter),
                SampleFormat::I32 => build_stream::<i32>(&device, &config, clock, handler, reporter),
                other => {
                    ctx.startup_failed(RecordingError::ConfigurationError(format!(
                        "Unsupported sample format {:?}",
                        other
                    )));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    ctx.startup_failed(RecordingError::CaptureError(format!(
                        "Failed to build audio stream: {}",
                        e
                    )));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                ctx.startup_failed(RecordingError::CaptureError(format!(
                    "Failed to start audio stream: {}",
                    e
                )));
                return;
            }

            ctx.ready();
            tracing::info!("{} stream started", endpoint.kind());

            // The stream lives as long as this thread
            while ctx.is_running() {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);

            tracing::info!("{} stream stopped", endpoint.kind());
        })
        .await?;

        self.thread = Some(thread);
        Ok(())
    }

    async fn stop(&mut self) -> RecordingResult<()> {
        let thread = self.thread.take().ok_or(RecordingError::NotRecording)?;
        thread.stop().await;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| t.is_running())
    }
}

/// Microphone capture source
pub struct MicrophoneSource(AudioCapture);

impl MicrophoneSource {
    pub fn new(clock: MediaClock) -> Self {
        Self(AudioCapture::new(AudioEndpoint::Microphone, clock))
    }
}

/// System audio (loopback) capture source
pub struct SystemAudioSource(AudioCapture);

impl SystemAudioSource {
    pub fn new(clock: MediaClock) -> Self {
        Self(AudioCapture::new(AudioEndpoint::Loopback, clock))
    }
}

macro_rules! impl_audio_source {
    ($source:ty) => {
        #[async_trait]
        impl CaptureSource for $source {
            fn kind(&self) -> SourceKind {
                self.0.endpoint.kind()
            }

            fn set_sample_handler(&mut self, handler: SampleHandler) {
                self.0.handler = Some(handler);
            }

            fn set_event_sender(&mut self, events: SourceEventSender) {
                self.0.events = Some(events);
            }

            async fn configure(&mut self, config: &SourceConfig) -> RecordingResult<()> {
                self.0.configure(config)
            }

            async fn start(&mut self) -> RecordingResult<()> {
                self.0.start().await
            }

            async fn stop(&mut self) -> RecordingResult<()> {
                self.0.stop().await
            }

            fn is_running(&self) -> bool {
                self.0.is_running()
            }
        }
    };
}

impl_audio_source!(MicrophoneSource);
impl_audio_source!(SystemAudioSource);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_kinds() {
        assert_eq!(AudioEndpoint::Microphone.kind(), SourceKind::Microphone);
        assert_eq!(AudioEndpoint::Loopback.kind(), SourceKind::SystemAudio);
    }

    #[tokio::test]
    async fn test_start_requires_configure() {
        let mut source = MicrophoneSource::new(MediaClock::new());
        source.set_sample_handler(std::sync::Arc::new(|_| {}));
        assert!(matches!(
            source.start().await,
            Err(RecordingError::ConfigurationError(_))
        ));
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_not_recording() {
        let mut source = SystemAudioSource::new(MediaClock::new());
        assert!(matches!(source.stop().await, Err(RecordingError::NotRecording)));
    }
}
