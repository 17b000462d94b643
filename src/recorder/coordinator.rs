//! Recording coordinator
//!
//! Drives the recording state machine: countdown, source bring-up with
//! rollback, pause/resume and finalization. Sources push samples straight
//! into the muxer; the coordinator only starts and stops things.

use super::source::{
    CaptureBackend, CaptureSource, RecordingError, RecordingResult, Sample, SampleHandler,
    SourceConfig, SourceEvent, SourceEventSender, SourceKind,
};
use super::state::{CompletedRecording, ElapsedTimer, RecordingEvent, RecordingSession, RecordingState};
use crate::capture::traits::select_display;
use crate::muxer::clock::MediaClock;
use crate::muxer::pipeline::Muxer;
use crate::muxer::types::{AudioTrack, MuxError};
use crate::settings::RecorderSettings;
use crate::utils::naming;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Route a source's samples to the right muxer input
fn sample_handler(muxer: Arc<Muxer>, kind: SourceKind) -> SampleHandler {
    Arc::new(move |sample| match (kind, sample) {
        (SourceKind::Screen, Sample::Video(frame)) => {
            muxer.append_video_frame(frame);
        }
        (SourceKind::Camera, Sample::Video(frame)) => muxer.update_secondary_frame(frame),
        (SourceKind::Microphone, Sample::Audio(frame)) => {
            muxer.append_audio_frame(frame, AudioTrack::Microphone);
        }
        (SourceKind::SystemAudio, Sample::Audio(frame)) => {
            muxer.append_audio_frame(frame, AudioTrack::System);
        }
        (kind, _) => tracing::debug!("Ignoring mismatched sample from {} source", kind),
    })
}

/// Owns the sources and the muxer for the lifetime of a recording
pub struct RecordingCoordinator {
    backend: Arc<dyn CaptureBackend>,
    muxer: Arc<Muxer>,
    clock: MediaClock,
    settings: RecorderSettings,

    /// Current recording state
    state: Arc<RwLock<RecordingState>>,

    /// Screen source; torn down on pause and rebuilt on resume
    screen: Option<Box<dyn CaptureSource>>,

    /// Configuration the screen source was started with
    screen_config: Option<SourceConfig>,

    /// Camera and audio sources, paused in place
    companions: Vec<Box<dyn CaptureSource>>,

    session: Option<RecordingSession>,
    last_recording: Option<CompletedRecording>,
    last_error: Option<String>,
    timer: ElapsedTimer,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,

    source_tx: SourceEventSender,
    source_rx: mpsc::UnboundedReceiver<SourceEvent>,
}

impl RecordingCoordinator {
    /// Create a coordinator; `clock` must be the one the backend stamps with
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        muxer: Arc<Muxer>,
        clock: MediaClock,
        settings: RecorderSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (source_tx, source_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            muxer,
            clock,
            settings,
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            screen: None,
            screen_config: None,
            companions: Vec::new(),
            session: None,
            last_recording: None,
            last_error: None,
            timer: ElapsedTimer::new(),
            event_tx,
            source_tx,
            source_rx,
        }
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Recorded time so far, excluding pauses
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// The most recent successfully finalized recording
    pub fn last_recording(&self) -> Option<&CompletedRecording> {
        self.last_recording.as_ref()
    }

    /// Runtime error from the last forced stop; cleared once read
    pub fn take_last_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn muxer(&self) -> &Arc<Muxer> {
        &self.muxer
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Replace the settings used by the next `start`
    pub fn set_settings(&mut self, settings: RecorderSettings) {
        self.settings = settings;
    }

    fn set_state(&self, state: RecordingState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: RecordingEvent) {
        let _ = self.event_tx.send(event);
    }

    fn invalid(&self, operation: &'static str) -> RecordingError {
        RecordingError::InvalidState {
            operation,
            state: self.state().to_string(),
        }
    }

    /// Start recording
    ///
    /// Does nothing unless idle. Any failure during bring-up undoes
    /// everything already started and returns to idle.
    pub async fn start(&mut self) -> RecordingResult<()> {
        let current_state = self.state();
        if current_state != RecordingState::Idle {
            tracing::debug!("Ignoring start while {}", current_state);
            return Ok(());
        }

        let displays = match self.backend.displays() {
            Ok(displays) => displays,
            Err(e) => return Err(self.report_start_failure(e)),
        };
        let Some(selected) = select_display(&displays, self.settings.display_id) else {
            return Err(self.report_start_failure(RecordingError::DeviceNotFound(
                "No displays found".to_string(),
            )));
        };
        let screen_config = SourceConfig {
            device_id: Some(selected.id.to_string()),
            frame_rate: self.settings.fps,
        };
        tracing::info!(
            "Recording display {} ({}x{}), {} camera(s), {} audio input(s) available",
            selected.name,
            selected.width,
            selected.height,
            if self.settings.capture_camera { self.backend.cameras().len() } else { 0 },
            if self.settings.capture_microphone { self.backend.audio_input_devices().len() } else { 0 }
        );

        self.countdown().await;
        self.discard_stale_source_events();

        if let Err(e) = self.bring_up(screen_config).await {
            tracing::error!("Failed to start recording: {}", e);
            self.rollback().await;
            return Err(self.report_start_failure(e));
        }

        self.timer.reset();
        self.timer.resume();
        self.set_state(RecordingState::Recording);
        self.emit(RecordingEvent::Started);

        tracing::info!("Recording started");
        Ok(())
    }

    fn report_start_failure(&self, error: RecordingError) -> RecordingError {
        self.set_state(RecordingState::Idle);
        self.emit(RecordingEvent::Error(error.to_string()));
        error
    }

    /// Drop events left over from sources of an earlier recording
    fn discard_stale_source_events(&mut self) {
        let mut stale = 0;
        while let Ok(SourceEvent::StoppedUnexpectedly { kind, reason }) = self.source_rx.try_recv() {
            tracing::debug!("Discarding stale stop of {} source: {}", kind, reason);
            stale += 1;
        }
        if stale > 0 {
            tracing::info!("Discarded {} source event(s) from the previous recording", stale);
        }
    }

    /// One tick per second; cannot be interrupted
    async fn countdown(&mut self) {
        for seconds_remaining in (1..=self.settings.countdown_seconds).rev() {
            self.set_state(RecordingState::Countdown { seconds_remaining });
            self.emit(RecordingEvent::CountdownTick(seconds_remaining));
            tracing::debug!("Countdown: {}", seconds_remaining);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn bring_up(&mut self, screen_config: SourceConfig) -> RecordingResult<()> {
        let output = naming::output_path(&self.settings.output_dir, &self.settings.file_prefix);
        self.muxer
            .setup(&output, self.settings.muxer_config())
            .map_err(|e| match e {
                MuxError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                    RecordingError::PermissionDenied(format!(
                        "Cannot write to {}: {}",
                        output.display(),
                        io
                    ))
                }
                other => other.into(),
            })?;
        self.session = Some(RecordingSession::new(output.clone()));
        tracing::info!("Starting recording to: {:?}", output);

        let screen = self.start_source(SourceKind::Screen, &screen_config).await?;
        self.screen = Some(screen);
        self.screen_config = Some(screen_config);

        let fps = self.settings.fps;
        let mut wanted = Vec::new();
        if self.settings.capture_camera {
            wanted.push((SourceKind::Camera, self.settings.camera_device_id.clone()));
        }
        if self.settings.capture_microphone {
            wanted.push((SourceKind::Microphone, self.settings.microphone_device_id.clone()));
        }
        if self.settings.capture_system_audio {
            wanted.push((SourceKind::SystemAudio, None));
        }

        for (kind, device_id) in wanted {
            let config = SourceConfig {
                device_id,
                frame_rate: fps,
            };
            let source = self.start_source(kind, &config).await?;
            self.companions.push(source);
        }
        Ok(())
    }

    /// Build, wire, configure and start one source
    async fn start_source(
        &self,
        kind: SourceKind,
        config: &SourceConfig,
    ) -> RecordingResult<Box<dyn CaptureSource>> {
        let mut source = self.backend.create_source(kind)?;
        source.set_sample_handler(sample_handler(self.muxer.clone(), kind));
        source.set_event_sender(self.source_tx.clone());
        source.configure(config).await?;
        source.start().await?;
        tracing::info!("{} source started", kind);
        Ok(source)
    }

    /// Stop every started source and discard the partial output
    async fn rollback(&mut self) {
        self.stop_sources().await;
        self.muxer.cancel();
        self.session = None;
        self.screen_config = None;
        self.timer.reset();
        self.set_state(RecordingState::Idle);
        tracing::info!("Recording bring-up rolled back");
    }

    async fn stop_sources(&mut self) {
        for mut source in self.companions.drain(..) {
            if source.is_running() {
                if let Err(e) = source.stop().await {
                    tracing::warn!("Failed to stop {} source: {}", source.kind(), e);
                }
            }
        }
        if let Some(mut screen) = self.screen.take() {
            if screen.is_running() {
                if let Err(e) = screen.stop().await {
                    tracing::warn!("Failed to stop screen source: {}", e);
                }
            }
        }
    }

    /// Pause recording
    pub async fn pause(&mut self) -> RecordingResult<()> {
        if self.state() != RecordingState::Recording {
            return Err(self.invalid("pause"));
        }

        tracing::info!("Pausing recording");
        self.muxer.pause(self.clock.now());

        // The screen source is rebuilt on resume rather than paused
        if let Some(mut screen) = self.screen.take() {
            if let Err(e) = screen.stop().await {
                tracing::warn!("Failed to stop screen source: {}", e);
            }
        }
        for source in self.companions.iter_mut() {
            if source.is_running() {
                if let Err(e) = source.pause().await {
                    tracing::warn!("Failed to pause {} source: {}", source.kind(), e);
                }
            }
        }

        self.timer.pause();
        self.set_state(RecordingState::Paused);
        self.emit(RecordingEvent::Paused);
        Ok(())
    }

    /// Resume recording
    ///
    /// If a source cannot be restarted the recording is stopped and the
    /// error kept as the last error.
    pub async fn resume(&mut self) -> RecordingResult<()> {
        if self.state() != RecordingState::Paused {
            return Err(self.invalid("resume"));
        }

        tracing::info!("Resuming recording");
        self.set_state(RecordingState::Recording);
        self.timer.resume();

        if let Err(e) = self.restart_sources().await {
            let message = format!("Failed to resume recording: {}", e);
            tracing::error!("{}", message);
            self.last_error = Some(message.clone());
            self.emit(RecordingEvent::Error(message));
            if let Err(stop_error) = self.finish_recording().await {
                tracing::error!("Failed to finalize after resume failure: {}", stop_error);
            }
            return Err(e);
        }

        self.muxer.resume(self.clock.now());
        self.emit(RecordingEvent::Resumed);
        Ok(())
    }

    async fn restart_sources(&mut self) -> RecordingResult<()> {
        let config = self.screen_config.clone().ok_or_else(|| {
            RecordingError::ConfigurationError("No screen configuration to resume".to_string())
        })?;
        let screen = self.start_source(SourceKind::Screen, &config).await?;
        self.screen = Some(screen);

        for source in self.companions.iter_mut() {
            source.resume().await?;
        }
        Ok(())
    }

    /// Stop recording and finalize the file
    pub async fn stop(&mut self) -> RecordingResult<CompletedRecording> {
        match self.state() {
            RecordingState::Recording | RecordingState::Paused => {}
            _ => return Err(self.invalid("stop")),
        }
        self.finish_recording().await
    }

    /// Shared by `stop`, source loss and resume failure
    async fn finish_recording(&mut self) -> RecordingResult<CompletedRecording> {
        tracing::info!("Stopping recording");
        self.set_state(RecordingState::Finishing);

        self.stop_sources().await;
        self.timer.pause();

        let result = self.muxer.finish().await;

        let duration = self.timer.elapsed();
        let session = self.session.take();
        self.screen_config = None;
        self.timer.reset();
        self.set_state(RecordingState::Idle);

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("Failed to finalize recording: {}", e);
                self.emit(RecordingEvent::Error(e.to_string()));
                return Err(e.into());
            }
        };

        let mut session = session.unwrap_or_else(|| RecordingSession::new(output.path.clone()));
        session.duration = duration;
        session.output_path = output.path.clone();
        let completed = CompletedRecording::from(session);

        tracing::info!(
            "Recording stopped. Duration: {:.2}s, file: {:?}",
            duration.as_secs_f64(),
            completed.output_path
        );
        self.last_recording = Some(completed.clone());
        self.emit(RecordingEvent::Stopped(completed.output_path.clone()));
        Ok(completed)
    }

    /// Wait for the next event from a running source
    pub async fn next_source_event(&mut self) -> Option<SourceEvent> {
        self.source_rx.recv().await
    }

    /// React to a source event; an unexpected stop ends the recording
    pub async fn handle_source_event(&mut self, event: SourceEvent) {
        let SourceEvent::StoppedUnexpectedly { kind, reason } = event;
        match self.state() {
            RecordingState::Recording | RecordingState::Paused => {}
            state => {
                tracing::debug!("Ignoring stop of {} source while {}", kind, state);
                return;
            }
        }

        let message = format!("{} source stopped unexpectedly: {}", kind, reason);
        tracing::warn!("{}", message);
        self.last_error = Some(message.clone());
        self.emit(RecordingEvent::Error(message));

        if let Err(e) = self.finish_recording().await {
            tracing::error!("Failed to finalize after source loss: {}", e);
        }
    }

    /// Handle every source event already queued, without waiting
    pub async fn process_source_events(&mut self) {
        while let Ok(event) = self.source_rx.try_recv() {
            self.handle_source_event(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{AudioDeviceInfo, CameraInfo, DisplayInfo};
    use crate::muxer::sink::testing::MemorySinkFactory;
    use crate::muxer::types::WriterState;
    use crate::recorder::source::{AudioFrame, VideoFrame};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::Ordering;

    /// What the fake sources did, shared with the test
    #[derive(Default)]
    struct SourceLog {
        running: Mutex<HashMap<SourceKind, bool>>,
        created: Mutex<Vec<SourceKind>>,
        fail_start: Mutex<HashSet<SourceKind>>,
        handlers: Mutex<HashMap<SourceKind, SampleHandler>>,
        events: Mutex<Option<SourceEventSender>>,
    }

    impl SourceLog {
        fn is_running(&self, kind: SourceKind) -> bool {
            self.running.lock().get(&kind).copied().unwrap_or(false)
        }

        fn any_running(&self) -> bool {
            self.running.lock().values().any(|r| *r)
        }

        fn created(&self, kind: SourceKind) -> usize {
            self.created.lock().iter().filter(|k| **k == kind).count()
        }

        fn push(&self, kind: SourceKind, sample: Sample) {
            let handler = self.handlers.lock().get(&kind).cloned().unwrap();
            handler(sample);
        }

        fn fire_stop(&self, kind: SourceKind, reason: &str) {
            let events = self.events.lock().clone().unwrap();
            events
                .send(SourceEvent::StoppedUnexpectedly {
                    kind,
                    reason: reason.to_string(),
                })
                .unwrap();
        }
    }

    struct FakeSource {
        kind: SourceKind,
        sources: Arc<SourceLog>,
        handler: Option<SampleHandler>,
        events: Option<SourceEventSender>,
        running: bool,
    }

    #[async_trait]
    impl CaptureSource for FakeSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn set_sample_handler(&mut self, handler: SampleHandler) {
            self.handler = Some(handler);
        }

        fn set_event_sender(&mut self, events: SourceEventSender) {
            self.events = Some(events);
        }

        async fn configure(&mut self, _config: &SourceConfig) -> RecordingResult<()> {
            Ok(())
        }

        async fn start(&mut self) -> RecordingResult<()> {
            if self.sources.fail_start.lock().contains(&self.kind) {
                return Err(RecordingError::DeviceNotFound(format!("{} unavailable", self.kind)));
            }
            self.running = true;
            self.sources.running.lock().insert(self.kind, true);
            if let Some(handler) = &self.handler {
                self.sources.handlers.lock().insert(self.kind, handler.clone());
            }
            *self.sources.events.lock() = self.events.clone();
            Ok(())
        }

        async fn stop(&mut self) -> RecordingResult<()> {
            if !self.running {
                return Err(RecordingError::NotRecording);
            }
            self.running = false;
            self.sources.running.lock().insert(self.kind, false);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    struct FakeBackend {
        sources: Arc<SourceLog>,
        displays: Vec<DisplayInfo>,
    }

    impl CaptureBackend for FakeBackend {
        fn displays(&self) -> RecordingResult<Vec<DisplayInfo>> {
            Ok(self.displays.clone())
        }

        fn cameras(&self) -> Vec<CameraInfo> {
            Vec::new()
        }

        fn audio_input_devices(&self) -> Vec<AudioDeviceInfo> {
            Vec::new()
        }

        fn create_source(&self, kind: SourceKind) -> RecordingResult<Box<dyn CaptureSource>> {
            self.sources.created.lock().push(kind);
            Ok(Box::new(FakeSource {
                kind,
                sources: self.sources.clone(),
                handler: None,
                events: None,
                running: false,
            }))
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        sources: Arc<SourceLog>,
        factory: Arc<MemorySinkFactory>,
        coordinator: RecordingCoordinator,
    }

    impl Harness {
        fn output_files(&self) -> Vec<std::path::PathBuf> {
            std::fs::read_dir(self.dir.path())
                .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
                .unwrap_or_default()
        }
    }

    fn display() -> DisplayInfo {
        DisplayInfo {
            id: 7,
            name: "Built-in".to_string(),
            width: 200,
            height: 100,
            scale_factor: 1.0,
            is_primary: true,
            refresh_rate: None,
        }
    }

    fn harness_with(displays: Vec<DisplayInfo>, configure: impl FnOnce(&mut RecorderSettings)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let sources = Arc::new(SourceLog::default());
        let factory = Arc::new(MemorySinkFactory::default());
        let mut settings = RecorderSettings {
            output_dir: dir.path().to_path_buf(),
            countdown_seconds: 0,
            capture_microphone: false,
            ..Default::default()
        };
        configure(&mut settings);

        let backend = Arc::new(FakeBackend {
            sources: sources.clone(),
            displays,
        });
        let muxer = Arc::new(Muxer::new(factory.clone()));
        let coordinator = RecordingCoordinator::new(backend, muxer, MediaClock::new(), settings);
        Harness {
            dir,
            sources,
            factory,
            coordinator,
        }
    }

    fn harness(configure: impl FnOnce(&mut RecorderSettings)) -> Harness {
        harness_with(vec![display()], configure)
    }

    fn screen_frame(ms: u64) -> Sample {
        Sample::Video(VideoFrame::filled(16, 16, [1, 2, 3, 255], Duration::from_millis(ms)))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.state(), RecordingState::Recording);
        assert!(h.sources.is_running(SourceKind::Screen));
        let session_path = h.coordinator.session().unwrap().output_path.clone();

        h.sources.push(SourceKind::Screen, screen_frame(10));

        let completed = h.coordinator.stop().await.unwrap();
        assert_eq!(completed.output_path, session_path);
        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert!(h.coordinator.session().is_none());
        assert!(!h.sources.any_running());
        assert_eq!(std::fs::read_to_string(&completed.output_path).unwrap(), "frames=1");
        assert_eq!(h.coordinator.last_recording(), Some(&completed));
    }

    #[tokio::test]
    async fn test_samples_routed_by_kind() {
        let mut h = harness(|s| {
            s.capture_microphone = true;
            s.capture_system_audio = true;
        });
        h.coordinator.start().await.unwrap();

        h.sources.push(SourceKind::Screen, screen_frame(10));
        let audio = || Sample::Audio(AudioFrame::new(vec![0.0; 64], 2, 48_000, Duration::from_millis(20)));
        h.sources.push(SourceKind::Microphone, audio());
        h.sources.push(SourceKind::SystemAudio, audio());

        let sink = h.factory.sink();
        let recorded = sink.recorded.lock();
        assert_eq!(recorded.video.len(), 1);
        let tracks: Vec<AudioTrack> = recorded.audio.iter().map(|(t, _)| *t).collect();
        assert_eq!(tracks, vec![AudioTrack::Microphone, AudioTrack::System]);
    }

    #[tokio::test]
    async fn test_failed_attach_rolls_back() {
        let mut h = harness(|s| {
            s.capture_camera = true;
            s.capture_microphone = true;
        });
        h.sources.fail_start.lock().insert(SourceKind::Microphone);
        let mut events = h.coordinator.subscribe();

        let err = h.coordinator.start().await.unwrap_err();
        assert!(matches!(err, RecordingError::DeviceNotFound(_)));

        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert_eq!(h.sources.created(SourceKind::Camera), 1);
        assert!(!h.sources.any_running());
        assert!(h.output_files().is_empty());
        assert!(h.factory.sink().recorded.lock().cancelled);
        assert!(h.coordinator.session().is_none());
        assert_eq!(h.coordinator.muxer().state(), WriterState::Idle);
        assert!(matches!(events.try_recv(), Ok(RecordingEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_start_without_displays_fails() {
        let mut h = harness_with(Vec::new(), |_| {});
        let err = h.coordinator.start().await.unwrap_err();
        assert!(matches!(err, RecordingError::DeviceNotFound(_)));
        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert_eq!(h.sources.created(SourceKind::Screen), 0);
    }

    #[tokio::test]
    async fn test_start_when_not_idle_is_noop() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.coordinator.start().await.unwrap();
        assert_eq!(h.coordinator.state(), RecordingState::Recording);
        assert_eq!(h.sources.created(SourceKind::Screen), 1);
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let mut h = harness(|_| {});
        assert!(matches!(
            h.coordinator.pause().await,
            Err(RecordingError::InvalidState { operation: "pause", .. })
        ));
        assert!(matches!(
            h.coordinator.resume().await,
            Err(RecordingError::InvalidState { operation: "resume", .. })
        ));
        assert!(matches!(
            h.coordinator.stop().await,
            Err(RecordingError::InvalidState { operation: "stop", .. })
        ));

        h.coordinator.start().await.unwrap();
        assert!(matches!(
            h.coordinator.resume().await,
            Err(RecordingError::InvalidState { .. })
        ));
        assert_eq!(h.coordinator.state(), RecordingState::Recording);
    }

    #[tokio::test]
    async fn test_pause_rebuilds_screen_on_resume() {
        let mut h = harness(|s| s.capture_microphone = true);
        let mut events = h.coordinator.subscribe();
        h.coordinator.start().await.unwrap();

        h.coordinator.pause().await.unwrap();
        assert_eq!(h.coordinator.state(), RecordingState::Paused);
        assert!(h.coordinator.muxer().is_paused());
        assert!(!h.sources.is_running(SourceKind::Screen));
        assert!(!h.sources.is_running(SourceKind::Microphone));

        h.coordinator.resume().await.unwrap();
        assert_eq!(h.coordinator.state(), RecordingState::Recording);
        assert!(!h.coordinator.muxer().is_paused());
        assert_eq!(h.sources.created(SourceKind::Screen), 2);
        assert_eq!(h.sources.created(SourceKind::Microphone), 1);
        assert!(h.sources.is_running(SourceKind::Screen));
        assert!(h.sources.is_running(SourceKind::Microphone));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![RecordingEvent::Started, RecordingEvent::Paused, RecordingEvent::Resumed]
        );
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.sources.push(SourceKind::Screen, screen_frame(5));
        h.coordinator.pause().await.unwrap();

        let completed = h.coordinator.stop().await.unwrap();
        assert!(completed.output_path.exists());
        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert_eq!(h.coordinator.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_unexpected_stop_forces_idle() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.sources.push(SourceKind::Screen, screen_frame(10));

        h.sources.fire_stop(SourceKind::Screen, "display disconnected");
        h.coordinator.process_source_events().await;

        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        let error = h.coordinator.take_last_error().unwrap();
        assert!(error.contains("display disconnected"));
        assert!(h.coordinator.take_last_error().is_none());
        assert!(h.coordinator.last_recording().is_some());
    }

    #[tokio::test]
    async fn test_source_event_after_stop_is_ignored() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.coordinator.stop().await.unwrap();

        h.sources.fire_stop(SourceKind::Screen, "late");
        h.coordinator.process_source_events().await;
        assert!(h.coordinator.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_stale_source_event_does_not_stop_next_recording() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.sources.fire_stop(SourceKind::Screen, "display disconnected");
        h.coordinator.stop().await.unwrap();

        h.coordinator.start().await.unwrap();
        h.coordinator.process_source_events().await;

        assert_eq!(h.coordinator.state(), RecordingState::Recording);
        assert!(h.coordinator.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_failed_restart_keeps_previous_recording() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.sources.push(SourceKind::Screen, screen_frame(10));
        let first = h.coordinator.stop().await.unwrap();

        h.factory.fail_create.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.coordinator.start().await,
            Err(RecordingError::Muxer(_))
        ));

        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert_eq!(std::fs::read_to_string(&first.output_path).unwrap(), "frames=1");
        assert_eq!(h.coordinator.last_recording(), Some(&first));
    }

    #[tokio::test]
    async fn test_unwritable_output_is_permission_error() {
        let mut h = harness(|_| {});
        h.factory.deny_write.store(true, Ordering::SeqCst);

        let err = h.coordinator.start().await.unwrap_err();
        assert!(matches!(err, RecordingError::PermissionDenied(_)));
        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert_eq!(h.sources.created(SourceKind::Screen), 0);
    }

    #[tokio::test]
    async fn test_back_to_back_recordings_get_distinct_files() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.sources.push(SourceKind::Screen, screen_frame(10));
        let first = h.coordinator.stop().await.unwrap();

        h.coordinator.start().await.unwrap();
        h.sources.push(SourceKind::Screen, screen_frame(10));
        h.sources.push(SourceKind::Screen, screen_frame(20));
        let second = h.coordinator.stop().await.unwrap();

        assert_ne!(first.output_path, second.output_path);
        assert_eq!(std::fs::read_to_string(&first.output_path).unwrap(), "frames=1");
        assert_eq!(std::fs::read_to_string(&second.output_path).unwrap(), "frames=2");
    }

    #[tokio::test]
    async fn test_resume_failure_stops_recording() {
        let mut h = harness(|_| {});
        h.coordinator.start().await.unwrap();
        h.coordinator.pause().await.unwrap();

        h.sources.fail_start.lock().insert(SourceKind::Screen);
        assert!(h.coordinator.resume().await.is_err());

        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert!(h.coordinator.take_last_error().is_some());
        assert!(!h.sources.any_running());
    }

    #[tokio::test]
    async fn test_finalize_failure_still_returns_to_idle() {
        let mut h = harness(|_| {});
        h.factory.fail_finish.store(true, Ordering::SeqCst);
        h.coordinator.start().await.unwrap();

        assert!(matches!(
            h.coordinator.stop().await,
            Err(RecordingError::Muxer(_))
        ));
        assert_eq!(h.coordinator.state(), RecordingState::Idle);
        assert!(h.coordinator.session().is_none());
        assert!(h.coordinator.last_recording().is_none());
        assert!(matches!(h.coordinator.muxer().state(), WriterState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_before_start() {
        let mut h = harness(|s| s.countdown_seconds = 3);
        let mut events = h.coordinator.subscribe();

        h.coordinator.start().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                RecordingEvent::CountdownTick(3),
                RecordingEvent::CountdownTick(2),
                RecordingEvent::CountdownTick(1),
                RecordingEvent::Started,
            ]
        );
        assert_eq!(h.coordinator.state(), RecordingState::Recording);
    }
}
