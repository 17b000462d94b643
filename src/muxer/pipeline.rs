//! Synchronized muxer
//!
//! Accepts samples from every capture thread, corrects their timestamps
//! for pauses, composites the camera onto the screen and forwards them to
//! the container sink. Ingestion never blocks: the state lock is only held
//! for bookkeeping, and a track that is not ready loses the sample.

use crate::muxer::clock::PauseClock;
use crate::muxer::compositor::Compositor;
use crate::muxer::sink::{ContainerSink, SinkFactory};
use crate::muxer::types::{
    Admission, AudioTrack, MuxError, MuxOutput, MuxResult, MuxerConfig, MuxerStats, TrackKind,
    WriterState,
};
use crate::recorder::source::{AudioFrame, VideoFrame};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mutable writer state shared between the control and capture threads
#[derive(Default)]
struct MuxerInner {
    state: WriterState,
    clock: PauseClock,
    anchor: Option<Duration>,
    sink: Option<Arc<dyn ContainerSink>>,
    output: Option<PathBuf>,
    include_camera: bool,
}

#[derive(Default)]
struct Counters {
    video_appended: AtomicU64,
    video_dropped: AtomicU64,
    audio_appended: AtomicU64,
    audio_dropped: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.video_appended.store(0, Ordering::Relaxed);
        self.video_dropped.store(0, Ordering::Relaxed);
        self.audio_appended.store(0, Ordering::Relaxed);
        self.audio_dropped.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MuxerStats {
        MuxerStats {
            video_appended: self.video_appended.load(Ordering::Relaxed),
            video_dropped: self.video_dropped.load(Ordering::Relaxed),
            audio_appended: self.audio_appended.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Owns the output file from `setup` until `finish` or `cancel`
pub struct Muxer {
    factory: Arc<dyn SinkFactory>,
    inner: Mutex<MuxerInner>,
    compositor: Compositor,
    counters: Counters,
}

impl Muxer {
    pub fn new(factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(MuxerInner::default()),
            compositor: Compositor::new(),
            counters: Counters::default(),
        }
    }

    /// Current writer state
    pub fn state(&self) -> WriterState {
        self.inner.lock().state.clone()
    }

    /// Pause-corrected PTS of the first accepted video frame
    pub fn session_anchor(&self) -> Option<Duration> {
        self.inner.lock().anchor
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().clock.is_paused()
    }

    pub fn total_paused(&self) -> Duration {
        self.inner.lock().clock.total_paused()
    }

    pub fn stats(&self) -> MuxerStats {
        self.counters.snapshot()
    }

    /// Create the output container and its tracks
    ///
    /// Fails while a file is being written or finalized. Any existing file
    /// at `output` is removed first.
    pub fn setup(&self, output: &Path, config: MuxerConfig) -> MuxResult<()> {
        {
            let inner = self.inner.lock();
            if matches!(inner.state, WriterState::Writing | WriterState::Finishing) {
                return Err(MuxError::AlreadySetUp(inner.state.clone()));
            }
        }

        match std::fs::remove_file(output) {
            Ok(()) => tracing::info!("Removed existing file at {:?}", output),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let sink = self.factory.create(output, &config)?;

        let mut inner = self.inner.lock();
        if matches!(inner.state, WriterState::Writing | WriterState::Finishing) {
            // Lost a race with another setup; discard ours
            drop(inner);
            sink.cancel();
            return Err(MuxError::AlreadySetUp(WriterState::Writing));
        }
        *inner = MuxerInner {
            state: WriterState::Writing,
            clock: PauseClock::new(),
            anchor: None,
            sink: Some(sink),
            output: Some(output.to_path_buf()),
            include_camera: config.include_camera,
        };
        drop(inner);

        self.compositor.clear();
        self.counters.reset();

        tracing::info!(
            "Muxer writing to {:?}: {}x{} @ {}fps, {} bps, camera={}, mic={}, system={}",
            output,
            config.video_size.0,
            config.video_size.1,
            config.fps,
            config.bitrate,
            config.include_camera,
            config.include_mic_audio,
            config.include_system_audio
        );
        Ok(())
    }

    /// Offer a screen frame
    ///
    /// The first accepted frame anchors the session at its corrected PTS.
    pub fn append_video_frame(&self, mut frame: VideoFrame) -> Admission {
        let (sink, include_camera) = {
            let mut inner = self.inner.lock();
            if let Some(rejection) = Self::admit(&inner) {
                drop(inner);
                self.counters.video_dropped.fetch_add(1, Ordering::Relaxed);
                return rejection;
            }
            let Some(sink) = inner.sink.clone() else {
                return Admission::NotWriting;
            };
            frame.pts = inner.clock.adjust(frame.pts);
            if inner.anchor.is_none() {
                sink.start_session(frame.pts);
                inner.anchor = Some(frame.pts);
                tracing::info!("Muxer session anchored at {:?}", frame.pts);
            }
            (sink, inner.include_camera)
        };

        if !sink.is_ready(TrackKind::Video) {
            self.counters.video_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Video track not ready, dropping frame at {:?}", frame.pts);
            return Admission::NotReady;
        }

        let frame = if include_camera {
            self.compositor.composite(frame)
        } else {
            frame
        };

        match sink.append_video(frame) {
            Ok(()) => {
                self.counters.video_appended.fetch_add(1, Ordering::Relaxed);
                Admission::Accepted
            }
            Err(e) => {
                self.counters.video_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Video append failed: {}", e);
                Admission::NotReady
            }
        }
    }

    /// Replace the cached camera frame
    pub fn update_secondary_frame(&self, frame: VideoFrame) {
        self.compositor.update_secondary(frame);
    }

    /// Offer an audio block for `track`
    pub fn append_audio_frame(&self, mut frame: AudioFrame, track: AudioTrack) -> Admission {
        let sink = {
            let inner = self.inner.lock();
            let rejection = Self::admit(&inner).or(if inner.anchor.is_none() {
                Some(Admission::SessionNotStarted)
            } else {
                None
            });
            if let Some(rejection) = rejection {
                drop(inner);
                self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
                return rejection;
            }
            let Some(sink) = inner.sink.clone() else {
                return Admission::NotWriting;
            };
            frame.pts = inner.clock.adjust(frame.pts);
            sink
        };

        if !sink.is_ready(track.track_kind()) {
            self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("{:?} audio track not ready, dropping block", track);
            return Admission::NotReady;
        }

        match sink.append_audio(track, frame) {
            Ok(()) => {
                self.counters.audio_appended.fetch_add(1, Ordering::Relaxed);
                Admission::Accepted
            }
            Err(e) => {
                self.counters.audio_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Audio append failed: {}", e);
                Admission::NotReady
            }
        }
    }

    fn admit(inner: &MuxerInner) -> Option<Admission> {
        if inner.state != WriterState::Writing {
            return Some(Admission::NotWriting);
        }
        if inner.clock.is_paused() {
            return Some(Admission::Paused);
        }
        None
    }

    /// Stop accepting samples as of `at`
    pub fn pause(&self, at: Duration) {
        let mut inner = self.inner.lock();
        if inner.clock.pause(at) {
            tracing::info!("Muxer paused at {:?}", at);
        } else {
            tracing::warn!("Muxer pause at {:?} ignored: already paused", at);
        }
    }

    /// Accept samples again; the paused stretch is cut from the timeline
    pub fn resume(&self, at: Duration) {
        let mut inner = self.inner.lock();
        match inner.clock.resume(at) {
            Some(gap) => tracing::info!(
                "Muxer resumed at {:?} after {:?} (total paused {:?})",
                at,
                gap,
                inner.clock.total_paused()
            ),
            None => tracing::warn!("Muxer resume at {:?} ignored: not paused", at),
        }
    }

    /// Finalize the output file
    ///
    /// Only valid while writing; a second call fails instead of finalizing
    /// twice.
    pub async fn finish(&self) -> MuxResult<MuxOutput> {
        let (sink, output, include_camera) = {
            let mut inner = self.inner.lock();
            if inner.state != WriterState::Writing {
                return Err(MuxError::InvalidState(inner.state.clone()));
            }
            let (Some(sink), Some(output)) = (inner.sink.clone(), inner.output.clone()) else {
                return Err(MuxError::InvalidState(inner.state.clone()));
            };
            inner.state = WriterState::Finishing;
            (sink, output, inner.include_camera)
        };

        tracing::info!("Finalizing {:?}", output);
        if include_camera && !self.compositor.has_secondary() {
            tracing::warn!("Camera overlay was enabled but no camera frame arrived");
        }

        let result = match tokio::task::spawn_blocking(move || sink.finish()).await {
            Ok(result) => result,
            Err(e) => Err(MuxError::Encoding(format!("Finalize task failed: {}", e))),
        };

        let stats = self.counters.snapshot();
        // The file belongs to the caller now; a later cancel must not touch it
        let mut inner = self.inner.lock();
        inner.sink = None;
        inner.output = None;
        match result {
            Ok(()) => {
                inner.state = WriterState::Finished;
                tracing::info!(
                    "Muxer finished {:?}: video {} written / {} dropped, audio {} written / {} dropped",
                    output,
                    stats.video_appended,
                    stats.video_dropped,
                    stats.audio_appended,
                    stats.audio_dropped
                );
                Ok(MuxOutput {
                    path: output,
                    stats,
                })
            }
            Err(e) => {
                tracing::error!("Muxer failed to finalize {:?}: {}", output, e);
                inner.state = WriterState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Discard the writer and delete the partial output
    pub fn cancel(&self) {
        let (sink, output) = {
            let mut inner = self.inner.lock();
            let sink = inner.sink.take();
            let output = inner.output.take();
            *inner = MuxerInner::default();
            (sink, output)
        };
        self.compositor.clear();

        if let Some(sink) = sink {
            sink.cancel();
        }
        if let Some(output) = output {
            match std::fs::remove_file(&output) {
                Ok(()) => tracing::info!("Removed partial output {:?}", output),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove partial output {:?}: {}", output, e),
            }
        }
    }
}
