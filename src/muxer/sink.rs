//! Container sink traits
//!
//! A sink is the track-level writer behind the muxer. Appends must never
//! block: a sink reports backpressure through `is_ready` and the muxer
//! drops instead of waiting.

use crate::muxer::types::{AudioTrack, MuxResult, MuxerConfig, TrackKind};
use crate::recorder::source::{AudioFrame, VideoFrame};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Output container with one input per enabled track
pub trait ContainerSink: Send + Sync {
    /// Anchor the output timeline; later PTS values are relative to this
    fn start_session(&self, anchor: Duration);

    /// Whether `track` can take another sample right now
    fn is_ready(&self, track: TrackKind) -> bool;

    /// Queue a video frame (PTS already pause-corrected)
    fn append_video(&self, frame: VideoFrame) -> MuxResult<()>;

    /// Queue an audio block (PTS already pause-corrected)
    fn append_audio(&self, track: AudioTrack, frame: AudioFrame) -> MuxResult<()>;

    /// Mark every track finished and write the container. Blocks.
    fn finish(&self) -> MuxResult<()>;

    /// Abandon the output and remove anything written so far
    fn cancel(&self);
}

/// Creates a sink for one recording
pub trait SinkFactory: Send + Sync {
    fn create(&self, output: &Path, config: &MuxerConfig) -> MuxResult<Arc<dyn ContainerSink>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sink used by muxer and coordinator tests

    use super::*;
    use crate::muxer::types::MuxError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    pub struct Recorded {
        pub anchor: Option<Duration>,
        pub video: Vec<VideoFrame>,
        pub audio: Vec<(AudioTrack, AudioFrame)>,
        pub finish_calls: usize,
        pub cancelled: bool,
    }

    /// Writes a placeholder file at create and records every append
    pub struct MemorySink {
        output: PathBuf,
        config: MuxerConfig,
        pub recorded: Mutex<Recorded>,
        saturated: Mutex<HashMap<TrackKind, bool>>,
        fail_finish: bool,
    }

    impl MemorySink {
        pub fn set_saturated(&self, track: TrackKind, saturated: bool) {
            self.saturated.lock().insert(track, saturated);
        }
    }

    impl ContainerSink for MemorySink {
        fn start_session(&self, anchor: Duration) {
            self.recorded.lock().anchor.get_or_insert(anchor);
        }

        fn is_ready(&self, track: TrackKind) -> bool {
            self.config.has_track(track)
                && !self.saturated.lock().get(&track).copied().unwrap_or(false)
        }

        fn append_video(&self, frame: VideoFrame) -> MuxResult<()> {
            self.recorded.lock().video.push(frame);
            Ok(())
        }

        fn append_audio(&self, track: AudioTrack, frame: AudioFrame) -> MuxResult<()> {
            self.recorded.lock().audio.push((track, frame));
            Ok(())
        }

        fn finish(&self) -> MuxResult<()> {
            let frames = {
                let mut recorded = self.recorded.lock();
                recorded.finish_calls += 1;
                recorded.video.len()
            };
            if self.fail_finish {
                return Err(MuxError::Encoding("container ended in failed state".to_string()));
            }
            std::fs::write(&self.output, format!("frames={frames}"))?;
            Ok(())
        }

        fn cancel(&self) {
            self.recorded.lock().cancelled = true;
            let _ = std::fs::remove_file(&self.output);
        }
    }

    /// Hands out `MemorySink`s and keeps the last one for inspection
    #[derive(Default)]
    pub struct MemorySinkFactory {
        pub last: Mutex<Option<Arc<MemorySink>>>,
        pub fail_finish: AtomicBool,
        pub fail_create: AtomicBool,
        pub deny_write: AtomicBool,
    }

    impl MemorySinkFactory {
        pub fn sink(&self) -> Arc<MemorySink> {
            self.last.lock().clone().expect("no sink created")
        }
    }

    impl SinkFactory for MemorySinkFactory {
        fn create(&self, output: &Path, config: &MuxerConfig) -> MuxResult<Arc<dyn ContainerSink>> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(MuxError::Ffmpeg("FFmpeg not found".to_string()));
            }
            if self.deny_write.load(Ordering::SeqCst) {
                return Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into());
            }
            std::fs::write(output, b"")?;
            let sink = Arc::new(MemorySink {
                output: output.to_path_buf(),
                config: config.clone(),
                recorded: Mutex::new(Recorded::default()),
                saturated: Mutex::new(HashMap::new()),
                fail_finish: self.fail_finish.load(Ordering::SeqCst),
            });
            *self.last.lock() = Some(sink.clone());
            Ok(sink)
        }
    }
}
