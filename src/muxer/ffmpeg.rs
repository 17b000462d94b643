//! FFmpeg-backed container sink
//!
//! Video frames are piped as raw RGBA into an H.264 encoder, audio blocks
//! go to float WAV intermediates, and `finish` remuxes everything into the
//! final MP4 with AAC audio. Every track has a bounded queue drained by its
//! own writer thread; a full queue is how backpressure shows up.

use crate::muxer::sink::{ContainerSink, SinkFactory};
use crate::muxer::types::{AudioTrack, MuxError, MuxResult, MuxerConfig, TrackKind};
use crate::recorder::source::{AudioFrame, VideoFrame};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Frames buffered ahead of the video encoder
const VIDEO_QUEUE_DEPTH: usize = 8;

/// Audio blocks buffered ahead of each WAV writer
const AUDIO_QUEUE_DEPTH: usize = 256;

/// Upper bound on frames repeated to fill a single timeline gap, in seconds
const MAX_GAP_FILL_SECS: u64 = 60;

/// Output audio format
const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u16 = 2;
const AUDIO_BITRATE: &str = "192k";

/// Check that the ffmpeg binary can be launched
pub fn check_ffmpeg(ffmpeg: &Path) -> MuxResult<()> {
    Command::new(ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| {
            MuxError::Ffmpeg(format!(
                "FFmpeg not found ({}). Please install FFmpeg and make sure it is on PATH",
                e
            ))
        })?;
    Ok(())
}

/// Creates `FfmpegSink`s
pub struct FfmpegSinkFactory {
    ffmpeg: PathBuf,
}

impl FfmpegSinkFactory {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn create(&self, output: &Path, config: &MuxerConfig) -> MuxResult<Arc<dyn ContainerSink>> {
        check_ffmpeg(&self.ffmpeg)?;
        let sink = FfmpegSink::create(self.ffmpeg.clone(), output, config.clone())?;
        Ok(Arc::new(sink))
    }
}

/// What a track writer produced
#[derive(Debug)]
enum TrackFile {
    Video { path: PathBuf, frames: u64 },
    Audio { track: AudioTrack, path: PathBuf, frames: u64 },
    Empty(AudioTrack),
}

/// Sink writing intermediates under `<output>.parts/`
pub struct FfmpegSink {
    ffmpeg: PathBuf,
    output: PathBuf,
    parts_dir: PathBuf,
    anchor: OnceLock<Duration>,
    video_tx: RwLock<Option<Sender<VideoFrame>>>,
    mic_tx: RwLock<Option<Sender<AudioFrame>>>,
    system_tx: RwLock<Option<Sender<AudioFrame>>>,
    cancelled: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<MuxResult<TrackFile>>>>,
}

impl FfmpegSink {
    fn create(ffmpeg: PathBuf, output: &Path, config: MuxerConfig) -> MuxResult<Self> {
        let parts_dir = output.with_extension("parts");
        if parts_dir.exists() {
            std::fs::remove_dir_all(&parts_dir)?;
        }
        std::fs::create_dir_all(&parts_dir)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::new();

        let (video_tx, video_rx) = bounded::<VideoFrame>(VIDEO_QUEUE_DEPTH);
        {
            let path = parts_dir.join("video.mp4");
            let ffmpeg = ffmpeg.clone();
            let config = config.clone();
            let cancelled = cancelled.clone();
            workers.push(
                std::thread::Builder::new()
                    .name("mux-video".to_string())
                    .spawn(move || run_video_writer(video_rx, &ffmpeg, &path, &config, &cancelled))?,
            );
        }

        let mut mic_tx = None;
        let mut system_tx = None;
        for track in config.audio_tracks() {
            let (tx, rx) = bounded::<AudioFrame>(AUDIO_QUEUE_DEPTH);
            let path = parts_dir.join(format!("{}.wav", track.file_stem()));
            let cancelled = cancelled.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("mux-{}", track.file_stem()))
                    .spawn(move || run_audio_writer(rx, track, &path, &cancelled))?,
            );
            match track {
                AudioTrack::Microphone => mic_tx = Some(tx),
                AudioTrack::System => system_tx = Some(tx),
            }
        }

        tracing::info!(
            "FFmpeg sink ready: {} track writer(s), intermediates in {:?}",
            workers.len(),
            parts_dir
        );

        Ok(Self {
            ffmpeg,
            output: output.to_path_buf(),
            parts_dir,
            anchor: OnceLock::new(),
            video_tx: RwLock::new(Some(video_tx)),
            mic_tx: RwLock::new(mic_tx),
            system_tx: RwLock::new(system_tx),
            cancelled,
            workers: Mutex::new(workers),
        })
    }

    fn audio_sender(&self, track: AudioTrack) -> &RwLock<Option<Sender<AudioFrame>>> {
        match track {
            AudioTrack::Microphone => &self.mic_tx,
            AudioTrack::System => &self.system_tx,
        }
    }

    fn relative(&self, pts: Duration) -> Duration {
        let anchor = self.anchor.get().copied().unwrap_or(pts);
        pts.saturating_sub(anchor)
    }

    /// Close every queue and wait for the writers
    fn close_tracks(&self) -> Vec<MuxResult<TrackFile>> {
        self.video_tx.write().take();
        self.mic_tx.write().take();
        self.system_tx.write().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        workers
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(MuxError::Encoding("Track writer panicked".to_string())))
            })
            .collect()
    }

    fn remove_parts(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.parts_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {:?}: {}", self.parts_dir, e);
            }
        }
    }

    fn remux(&self, video: &Path, audio: &[PathBuf]) -> MuxResult<()> {
        let args = build_remux_args(video, audio, &self.output);
        tracing::info!("Remuxing into {:?}: {:?}", self.output, args);

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| MuxError::Ffmpeg(format!("Failed to start FFmpeg remux: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxError::Ffmpeg(format!("FFmpeg remux failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

impl ContainerSink for FfmpegSink {
    fn start_session(&self, anchor: Duration) {
        if self.anchor.set(anchor).is_err() {
            tracing::debug!("Session already anchored, ignoring {:?}", anchor);
        }
    }

    fn is_ready(&self, track: TrackKind) -> bool {
        let ready = |tx: &RwLock<Option<Sender<_>>>| tx.read().as_ref().is_some_and(|tx| !tx.is_full());
        match track {
            TrackKind::Video => self
                .video_tx
                .read()
                .as_ref()
                .is_some_and(|tx| !tx.is_full()),
            TrackKind::MicrophoneAudio => ready(&self.mic_tx),
            TrackKind::SystemAudio => ready(&self.system_tx),
        }
    }

    fn append_video(&self, mut frame: VideoFrame) -> MuxResult<()> {
        frame.pts = self.relative(frame.pts);
        let guard = self.video_tx.read();
        let tx = guard
            .as_ref()
            .ok_or_else(|| MuxError::Encoding("Video track is finished".to_string()))?;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => MuxError::Encoding("Video queue full".to_string()),
            TrySendError::Disconnected(_) => MuxError::Encoding("Video writer stopped".to_string()),
        })
    }

    fn append_audio(&self, track: AudioTrack, mut frame: AudioFrame) -> MuxResult<()> {
        frame.pts = self.relative(frame.pts);
        let guard = self.audio_sender(track).read();
        let tx = guard
            .as_ref()
            .ok_or_else(|| MuxError::Encoding(format!("{:?} audio track is not open", track)))?;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => MuxError::Encoding(format!("{:?} audio queue full", track)),
            TrySendError::Disconnected(_) => {
                MuxError::Encoding(format!("{:?} audio writer stopped", track))
            }
        })
    }

    fn finish(&self) -> MuxResult<()> {
        let mut video = None;
        let mut audio = Vec::new();
        let mut first_error = None;

        for result in self.close_tracks() {
            match result {
                Ok(TrackFile::Video { path, frames }) => {
                    tracing::info!("Video track closed: {} frames", frames);
                    video = Some(path);
                }
                Ok(TrackFile::Audio { track, path, frames }) => {
                    tracing::info!("{:?} audio track closed: {} sample frames", track, frames);
                    audio.push((track, path));
                }
                Ok(TrackFile::Empty(track)) => {
                    tracing::warn!("{:?} audio track received no samples, leaving it out", track);
                }
                Err(e) => {
                    tracing::error!("Track writer failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let result = match (first_error, video) {
            (Some(e), _) => Err(e),
            (None, None) => Err(MuxError::Encoding("No video track was written".to_string())),
            (None, Some(video)) => {
                // Keep microphone before system audio regardless of join order
                audio.sort_by_key(|(track, _)| *track != AudioTrack::Microphone);
                let audio: Vec<PathBuf> = audio.into_iter().map(|(_, path)| path).collect();
                self.remux(&video, &audio)
            }
        };

        self.remove_parts();
        result
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for result in self.close_tracks() {
            if let Err(e) = result {
                tracing::debug!("Track writer ended during cancel: {}", e);
            }
        }
        self.remove_parts();
        if let Err(e) = std::fs::remove_file(&self.output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {:?}: {}", self.output, e);
            }
        }
        tracing::info!("FFmpeg sink cancelled for {:?}", self.output);
    }
}

/// H.264 encoder fed with raw RGBA frames over stdin
struct VideoEncoder {
    process: Child,
    stdin: ChildStdin,
    frame_count: u64,
}

impl VideoEncoder {
    fn spawn(ffmpeg: &Path, args: &[String]) -> MuxResult<Self> {
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(ffmpeg)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MuxError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| MuxError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            process,
            stdin,
            frame_count: 0,
        })
    }

    fn write_frame(&mut self, rgba: &[u8]) -> MuxResult<()> {
        self.stdin
            .write_all(rgba)
            .map_err(|e| MuxError::Encoding(format!("Failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    /// Close stdin and wait for FFmpeg to flush the file
    fn finish(self) -> MuxResult<u64> {
        let Self {
            process,
            stdin,
            frame_count,
        } = self;
        drop(stdin);

        let output = process
            .wait_with_output()
            .map_err(|e| MuxError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxError::Ffmpeg(format!(
                "FFmpeg exited with error: {}",
                stderr.trim()
            )));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", frame_count);
        Ok(frame_count)
    }

    fn kill(mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Drain video frames into the encoder, converting to constant frame rate
///
/// A frame that lands on an already written slot is skipped; a jump ahead
/// repeats the previous frame to fill the gap.
fn run_video_writer(
    rx: Receiver<VideoFrame>,
    ffmpeg: &Path,
    path: &Path,
    config: &MuxerConfig,
    cancelled: &AtomicBool,
) -> MuxResult<TrackFile> {
    let fps = config.fps.max(1);
    let max_gap = MAX_GAP_FILL_SECS * fps as u64;

    let mut encoder: Option<VideoEncoder> = None;
    let mut input_size = (0u32, 0u32);
    let mut next_slot: u64 = 0;
    let mut last_frame: Option<Vec<u8>> = None;
    let mut skipped: u64 = 0;

    for frame in rx.iter() {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        if !frame.is_well_formed() {
            tracing::warn!(
                "Skipping malformed frame: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            );
            continue;
        }

        if encoder.is_none() {
            input_size = (frame.width, frame.height);
            let args = build_encoder_args(input_size, config, path);
            encoder = Some(VideoEncoder::spawn(ffmpeg, &args)?);
        } else if (frame.width, frame.height) != input_size {
            tracing::debug!(
                "Skipping {}x{} frame, encoder input is {}x{}",
                frame.width,
                frame.height,
                input_size.0,
                input_size.1
            );
            skipped += 1;
            continue;
        }
        let Some(enc) = encoder.as_mut() else {
            continue;
        };

        let slot = frame_slot(frame.pts, fps);
        let repeats = match plan_slot(next_slot, slot, max_gap) {
            SlotPlan::Skip => {
                skipped += 1;
                continue;
            }
            SlotPlan::Write { repeats } => repeats,
        };
        if repeats < slot - next_slot {
            tracing::warn!(
                "Timeline gap of {} frames truncated to {}",
                slot - next_slot,
                repeats
            );
        }
        if let Some(previous) = &last_frame {
            for _ in 0..repeats {
                enc.write_frame(previous)?;
            }
        }

        enc.write_frame(&frame.data)?;
        next_slot = slot + 1;
        last_frame = Some(frame.data);
    }

    if cancelled.load(Ordering::Relaxed) {
        if let Some(enc) = encoder {
            enc.kill();
        }
        return Err(MuxError::Encoding("Video track cancelled".to_string()));
    }

    if skipped > 0 {
        tracing::info!("Video writer skipped {} frames", skipped);
    }

    match encoder {
        Some(enc) => {
            let frames = enc.finish()?;
            Ok(TrackFile::Video {
                path: path.to_path_buf(),
                frames,
            })
        }
        None => Err(MuxError::Encoding("No video frames were received".to_string())),
    }
}

/// Drain audio blocks into a float WAV file, padding gaps with silence
fn run_audio_writer(
    rx: Receiver<AudioFrame>,
    track: AudioTrack,
    path: &Path,
    cancelled: &AtomicBool,
) -> MuxResult<TrackFile> {
    let wav_error = |e: hound::Error| MuxError::Encoding(format!("{:?} WAV write failed: {}", track, e));

    let mut writer: Option<hound::WavWriter<BufWriter<File>>> = None;
    let mut format = (0u16, 0u32);
    let mut written: u64 = 0;

    for block in rx.iter() {
        if cancelled.load(Ordering::Relaxed) {
            break;
        }
        if block.channels == 0 || block.sample_rate == 0 || block.samples.is_empty() {
            continue;
        }

        if writer.is_none() {
            format = (block.channels, block.sample_rate);
            let spec = hound::WavSpec {
                channels: block.channels,
                sample_rate: block.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            writer = Some(hound::WavWriter::create(path, spec).map_err(wav_error)?);
            tracing::info!(
                "{:?} audio track: {}Hz, {}ch -> {:?}",
                track,
                block.sample_rate,
                block.channels,
                path
            );
        } else if (block.channels, block.sample_rate) != format {
            tracing::debug!(
                "Skipping {:?} block with format {}ch/{}Hz, track is {}ch/{}Hz",
                track,
                block.channels,
                block.sample_rate,
                format.0,
                format.1
            );
            continue;
        }
        let Some(wav) = writer.as_mut() else {
            continue;
        };

        let expected = sample_position(block.pts, format.1);
        let silence = silence_frames(expected, written, format.1 as u64 / 50);
        for _ in 0..silence * format.0 as u64 {
            wav.write_sample(0.0f32).map_err(wav_error)?;
        }
        for &sample in &block.samples {
            wav.write_sample(sample).map_err(wav_error)?;
        }
        written += silence + block.frame_count() as u64;
    }

    if cancelled.load(Ordering::Relaxed) {
        return Err(MuxError::Encoding(format!("{:?} track cancelled", track)));
    }

    match writer {
        Some(wav) => {
            wav.finalize().map_err(wav_error)?;
            Ok(TrackFile::Audio {
                track,
                path: path.to_path_buf(),
                frames: written,
            })
        }
        None => Ok(TrackFile::Empty(track)),
    }
}

/// Constant-frame-rate slot for a session-relative timestamp
pub fn frame_slot(pts: Duration, fps: u32) -> u64 {
    (pts.as_secs_f64() * fps as f64).round() as u64
}

/// What the constant frame rate writer does with one incoming frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPlan {
    /// The slot is already written
    Skip,
    /// Repeat the previous frame `repeats` times, then write this one
    Write { repeats: u64 },
}

/// Decide how a frame mapped to `slot` lands when `next_slot` is the
/// first unwritten one. Gaps longer than `max_gap` are truncated.
pub fn plan_slot(next_slot: u64, slot: u64, max_gap: u64) -> SlotPlan {
    if slot < next_slot {
        return SlotPlan::Skip;
    }
    SlotPlan::Write {
        repeats: (slot - next_slot).min(max_gap),
    }
}

/// Sample-frame index for a session-relative timestamp
pub fn sample_position(pts: Duration, sample_rate: u32) -> u64 {
    (pts.as_secs_f64() * sample_rate as f64).round() as u64
}

/// Silence needed before a block that should start at `expected` when
/// `written` frames exist; small drift within `tolerance` is ignored
pub fn silence_frames(expected: u64, written: u64, tolerance: u64) -> u64 {
    if expected > written + tolerance {
        expected - written
    } else {
        0
    }
}

/// Arguments for the intermediate H.264 encoder
pub fn build_encoder_args(input: (u32, u32), config: &MuxerConfig, output: &Path) -> Vec<String> {
    let (out_w, out_h) = config.video_size;
    let fps = config.fps.max(1);
    let bitrate = config.bitrate;

    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", input.0, input.1),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
    ];

    if input != config.video_size {
        // Fit inside the preset, letterboxing to keep the aspect ratio
        args.extend([
            "-vf".to_string(),
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2:black",
                out_w, out_h, out_w, out_h
            ),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-b:v".to_string(),
        bitrate.to_string(),
        "-maxrate".to_string(),
        bitrate.to_string(),
        "-bufsize".to_string(),
        (bitrate as u64 * 2).to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        (fps * 2).to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Arguments for the final remux: video copied, each audio track to AAC
pub fn build_remux_args(video: &Path, audio: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.to_string_lossy().to_string(),
    ];
    for path in audio {
        args.extend(["-i".to_string(), path.to_string_lossy().to_string()]);
    }

    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    for index in 1..=audio.len() {
        args.extend(["-map".to_string(), format!("{}:a:0", index)]);
    }

    args.extend(["-c:v".to_string(), "copy".to_string()]);
    if !audio.is_empty() {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            AUDIO_CHANNELS.to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
        ]);
    }

    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muxer::types::QualityPreset;

    fn config() -> MuxerConfig {
        MuxerConfig::from_preset(QualityPreset::Hd1080, 30)
    }

    #[test]
    fn test_frame_slot_rounds() {
        assert_eq!(frame_slot(Duration::ZERO, 30), 0);
        assert_eq!(frame_slot(Duration::from_millis(33), 30), 1);
        assert_eq!(frame_slot(Duration::from_millis(1000), 30), 30);
        assert_eq!(frame_slot(Duration::from_millis(4500), 60), 270);
    }

    /// Frames the writer would emit for a run of relative PTS values
    fn written_frames(pts: &[f64], fps: u32, max_gap: u64) -> (u64, u64) {
        let mut next_slot = 0;
        let mut written = 0;
        let mut skipped = 0;
        for &at in pts {
            let slot = frame_slot(Duration::from_secs_f64(at), fps);
            match plan_slot(next_slot, slot, max_gap) {
                SlotPlan::Skip => skipped += 1,
                SlotPlan::Write { repeats } => {
                    written += repeats + 1;
                    next_slot = slot + 1;
                }
            }
        }
        (written, skipped)
    }

    #[test]
    fn test_plan_slot_skips_written_slot() {
        assert_eq!(plan_slot(10, 9, 1800), SlotPlan::Skip);
        assert_eq!(plan_slot(10, 10, 1800), SlotPlan::Write { repeats: 0 });
        assert_eq!(plan_slot(10, 13, 1800), SlotPlan::Write { repeats: 3 });
    }

    #[test]
    fn test_plan_slot_caps_long_gap() {
        assert_eq!(plan_slot(0, 5_000, 1_800), SlotPlan::Write { repeats: 1_800 });
    }

    #[test]
    fn test_pause_corrected_timeline_is_constant_rate() {
        // Anchored at 1.0s; frames at 1.0s and 5.0s, then 8.0s after a
        // 2.5s pause, which arrives as 5.5s
        let (written, skipped) = written_frames(&[0.0, 4.0, 4.5], 30, 1_800);
        assert_eq!(written, 136);
        assert_eq!(skipped, 0);
        assert_eq!(written, frame_slot(Duration::from_secs_f64(4.5), 30) + 1);
    }

    #[test]
    fn test_duplicate_slot_is_dropped() {
        let (written, skipped) = written_frames(&[0.0, 0.034, 0.040, 0.1], 30, 1_800);
        assert_eq!(skipped, 1);
        assert_eq!(written, 4);
    }

    #[test]
    fn test_silence_inserted_only_past_tolerance() {
        assert_eq!(silence_frames(48_000, 48_000, 960), 0);
        assert_eq!(silence_frames(48_500, 48_000, 960), 0);
        assert_eq!(silence_frames(50_000, 48_000, 960), 2_000);
        // Overlap never produces silence
        assert_eq!(silence_frames(40_000, 48_000, 960), 0);
    }

    #[test]
    fn test_sample_position() {
        assert_eq!(sample_position(Duration::from_millis(250), 48_000), 12_000);
    }

    #[test]
    fn test_encoder_args_native_size() {
        let args = build_encoder_args((1920, 1080), &config(), Path::new("/tmp/v.mp4"));
        assert!(!args.contains(&"-vf".to_string()));
        let joined = args.join(" ");
        assert!(joined.contains("-s 1920x1080 -r 30 -i -"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 10000000"));
        assert!(joined.ends_with("/tmp/v.mp4"));
    }

    #[test]
    fn test_encoder_args_scale_to_preset() {
        let args = build_encoder_args((2880, 1800), &config(), Path::new("v.mp4"));
        let idx = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(
            args[idx + 1],
            "scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2:black"
        );
        assert!(args.join(" ").contains("-s 2880x1800"));
    }

    #[test]
    fn test_remux_args_video_only() {
        let args = build_remux_args(Path::new("v.mp4"), &[], Path::new("out.mp4"));
        assert_eq!(
            args.join(" "),
            "-y -loglevel error -i v.mp4 -map 0:v:0 -c:v copy -movflags +faststart out.mp4"
        );
    }

    #[test]
    fn test_remux_args_two_audio_tracks() {
        let audio = vec![PathBuf::from("microphone.wav"), PathBuf::from("system.wav")];
        let args = build_remux_args(Path::new("v.mp4"), &audio, Path::new("out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-i v.mp4 -i microphone.wav -i system.wav"));
        assert!(joined.contains("-map 0:v:0 -map 1:a:0 -map 2:a:0"));
        assert!(joined.contains("-c:a aac -ar 48000 -ac 2 -b:a 192k"));
    }

    #[test]
    fn test_audio_writer_pads_gap_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("microphone.wav");
        let (tx, rx) = bounded(4);
        let cancelled = AtomicBool::new(false);

        tx.send(AudioFrame::new(vec![0.5; 200], 2, 1_000, Duration::ZERO)).unwrap();
        // Next block starts at 0.5s, 400 sample frames past the 100 written
        tx.send(AudioFrame::new(vec![0.5; 200], 2, 1_000, Duration::from_millis(500)))
            .unwrap();
        drop(tx);

        let result = run_audio_writer(rx, AudioTrack::Microphone, &path, &cancelled).unwrap();
        match result {
            TrackFile::Audio { frames, .. } => assert_eq!(frames, 600),
            other => panic!("unexpected {:?}", other),
        }

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 600);
    }

    #[test]
    fn test_audio_writer_without_samples_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded::<AudioFrame>(1);
        drop(tx);
        let result = run_audio_writer(
            rx,
            AudioTrack::System,
            &dir.path().join("system.wav"),
            &AtomicBool::new(false),
        )
        .unwrap();
        assert!(matches!(result, TrackFile::Empty(AudioTrack::System)));
    }
}
