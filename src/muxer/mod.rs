//! Synchronized muxing
//!
//! Pause-corrected timestamps, camera compositing and the container
//! sinks that write the final file.

pub mod clock;
pub mod compositor;
pub mod ffmpeg;
pub mod pipeline;
pub mod sink;
pub mod types;

pub use clock::{MediaClock, PauseClock};
pub use compositor::Compositor;
pub use ffmpeg::FfmpegSinkFactory;
pub use pipeline::Muxer;
pub use sink::{ContainerSink, SinkFactory};
pub use types::*;
