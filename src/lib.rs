//! Screen recorder core
//!
//! Captures the screen, an optional camera bubble, microphone and system
//! audio, and muxes them into a single MP4.

pub mod capture;
pub mod muxer;
pub mod recorder;
pub mod settings;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screenstudio_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
