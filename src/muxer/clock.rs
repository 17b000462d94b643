//! Media clock and pause bookkeeping
//!
//! Every PTS in the pipeline is a `Duration` since one shared epoch. The
//! pause clock removes paused stretches from that timeline.

use std::time::{Duration, Instant};

/// Shared monotonic epoch for sources and the coordinator
#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    epoch: Instant,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Time since the epoch
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulated pause time
///
/// `total_paused` only grows, and only on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PauseClock {
    is_paused: bool,
    pause_started_at: Option<Duration>,
    total_paused: Duration,
}

impl PauseClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn total_paused(&self) -> Duration {
        self.total_paused
    }

    /// Enter paused mode. Returns false if already paused.
    pub fn pause(&mut self, at: Duration) -> bool {
        if self.is_paused {
            return false;
        }
        self.is_paused = true;
        self.pause_started_at = Some(at);
        true
    }

    /// Leave paused mode, returning the length of the gap that was removed.
    pub fn resume(&mut self, at: Duration) -> Option<Duration> {
        if !self.is_paused {
            return None;
        }
        let started = self.pause_started_at.take().unwrap_or(at);
        let gap = at.saturating_sub(started);
        self.total_paused += gap;
        self.is_paused = false;
        Some(gap)
    }

    /// Shift a raw timestamp back by everything spent paused
    pub fn adjust(&self, raw: Duration) -> Duration {
        raw.saturating_sub(self.total_paused)
    }
}
