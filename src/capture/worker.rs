//! Capture thread plumbing shared by every native source
//!
//! Devices are opened on the delivery thread itself (cpal streams and
//! cameras are not `Send` everywhere). The thread reports whether bring-up
//! worked through a oneshot, so `start` still fails synchronously.

use crate::recorder::source::{RecordingError, RecordingResult, SourceEvent, SourceEventSender, SourceKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Flags a source as dead and tells the coordinator, once
#[derive(Clone)]
pub struct StopReporter {
    kind: SourceKind,
    running: Arc<AtomicBool>,
    events: Option<SourceEventSender>,
}

impl StopReporter {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Report an unexpected stop. Ignored if the source was already
    /// stopping, so a deliberate `stop` never produces an event.
    pub fn fail(&self, reason: impl Into<String>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        tracing::error!("{} source stopped unexpectedly: {}", self.kind, reason);
        if let Some(events) = &self.events {
            let _ = events.send(SourceEvent::StoppedUnexpectedly {
                kind: self.kind,
                reason,
            });
        }
    }
}

/// Handed to the thread body
pub struct ThreadContext {
    reporter: StopReporter,
    ready: Option<oneshot::Sender<RecordingResult<()>>>,
}

impl ThreadContext {
    pub fn is_running(&self) -> bool {
        self.reporter.is_running()
    }

    pub fn reporter(&self) -> StopReporter {
        self.reporter.clone()
    }

    /// Signal that the device is delivering
    pub fn ready(&mut self) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Signal that bring-up failed; the body should return right after
    pub fn startup_failed(&mut self, error: RecordingError) {
        self.reporter.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Err(error));
        }
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.reporter.fail(reason);
    }
}

/// A running delivery thread
pub struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    /// Spawn `body` and wait until it reports ready or failed
    pub async fn spawn<F>(
        kind: SourceKind,
        events: Option<SourceEventSender>,
        body: F,
    ) -> RecordingResult<Self>
    where
        F: FnOnce(ThreadContext) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();
        let context = ThreadContext {
            reporter: StopReporter {
                kind,
                running: running.clone(),
                events,
            },
            ready: Some(ready_tx),
        };

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", kind))
            .spawn(move || body(context))?;

        let mut thread = Self {
            running,
            handle: Some(handle),
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(thread),
            Ok(Err(e)) => {
                thread.join();
                Err(e)
            }
            Err(_) => {
                thread.join();
                Err(RecordingError::CaptureError(format!(
                    "{} capture thread exited during startup",
                    kind
                )))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the thread to exit and wait for it. Returns whether it was still
    /// delivering.
    ///
    /// The join runs on the blocking pool: a camera thread only sees the
    /// flag after its current frame read returns.
    pub async fn stop(mut self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::error!("Capture thread panicked"),
                Err(e) => tracing::error!("Failed to join capture thread: {}", e),
            }
        }
        was_running
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join();
    }
}
