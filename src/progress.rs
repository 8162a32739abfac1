//! Progress reporting for pipeline runs.
//!
//! Every stage reports through one uniform event shape, [`ProgressEvent`],
//! regardless of which engine is doing the work. Engines have wildly
//! different native progress notions (tesseract reports nothing, the
//! encoder knows its ladder rung, pdfium knows the page); the orchestrator
//! maps all of them onto a document-level percentage before any sink sees
//! them.
//!
//! Implement [`ProgressSink`] to observe a run, or use
//! [`crate::stream::progress_channel`] to get the events as a `Stream`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doctools::{ProgressEvent, ProgressSink};
//! use std::sync::atomic::{AtomicU8, Ordering};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl ProgressSink for LastPercent {
//!     fn on_progress(&self, event: &ProgressEvent) {
//!         self.0.store(event.percent, Ordering::SeqCst);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Loading,
    Rendering,
    Encoding,
    Recognizing,
    Assembling,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Loading => "loading",
            Stage::Rendering => "rendering",
            Stage::Encoding => "encoding",
            Stage::Recognizing => "recognizing",
            Stage::Assembling => "assembling",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// One progress update: what is happening, and how far along the run is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// Human-readable status line, e.g. "Processing page 2 of 5".
    pub status_text: String,
    /// Document-level completion, 0–100.
    pub percent: u8,
}

/// Receives progress events from a run.
///
/// Implementations must be `Send + Sync`: stages running on blocking
/// threads report through the same sink.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = event;
    }
}

/// A no-op sink for callers that don't need progress events.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Latest progress of a run, kept on the [`crate::orchestrator::PipelineRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub stage: Stage,
    pub status_text: String,
    pub percent: u8,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            stage: Stage::Loading,
            status_text: String::new(),
            percent: 0,
        }
    }
}

/// Forwards events to a sink while keeping the percentage monotone.
///
/// A stage that reports a lower percentage than one already emitted (an
/// engine restarting its own counter, a page fraction rounding down) is
/// clamped up to the last value. Interior mutability lets blocking-thread
/// callbacks report through a shared reference.
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    state: Mutex<ProgressState>,
}

impl<'a> ProgressTracker<'a> {
    /// Start a run: resets to 0 and emits the first event.
    pub fn start(sink: &'a dyn ProgressSink, status: impl Into<String>) -> Self {
        let tracker = Self {
            sink,
            state: Mutex::new(ProgressState::default()),
        };
        tracker.emit(Stage::Loading, status.into(), 0);
        tracker
    }

    /// Report a percentage within `[0, 100]`.
    pub fn report(&self, stage: Stage, status: impl Into<String>, percent: f32) {
        let pct = percent.clamp(0.0, 100.0).floor() as u8;
        self.emit(stage, status.into(), pct);
    }

    /// Report progress of page `completed + fraction` out of `total`,
    /// mapped into the `[lo, hi]` band of the document percentage.
    pub fn report_pages(
        &self,
        stage: Stage,
        status: impl Into<String>,
        completed: usize,
        fraction: f32,
        total: usize,
        (lo, hi): (f32, f32),
    ) {
        let total = total.max(1) as f32;
        let done = (completed as f32 + fraction.clamp(0.0, 1.0)) / total;
        self.report(stage, status, lo + (hi - lo) * done);
    }

    /// Terminal success: 100 / "Done".
    pub fn finish(&self) {
        self.emit(Stage::Done, "Done".to_string(), 100);
    }

    /// Snapshot of the last emitted state.
    pub fn state(&self) -> ProgressState {
        self.lock().clone()
    }

    fn emit(&self, stage: Stage, status_text: String, percent: u8) {
        let event = {
            let mut state = self.lock();
            let percent = percent.max(state.percent).min(100);
            *state = ProgressState {
                stage,
                status_text: status_text.clone(),
                percent,
            };
            ProgressEvent {
                stage,
                status_text,
                percent,
            }
        };
        self.sink.on_progress(&event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        // A sink that panicked mid-report leaves the state itself intact.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
