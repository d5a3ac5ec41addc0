//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring conversion
//! progress, [`CancellationToken`] for cooperative cancellation, and
//! [`ProgressEvent`] for the snapshot delivered on every frame.
//!
//! Callbacks are invoked synchronously on the conversion worker thread. A
//! consumer that updates UI state must marshal the event back to its own
//! thread; the crate never does that crossing itself.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dicomconvert::{ConversionJob, JobController, ProgressEvent};
//!
//! let mut controller = JobController::extraction(dicomconvert::DicomFileOpener);
//! let manifest = controller.start(
//!     ConversionJob::extract_frames("cine.dcm", "tmpframe"),
//!     Arc::new(|event: &ProgressEvent| println!("{:.1}%", event.percent)),
//! )?;
//! let outcome = controller.wait();
//! # Ok::<(), dicomconvert::ConvertError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The kind of operation currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Rendering frames of a multi-frame source to still images.
    FrameExtraction,
    /// Assembling rendered frames into a video file.
    VideoAssembly,
}

/// A snapshot of conversion progress.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How many frames have been processed so far (successful or not).
    pub current: u64,
    /// Total frames expected for the job.
    pub total: u64,
    /// Completion percentage (0.0 – 100.0).
    pub percent: f32,
    /// The percentage delivered with the previous event.
    pub last_percent: f32,
    /// Wall-clock time elapsed since the operation started.
    pub elapsed: Duration,
}

/// Trait for receiving progress updates during a conversion.
///
/// Implementations must be [`Send`] and [`Sync`] because they are invoked
/// from the job's worker thread.
///
/// Progress callbacks are **infallible**: they observe but cannot halt the
/// job. Use [`CancellationToken`] (or [`JobController::stop`](crate::JobController::stop))
/// to stop a conversion.
pub trait ProgressCallback: Send + Sync {
    /// Called after every processed frame and once more at the end of a job.
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// A callback that discards all progress notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to request
/// cancellation. Conversion loops check
/// [`is_cancelled`](CancellationToken::is_cancelled) before each frame.
///
/// # Example
///
/// ```
/// use dicomconvert::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks percent accounting for one job and emits callbacks.
///
/// Reported percentages never decrease and never exceed 100.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: u64,
    current: u64,
    percent: f32,
    last_percent: f32,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            current: 0,
            percent: 0.0,
            last_percent: 0.0,
            start_time: Instant::now(),
        }
    }

    /// Record one processed frame and report an absolute percentage.
    pub(crate) fn advance_to(&mut self, percent: f32) {
        self.current += 1;
        self.report(percent);
    }

    /// Record one processed frame and add `step` to the running percentage.
    pub(crate) fn advance_by(&mut self, step: f32) {
        self.current += 1;
        let next = self.percent + step;
        self.report(next);
    }

    /// Unconditionally emit the terminal 100% event.
    pub(crate) fn finish(&mut self) {
        self.report(100.0);
    }

    fn report(&mut self, percent: f32) {
        self.last_percent = self.percent;
        self.percent = percent.clamp(self.percent, 100.0);

        let event = ProgressEvent {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percent: self.percent,
            last_percent: self.last_percent,
            elapsed: self.start_time.elapsed(),
        };

        self.callback.on_progress(&event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording_tracker(total: u64) -> (ProgressTracker, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let tracker = ProgressTracker::new(
            Arc::new(move |event: &ProgressEvent| sink.lock().unwrap().push(event.clone())),
            OperationType::FrameExtraction,
            total,
        );
        (tracker, events)
    }

    #[test]
    fn additive_steps_are_capped_at_one_hundred() {
        let (mut tracker, events) = recording_tracker(3);
        for _ in 0..4 {
            tracker.advance_by(40.0);
        }

        let events = events.lock().unwrap();
        let percents: Vec<f32> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![40.0, 80.0, 100.0, 100.0]);
        assert_eq!(events[2].last_percent, 80.0);
    }

    #[test]
    fn absolute_reports_never_move_backwards() {
        let (mut tracker, events) = recording_tracker(2);
        tracker.advance_to(60.0);
        tracker.advance_to(30.0);

        let events = events.lock().unwrap();
        assert_eq!(events[1].percent, 60.0);
        assert_eq!(events[1].current, 2);
    }

    #[test]
    fn finish_reports_exactly_one_hundred() {
        let (mut tracker, events) = recording_tracker(10);
        tracker.advance_to(10.0);
        tracker.finish();

        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.last_percent, 10.0);
        assert_eq!(last.current, 1);
    }
}
