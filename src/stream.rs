//! Async adapters for conversion jobs.
//!
//! Jobs always run on the controller's worker thread. This module lets an
//! async caller observe them without blocking the runtime: [`progress_channel`]
//! turns progress callbacks into a [`ProgressStream`], and
//! [`JobController::wait_async`] joins the worker on a blocking task.
//!
//! # Example
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use dicomconvert::{ConversionJob, ConvertError, DicomFileOpener, JobController};
//!
//! # async fn example() -> Result<(), ConvertError> {
//! let (callback, mut events) = dicomconvert::progress_channel();
//! let mut controller = JobController::extraction(DicomFileOpener);
//! controller.start(ConversionJob::extract_frames("cine.dcm", "tmpframe"), callback)?;
//!
//! while let Some(event) = events.next().await {
//!     println!("{:.0}%", event.percent);
//! }
//! let outcome = controller.wait_async().await;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::Stream;

use crate::avi::VideoSinkFactory;
use crate::error::ConvertError;
use crate::job::{JobController, JobOutcome};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::source::SourceOpener;

/// Forwards progress events into a [`ProgressStream`].
///
/// Sending never blocks the worker. Events are dropped once the stream has
/// been dropped.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Progress events of a running job as an async stream.
///
/// The stream ends when the job terminates and the controller has released
/// its callback.
pub struct ProgressStream {
    receiver: UnboundedReceiver<ProgressEvent>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A connected callback/stream pair.
pub fn progress_channel() -> (Arc<ChannelProgress>, ProgressStream) {
    let (sender, receiver) = unbounded_channel();
    (
        Arc::new(ChannelProgress { sender }),
        ProgressStream { receiver },
    )
}

impl<O, F> JobController<O, F>
where
    O: SourceOpener,
    F: VideoSinkFactory,
{
    /// Await the current job without blocking the async runtime.
    ///
    /// Consumes the controller; the join happens on a blocking task.
    pub async fn wait_async(mut self) -> Option<JobOutcome> {
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .unwrap_or_else(|error| {
                Some(JobOutcome::Failed(ConvertError::WorkerPanicked(
                    error.to_string(),
                )))
            })
    }
}
