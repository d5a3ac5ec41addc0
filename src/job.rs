//! Background execution of conversion jobs.
//!
//! A [`JobController`] runs at most one [`ConversionJob`] at a time on a
//! dedicated worker thread. Progress is delivered to the caller's
//! [`ProgressCallback`] from that thread. Stopping is cooperative: the
//! worker checks a [`CancellationToken`] at every frame boundary, and
//! [`JobController::stop`] blocks (up to a timeout) until it has exited.
//!
//! ```text
//! Idle --start--> Running --finish--> Completed | Failed
//!                    |
//!                  stop --> StopRequested --worker exits--> Stopped
//! ```

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};

use crate::avi::{AssemblyReport, AviAssemblyPipeline, NoVideoBackend, VideoSinkFactory};
use crate::configuration::ConversionOptions;
use crate::error::ConvertError;
use crate::frames::{ExtractionEnd, ExtractionReport, FrameSequenceExtractor, Manifest};
use crate::progress::{CancellationToken, OperationType, ProgressCallback};
use crate::source::{FrameRange, SourceDescriptor, SourceOpener};
use crate::staging::StagingDirectory;

const WORKER_THREAD_NAME: &str = "dicomconvert-worker";

/// A unit of work for a [`JobController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionJob {
    /// Render every frame of a multi-frame file to JPEG stills.
    ExtractFrames {
        /// Multi-frame source file.
        source: PathBuf,
        /// Directory receiving the stills.
        staging: StagingDirectory,
    },
    /// Encode frames into an AVI file.
    AssembleAvi {
        /// Where the frames come from.
        source: SourceDescriptor,
        /// Frames to use from a multi-frame source.
        range: FrameRange,
        /// Output video path.
        output: PathBuf,
        /// Frames per second.
        frame_rate: u16,
    },
}

impl ConversionJob {
    /// An extraction job writing into `staging`.
    pub fn extract_frames<S, D>(source: S, staging: D) -> Self
    where
        S: Into<PathBuf>,
        D: Into<PathBuf>,
    {
        ConversionJob::ExtractFrames {
            source: source.into(),
            staging: StagingDirectory::new(staging),
        }
    }

    /// An assembly job.
    pub fn assemble_avi<P: Into<PathBuf>>(
        source: SourceDescriptor,
        range: FrameRange,
        output: P,
        frame_rate: u16,
    ) -> Self {
        ConversionJob::AssembleAvi {
            source,
            range,
            output: output.into(),
            frame_rate,
        }
    }

    /// Which kind of progress events this job emits.
    pub fn operation(&self) -> OperationType {
        match self {
            ConversionJob::ExtractFrames { .. } => OperationType::FrameExtraction,
            ConversionJob::AssembleAvi { .. } => OperationType::VideoAssembly,
        }
    }
}

/// What a completed job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    /// Result of an extraction job.
    Frames(ExtractionReport),
    /// Result of an assembly job.
    Video(AssemblyReport),
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job ran to the end.
    Completed(JobReport),
    /// The job observed a stop request and exited early. Extraction jobs
    /// carry the report of the frames handled before the stop.
    Stopped(Option<ExtractionReport>),
    /// The job failed.
    Failed(ConvertError),
}

impl JobOutcome {
    fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed(_) => JobState::Completed,
            JobOutcome::Stopped(_) => JobState::Stopped,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }

    /// Returns `true` for [`JobOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

/// Lifecycle state of a [`JobController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    /// No job has been started.
    #[default]
    Idle,
    /// A job is executing.
    Running,
    /// Stop was requested; the worker has not exited yet.
    StopRequested,
    /// The last job exited because of a stop request.
    Stopped,
    /// The last job ran to the end.
    Completed,
    /// The last job failed.
    Failed,
}

impl JobState {
    /// Returns `true` while a worker may still be executing.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Running | JobState::StopRequested)
    }
}

struct Worker {
    handle: JoinHandle<JobOutcome>,
    token: CancellationToken,
    // Disconnects when the worker thread exits, including by panic.
    exited: Receiver<()>,
}

/// Runs conversion jobs on a background worker thread.
///
/// `O` opens sources; `F` creates video writers and defaults to
/// [`NoVideoBackend`] for extraction-only controllers.
pub struct JobController<O, F = NoVideoBackend> {
    opener: Arc<O>,
    factory: Arc<F>,
    options: ConversionOptions,
    state: Arc<Mutex<JobState>>,
    manifest: Manifest,
    worker: Option<Worker>,
}

impl<O: SourceOpener> JobController<O, NoVideoBackend> {
    /// A controller that can only run extraction jobs.
    pub fn extraction(opener: O) -> Self {
        Self::new(opener, NoVideoBackend)
    }
}

impl<O: SourceOpener, F: VideoSinkFactory> JobController<O, F> {
    /// A controller with default [`ConversionOptions`].
    pub fn new(opener: O, factory: F) -> Self {
        Self {
            opener: Arc::new(opener),
            factory: Arc::new(factory),
            options: ConversionOptions::default(),
            state: Arc::new(Mutex::new(JobState::Idle)),
            manifest: Manifest::new(),
            worker: None,
        }
    }

    /// Use `options` for subsequent jobs.
    ///
    /// The controller installs its own cancellation token per job; a token
    /// set on `options` is replaced.
    #[must_use]
    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    /// Options applied to each job.
    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if no worker is executing.
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .is_none_or(|worker| worker.handle.is_finished())
    }

    /// Manifest of the most recent extraction job.
    pub fn manifest(&self) -> Manifest {
        self.manifest.clone()
    }

    /// Launch `job` on a new worker thread and return immediately.
    ///
    /// The returned [`Manifest`] fills in as an extraction job saves frames
    /// and is complete once the job has terminated. A finished job that was
    /// never waited on is reaped first and its outcome discarded.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::JobAlreadyRunning`] if a job is still executing.
    /// - [`ConvertError::IoError`] if the worker thread cannot be spawned.
    pub fn start(
        &mut self,
        job: ConversionJob,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<Manifest, ConvertError> {
        if let Some(worker) = self.worker.take() {
            if !worker.handle.is_finished() {
                self.worker = Some(worker);
                return Err(ConvertError::JobAlreadyRunning);
            }
            let previous = self.reap(worker);
            log::debug!("Discarding unobserved outcome of previous job: {previous:?}");
        }

        let token = CancellationToken::new();
        let options = self.options.clone().with_cancellation(token.clone());
        let manifest = Manifest::new();
        let (exit_signal, exited) = bounded(1);

        let opener = Arc::clone(&self.opener);
        let factory = Arc::clone(&self.factory);
        let state = Arc::clone(&self.state);
        let worker_manifest = manifest.clone();

        log::info!("Starting {:?} job", job.operation());
        self.set_state(JobState::Running);

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = run_job(&*opener, &*factory, &job, &options, progress, &worker_manifest);
                *state.lock().unwrap_or_else(PoisonError::into_inner) = outcome.state();
                let _ = exit_signal.send(());
                outcome
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(error) => {
                self.set_state(JobState::Failed);
                return Err(ConvertError::IoError(error));
            }
        };

        self.manifest = manifest.clone();
        self.worker = Some(Worker {
            handle,
            token,
            exited,
        });
        Ok(manifest)
    }

    /// Request a stop and block until the worker exits or the configured
    /// stop timeout elapses.
    ///
    /// Returns `Ok(None)` when no job is running. After `Ok(Some(_))` returns,
    /// no further progress events are delivered.
    ///
    /// # Errors
    ///
    /// [`ConvertError::StopTimedOut`] if the worker is still busy when the
    /// timeout elapses. The stop request stays in effect and the controller
    /// remains in [`JobState::StopRequested`].
    pub fn stop(&mut self) -> Result<Option<JobOutcome>, ConvertError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };

        worker.token.cancel();
        if self.state() == JobState::Running {
            self.set_state(JobState::StopRequested);
        }
        log::debug!("Stop requested; waiting for worker");

        let timeout = self.options.stop_timeout();
        if let Err(RecvTimeoutError::Timeout) = worker.exited.recv_timeout(timeout) {
            log::warn!("Worker did not stop within {timeout:?}");
            self.worker = Some(worker);
            return Err(ConvertError::StopTimedOut(timeout));
        }

        Ok(Some(self.reap(worker)))
    }

    /// Block until the current job terminates and return its outcome, or
    /// `None` if no job was started since the last wait.
    pub fn wait(&mut self) -> Option<JobOutcome> {
        let worker = self.worker.take()?;
        Some(self.reap(worker))
    }

    fn reap(&mut self, worker: Worker) -> JobOutcome {
        let outcome = worker.handle.join().unwrap_or_else(|payload| {
            JobOutcome::Failed(ConvertError::WorkerPanicked(panic_message(payload.as_ref())))
        });
        self.set_state(outcome.state());
        log::info!("Job finished: {:?}", outcome.state());
        outcome
    }

    fn set_state(&self, state: JobState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl<O, F> Drop for JobController<O, F> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
            match worker.exited.recv_timeout(self.options.stop_timeout()) {
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("Detaching conversion worker that did not stop in time");
                }
                _ => {
                    let _ = worker.handle.join();
                }
            }
        }
    }
}

fn run_job<O: SourceOpener, F: VideoSinkFactory>(
    opener: &O,
    factory: &F,
    job: &ConversionJob,
    options: &ConversionOptions,
    progress: Arc<dyn ProgressCallback>,
    manifest: &Manifest,
) -> JobOutcome {
    let result = match job {
        ConversionJob::ExtractFrames { source, staging } => {
            match FrameSequenceExtractor::new(opener, options).run(source, staging, progress, manifest) {
                Ok(ExtractionEnd::Finished(report)) => Ok(JobReport::Frames(report)),
                Ok(ExtractionEnd::Cancelled(partial)) => {
                    return JobOutcome::Stopped(Some(partial));
                }
                Err(error) => Err(error),
            }
        }
        ConversionJob::AssembleAvi {
            source,
            range,
            output,
            frame_rate,
        } => AviAssemblyPipeline::new(opener, factory, options)
            .assemble(source, *range, output, *frame_rate, progress)
            .map(JobReport::Video),
    };

    match result {
        Ok(report) => JobOutcome::Completed(report),
        Err(ConvertError::Cancelled) => JobOutcome::Stopped(None),
        Err(error) => {
            log::error!("Conversion job failed: {error}");
            JobOutcome::Failed(error)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_recovered() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn active_states() {
        assert!(JobState::Running.is_active());
        assert!(JobState::StopRequested.is_active());
        assert!(!JobState::Completed.is_active());
        assert!(!JobState::Idle.is_active());
    }

    #[test]
    fn job_constructors_pick_the_operation() {
        let job = ConversionJob::extract_frames("a.dcm", "tmpframe");
        assert_eq!(job.operation(), OperationType::FrameExtraction);

        let job = ConversionJob::assemble_avi(
            SourceDescriptor::multi_frame("a.dcm"),
            FrameRange::all(),
            "a.avi",
            25,
        );
        assert_eq!(job.operation(), OperationType::VideoAssembly);
    }
}
