//! Background job lifecycle tests.

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{MockOpener, MockSource, ProgressRecorder, RecordingFactory};
use dicomconvert::{
    ConversionJob, ConversionOptions, ConvertError, FrameRange, JobController, JobOutcome,
    JobReport, JobState, ProgressCallback, ProgressEvent, SourceDescriptor,
};

fn fast_options() -> ConversionOptions {
    ConversionOptions::new().with_frame_interval(Duration::ZERO)
}

/// A callback that signals the first event through a channel.
fn first_event_signal() -> (Arc<dyn ProgressCallback>, mpsc::Receiver<()>) {
    let (sender, receiver) = mpsc::channel();
    let sender = Mutex::new(Some(sender));
    let callback = move |_: &ProgressEvent| {
        if let Some(sender) = sender.lock().unwrap().take() {
            let _ = sender.send(());
        }
    };
    (Arc::new(callback), receiver)
}

// ── Completion ─────────────────────────────────────────────────────

#[test]
fn extraction_job_completes_on_the_worker_thread() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(3, 2, 2));
    let recorder = ProgressRecorder::new();

    let mut controller = JobController::extraction(opener).with_options(fast_options());
    assert_eq!(controller.state(), JobState::Idle);

    let manifest = controller
        .start(
            ConversionJob::extract_frames(&source, dir.path().join("tmpframe")),
            recorder.callback(),
        )
        .unwrap();

    match controller.wait() {
        Some(JobOutcome::Completed(JobReport::Frames(report))) => {
            assert_eq!(report.manifest.len(), 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.state(), JobState::Completed);
    assert!(controller.is_finished());
    assert_eq!(manifest.len(), 3);
    assert_eq!(controller.manifest().len(), 3);

    let worker_name = Some("dicomconvert-worker".to_string());
    assert!(recorder.thread_names().iter().all(|name| *name == worker_name));
}

#[test]
fn assembly_job_runs_through_the_factory() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(4, 2, 2));
    let factory = RecordingFactory::new();

    let mut controller = JobController::new(opener, factory.clone()).with_options(fast_options());
    controller
        .start(
            ConversionJob::assemble_avi(
                SourceDescriptor::multi_frame(&source),
                FrameRange::new(1, 3),
                dir.path().join("out.avi"),
                30,
            ),
            ProgressRecorder::new().callback(),
        )
        .unwrap();

    let outcome = controller.wait().expect("a job was started");
    assert!(outcome.is_completed());
    assert_eq!(factory.frames().len(), 2);
    assert_eq!(factory.close_calls(), 1);
}

#[test]
fn wait_without_a_job_returns_none() {
    let mut controller = JobController::extraction(MockOpener::new());
    assert!(controller.wait().is_none());
    assert!(controller.is_finished());
}

#[test]
fn a_finished_controller_accepts_a_new_job() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(2, 2, 2));
    let mut controller = JobController::extraction(opener).with_options(fast_options());

    for _ in 0..2 {
        controller
            .start(
                ConversionJob::extract_frames(&source, dir.path().join("tmpframe")),
                ProgressRecorder::new().callback(),
            )
            .unwrap();
        assert!(controller.wait().unwrap().is_completed());
    }
}

// ── Failure ────────────────────────────────────────────────────────

#[test]
fn missing_source_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = ProgressRecorder::new();
    let mut controller = JobController::extraction(MockOpener::new());

    controller
        .start(
            ConversionJob::extract_frames(dir.path().join("absent.dcm"), dir.path().join("tmp")),
            recorder.callback(),
        )
        .unwrap();

    assert!(matches!(
        controller.wait(),
        Some(JobOutcome::Failed(ConvertError::SourceNotFound(_)))
    ));
    assert_eq!(controller.state(), JobState::Failed);
    assert_eq!(recorder.count(), 0);
    assert!(!dir.path().join("tmp").exists());
}

#[test]
fn avi_job_without_a_backend_fails() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(2, 2, 2));
    let mut controller = JobController::extraction(opener);

    controller
        .start(
            ConversionJob::assemble_avi(
                SourceDescriptor::multi_frame(&source),
                FrameRange::all(),
                dir.path().join("out.avi"),
                25,
            ),
            ProgressRecorder::new().callback(),
        )
        .unwrap();

    assert!(matches!(
        controller.wait(),
        Some(JobOutcome::Failed(ConvertError::VideoWriteError(_)))
    ));
}

#[test]
fn worker_panic_is_reported_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(3, 2, 2).panicking_on(1));
    let mut controller = JobController::extraction(opener).with_options(fast_options());

    controller
        .start(
            ConversionJob::extract_frames(&source, dir.path().join("tmpframe")),
            ProgressRecorder::new().callback(),
        )
        .unwrap();

    match controller.wait() {
        Some(JobOutcome::Failed(ConvertError::WorkerPanicked(message))) => {
            assert!(message.contains("frame 1"), "message: {message}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.state(), JobState::Failed);
}

// ── Stop ───────────────────────────────────────────────────────────

fn slow_controller(dir: &std::path::Path, delay: Duration) -> (JobController<MockOpener>, ConversionJob) {
    let source = dir.join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(200, 2, 2).with_delay(delay));
    let controller = JobController::extraction(opener).with_options(fast_options());
    (controller, ConversionJob::extract_frames(&source, dir.join("tmpframe")))
}

#[test]
fn starting_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, job) = slow_controller(dir.path(), Duration::from_millis(20));

    controller.start(job.clone(), ProgressRecorder::new().callback()).unwrap();
    assert!(matches!(
        controller.start(job, ProgressRecorder::new().callback()),
        Err(ConvertError::JobAlreadyRunning)
    ));
    assert_eq!(controller.state(), JobState::Running);

    assert!(matches!(controller.stop(), Ok(Some(JobOutcome::Stopped(Some(_))))));
}

#[test]
fn stop_returns_promptly_and_silences_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, job) = slow_controller(dir.path(), Duration::from_millis(20));
    let recorder = ProgressRecorder::new();
    let (signal, first_event) = first_event_signal();
    let recorder_callback = recorder.callback();
    let combined = move |event: &ProgressEvent| {
        recorder_callback.on_progress(event);
        signal.on_progress(event);
    };

    let manifest = controller.start(job, Arc::new(combined)).unwrap();
    first_event.recv_timeout(Duration::from_secs(10)).unwrap();

    let started = Instant::now();
    let outcome = controller.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(outcome, Some(JobOutcome::Stopped(_))));
    assert_eq!(controller.state(), JobState::Stopped);

    let delivered = recorder.count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(recorder.count(), delivered, "no events after stop returns");
    assert!(manifest.len() < 200);
    assert!(recorder.percents().iter().all(|percent| *percent < 100.0));
}

#[test]
fn stop_without_a_job_is_a_no_op() {
    let mut controller = JobController::extraction(MockOpener::new());
    assert!(matches!(controller.stop(), Ok(None)));
    assert_eq!(controller.state(), JobState::Idle);
}

#[test]
fn stop_times_out_on_a_busy_worker() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new()
        .with_source(&source, MockSource::new(5, 2, 2).with_delay(Duration::from_millis(300)));
    let mut controller = JobController::extraction(opener).with_options(
        fast_options().with_stop_timeout(Duration::from_millis(10)),
    );

    controller
        .start(
            ConversionJob::extract_frames(&source, dir.path().join("tmpframe")),
            ProgressRecorder::new().callback(),
        )
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert!(matches!(
        controller.stop(),
        Err(ConvertError::StopTimedOut(_))
    ));
    assert_eq!(controller.state(), JobState::StopRequested);
    assert!(matches!(controller.wait(), Some(JobOutcome::Stopped(_))));
    assert_eq!(controller.state(), JobState::Stopped);
}

#[test]
fn stopped_extraction_keeps_its_partial_report() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(
        &source,
        MockSource::new(200, 2, 2)
            .failing_on(1)
            .with_delay(Duration::from_millis(20)),
    );
    let mut controller = JobController::extraction(opener).with_options(fast_options());

    let (sender, past_second_frame) = mpsc::channel();
    let sender = Mutex::new(Some(sender));
    let signal = move |event: &ProgressEvent| {
        if event.current >= 2 {
            if let Some(sender) = sender.lock().unwrap().take() {
                let _ = sender.send(());
            }
        }
    };

    controller
        .start(
            ConversionJob::extract_frames(&source, dir.path().join("tmpframe")),
            Arc::new(signal),
        )
        .unwrap();
    past_second_frame.recv_timeout(Duration::from_secs(10)).unwrap();

    match controller.stop() {
        Ok(Some(JobOutcome::Stopped(Some(partial)))) => {
            assert_eq!(partial.frame_count, 200);
            assert!(partial.staging_cleaned);
            assert_eq!(partial.skipped.len(), 1);
            assert_eq!(partial.skipped[0].index, 1);
            assert!(partial.manifest.len() >= 1 && partial.manifest.len() < 199);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn stop_returns_as_soon_as_a_panicked_worker_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("cine.dcm");
    let opener = MockOpener::new().with_source(&source, MockSource::new(3, 2, 2).panicking_on(0));
    let mut controller = JobController::extraction(opener)
        .with_options(fast_options().with_stop_timeout(Duration::from_secs(30)));

    controller
        .start(
            ConversionJob::extract_frames(&source, dir.path().join("tmpframe")),
            ProgressRecorder::new().callback(),
        )
        .unwrap();

    let started = Instant::now();
    assert!(matches!(
        controller.stop(),
        Ok(Some(JobOutcome::Failed(ConvertError::WorkerPanicked(_))))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(controller.state(), JobState::Failed);
}
