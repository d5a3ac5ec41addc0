//! # dicomconvert
//!
//! Convert multi-frame DICOM images into still-image sequences and AVI
//! videos.
//!
//! `dicomconvert` reads DICOM files with
//! [`dicom-rs`](https://github.com/Enet4/dicom-rs), renders individual frames
//! to [`image::DynamicImage`] values, and either saves them as numbered JPEG
//! stills or streams them into an AVI file. Conversions run on a background
//! worker owned by a [`JobController`], which reports progress through a
//! [`ProgressCallback`] and supports cooperative stop.
//!
//! ## Quick Start
//!
//! ### Extract every frame as JPEG
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dicomconvert::{ConversionJob, DicomFileOpener, JobController, JobOutcome, NoOpProgress};
//!
//! let mut controller = JobController::extraction(DicomFileOpener);
//! let manifest = controller
//!     .start(ConversionJob::extract_frames("cine.dcm", "tmpframe"), Arc::new(NoOpProgress))
//!     .unwrap();
//!
//! if let Some(JobOutcome::Completed(_)) = controller.wait() {
//!     println!("{} stills written", manifest.len());
//! }
//! ```
//!
//! ### Split one frame into its own DICOM file
//!
//! ```no_run
//! use std::path::Path;
//!
//! use dicomconvert::{ConversionOptions, DicomFileOpener, FrameSequenceExtractor};
//!
//! let options = ConversionOptions::new();
//! FrameSequenceExtractor::new(&DicomFileOpener, &options)
//!     .split_frame(Path::new("cine.dcm"), 3, Path::new("frame-3.dcm"))
//!     .unwrap();
//! ```
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | [`AviWriter`] for MPEG-4 AVI output via FFmpeg |
//! | `async` | [`ProgressStream`] and `JobController::wait_async` via Tokio |
//! | `full` | Enables all of the above |
//!
//! Without `ffmpeg`, AVI jobs need a caller-supplied [`VideoSinkFactory`].

pub mod avi;
pub mod configuration;
pub mod dicom;
pub mod encapsulation;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frames;
pub mod job;
pub mod progress;
pub mod source;
pub mod staging;
#[cfg(feature = "async")]
pub mod stream;
pub mod transfer_syntax;
#[cfg(feature = "ffmpeg")]
pub mod writer;

pub use avi::{
    AssemblyReport, AviAssemblyPipeline, NoVideoBackend, NoVideoSink, VideoGeometry, VideoSink,
    VideoSinkFactory, orient_frame,
};
pub use configuration::{ConversionOptions, ListFrameSource};
pub use dicom::{DicomFile, DicomFileOpener};
pub use encapsulation::{
    CompositeBuffer, EncapsulatedPixelData, PixelContainerElement, encapsulate,
};
pub use error::ConvertError;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegLogLevel, init_ffmpeg, set_ffmpeg_log_level};
pub use frames::{ExtractionReport, FrameSequenceExtractor, Manifest, SkippedFrame, frame_file_name};
pub use job::{ConversionJob, JobController, JobOutcome, JobReport, JobState};
pub use progress::{CancellationToken, NoOpProgress, OperationType, ProgressCallback, ProgressEvent};
pub use source::{DicomSource, FrameRange, SourceDescriptor, SourceOpener};
pub use staging::StagingDirectory;
#[cfg(feature = "async")]
pub use stream::{ChannelProgress, ProgressStream, progress_channel};
pub use transfer_syntax::{Endianness, TransferSyntax};
#[cfg(feature = "ffmpeg")]
pub use writer::{AviWriter, AviWriterFactory};
