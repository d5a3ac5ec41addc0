//! Error types for the `dicomconvert` crate.
//!
//! This module defines [`ConvertError`], the unified error type returned by
//! every fallible operation in the crate. Errors carry the context needed to
//! diagnose a failed conversion (source paths, frame indices, attribute
//! names, upstream messages) so callers never depend on a display layer to
//! learn what went wrong.

use std::{io::Error as IoError, path::PathBuf, time::Duration};

#[cfg(feature = "ffmpeg")]
use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `dicomconvert` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConvertError {
    /// The source file does not exist. Raised before any work is done.
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    /// The source file exists but could not be parsed.
    #[error("Failed to open DICOM file at {path}: {reason}")]
    SourceOpen {
        /// Path that was passed to the opener.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// A dataset could not be written to disk.
    #[error("Failed to write DICOM file at {path}: {reason}")]
    DatasetWrite {
        /// Destination path.
        path: PathBuf,
        /// Underlying reason the write failed.
        reason: String,
    },

    /// A required attribute is absent or has an unusable value.
    #[error("Missing or invalid attribute: {0}")]
    MissingAttribute(&'static str),

    /// The requested frame index exceeds the frame count.
    #[error("Frame {frame} is out of range (source has {total_frames} frames)")]
    FrameOutOfRange {
        /// The frame index that was requested.
        frame: u32,
        /// The number of frames in the source.
        total_frames: u32,
    },

    /// A frame could not be rendered to a raster image.
    #[error("Failed to render frame {frame}: {reason}")]
    RenderError {
        /// Index of the frame that failed.
        frame: u32,
        /// Upstream renderer message.
        reason: String,
    },

    /// Pixel data could not be read from or written into a dataset.
    #[error("Pixel data error: {0}")]
    PixelDataError(String),

    /// A frame range's begin lies past its end.
    #[error("Invalid range: begin ({begin}) must not exceed end ({end})")]
    InvalidRange {
        /// First frame of the range.
        begin: u32,
        /// Exclusive end of the range.
        end: u32,
    },

    /// The job description cannot be executed (e.g. an empty file list).
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The video writer failed to create, accept a frame, or close.
    #[error("Video write error: {0}")]
    VideoWriteError(String),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// A job was started on a controller that already runs one.
    #[error("A conversion job is already running on this controller")]
    JobAlreadyRunning,

    /// The worker did not exit within the stop timeout.
    #[error("Worker did not stop within {0:?}")]
    StopTimedOut(Duration),

    /// The worker thread panicked.
    #[error("Conversion worker panicked: {0}")]
    WorkerPanicked(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while encoding a still frame.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

#[cfg(feature = "ffmpeg")]
impl From<FfmpegError> for ConvertError {
    fn from(error: FfmpegError) -> Self {
        ConvertError::FfmpegError(error.to_string())
    }
}
