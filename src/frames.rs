//! Multi-frame to still-image extraction.
//!
//! [`FrameSequenceExtractor`] renders every frame of a multi-frame source to
//! a numbered JPEG in a staging directory and records the produced paths in a
//! [`Manifest`]. A frame that fails to render or save is skipped and reported;
//! it never aborts the job.
//!
//! It also implements the single-frame path: [`FrameSequenceExtractor::split_frame`]
//! re-embeds one frame's raw pixel data into a standalone dataset.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

use crate::configuration::ConversionOptions;
use crate::encapsulation::encapsulate;
use crate::error::ConvertError;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::source::{DicomSource, SourceOpener, require_exists};
use crate::staging::StagingDirectory;

/// Ordered list of still images produced by an extraction job.
///
/// Cloning shares the underlying list, so a caller can watch it fill while
/// the job runs on its worker thread. It is only complete once the job has
/// terminated.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl Manifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the paths recorded so far.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Number of recorded paths.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub(crate) fn push(&self, path: PathBuf) {
        self.lock().push(path);
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A frame that was skipped during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFrame {
    /// Zero-based frame index.
    pub index: u32,
    /// Why the frame was skipped.
    pub reason: String,
}

/// Result of an extraction.
///
/// For a stopped job the report covers the frames visited before the stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Frames in the source (the advertised count, with 0 counted as 1).
    pub frame_count: u32,
    /// Produced still images, in frame order.
    pub manifest: Vec<PathBuf>,
    /// Frames that failed to render or save.
    pub skipped: Vec<SkippedFrame>,
    /// Whether the staging directory was prepared without errors.
    pub staging_cleaned: bool,
}

pub(crate) enum ExtractionEnd {
    Finished(ExtractionReport),
    Cancelled(ExtractionReport),
}

/// Still-image file name for a frame: `<SOPInstanceUID>-<index:05>.jpg`.
pub fn frame_file_name(sop_instance_uid: &str, index: u32) -> String {
    format!("{sop_instance_uid}-{index:05}.jpg")
}

/// Extracts frames of a multi-frame source as still images.
pub struct FrameSequenceExtractor<'a, O> {
    opener: &'a O,
    options: &'a ConversionOptions,
}

impl<'a, O: SourceOpener> FrameSequenceExtractor<'a, O> {
    /// Create an extractor using `opener` to read sources.
    pub fn new(opener: &'a O, options: &'a ConversionOptions) -> Self {
        Self { opener, options }
    }

    /// Render every frame of `source` into `staging`.
    ///
    /// The staging directory is recreated empty first. `manifest` is cleared
    /// and then receives one path per successfully saved frame, in index
    /// order. Progress is reported after every frame, followed by a final
    /// 100% event.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::SourceNotFound`] if `source` does not exist. Nothing
    ///   is touched and no progress is reported.
    /// - [`ConvertError::SourceOpen`] if the source cannot be parsed.
    /// - [`ConvertError::Cancelled`] if the cancellation token fires; frames
    ///   already saved stay in the manifest.
    pub fn extract(
        &self,
        source: &Path,
        staging: &StagingDirectory,
        progress: Arc<dyn ProgressCallback>,
        manifest: &Manifest,
    ) -> Result<ExtractionReport, ConvertError> {
        match self.run(source, staging, progress, manifest)? {
            ExtractionEnd::Finished(report) => Ok(report),
            ExtractionEnd::Cancelled(_) => Err(ConvertError::Cancelled),
        }
    }

    /// Like [`extract`](Self::extract), but a cancelled run still yields the
    /// report of the frames visited before the stop.
    pub(crate) fn run(
        &self,
        source: &Path,
        staging: &StagingDirectory,
        progress: Arc<dyn ProgressCallback>,
        manifest: &Manifest,
    ) -> Result<ExtractionEnd, ConvertError> {
        require_exists(source)?;
        let dataset = self.opener.open(source)?;

        let frame_count = dataset.frame_count().max(1);
        log::info!(
            "Extracting {frame_count} frames from {} into {}",
            source.display(),
            staging.path().display(),
        );

        let staging_cleaned = staging.ensure_clean();
        manifest.clear();

        let mut tracker = ProgressTracker::new(
            progress,
            OperationType::FrameExtraction,
            u64::from(frame_count),
        );
        let mut skipped = Vec::new();

        for index in 0..frame_count {
            if self.options.is_cancelled() {
                log::info!("Extraction cancelled before frame {index}");
                return Ok(ExtractionEnd::Cancelled(ExtractionReport {
                    frame_count,
                    manifest: manifest.snapshot(),
                    skipped,
                    staging_cleaned,
                }));
            }

            match self.extract_one(&dataset, index, staging.path()) {
                Ok(path) => manifest.push(path),
                Err(error) => {
                    log::warn!("Skipping frame {index}: {error}");
                    skipped.push(SkippedFrame {
                        index,
                        reason: error.to_string(),
                    });
                }
            }

            tracker.advance_to((index + 1) as f32 / frame_count as f32 * 100.0);
            self.options.throttle();
        }

        tracker.finish();

        Ok(ExtractionEnd::Finished(ExtractionReport {
            frame_count,
            manifest: manifest.snapshot(),
            skipped,
            staging_cleaned,
        }))
    }

    fn extract_one(
        &self,
        dataset: &O::Source,
        index: u32,
        directory: &Path,
    ) -> Result<PathBuf, ConvertError> {
        let working_copy = dataset.clone();
        let file_name = frame_file_name(&working_copy.sop_instance_uid(), index);
        let image = working_copy.render_frame(index)?;

        let path = directory.join(file_name);
        save_jpeg(&image, &path, self.options.jpeg_quality)?;
        Ok(path)
    }

    /// Write frame `frame` of `source` as a standalone single-frame dataset.
    ///
    /// The raw frame buffer is wrapped by [`encapsulate`] according to the
    /// source's transfer syntax and `BitsAllocated`, replaces the Pixel Data
    /// of a copy of the dataset, and the copy is saved to `output`.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::SourceNotFound`] if `source` does not exist.
    /// - [`ConvertError::FrameOutOfRange`] if `frame` is past the last frame.
    /// - Errors from reading the raw frame or writing the dataset.
    pub fn split_frame(&self, source: &Path, frame: u32, output: &Path) -> Result<(), ConvertError> {
        require_exists(source)?;
        let dataset = self.opener.open(source)?;

        let total_frames = dataset.frame_count().max(1);
        if frame >= total_frames {
            return Err(ConvertError::FrameOutOfRange {
                frame,
                total_frames,
            });
        }

        let raw = dataset.raw_frame(frame)?;
        let mut single = dataset.clone();
        let element = encapsulate(raw, &single.transfer_syntax(), single.bits_allocated());
        log::debug!(
            "Re-embedding frame {frame} of {} as {}",
            source.display(),
            element.kind()
        );
        single.replace_pixel_data(element)?;
        single.save(output)
    }
}

/// Encode `image` as JPEG at `path`.
///
/// Grayscale images stay single-channel; everything else is written as RGB.
pub(crate) fn save_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> Result<(), ConvertError> {
    let encodable = match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_) => DynamicImage::ImageLuma8(image.to_luma8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };

    let writer = BufWriter::new(File::create(path)?);
    encodable.write_with_encoder(JpegEncoder::new_with_quality(writer, quality))?;
    Ok(())
}
