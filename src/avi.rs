//! Frame sequence to AVI assembly.
//!
//! [`AviAssemblyPipeline`] renders frames from either a multi-frame source
//! or a list of single-frame files, orients them, and streams them into a
//! [`VideoSink`] created by a [`VideoSinkFactory`]. The sink is closed
//! exactly once whether the loop finishes, fails or is cancelled.
//!
//! The production sink is [`AviWriter`](crate::AviWriter) (feature
//! `ffmpeg`). Without a backend, [`NoVideoBackend`] rejects every request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::configuration::{ConversionOptions, ListFrameSource};
use crate::error::ConvertError;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::source::{DicomSource, FrameRange, SourceDescriptor, SourceOpener, require_exists};

/// Pixel dimensions of an output video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl VideoGeometry {
    /// `Columns` x `Rows` of `source`.
    pub fn of<S: DicomSource>(source: &S) -> Result<Self, ConvertError> {
        let (width, height) = source.dimensions()?;
        Ok(Self { width, height })
    }
}

/// A streaming video writer.
pub trait VideoSink {
    /// Append one frame. The frame always matches the geometry the sink was
    /// created with.
    fn add_frame(&mut self, frame: &RgbImage) -> Result<(), ConvertError>;

    /// Finalize the output file.
    fn close(&mut self) -> Result<(), ConvertError>;
}

/// Creates [`VideoSink`]s for output paths.
pub trait VideoSinkFactory: Send + Sync + 'static {
    /// The sink type produced.
    type Sink: VideoSink;

    /// Create a sink writing to `path`.
    fn create(
        &self,
        path: &Path,
        frame_rate: u16,
        geometry: VideoGeometry,
    ) -> Result<Self::Sink, ConvertError>;
}

/// Factory used when no video backend is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVideoBackend;

/// Sink type of [`NoVideoBackend`]. It has no values.
#[derive(Debug)]
pub enum NoVideoSink {}

impl VideoSink for NoVideoSink {
    fn add_frame(&mut self, _frame: &RgbImage) -> Result<(), ConvertError> {
        match *self {}
    }

    fn close(&mut self) -> Result<(), ConvertError> {
        match *self {}
    }
}

impl VideoSinkFactory for NoVideoBackend {
    type Sink = NoVideoSink;

    fn create(
        &self,
        path: &Path,
        _frame_rate: u16,
        _geometry: VideoGeometry,
    ) -> Result<NoVideoSink, ConvertError> {
        Err(ConvertError::VideoWriteError(format!(
            "no video backend available to write {}",
            path.display()
        )))
    }
}

/// Result of a finished assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Output file.
    pub output: PathBuf,
    /// Frames handed to the sink.
    pub frames_written: u32,
    /// Output dimensions.
    pub geometry: VideoGeometry,
}

/// Closes the wrapped sink once, either explicitly or on drop.
struct SinkGuard<S: VideoSink> {
    sink: S,
    closed: bool,
}

impl<S: VideoSink> SinkGuard<S> {
    fn new(sink: S) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    fn add_frame(&mut self, frame: &RgbImage) -> Result<(), ConvertError> {
        self.sink.add_frame(frame)
    }

    fn close(mut self) -> Result<(), ConvertError> {
        self.closed = true;
        self.sink.close()
    }
}

impl<S: VideoSink> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(error) = self.sink.close() {
                log::warn!("Closing video sink failed: {error}");
            }
        }
    }
}

/// Put a rendered frame into display orientation: rotate 180 degrees, then
/// mirror horizontally. The net effect is a vertical flip.
pub fn orient_frame(image: &DynamicImage) -> DynamicImage {
    image.rotate180().fliph()
}

/// Orient `image` and fit it to `geometry`.
fn prepare_frame(image: &DynamicImage, geometry: VideoGeometry) -> RgbImage {
    let oriented = orient_frame(image);
    if oriented.width() == geometry.width && oriented.height() == geometry.height {
        oriented.to_rgb8()
    } else {
        log::debug!(
            "Resizing {}x{} frame to {}x{}",
            oriented.width(),
            oriented.height(),
            geometry.width,
            geometry.height,
        );
        oriented
            .resize_exact(geometry.width, geometry.height, FilterType::Lanczos3)
            .to_rgb8()
    }
}

/// Assembles rendered frames into a video file.
pub struct AviAssemblyPipeline<'a, O, F> {
    opener: &'a O,
    factory: &'a F,
    options: &'a ConversionOptions,
}

impl<'a, O: SourceOpener, F: VideoSinkFactory> AviAssemblyPipeline<'a, O, F> {
    /// Create a pipeline reading through `opener` and writing through `factory`.
    pub fn new(opener: &'a O, factory: &'a F, options: &'a ConversionOptions) -> Self {
        Self {
            opener,
            factory,
            options,
        }
    }

    /// Write the frames described by `source` to `output` at `frame_rate`
    /// frames per second.
    ///
    /// For a multi-frame source, `range` selects the frames (`end == 0`
    /// meaning all of them). For a file list, `range` is ignored and frame 0
    /// of each item is used.
    ///
    /// A failure on any frame stops the loop and fails the job; the writer is
    /// still closed and a final 100% event is still reported.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::SourceNotFound`] if a required source is missing; no
    ///   writer is created.
    /// - [`ConvertError::MissingAttribute`] if the dimensions are unusable.
    /// - [`ConvertError::InvalidRange`] if `range.begin` lies past its end.
    /// - [`ConvertError::Cancelled`] if the cancellation token fires.
    /// - Render and writer errors.
    pub fn assemble(
        &self,
        source: &SourceDescriptor,
        range: FrameRange,
        output: &Path,
        frame_rate: u16,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<AssemblyReport, ConvertError> {
        match source {
            SourceDescriptor::MultiFrame { path } => {
                self.assemble_multi_frame(path, range, output, frame_rate, progress)
            }
            SourceDescriptor::SingleFrameList { paths } => {
                self.assemble_file_list(paths, output, frame_rate, progress)
            }
        }
    }

    fn assemble_multi_frame(
        &self,
        path: &Path,
        range: FrameRange,
        output: &Path,
        frame_rate: u16,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<AssemblyReport, ConvertError> {
        require_exists(path)?;
        let dataset = self.opener.open(path)?;
        let geometry = VideoGeometry::of(&dataset)?;
        let (begin, end) = range.resolve(dataset.frame_count())?;

        log::info!(
            "Assembling frames {begin}..{end} of {} into {} ({}x{} @ {frame_rate} fps)",
            path.display(),
            output.display(),
            geometry.width,
            geometry.height,
        );

        let mut guard = SinkGuard::new(self.factory.create(output, frame_rate, geometry)?);
        let count = end - begin;
        let mut tracker =
            ProgressTracker::new(progress, OperationType::VideoAssembly, u64::from(count));
        let step = if count == 0 { 100.0 } else { 100.0 / count as f32 };

        let written = self.drive(&mut guard, &mut tracker, geometry, step, begin..end, |index| {
            dataset.clone().render_frame(index)
        });
        self.finish(guard, tracker, written, output, geometry)
    }

    fn assemble_file_list(
        &self,
        paths: &[PathBuf],
        output: &Path,
        frame_rate: u16,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<AssemblyReport, ConvertError> {
        let first = paths
            .first()
            .ok_or_else(|| ConvertError::InvalidJob("the file list is empty".to_string()))?;

        let frame_source = self.options.list_frame_source;
        match frame_source {
            ListFrameSource::FirstFile => {
                require_exists(first)?;
                log::debug!(
                    "Reading frame 0 of {} for every list item",
                    first.display()
                );
            }
            ListFrameSource::EachFile => {
                for path in paths {
                    require_exists(path)?;
                }
            }
        }

        let geometry = VideoGeometry::of(&self.opener.open(first)?)?;
        log::info!(
            "Assembling {} list items into {} ({}x{} @ {frame_rate} fps)",
            paths.len(),
            output.display(),
            geometry.width,
            geometry.height,
        );

        let mut guard = SinkGuard::new(self.factory.create(output, frame_rate, geometry)?);
        let count = u32::try_from(paths.len()).unwrap_or(u32::MAX);
        let mut tracker =
            ProgressTracker::new(progress, OperationType::VideoAssembly, u64::from(count));
        let step = 100.0 / count as f32;

        let written = self.drive(&mut guard, &mut tracker, geometry, step, 0..count, |item| {
            let path = match frame_source {
                ListFrameSource::FirstFile => first,
                ListFrameSource::EachFile => &paths[item as usize],
            };
            self.opener.open(path)?.render_frame(0)
        });
        self.finish(guard, tracker, written, output, geometry)
    }

    /// Render, orient and submit every item of `items`, stopping at the
    /// first failure or cancellation. Frames whose size differs from
    /// `geometry` are resized to it.
    fn drive<S, R>(
        &self,
        guard: &mut SinkGuard<S>,
        tracker: &mut ProgressTracker,
        geometry: VideoGeometry,
        step: f32,
        items: std::ops::Range<u32>,
        mut render: R,
    ) -> Result<u32, ConvertError>
    where
        S: VideoSink,
        R: FnMut(u32) -> Result<DynamicImage, ConvertError>,
    {
        let mut written = 0;

        for item in items {
            if self.options.is_cancelled() {
                log::info!("Assembly cancelled before item {item}");
                return Err(ConvertError::Cancelled);
            }

            let image = render(item)?;
            guard.add_frame(&prepare_frame(&image, geometry))?;
            written += 1;

            tracker.advance_by(step);
            self.options.throttle();
        }

        Ok(written)
    }

    fn finish<S: VideoSink>(
        &self,
        guard: SinkGuard<S>,
        mut tracker: ProgressTracker,
        written: Result<u32, ConvertError>,
        output: &Path,
        geometry: VideoGeometry,
    ) -> Result<AssemblyReport, ConvertError> {
        let closed = guard.close();

        if !matches!(written, Err(ConvertError::Cancelled)) {
            tracker.finish();
        }

        let frames_written = match written {
            Ok(frames_written) => frames_written,
            Err(error) => {
                if let Err(close_error) = closed {
                    log::warn!("Closing video sink failed: {close_error}");
                }
                return Err(error);
            }
        };
        closed?;

        log::info!("Wrote {frames_written} frames to {}", output.display());
        Ok(AssemblyReport {
            output: output.to_path_buf(),
            frames_written,
            geometry,
        })
    }
}
