//! The dataset contract the conversion pipelines depend on.
//!
//! The pipelines never parse DICOM themselves. They open sources through a
//! [`SourceOpener`] and talk to the resulting [`DicomSource`]: attribute
//! lookup by keyword, frame rendering, raw frame retrieval and pixel data
//! replacement. [`DicomFile`](crate::DicomFile) is the production
//! implementation; tests substitute in-memory sources.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::DynamicImage;

use crate::encapsulation::PixelContainerElement;
use crate::error::ConvertError;
use crate::transfer_syntax::TransferSyntax;

/// An opened dataset holding one or more image frames.
///
/// `Clone` yields an independent working copy; the pipelines clone the
/// dataset for every frame so that rendering one frame can never mutate the
/// state seen by the next.
pub trait DicomSource: Clone + Send {
    /// The string value of the attribute named by `keyword` (e.g. `"Rows"`),
    /// with padding removed, or `None` if it is absent.
    fn attribute(&self, keyword: &str) -> Option<String>;

    /// UID of the transfer syntax the dataset is stored with.
    fn transfer_syntax_uid(&self) -> String;

    /// Render frame `index` to a raster image.
    fn render_frame(&self, index: u32) -> Result<DynamicImage, ConvertError>;

    /// The raw, still-encoded buffer of frame `index`.
    fn raw_frame(&self, index: u32) -> Result<Vec<u8>, ConvertError>;

    /// Replace the Pixel Data with `element` and mark the dataset as
    /// holding `element.frame_count()` frames.
    fn replace_pixel_data(&mut self, element: PixelContainerElement) -> Result<(), ConvertError>;

    /// Write the dataset to `path`.
    fn save(&self, path: &Path) -> Result<(), ConvertError>;

    /// Parse an attribute, falling back to `default` when it is absent or
    /// does not parse.
    fn attribute_or<T: FromStr>(&self, keyword: &str, default: T) -> T {
        self.attribute(keyword)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// The advertised `NumberOfFrames`, `0` when absent.
    fn frame_count(&self) -> u32 {
        self.attribute_or("NumberOfFrames", 0)
    }

    /// `SOPInstanceUID`, empty when absent.
    fn sop_instance_uid(&self) -> String {
        self.attribute("SOPInstanceUID").unwrap_or_default()
    }

    /// `BitsAllocated`, `0` when absent.
    fn bits_allocated(&self) -> u16 {
        self.attribute_or("BitsAllocated", 0)
    }

    /// `(Columns, Rows)`.
    fn dimensions(&self) -> Result<(u32, u32), ConvertError> {
        let columns = self.attribute_or("Columns", 0u32);
        if columns == 0 {
            return Err(ConvertError::MissingAttribute("Columns"));
        }
        let rows = self.attribute_or("Rows", 0u32);
        if rows == 0 {
            return Err(ConvertError::MissingAttribute("Rows"));
        }
        Ok((columns, rows))
    }

    /// The parsed transfer syntax.
    fn transfer_syntax(&self) -> TransferSyntax {
        TransferSyntax::from_uid(&self.transfer_syntax_uid())
    }
}

/// Opens [`DicomSource`]s by path.
pub trait SourceOpener: Send + Sync + 'static {
    /// The dataset type this opener produces.
    type Source: DicomSource;

    /// Open and parse the file at `path`.
    fn open(&self, path: &Path) -> Result<Self::Source, ConvertError>;
}

/// What a conversion reads its frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// One file holding many frames.
    MultiFrame {
        /// Path of the multi-frame file.
        path: PathBuf,
    },
    /// An ordered list of single-frame files.
    SingleFrameList {
        /// Paths in playback order.
        paths: Vec<PathBuf>,
    },
}

impl SourceDescriptor {
    /// A multi-frame source.
    pub fn multi_frame<P: Into<PathBuf>>(path: P) -> Self {
        SourceDescriptor::MultiFrame { path: path.into() }
    }

    /// A list of single-frame sources.
    pub fn single_frame_list<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        SourceDescriptor::SingleFrameList {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Zero-based frame selection for multi-frame video assembly.
///
/// `end` is exclusive. `end == 0` means "up to the source's frame count".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRange {
    /// First frame to process.
    pub begin: u32,
    /// One past the last frame, or `0` to derive it from the source.
    pub end: u32,
}

impl FrameRange {
    /// `begin..end`.
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    /// Every frame of the source.
    pub fn all() -> Self {
        Self::default()
    }

    /// Resolve the sentinel against `frame_count` (a count of 0 counts as 1).
    ///
    /// # Errors
    ///
    /// [`ConvertError::InvalidRange`] if `begin` lies past the resolved end.
    pub fn resolve(self, frame_count: u32) -> Result<(u32, u32), ConvertError> {
        let end = if self.end == 0 {
            frame_count.max(1)
        } else {
            self.end
        };
        if self.begin > end {
            return Err(ConvertError::InvalidRange {
                begin: self.begin,
                end,
            });
        }
        Ok((self.begin, end))
    }
}

/// Fail with [`ConvertError::SourceNotFound`] unless `path` exists.
pub(crate) fn require_exists(path: &Path) -> Result<(), ConvertError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConvertError::SourceNotFound(path.to_path_buf()))
    }
}
