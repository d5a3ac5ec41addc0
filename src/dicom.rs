//! DICOM file access backed by dicom-rs.
//!
//! [`DicomFileOpener`] opens files with `dicom-object`; the resulting
//! [`DicomFile`] renders frames through `dicom-pixeldata` and exposes raw
//! frame buffers for re-encapsulation.

use std::path::{Path, PathBuf};

use dicom_core::value::{PixelFragmentSequence, Value};
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::{DefaultDicomObject, open_file};
use dicom_pixeldata::PixelDecoder;
use image::DynamicImage;

use crate::encapsulation::PixelContainerElement;
use crate::error::ConvertError;
use crate::source::{DicomSource, SourceOpener};

/// An opened DICOM file.
#[derive(Debug, Clone)]
pub struct DicomFile {
    path: PathBuf,
    object: DefaultDicomObject,
}

impl DicomFile {
    /// Open and parse the DICOM file at `path`.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::SourceNotFound`] if the path does not exist.
    /// - [`ConvertError::SourceOpen`] if the file cannot be parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        crate::source::require_exists(path)?;

        log::debug!("Opening DICOM file: {}", path.display());

        let object = open_file(path).map_err(|error| ConvertError::SourceOpen {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            object,
        })
    }

    /// Wrap an already-parsed object.
    pub fn from_object<P: Into<PathBuf>>(path: P, object: DefaultDicomObject) -> Self {
        Self {
            path: path.into(),
            object,
        }
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte length of one native frame, derived from the image attributes.
    fn native_frame_len(&self) -> Option<usize> {
        let rows: usize = self.attribute_or("Rows", 0);
        let columns: usize = self.attribute_or("Columns", 0);
        let samples: usize = self.attribute_or("SamplesPerPixel", 1);
        let bits = usize::from(self.bits_allocated());
        let len = (rows * columns * samples * bits).div_ceil(8);
        (len > 0).then_some(len)
    }
}

impl DicomSource for DicomFile {
    fn attribute(&self, keyword: &str) -> Option<String> {
        let element = self.object.element_by_name(keyword).ok()?;
        let value = element.to_str().ok()?;
        let value = value.trim_end_matches('\0').trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    fn transfer_syntax_uid(&self) -> String {
        self.object
            .meta()
            .transfer_syntax()
            .trim_end_matches('\0')
            .to_string()
    }

    fn render_frame(&self, index: u32) -> Result<DynamicImage, ConvertError> {
        let render_error = |reason: String| ConvertError::RenderError {
            frame: index,
            reason,
        };

        let decoded = self
            .object
            .decode_pixel_data_frame(index)
            .map_err(|error| render_error(error.to_string()))?;
        decoded
            .to_dynamic_image(0)
            .map_err(|error| render_error(error.to_string()))
    }

    fn raw_frame(&self, index: u32) -> Result<Vec<u8>, ConvertError> {
        let total_frames = self.frame_count().max(1);
        if index >= total_frames {
            return Err(ConvertError::FrameOutOfRange {
                frame: index,
                total_frames,
            });
        }

        let element = self
            .object
            .element(tags::PIXEL_DATA)
            .map_err(|error| ConvertError::PixelDataError(error.to_string()))?;

        match element.value() {
            Value::PixelSequence(sequence) => frame_fragments(
                sequence.fragments(),
                sequence.offset_table(),
                index,
                total_frames,
            ),
            Value::Primitive(value) => {
                let bytes = value.to_bytes();
                let frame_len = self
                    .native_frame_len()
                    .unwrap_or(bytes.len() / total_frames as usize);
                let start = frame_len * index as usize;
                bytes
                    .get(start..start + frame_len)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| {
                        ConvertError::PixelDataError(format!(
                            "pixel data holds {} bytes, frame {index} needs {start}..{}",
                            bytes.len(),
                            start + frame_len,
                        ))
                    })
            }
            _ => Err(ConvertError::PixelDataError(
                "Pixel Data is not a byte buffer".to_string(),
            )),
        }
    }

    fn replace_pixel_data(&mut self, element: PixelContainerElement) -> Result<(), ConvertError> {
        let frames = element.frame_count();
        log::debug!(
            "Replacing pixel data of {} with {} element ({frames} frames)",
            self.path.display(),
            element.kind(),
        );

        let pixel_data = match element {
            PixelContainerElement::NativeWord(buffer) => DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::from(buffer.to_vec()),
            ),
            PixelContainerElement::NativeByte(buffer) => DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                PrimitiveValue::from(buffer.to_vec()),
            ),
            PixelContainerElement::EncapsulatedFragment(data) => {
                let (offset_table, fragments) = data.into_parts();
                DataElement::new(
                    tags::PIXEL_DATA,
                    VR::OB,
                    Value::PixelSequence(PixelFragmentSequence::new(offset_table, fragments)),
                )
            }
        };

        self.object.put(pixel_data);
        self.object.put(DataElement::new(
            tags::NUMBER_OF_FRAMES,
            VR::IS,
            PrimitiveValue::from(frames.to_string()),
        ));
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), ConvertError> {
        self.object
            .write_to_file(path)
            .map_err(|error| ConvertError::DatasetWrite {
                path: path.to_path_buf(),
                reason: error.to_string(),
            })
    }
}

/// Collect the bytes of frame `index` from an encapsulated fragment sequence.
///
/// A single-frame sequence is the concatenation of every fragment. When the
/// fragment count equals the frame count each fragment is one frame;
/// otherwise the basic offset table decides which fragments belong to which
/// frame. Offsets are measured from the first fragment's item tag, so each
/// fragment occupies its length plus an 8 byte item header.
fn frame_fragments(
    fragments: &[Vec<u8>],
    offset_table: &[u32],
    index: u32,
    total_frames: u32,
) -> Result<Vec<u8>, ConvertError> {
    let frame = index as usize;
    if total_frames == 1 {
        return Ok(fragments.concat());
    }
    if fragments.len() == total_frames as usize {
        return fragments
            .get(frame)
            .cloned()
            .ok_or(ConvertError::FrameOutOfRange {
                frame: index,
                total_frames,
            });
    }
    if offset_table.len() != total_frames as usize {
        return Err(ConvertError::PixelDataError(format!(
            "{} fragments for {total_frames} frames and no usable offset table",
            fragments.len()
        )));
    }

    let start = u64::from(offset_table[frame]);
    let end = offset_table.get(frame + 1).map_or(u64::MAX, |&next| u64::from(next));
    let mut position = 0_u64;
    let mut bytes = Vec::new();
    for fragment in fragments {
        if (start..end).contains(&position) {
            bytes.extend_from_slice(fragment);
        }
        position += fragment.len() as u64 + 8;
    }

    if bytes.is_empty() {
        return Err(ConvertError::PixelDataError(format!(
            "offset table points frame {index} at no fragment"
        )));
    }
    Ok(bytes)
}

/// Opens files as [`DicomFile`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomFileOpener;

impl SourceOpener for DicomFileOpener {
    type Source = DicomFile;

    fn open(&self, path: &Path) -> Result<DicomFile, ConvertError> {
        DicomFile::open(path)
    }
}
