//! Pixel-data repackaging.
//!
//! When a single frame is re-embedded into a dataset, its raw buffer has to
//! be wrapped into the Pixel Data container that matches the dataset's
//! transfer syntax and bit depth. [`encapsulate`] makes that decision; it is
//! a pure function and can be re-derived for every frame independently.
//!
//! # Example
//!
//! ```
//! use dicomconvert::{PixelContainerElement, TransferSyntax, encapsulate};
//!
//! let frame = vec![0u8; 64 * 64 * 2];
//! let element = encapsulate(frame.clone(), &TransferSyntax::explicit_vr_little_endian(), 16);
//! assert!(matches!(element, PixelContainerElement::NativeWord(_)));
//! assert_eq!(element.frame(0), Some(frame));
//! ```

use crate::transfer_syntax::{Endianness, TransferSyntax};

/// Size of the item tag + item length header preceding every fragment.
pub const ITEM_HEADER_LEN: u64 = 8;

/// An ordered collection of byte buffers presented as one logical buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeBuffer {
    buffers: Vec<Vec<u8>>,
}

impl CompositeBuffer {
    /// A composite holding exactly one buffer.
    pub fn single(buffer: Vec<u8>) -> Self {
        Self {
            buffers: vec![buffer],
        }
    }

    /// Append another buffer.
    pub fn push(&mut self, buffer: Vec<u8>) {
        self.buffers.push(buffer);
    }

    /// The individual buffers, in order.
    pub fn buffers(&self) -> &[Vec<u8>] {
        &self.buffers
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    /// Returns `true` if the composite holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate all buffers.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffers.concat()
    }
}

/// Encapsulated pixel data: fragments plus a basic offset table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncapsulatedPixelData {
    offset_table: Vec<u32>,
    fragments: Vec<Vec<u8>>,
    offset_table_suppressed: bool,
}

impl EncapsulatedPixelData {
    /// An element with no fragments and an empty offset table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one frame as a new fragment.
    ///
    /// The fragment's byte offset (existing fragment sizes plus
    /// [`ITEM_HEADER_LEN`] per fragment) is recorded in the offset table. Once
    /// an offset no longer fits in 32 bits the offset table is cleared and
    /// stays empty for the rest of the element. The buffer is byte-swapped
    /// for big-endian syntaxes and padded to an even length.
    pub fn push_fragment(&mut self, buffer: Vec<u8>, syntax: &TransferSyntax, bits_allocated: u16) {
        let position = self.next_offset();
        let fragment = adjust_for_syntax(buffer, syntax.endianness(), bits_allocated);
        self.push_at(position, fragment);
    }

    fn push_at(&mut self, position: u64, fragment: Vec<u8>) {
        if !self.offset_table_suppressed && position < u64::from(u32::MAX) {
            self.offset_table.push(position as u32);
        } else {
            if !self.offset_table_suppressed {
                log::debug!("Fragment offset {position} exceeds 32 bits; dropping offset table");
            }
            self.offset_table.clear();
            self.offset_table_suppressed = true;
        }
        self.fragments.push(fragment);
    }

    /// Byte offset at which the next fragment would start.
    pub fn next_offset(&self) -> u64 {
        self.fragments
            .iter()
            .map(|fragment| fragment.len() as u64 + ITEM_HEADER_LEN)
            .sum()
    }

    /// The basic offset table. Empty when suppressed.
    pub fn offset_table(&self) -> &[u32] {
        &self.offset_table
    }

    /// Whether the offset table was dropped because offsets overflowed.
    pub fn is_offset_table_suppressed(&self) -> bool {
        self.offset_table_suppressed
    }

    /// The fragments, in order.
    pub fn fragments(&self) -> &[Vec<u8>] {
        &self.fragments
    }

    /// Consume into `(offset_table, fragments)`.
    pub fn into_parts(self) -> (Vec<u32>, Vec<Vec<u8>>) {
        (self.offset_table, self.fragments)
    }
}

/// The Pixel Data container chosen for a frame buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelContainerElement {
    /// Native data with 16-bit words (VR OW).
    NativeWord(CompositeBuffer),
    /// Native data with bytes (VR OB).
    NativeByte(CompositeBuffer),
    /// Encapsulated fragment sequence with offset table.
    EncapsulatedFragment(EncapsulatedPixelData),
}

impl PixelContainerElement {
    /// Retrieve the buffer for `index` from the container.
    ///
    /// Each native composite entry and each fragment holds one frame.
    pub fn frame(&self, index: usize) -> Option<Vec<u8>> {
        match self {
            PixelContainerElement::NativeWord(buffer)
            | PixelContainerElement::NativeByte(buffer) => buffer.buffers().get(index).cloned(),
            PixelContainerElement::EncapsulatedFragment(data) => {
                data.fragments().get(index).cloned()
            }
        }
    }

    /// Number of frames stored in the container.
    pub fn frame_count(&self) -> usize {
        match self {
            PixelContainerElement::NativeWord(buffer)
            | PixelContainerElement::NativeByte(buffer) => buffer.buffers().len(),
            PixelContainerElement::EncapsulatedFragment(data) => data.fragments().len(),
        }
    }

    /// Short name of the variant, for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PixelContainerElement::NativeWord(_) => "OW",
            PixelContainerElement::NativeByte(_) => "OB",
            PixelContainerElement::EncapsulatedFragment(_) => "encapsulated",
        }
    }
}

/// Wrap one raw frame buffer into the container element for `syntax`.
///
/// 1. Implicit VR Little Endian always yields [`PixelContainerElement::NativeWord`].
/// 2. Encapsulated syntaxes yield a single-fragment
///    [`PixelContainerElement::EncapsulatedFragment`].
/// 3. Other native syntaxes yield `NativeWord` for 16 bits allocated and
///    `NativeByte` otherwise.
pub fn encapsulate(
    frame: Vec<u8>,
    syntax: &TransferSyntax,
    bits_allocated: u16,
) -> PixelContainerElement {
    if syntax.is_implicit_vr_little_endian() {
        return PixelContainerElement::NativeWord(CompositeBuffer::single(frame));
    }

    if syntax.is_encapsulated() {
        let mut data = EncapsulatedPixelData::new();
        data.push_fragment(frame, syntax, bits_allocated);
        return PixelContainerElement::EncapsulatedFragment(data);
    }

    if bits_allocated == 16 {
        PixelContainerElement::NativeWord(CompositeBuffer::single(frame))
    } else {
        PixelContainerElement::NativeByte(CompositeBuffer::single(frame))
    }
}

/// Swap to the syntax byte order and pad to an even length.
fn adjust_for_syntax(mut buffer: Vec<u8>, endianness: Endianness, bits_allocated: u16) -> Vec<u8> {
    if endianness == Endianness::Big {
        match bits_allocated {
            16 => buffer.chunks_exact_mut(2).for_each(|word| word.swap(0, 1)),
            32 => buffer.chunks_exact_mut(4).for_each(|word| word.reverse()),
            _ => {}
        }
    }
    if buffer.len() % 2 != 0 {
        buffer.push(0);
    }
    buffer
}
