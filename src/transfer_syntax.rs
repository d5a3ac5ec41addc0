//! Transfer syntax metadata.
//!
//! The encapsulator only needs three facts about a transfer syntax: its byte
//! order, whether value representations are explicit, and whether pixel data
//! is stored as encapsulated fragments. [`TransferSyntax::from_uid`] resolves
//! those facts from a UID.

use std::fmt::{Display, Formatter, Result as FmtResult};

use dicom_encoding::transfer_syntax::{Endianness as RegistryEndianness, TransferSyntaxIndex};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;

/// Byte order of multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// The pixel-data relevant properties of a DICOM transfer syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSyntax {
    uid: String,
    endianness: Endianness,
    explicit_vr: bool,
    encapsulated: bool,
}

/// UID of Implicit VR Little Endian.
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
/// UID of Explicit VR Little Endian.
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
/// UID of Explicit VR Big Endian (retired).
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
/// UID of Deflated Explicit VR Little Endian.
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
/// UID of Encapsulated Uncompressed Explicit VR Little Endian.
pub const ENCAPSULATED_UNCOMPRESSED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.98";
/// UID of JPEG Baseline (Process 1).
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
/// UID of JPEG Lossless, First-Order Prediction (Process 14 SV1).
pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
/// UID of RLE Lossless.
pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
/// UID of JPIP Referenced.
pub const JPIP_REFERENCED: &str = "1.2.840.10008.1.2.4.94";
/// UID of JPIP Referenced Deflate.
pub const JPIP_REFERENCED_DEFLATE: &str = "1.2.840.10008.1.2.4.95";

impl TransferSyntax {
    /// Resolve a transfer syntax from its UID.
    ///
    /// Trailing NUL padding and whitespace are ignored. Byte order, VR
    /// explicitness and pixel data encapsulation come from the dicom-rs
    /// transfer syntax registry. UIDs the registry does not know resolve to
    /// explicit VR little endian.
    pub fn from_uid(uid: &str) -> Self {
        let uid = uid.trim_end_matches('\0').trim();
        let (endianness, explicit_vr, encapsulated) = match TransferSyntaxRegistry.get(uid) {
            Some(entry) => {
                let endianness = match entry.endianness() {
                    RegistryEndianness::Big => Endianness::Big,
                    RegistryEndianness::Little => Endianness::Little,
                };
                (endianness, entry.is_explicit_vr(), entry.is_encapsulated_pixel_data())
            }
            None => {
                log::debug!("Transfer syntax {uid} is not registered, assuming explicit VR little endian");
                (Endianness::Little, true, false)
            }
        };

        Self {
            uid: uid.to_string(),
            endianness,
            explicit_vr,
            encapsulated,
        }
    }

    /// Implicit VR Little Endian, the default DICOM transfer syntax.
    pub fn implicit_vr_little_endian() -> Self {
        Self::from_uid(IMPLICIT_VR_LITTLE_ENDIAN)
    }

    /// Explicit VR Little Endian.
    pub fn explicit_vr_little_endian() -> Self {
        Self::from_uid(EXPLICIT_VR_LITTLE_ENDIAN)
    }

    /// Explicit VR Big Endian.
    pub fn explicit_vr_big_endian() -> Self {
        Self::from_uid(EXPLICIT_VR_BIG_ENDIAN)
    }

    /// The normalized UID.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Byte order of the syntax.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Whether value representations are written explicitly.
    pub fn is_explicit_vr(&self) -> bool {
        self.explicit_vr
    }

    /// Whether pixel data is stored as a fragment sequence.
    pub fn is_encapsulated(&self) -> bool {
        self.encapsulated
    }

    /// True only for Implicit VR Little Endian.
    pub fn is_implicit_vr_little_endian(&self) -> bool {
        !self.explicit_vr && self.endianness == Endianness::Little && !self.encapsulated
    }
}

impl Display for TransferSyntax {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.uid)
    }
}
