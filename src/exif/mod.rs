//! Binary EXIF metadata reading and writing.
//!
//! - [`read_exif_summary`]: text fields and orientation from one parse
//! - [`read_exif_text`]: title, comment and subject fields as text
//! - [`read_orientation`]: orientation, tolerant of odd encodings
//! - [`read_all_fields`] / [`read_exif_date`]: diagnostics
//! - [`ExifEditor`]: stores fields back, lossless first with a lossy fallback

mod reader;
mod writer;

pub use reader::{
    ExifField, ExifFields, ExifSummary, ExifText, read_all_fields, read_exif_date,
    read_exif_summary, read_exif_text, read_orientation,
};
pub use writer::{ExifEditor, ExifTagEdits};

// Tag IDs (IFD0 unless noted)
pub(crate) const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
pub(crate) const TAG_ORIENTATION: u16 = 0x0112;
pub(crate) const TAG_DATE_TIME: u16 = 0x0132;
pub(crate) const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
/// Exif sub-IFD.
pub(crate) const TAG_USER_COMMENT: u16 = 0x9286;
pub(crate) const TAG_XP_TITLE: u16 = 0x9C9B;
pub(crate) const TAG_XP_COMMENT: u16 = 0x9C9C;
pub(crate) const TAG_XP_SUBJECT: u16 = 0x9C9F;
