use img_parts::Bytes;
use img_parts::jpeg::Jpeg;
use nom_exif::{EntryValue, Exif, ExifIter, ExifTag, MediaParser, MediaSource};
use std::io::Cursor;
use std::path::Path;

use super::{TAG_DATE_TIME, TAG_ORIENTATION, TAG_XP_COMMENT, TAG_XP_SUBJECT, TAG_XP_TITLE};
use crate::error::{MetadataError, Result};
use crate::jpeg::find_exif_segment_pos;
use crate::record::Orientation;

/// Text fields of the EXIF block that take part in metadata resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifText {
    pub image_description: Option<String>,
    pub user_comment: Option<String>,
    pub xp_title: Option<String>,
    pub xp_comment: Option<String>,
    pub xp_subject: Option<String>,
}

impl ExifText {
    /// XPComment when present, otherwise UserComment.
    pub fn comment(&self) -> Option<&str> {
        self.xp_comment
            .as_deref()
            .or(self.user_comment.as_deref())
    }
}

/// One raw EXIF entry, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifField {
    pub ifd: usize,
    pub tag: u16,
    pub value: String,
}

/// Iterator over every EXIF entry of a file.
pub struct ExifFields {
    inner: Option<ExifIter>,
}

impl Iterator for ExifFields {
    type Item = ExifField;

    fn next(&mut self) -> Option<ExifField> {
        let entry = self.inner.as_mut()?.next()?;
        let value = entry
            .get_value()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<unreadable>".to_string());
        Some(ExifField {
            ifd: entry.ifd_index(),
            tag: entry.tag_code(),
            value,
        })
    }
}

/// Text fields and orientation, taken from one parse of the EXIF block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifSummary {
    pub text: ExifText,
    pub orientation: Orientation,
}

/// Read the text fields and the orientation in one pass.
///
/// Returns `Ok(None)` when the file has no EXIF block, and an
/// [`MetadataError::Unreadable`] when the block exists but cannot be parsed.
pub fn read_exif_summary(path: &Path) -> Result<Option<ExifSummary>> {
    Ok(load_exif(path)?.map(|exif| ExifSummary {
        text: text_of(&exif),
        orientation: orientation_of(&exif),
    }))
}

/// Read the text fields of the EXIF block.
///
/// Returns `Ok(None)` when the file has no EXIF block, and an
/// [`MetadataError::Unreadable`] when the block exists but cannot be parsed.
pub fn read_exif_text(path: &Path) -> Result<Option<ExifText>> {
    Ok(load_exif(path)?.map(|exif| text_of(&exif)))
}

/// Read the orientation. Never fails: anything unreadable is `Undefined`.
pub fn read_orientation(path: &Path) -> Orientation {
    match load_exif(path) {
        Ok(Some(exif)) => orientation_of(&exif),
        Ok(None) => Orientation::Undefined,
        Err(e) => {
            log::debug!("No orientation for {}: {e}", path.display());
            Orientation::Undefined
        }
    }
}

/// The DateTime field (IFD0), as text.
pub fn read_exif_date(path: &Path) -> Result<Option<String>> {
    Ok(load_exif(path)?
        .and_then(|exif| exif.get_by_ifd_tag_code(0, TAG_DATE_TIME).and_then(entry_to_string)))
}

/// Every entry of the EXIF block. Empty when the file has none.
pub fn read_all_fields(path: &Path) -> Result<ExifFields> {
    Ok(ExifFields {
        inner: parse_exif_iter(path)?,
    })
}

fn load_exif(path: &Path) -> Result<Option<Exif>> {
    Ok(parse_exif_iter(path)?.map(Exif::from))
}

/// Read the file once and parse its EXIF block. `None` when a JPEG has no
/// EXIF segment; other containers are left to nom-exif to decide.
fn parse_exif_iter(path: &Path) -> Result<Option<ExifIter>> {
    let file_bytes = std::fs::read(path).map_err(|e| MetadataError::io(path, e))?;
    let bytes = Bytes::from(file_bytes);
    if let Ok(jpeg) = Jpeg::from_bytes(bytes.clone()) {
        if find_exif_segment_pos(jpeg.segments()).is_none() {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(None);
        }
    }

    let ms = MediaSource::seekable(Cursor::new(bytes))
        .map_err(|e| MetadataError::unreadable(path, e))?;
    MediaParser::new()
        .parse(ms)
        .map(Some)
        .map_err(|e| MetadataError::unreadable(path, format!("Invalid EXIF block: {e}")))
}

fn text_of(exif: &Exif) -> ExifText {
    ExifText {
        image_description: exif.get(ExifTag::ImageDescription).and_then(entry_to_string),
        user_comment: exif.get(ExifTag::UserComment).and_then(decode_user_comment),
        xp_title: exif.get_by_ifd_tag_code(0, TAG_XP_TITLE).and_then(decode_xp),
        xp_comment: exif.get_by_ifd_tag_code(0, TAG_XP_COMMENT).and_then(decode_xp),
        xp_subject: exif.get_by_ifd_tag_code(0, TAG_XP_SUBJECT).and_then(decode_xp),
    }
}

fn orientation_of(exif: &Exif) -> Orientation {
    if let Some(code) = exif.get(ExifTag::Orientation).and_then(entry_to_u32) {
        return Orientation::from_code(code);
    }
    // Some writers store the value with a non-standard type; take the IFD0
    // slot as it is and interpret whatever number it holds.
    exif.get_by_ifd_tag_code(0, TAG_ORIENTATION)
        .and_then(loose_entry_to_u32)
        .map(Orientation::from_code)
        .unwrap_or_default()
}

fn entry_to_u32(val: &EntryValue) -> Option<u32> {
    match val {
        EntryValue::U8(v) => Some(u32::from(*v)),
        EntryValue::U16(v) => Some(u32::from(*v)),
        EntryValue::U32(v) => Some(*v),
        _ => None,
    }
}

fn loose_entry_to_u32(val: &EntryValue) -> Option<u32> {
    entry_to_u32(val).or_else(|| match val {
        EntryValue::U8Array(v) => v.first().map(|x| u32::from(*x)),
        EntryValue::U16Array(v) => v.first().map(|x| u32::from(*x)),
        EntryValue::U32Array(v) => v.first().copied(),
        EntryValue::I8(v) => u32::try_from(*v).ok(),
        EntryValue::I16(v) => u32::try_from(*v).ok(),
        EntryValue::I32(v) => u32::try_from(*v).ok(),
        other => entry_to_string(other).and_then(|s| s.parse().ok()),
    })
}

/// Convert an EntryValue to an Option<String>. Text is taken as stored.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    match val {
        EntryValue::Text(s) => non_empty(s),
        other => non_empty(&other.to_string()),
    }
}

/// XP* tags hold NUL-terminated UTF-16LE bytes.
fn decode_xp(val: &EntryValue) -> Option<String> {
    match val {
        EntryValue::U8Array(bytes) | EntryValue::Undefined(bytes) => decode_utf16le(bytes),
        other => entry_to_string(other),
    }
}

/// UserComment starts with an 8-byte character code.
fn decode_user_comment(val: &EntryValue) -> Option<String> {
    match val {
        EntryValue::U8Array(bytes) | EntryValue::Undefined(bytes) => {
            if bytes.len() < 8 {
                return non_empty(&String::from_utf8_lossy(bytes));
            }
            let (code, body) = bytes.split_at(8);
            match code {
                b"UNICODE\0" => decode_utf16le(body),
                _ => non_empty(&String::from_utf8_lossy(body)),
            }
        }
        other => entry_to_string(other),
    }
}

fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    non_empty(&String::from_utf16_lossy(&units))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if s.is_empty() { None } else { Some(s.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TiffBuilder, attach_tiff, jpeg_fixture};
    use tempfile::TempDir;

    fn utf16(s: &str) -> Vec<u8> {
        let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }

    #[test]
    fn comment_prefers_xp_comment() {
        let text = ExifText {
            user_comment: Some("user".to_string()),
            xp_comment: Some("xp".to_string()),
            ..Default::default()
        };
        assert_eq!(text.comment(), Some("xp"));

        let text = ExifText {
            user_comment: Some("user".to_string()),
            ..Default::default()
        };
        assert_eq!(text.comment(), Some("user"));
    }

    #[test]
    fn decodes_xp_bytes() {
        let val = EntryValue::U8Array(utf16("Auge rechts"));
        assert_eq!(decode_xp(&val).as_deref(), Some("Auge rechts"));
        assert_eq!(decode_xp(&EntryValue::U8Array(vec![0, 0])), None);
    }

    #[test]
    fn decodes_user_comment_codes() {
        let mut ascii = b"ASCII\0\0\0".to_vec();
        ascii.extend_from_slice(b"Checked\0");
        assert_eq!(
            decode_user_comment(&EntryValue::Undefined(ascii)).as_deref(),
            Some("Checked")
        );

        let mut unicode = b"UNICODE\0".to_vec();
        unicode.extend(utf16("Geprüft"));
        assert_eq!(
            decode_user_comment(&EntryValue::Undefined(unicode)).as_deref(),
            Some("Geprüft")
        );

        let blank = b"\0\0\0\0\0\0\0\0        ".to_vec();
        assert_eq!(decode_user_comment(&EntryValue::Undefined(blank)), None);
    }

    #[test]
    fn loose_orientation_values() {
        assert_eq!(loose_entry_to_u32(&EntryValue::U16(6)), Some(6));
        assert_eq!(loose_entry_to_u32(&EntryValue::U16Array(vec![3, 1])), Some(3));
        assert_eq!(loose_entry_to_u32(&EntryValue::I32(8)), Some(8));
        assert_eq!(loose_entry_to_u32(&EntryValue::I32(-1)), None);
        assert_eq!(loose_entry_to_u32(&EntryValue::Text("6".to_string())), Some(6));
        assert_eq!(loose_entry_to_u32(&EntryValue::Text("up".to_string())), None);
    }

    #[test]
    fn plain_jpeg_has_no_exif() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "plain.jpg");
        assert!(read_exif_text(&path).unwrap().is_none());
        assert_eq!(read_orientation(&path), Orientation::Undefined);
        assert!(read_exif_date(&path).unwrap().is_none());
        assert_eq!(read_all_fields(&path).unwrap().count(), 0);
    }

    #[test]
    fn reads_text_fields() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let mut comment = b"ASCII\0\0\0".to_vec();
        comment.extend_from_slice(b"user text");
        attach_tiff(
            &path,
            TiffBuilder::default()
                .ifd0(0x010E, 2, b"Left Eye\0".to_vec())
                .ifd0(0x0132, 2, b"2024:03:01 10:20:30\0".to_vec())
                .ifd0(TAG_XP_COMMENT, 1, utf16("xp text"))
                .ifd0(TAG_XP_SUBJECT, 1, utf16("Iris"))
                .exif(0x9286, 7, comment)
                .build(),
        );

        let text = read_exif_text(&path).unwrap().unwrap();
        assert_eq!(text.image_description.as_deref(), Some("Left Eye"));
        assert_eq!(text.user_comment.as_deref(), Some("user text"));
        assert_eq!(text.xp_comment.as_deref(), Some("xp text"));
        assert_eq!(text.comment(), Some("xp text"));
        assert_eq!(text.xp_subject.as_deref(), Some("Iris"));
        assert!(text.xp_title.is_none());

        let date = read_exif_date(&path).unwrap().unwrap();
        assert!(date.contains("2024"));

        let fields: Vec<ExifField> = read_all_fields(&path).unwrap().collect();
        assert!(fields.iter().any(|f| f.tag == 0x010E));
    }

    #[test]
    fn text_keeps_quotes() {
        let val = EntryValue::Text("\"Left\" Eye\"".to_string());
        assert_eq!(entry_to_string(&val).as_deref(), Some("\"Left\" Eye\""));
    }

    #[test]
    fn summary_has_text_and_orientation() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        attach_tiff(
            &path,
            TiffBuilder::default()
                .ifd0(0x010E, 2, b"He said \"hi\"\0".to_vec())
                .ifd0(TAG_ORIENTATION, 3, vec![6, 0])
                .build(),
        );

        let summary = read_exif_summary(&path).unwrap().unwrap();
        assert_eq!(
            summary.text.image_description.as_deref(),
            Some("He said \"hi\"")
        );
        assert_eq!(summary.orientation, Orientation::Rotate90);
        assert!(read_exif_summary(&jpeg_fixture(dir.path(), "plain.jpg"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn reads_standard_orientation() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        attach_tiff(
            &path,
            TiffBuilder::default()
                .ifd0(TAG_ORIENTATION, 3, vec![8, 0])
                .build(),
        );
        assert_eq!(read_orientation(&path), Orientation::Rotate270);
    }

    #[test]
    fn reads_orientation_stored_as_text() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        attach_tiff(
            &path,
            TiffBuilder::default()
                .ifd0(TAG_ORIENTATION, 2, b"6\0".to_vec())
                .build(),
        );
        assert_eq!(read_orientation(&path), Orientation::Rotate90);
    }

    #[test]
    fn out_of_range_orientation_is_undefined() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        attach_tiff(
            &path,
            TiffBuilder::default()
                .ifd0(TAG_ORIENTATION, 3, vec![42, 0])
                .build(),
        );
        assert_eq!(read_orientation(&path), Orientation::Undefined);
    }

    #[test]
    fn corrupt_block_never_breaks_orientation() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        attach_tiff(&path, b"this is not a TIFF header".to_vec());
        assert_eq!(read_orientation(&path), Orientation::Undefined);
    }
}
