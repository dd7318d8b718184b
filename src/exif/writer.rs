use anyhow::Result;
use img_parts::ImageEXIF;
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::path::Path;

use super::{
    TAG_EXIF_IFD_POINTER, TAG_IMAGE_DESCRIPTION, TAG_ORIENTATION, TAG_USER_COMMENT,
    TAG_XP_COMMENT, TAG_XP_SUBJECT, TAG_XP_TITLE,
};
use crate::error::MetadataError;
use crate::jpeg;
use crate::record::MetadataRecord;
use crate::rewrite::{RewriteStrategy, SegmentEditor, SegmentKind};

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

// TIFF field types
const FORMAT_BYTE: u16 = 1;
const FORMAT_ASCII: u16 = 2;
const FORMAT_SHORT: u16 = 3;
const FORMAT_LONG: u16 = 4;
const FORMAT_UNDEFINED: u16 = 7;

const TAG_SUB_IFDS: u16 = 0x014A;
const TAG_THUMBNAIL_OFFSET: u16 = 0x0201;
const TAG_THUMBNAIL_LENGTH: u16 = 0x0202;
const TAG_GPS_IFD_POINTER: u16 = 0x8825;
const TAG_INTEROP_IFD_POINTER: u16 = 0xA005;

/// Tags whose values are offsets of further IFDs.
const SUB_IFD_TAGS: [u16; 4] = [
    TAG_SUB_IFDS,
    TAG_EXIF_IFD_POINTER,
    TAG_GPS_IFD_POINTER,
    TAG_INTEROP_IFD_POINTER,
];

/// The EXIF fields a write touches. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifTagEdits {
    /// ImageDescription and XPTitle.
    pub title: Option<String>,
    /// UserComment and XPComment.
    pub comment: Option<String>,
    /// XPSubject.
    pub subject: Option<String>,
    pub orientation: Option<u16>,
}

impl ExifTagEdits {
    pub fn from_record(record: &MetadataRecord) -> Self {
        Self {
            title: record.title.clone(),
            comment: record.comment.clone(),
            subject: record.subject.clone(),
            orientation: record.orientation.code(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.comment.is_none()
            && self.subject.is_none()
            && self.orientation.is_none()
    }

    /// Raw entries for IFD0 and for the Exif sub-IFD, in the file's byte order.
    fn raw_entries(&self, order: ByteOrder) -> (Vec<RawIfdEntry>, Vec<RawIfdEntry>) {
        let mut ifd0 = Vec::new();
        let mut exif_ifd = Vec::new();

        if let Some(title) = &self.title {
            ifd0.push(make_string_entry(TAG_IMAGE_DESCRIPTION, title));
            ifd0.push(make_xp_entry(TAG_XP_TITLE, title));
        }
        if let Some(comment) = &self.comment {
            exif_ifd.push(make_user_comment_entry(comment));
            ifd0.push(make_xp_entry(TAG_XP_COMMENT, comment));
        }
        if let Some(subject) = &self.subject {
            ifd0.push(make_xp_entry(TAG_XP_SUBJECT, subject));
        }
        if let Some(code) = self.orientation {
            ifd0.push(make_short_entry(TAG_ORIENTATION, code, order));
        }

        (ifd0, exif_ifd)
    }

    fn little_exif_tags(&self) -> Vec<ExifTag> {
        let mut tags = Vec::new();

        if let Some(title) = &self.title {
            tags.push(ExifTag::ImageDescription(title.clone()));
            tags.extend(make_xp_tag(TAG_XP_TITLE, title));
        }
        if let Some(comment) = &self.comment {
            tags.push(ExifTag::UserComment(user_comment_bytes(comment)));
            tags.extend(make_xp_tag(TAG_XP_COMMENT, comment));
        }
        if let Some(subject) = &self.subject {
            tags.extend(make_xp_tag(TAG_XP_SUBJECT, subject));
        }
        if let Some(code) = self.orientation {
            tags.push(ExifTag::Orientation(vec![code]));
        }

        tags
    }
}

/// Stores title, comment, subject and orientation into the EXIF block of a JPEG.
///
/// The lossless strategy patches the existing TIFF structure and keeps every
/// other tag byte for byte. The lossy strategy rebuilds the block with
/// little_exif, keeping only the tags it can parse, and also works for files
/// without any EXIF block.
pub struct ExifEditor {
    edits: ExifTagEdits,
}

impl ExifEditor {
    pub fn new(edits: ExifTagEdits) -> Self {
        Self { edits }
    }
}

impl SegmentEditor for ExifEditor {
    fn kind(&self) -> SegmentKind {
        SegmentKind::Exif
    }

    fn rewrite(&self, source: &Path, strategy: RewriteStrategy) -> crate::error::Result<Vec<u8>> {
        let mut jpeg = jpeg::load_jpeg(source)?;

        let tiff = match strategy {
            RewriteStrategy::Lossless => {
                let original = jpeg.exif().ok_or_else(|| {
                    MetadataError::unreadable(source, "no EXIF block to update in place")
                })?;
                inject_tags_into_tiff(&original, &self.edits)
            }
            RewriteStrategy::Lossy => build_with_little_exif(source, &self.edits),
        }
        .map_err(|e| MetadataError::unreadable(source, e))?;

        jpeg::set_exif_tiff(&mut jpeg, tiff).map_err(|e| MetadataError::unreadable(source, e))?;
        Ok(jpeg::encode_jpeg(jpeg))
    }
}

/// Encode a string as UTF-16LE bytes (used for XP* tags).
fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    // Null terminator
    bytes.push(0);
    bytes.push(0);
    bytes
}

/// UserComment payload: 8-byte character code followed by the text.
fn user_comment_bytes(value: &str) -> Vec<u8> {
    let mut data = b"ASCII\0\0\0".to_vec();
    data.extend_from_slice(value.as_bytes());
    data
}

/// Create an XP* tag (UTF-16LE encoded, IFD0 group).
fn make_xp_tag(tag_id: u16, value: &str) -> Option<ExifTag> {
    let raw_data = encode_utf16le(value);
    ExifTag::from_u16_with_data(
        tag_id,
        &ExifTagFormat::INT8U,
        &raw_data,
        &Endian::Little,
        &ExifTagGroup::IFD0,
    )
    .ok()
}

/// Load existing EXIF metadata from a file path using little_exif.
/// Returns None if it can't parse.
fn load_existing_metadata(path: &Path) -> Option<Metadata> {
    let path_owned = path.to_path_buf();
    // Suppress panics from little_exif
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(move || Metadata::new_from_path(&path_owned));
    std::panic::set_hook(prev_hook);

    match result {
        Ok(Ok(m)) => {
            log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
            Some(m)
        }
        Ok(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            None
        }
        Err(_) => {
            log::debug!("little_exif panicked parsing EXIF");
            None
        }
    }
}

/// Rebuild the whole TIFF block with little_exif, starting from whatever
/// tags of the existing block it understands.
fn build_with_little_exif(path: &Path, edits: &ExifTagEdits) -> Result<Vec<u8>> {
    let mut metadata = load_existing_metadata(path).unwrap_or_else(Metadata::new);
    for tag in edits.little_exif_tags() {
        metadata.set_tag(tag);
    }

    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        anyhow::bail!("little_exif produced no EXIF data");
    }
    Ok(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())
}

/// Byte order of a TIFF block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    fn detect(tiff: &[u8]) -> Result<Self> {
        match tiff.get(0..2) {
            Some(b"MM") => Ok(Self::Big),
            Some(b"II") => Ok(Self::Little),
            _ => anyhow::bail!("Invalid TIFF byte order"),
        }
    }

    fn u16_at(self, data: &[u8], offset: usize) -> Result<u16> {
        let bytes: [u8; 2] = data
            .get(offset..offset + 2)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow::anyhow!("Offset {offset} out of bounds"))?;
        Ok(match self {
            Self::Big => u16::from_be_bytes(bytes),
            Self::Little => u16::from_le_bytes(bytes),
        })
    }

    fn u32_at(self, data: &[u8], offset: usize) -> Result<u32> {
        let bytes: [u8; 4] = data
            .get(offset..offset + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow::anyhow!("Offset {offset} out of bounds"))?;
        Ok(match self {
            Self::Big => u32::from_be_bytes(bytes),
            Self::Little => u32::from_le_bytes(bytes),
        })
    }

    fn u16_bytes(self, val: u16) -> [u8; 2] {
        match self {
            Self::Big => val.to_be_bytes(),
            Self::Little => val.to_le_bytes(),
        }
    }

    fn u32_bytes(self, val: u32) -> [u8; 4] {
        match self {
            Self::Big => val.to_be_bytes(),
            Self::Little => val.to_le_bytes(),
        }
    }
}

/// A raw IFD entry to inject into a TIFF, built in the correct endianness.
struct RawIfdEntry {
    tag_id: u16,
    data_format: u16,
    count: u32,
    inline_value: [u8; 4],       // value if data fits in 4 bytes
    extra_data: Option<Vec<u8>>, // data if > 4 bytes
}

impl RawIfdEntry {
    fn new(tag_id: u16, data_format: u16, count: u32, data: Vec<u8>) -> Self {
        let (inline_value, extra_data) = if data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..data.len()].copy_from_slice(&data);
            (inline, None)
        } else {
            ([0u8; 4], Some(data))
        };
        Self {
            tag_id,
            data_format,
            count,
            inline_value,
            extra_data,
        }
    }
}

/// ASCII entry, NUL terminated.
fn make_string_entry(tag_id: u16, value: &str) -> RawIfdEntry {
    let mut data = value.as_bytes().to_vec();
    data.push(0);
    let count = data.len() as u32;
    RawIfdEntry::new(tag_id, FORMAT_ASCII, count, data)
}

/// XP* entry: UTF-16LE text stored as BYTE.
fn make_xp_entry(tag_id: u16, value: &str) -> RawIfdEntry {
    let data = encode_utf16le(value);
    let count = data.len() as u32;
    RawIfdEntry::new(tag_id, FORMAT_BYTE, count, data)
}

/// UserComment entry, UNDEFINED with the ASCII character code prefix.
fn make_user_comment_entry(value: &str) -> RawIfdEntry {
    let data = user_comment_bytes(value);
    let count = data.len() as u32;
    RawIfdEntry::new(TAG_USER_COMMENT, FORMAT_UNDEFINED, count, data)
}

fn make_short_entry(tag_id: u16, value: u16, order: ByteOrder) -> RawIfdEntry {
    RawIfdEntry::new(tag_id, FORMAT_SHORT, 1, order.u16_bytes(value).to_vec())
}

fn make_long_entry(tag_id: u16, value: u32, order: ByteOrder) -> RawIfdEntry {
    RawIfdEntry::new(tag_id, FORMAT_LONG, 1, order.u32_bytes(value).to_vec())
}

/// One IFD as found in the original TIFF data.
#[derive(Default)]
struct Ifd {
    entries: Vec<[u8; 12]>,
    next: u32,
}

impl Ifd {
    fn read(tiff: &[u8], offset: usize, order: ByteOrder) -> Result<Self> {
        let count = order.u16_at(tiff, offset)? as usize;
        let start = offset + 2;
        let end = start + count * 12;
        if end + 4 > tiff.len() {
            anyhow::bail!("IFD at {offset} extends beyond TIFF data");
        }
        let entries = (0..count)
            .map(|i| {
                let mut raw = [0u8; 12];
                raw.copy_from_slice(&tiff[start + i * 12..start + (i + 1) * 12]);
                raw
            })
            .collect();
        let next = order.u32_at(tiff, end)?;
        Ok(Self { entries, next })
    }

    fn tag_of(entry: &[u8; 12], order: ByteOrder) -> u16 {
        match order {
            ByteOrder::Big => u16::from_be_bytes([entry[0], entry[1]]),
            ByteOrder::Little => u16::from_le_bytes([entry[0], entry[1]]),
        }
    }

    /// The inline SHORT or LONG value of `tag`, used for pointers and lengths.
    fn number(&self, tag: u16, order: ByteOrder) -> Option<u32> {
        let entry = self.entries.iter().find(|e| Self::tag_of(e, order) == tag)?;
        match order.u16_at(&entry[..], 2).ok()? {
            FORMAT_SHORT => order.u16_at(&entry[..], 8).ok().map(u32::from),
            _ => order.u32_at(&entry[..], 8).ok(),
        }
    }

    /// Size of the table itself, without out-of-line values.
    fn table_len(&self) -> usize {
        2 + self.entries.len() * 12 + 4
    }
}

/// Bytes per value of a TIFF field type.
fn format_size(format: u16) -> Option<usize> {
    match format {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// An IFD table the current write replaces, with the tags whose values go
/// with it.
struct Replaced<'a> {
    offset: usize,
    tags: &'a [u16],
}

/// Walks every structure reachable from the TIFF header and records where
/// the last byte still in use ends.
struct LiveScan<'a> {
    tiff: &'a [u8],
    order: ByteOrder,
    replaced: &'a [Replaced<'a>],
    visited: Vec<usize>,
    end: usize,
}

impl LiveScan<'_> {
    fn mark(&mut self, start: usize, len: usize) -> Result<()> {
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.tiff.len())
            .ok_or_else(|| anyhow::anyhow!("Value at {start} extends beyond TIFF data"))?;
        self.end = self.end.max(end);
        Ok(())
    }

    fn walk(&mut self, offset: usize) -> Result<()> {
        if offset == 0 || self.visited.contains(&offset) {
            return Ok(());
        }
        self.visited.push(offset);

        let order = self.order;
        let ifd = Ifd::read(self.tiff, offset, order)?;
        let replaced = self.replaced;
        let dropped = replaced
            .iter()
            .find(|r| r.offset == offset)
            .map(|r| r.tags);
        if dropped.is_none() {
            self.mark(offset, ifd.table_len())?;
        }

        for raw in &ifd.entries {
            let tag = Ifd::tag_of(raw, order);
            // Sub-IFDs keep their own values alive even when the pointer changes
            if SUB_IFD_TAGS.contains(&tag) {
                for sub in self.sub_ifd_offsets(raw)? {
                    self.walk(sub as usize)?;
                }
            }
            if dropped.is_some_and(|tags| tags.contains(&tag)) {
                continue;
            }

            let format = order.u16_at(&raw[..], 2)?;
            let size = format_size(format)
                .ok_or_else(|| anyhow::anyhow!("Unknown type {format} in tag 0x{tag:04X}"))?;
            let len = size
                .checked_mul(order.u32_at(&raw[..], 4)? as usize)
                .ok_or_else(|| anyhow::anyhow!("Oversized value in tag 0x{tag:04X}"))?;
            if len > 4 {
                self.mark(order.u32_at(&raw[..], 8)? as usize, len)?;
            }
        }

        if let (Some(at), Some(len)) = (
            ifd.number(TAG_THUMBNAIL_OFFSET, order),
            ifd.number(TAG_THUMBNAIL_LENGTH, order),
        ) {
            self.mark(at as usize, len as usize)?;
        }

        self.walk(ifd.next as usize)
    }

    fn sub_ifd_offsets(&self, raw: &[u8; 12]) -> Result<Vec<u32>> {
        let count = self.order.u32_at(&raw[..], 4)? as usize;
        if count <= 1 {
            return Ok(vec![self.order.u32_at(&raw[..], 8)?]);
        }
        let at = self.order.u32_at(&raw[..], 8)? as usize;
        (0..count)
            .map(|i| self.order.u32_at(self.tiff, at + i * 4))
            .collect()
    }
}

/// Length of the prefix of `tiff` that stays in use once the `replaced`
/// tables and their edited values are dropped. Everything after it is
/// left over from earlier rewrites.
fn live_end(tiff: &[u8], order: ByteOrder, replaced: &[Replaced]) -> Result<usize> {
    let mut scan = LiveScan {
        tiff,
        order,
        replaced,
        visited: Vec::new(),
        end: 8,
    };
    scan.walk(order.u32_at(tiff, 4)? as usize)?;
    Ok(scan.end)
}

/// Append a copy of `ifd` with `edits` applied to the end of `out`.
///
/// Entries with the same tag as an edit are replaced, all others are copied
/// verbatim so their value offsets keep pointing at the original data.
/// Returns the offset of the new IFD.
fn append_ifd(out: &mut Vec<u8>, ifd: &Ifd, edits: &[RawIfdEntry], order: ByteOrder) -> u32 {
    enum Slot<'a> {
        Kept(&'a [u8; 12]),
        New(&'a RawIfdEntry),
    }

    let mut slots: Vec<(u16, Slot)> = ifd
        .entries
        .iter()
        .map(|e| (Ifd::tag_of(e, order), Slot::Kept(e)))
        .filter(|(tag, _)| !edits.iter().any(|n| n.tag_id == *tag))
        .collect();
    slots.extend(edits.iter().map(|e| (e.tag_id, Slot::New(e))));
    slots.sort_by_key(|(tag, _)| *tag);

    // IFDs start on a word boundary
    if out.len() % 2 == 1 {
        out.push(0);
    }
    let start = out.len();
    let mut data_off = start + 2 + slots.len() * 12 + 4;
    let mut blobs: Vec<&[u8]> = Vec::new();

    out.extend_from_slice(&order.u16_bytes(slots.len() as u16));
    for (_, slot) in &slots {
        match slot {
            Slot::Kept(raw) => out.extend_from_slice(&raw[..]),
            Slot::New(entry) => {
                out.extend_from_slice(&order.u16_bytes(entry.tag_id));
                out.extend_from_slice(&order.u16_bytes(entry.data_format));
                out.extend_from_slice(&order.u32_bytes(entry.count));
                match &entry.extra_data {
                    Some(extra) => {
                        out.extend_from_slice(&order.u32_bytes(data_off as u32));
                        data_off += extra.len() + extra.len() % 2;
                        blobs.push(extra);
                    }
                    None => out.extend_from_slice(&entry.inline_value),
                }
            }
        }
    }
    out.extend_from_slice(&order.u32_bytes(ifd.next));

    for blob in blobs {
        out.extend_from_slice(blob);
        if blob.len() % 2 == 1 {
            out.push(0);
        }
    }

    start as u32
}

/// Patch the edited tags into the original raw TIFF data.
///
/// The rebuilt IFD0 (and Exif sub-IFD when UserComment changes) is appended
/// and the header is pointed at it. Tables and values left behind by the
/// previous rewrite are cut off first, so repeated saves do not grow the
/// block. A missing Exif sub-IFD is created. Fails when the structure
/// cannot be followed.
fn inject_tags_into_tiff(original: &[u8], edits: &ExifTagEdits) -> Result<Vec<u8>> {
    if original.len() < 8 {
        anyhow::bail!("Original TIFF data too short");
    }
    let order = ByteOrder::detect(original)?;

    let (mut ifd0_entries, exif_ifd_entries) = edits.raw_entries(order);
    if ifd0_entries.is_empty() && exif_ifd_entries.is_empty() {
        return Ok(original.to_vec());
    }

    let ifd0_offset = order.u32_at(original, 4)? as usize;
    let ifd0 = Ifd::read(original, ifd0_offset, order)?;
    let exif_offset = ifd0
        .number(TAG_EXIF_IFD_POINTER, order)
        .map(|offset| offset as usize);

    let exif_ifd = if exif_ifd_entries.is_empty() {
        None
    } else {
        Some(match exif_offset {
            Some(offset) => Ifd::read(original, offset, order)?,
            None => Ifd::default(),
        })
    };

    let mut ifd0_tags: Vec<u16> = ifd0_entries.iter().map(|e| e.tag_id).collect();
    if exif_ifd.is_some() {
        ifd0_tags.push(TAG_EXIF_IFD_POINTER);
    }
    let exif_tags: Vec<u16> = exif_ifd_entries.iter().map(|e| e.tag_id).collect();
    let mut replaced = vec![Replaced {
        offset: ifd0_offset,
        tags: &ifd0_tags,
    }];
    if let (Some(_), Some(offset)) = (&exif_ifd, exif_offset) {
        replaced.push(Replaced {
            offset,
            tags: &exif_tags,
        });
    }

    let keep = live_end(original, order, &replaced).unwrap_or_else(|e| {
        log::debug!("Keeping the whole EXIF block: {e}");
        original.len()
    });
    let mut result = original[..keep].to_vec();

    if let Some(exif_ifd) = &exif_ifd {
        let new_exif_offset = append_ifd(&mut result, exif_ifd, &exif_ifd_entries, order);
        ifd0_entries.push(make_long_entry(TAG_EXIF_IFD_POINTER, new_exif_offset, order));
    }

    let new_ifd0_offset = append_ifd(&mut result, &ifd0, &ifd0_entries, order);
    result[4..8].copy_from_slice(&order.u32_bytes(new_ifd0_offset));

    Ok(result)
}
