//! Reading and replacing the XMP APP1 segment of a JPEG.

use std::path::Path;

use super::{CustomXmlStore, XmpPacket};
use crate::config::WritePolicy;
use crate::error::{MetadataError, Result};
use crate::jpeg;
use crate::merge;
use crate::record::MetadataRecord;
use crate::rewrite::{RewriteStrategy, SegmentEditor, SegmentKind};

/// Return the raw XMP packet text of a JPEG, or `None` if it has none.
pub fn read_xmp_packet(path: &Path) -> Result<Option<String>> {
    let jpeg = jpeg::load_jpeg(path)?;
    Ok(jpeg::xmp_text(&jpeg))
}

/// Stores a [`MetadataRecord`] into the XMP packet of a JPEG.
///
/// The existing packet is parsed and updated in place, so properties written
/// by other tools survive. Standard Dublin Core fields are only written when
/// the policy also allows EXIF changes.
pub struct XmpEditor<'a> {
    record: &'a MetadataRecord,
    include_standard: bool,
}

impl<'a> XmpEditor<'a> {
    pub fn new(record: &'a MetadataRecord, policy: WritePolicy) -> Self {
        Self {
            record,
            include_standard: policy.allows_exif_changes(),
        }
    }
}

impl SegmentEditor for XmpEditor<'_> {
    fn kind(&self) -> SegmentKind {
        SegmentKind::Xmp
    }

    fn rewrite(&self, source: &Path, _strategy: RewriteStrategy) -> Result<Vec<u8>> {
        let mut jpeg = jpeg::load_jpeg(source)?;

        let mut packet = match jpeg::xmp_text(&jpeg) {
            Some(xml) => XmpPacket::parse(&xml).map_err(|e| {
                MetadataError::unreadable(source, format!("Invalid XMP packet: {e}"))
            })?,
            None => XmpPacket::new(),
        };
        merge::store_record(&mut packet, self.record, self.include_standard);

        jpeg::set_xmp_text(&mut jpeg, &packet.serialize())
            .map_err(|e| MetadataError::unreadable(source, e))?;
        Ok(jpeg::encode_jpeg(jpeg))
    }
}
