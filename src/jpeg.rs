//! JPEG segment plumbing shared by the EXIF and XMP editors.

use anyhow::Result;
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageEXIF};
use std::path::Path;

use crate::error::MetadataError;

pub(crate) const APP1: u8 = 0xE1;
pub(crate) const EXIF_PREFIX: &[u8] = b"Exif\0\0";
pub(crate) const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Largest payload a segment can carry (16-bit length includes itself).
const MAX_SEGMENT_CONTENTS: usize = 0xFFFF - 2;

/// Read and split a JPEG into its segments.
pub(crate) fn load_jpeg(path: &Path) -> crate::error::Result<Jpeg> {
    let file_bytes = std::fs::read(path).map_err(|e| MetadataError::io(path, e))?;
    Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| MetadataError::unreadable(path, format!("Failed to parse JPEG: {e}")))
}

/// Encode the JPEG back into a complete file.
pub(crate) fn encode_jpeg(jpeg: Jpeg) -> Vec<u8> {
    jpeg.encoder().bytes().to_vec()
}

/// Find the position of the EXIF APP1 segment.
pub(crate) fn find_exif_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == APP1 && s.contents().starts_with(EXIF_PREFIX))
}

/// Find the position of the XMP APP1 segment.
pub(crate) fn find_xmp_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == APP1 && s.contents().starts_with(XMP_HEADER))
}

/// The XMP packet text of the JPEG, if it has one.
pub(crate) fn xmp_text(jpeg: &Jpeg) -> Option<String> {
    find_xmp_segment_pos(jpeg.segments()).map(|pos| {
        let contents = jpeg.segments()[pos].contents();
        String::from_utf8_lossy(&contents[XMP_HEADER.len()..]).into_owned()
    })
}

/// Replace the XMP segment, or insert one right after the EXIF segment.
pub(crate) fn set_xmp_text(jpeg: &mut Jpeg, xmp: &str) -> Result<()> {
    let mut contents = Vec::with_capacity(XMP_HEADER.len() + xmp.len());
    contents.extend_from_slice(XMP_HEADER);
    contents.extend_from_slice(xmp.as_bytes());
    if contents.len() > MAX_SEGMENT_CONTENTS {
        anyhow::bail!(
            "XMP packet of {} bytes does not fit into one JPEG segment",
            xmp.len()
        );
    }

    let new_segment = JpegSegment::new_with_contents(APP1, Bytes::from(contents));
    let xmp_pos = find_xmp_segment_pos(jpeg.segments());
    let segments = jpeg.segments_mut();
    if let Some(pos) = xmp_pos {
        segments[pos] = new_segment;
    } else {
        // Insert after EXIF APP1 or at position 1 (after APP0)
        let insert_pos = find_exif_segment_pos(segments)
            .map(|p| p + 1)
            .unwrap_or(1);
        let insert_pos = std::cmp::min(insert_pos, segments.len());
        segments.insert(insert_pos, new_segment);
    }
    Ok(())
}

/// Replace the EXIF segment with new TIFF data, keeping its original position.
pub(crate) fn set_exif_tiff(jpeg: &mut Jpeg, tiff: Vec<u8>) -> Result<()> {
    if tiff.len() + EXIF_PREFIX.len() > MAX_SEGMENT_CONTENTS {
        anyhow::bail!(
            "EXIF block of {} bytes does not fit into one JPEG segment",
            tiff.len()
        );
    }

    let orig_exif_pos = find_exif_segment_pos(jpeg.segments());
    jpeg.set_exif(Some(Bytes::from(tiff)));

    // set_exif() may insert after the XMP APP1. Move the EXIF segment back so
    // it comes first, which many EXIF parsers require.
    if let Some(new_pos) = find_exif_segment_pos(jpeg.segments()) {
        let target_pos = orig_exif_pos.unwrap_or(1);
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }
    Ok(())
}
