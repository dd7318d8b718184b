//! Fixture builders shared by the unit tests.

use img_parts::ImageEXIF;
use img_parts::jpeg::Jpeg;
use std::path::{Path, PathBuf};

/// Write a small gradient JPEG without any metadata segments.
pub fn jpeg_fixture(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let img = image::RgbImage::from_fn(16, 16, |x, y| {
        image::Rgb([(x * 16) as u8, (y * 16) as u8, 128])
    });
    img.save_with_format(&path, image::ImageFormat::Jpeg).unwrap();
    path
}

/// Write a PNG under `name`, whatever its extension says.
pub fn png_fixture(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]));
    img.save_with_format(&path, image::ImageFormat::Png).unwrap();
    path
}

/// Replace the EXIF block of a JPEG with raw TIFF data.
pub fn attach_tiff(path: &Path, tiff: Vec<u8>) {
    let bytes = std::fs::read(path).unwrap();
    let mut jpeg = Jpeg::from_bytes(bytes.into()).unwrap();
    jpeg.set_exif(Some(tiff.into()));
    std::fs::write(path, jpeg.encoder().bytes()).unwrap();
}

/// Little-endian TIFF block with IFD0 and an optional Exif sub-IFD.
#[derive(Default)]
pub struct TiffBuilder {
    ifd0: Vec<(u16, u16, Vec<u8>)>,
    exif: Vec<(u16, u16, Vec<u8>)>,
}

impl TiffBuilder {
    pub fn ifd0(mut self, tag: u16, format: u16, data: Vec<u8>) -> Self {
        self.ifd0.push((tag, format, data));
        self
    }

    pub fn exif(mut self, tag: u16, format: u16, data: Vec<u8>) -> Self {
        self.exif.push((tag, format, data));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut ifd0 = self.ifd0;
        let mut exif = self.exif;
        let has_exif = !exif.is_empty();

        let ifd0_len = ifd0.len() + usize::from(has_exif);
        let exif_offset = 8 + 2 + ifd0_len * 12 + 4;
        if has_exif {
            ifd0.push((0x8769, 4, (exif_offset as u32).to_le_bytes().to_vec()));
        }
        ifd0.sort_by_key(|e| e.0);
        exif.sort_by_key(|e| e.0);

        let exif_len = if has_exif { 2 + exif.len() * 12 + 4 } else { 0 };
        let mut data_offset = exif_offset + exif_len;
        let mut blobs = Vec::new();

        let mut out = b"II*\0".to_vec();
        out.extend_from_slice(&8u32.to_le_bytes());
        write_ifd(&mut out, &ifd0, &mut data_offset, &mut blobs);
        if has_exif {
            write_ifd(&mut out, &exif, &mut data_offset, &mut blobs);
        }
        out.extend_from_slice(&blobs);
        out
    }
}

fn write_ifd(
    out: &mut Vec<u8>,
    entries: &[(u16, u16, Vec<u8>)],
    data_offset: &mut usize,
    blobs: &mut Vec<u8>,
) {
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, format, data) in entries {
        let unit = match format {
            3 => 2,
            4 | 9 => 4,
            5 | 10 => 8,
            _ => 1,
        };
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&format.to_le_bytes());
        out.extend_from_slice(&((data.len() / unit) as u32).to_le_bytes());
        if data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..data.len()].copy_from_slice(data);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&(*data_offset as u32).to_le_bytes());
            blobs.extend_from_slice(data);
            *data_offset += data.len();
            if data.len() % 2 == 1 {
                blobs.push(0);
                *data_offset += 1;
            }
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
}
