use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{MetadataError, NotJpegReason, Result};
use crate::exif::{self, ExifEditor, ExifTagEdits};
use crate::merge;
use crate::record::{MetadataRecord, Orientation};
use crate::rewrite::{RewriteOutcome, rewrite_segment};
use crate::xmp::{XmpEditor, XmpPacket, read_xmp_packet};

const JPEG_MIME: &str = "image/jpeg";

/// Bytes read for content sniffing.
const SNIFF_LEN: u64 = 32;

/// Extensions picked up when collecting photos from directories.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jpe"];

/// What a write changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Set when the XMP segment was rewritten.
    pub xmp: Option<RewriteOutcome>,
    /// Set when the EXIF segment was rewritten.
    pub exif: Option<RewriteOutcome>,
}

impl WriteReport {
    /// Whether the file was left untouched.
    pub fn is_noop(&self) -> bool {
        self.xmp.is_none() && self.exif.is_none()
    }
}

/// Check that `path` is a JPEG by extension and by content.
pub fn validate_jpeg(path: &Path) -> Result<()> {
    let not_jpeg = |reason| MetadataError::NotJpeg {
        path: path.to_path_buf(),
        reason,
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| not_jpeg(NotJpegReason::MissingExtension))?;
    if mime_guess::from_ext(ext).first_raw() != Some(JPEG_MIME) {
        return Err(not_jpeg(NotJpegReason::Extension(ext.to_string())));
    }

    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    std::fs::File::open(path)
        .and_then(|f| f.take(SNIFF_LEN).read_to_end(&mut head))
        .map_err(|e| MetadataError::io(path, e))?;
    let mime = image::guess_format(&head)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    if mime != JPEG_MIME {
        return Err(not_jpeg(NotJpegReason::MimeType(mime.to_string())));
    }

    Ok(())
}

/// Read the metadata of a JPEG and resolve it into one record.
///
/// Unparseable XMP or EXIF content is logged and treated as absent, so a
/// damaged segment never hides the other store.
///
/// ```rust,no_run
/// use eyephoto_meta::config::Config;
/// use eyephoto_meta::pipeline::read_metadata;
///
/// let record = read_metadata("eye.jpg".as_ref(), &Config::default())?;
/// println!("Title: {:?}", record.title);
/// # Ok::<(), eyephoto_meta::error::MetadataError>(())
/// ```
pub fn read_metadata(path: &Path, config: &Config) -> Result<MetadataRecord> {
    validate_jpeg(path)?;

    let packet = match read_xmp_packet(path) {
        Ok(Some(xml)) => XmpPacket::parse(&xml).unwrap_or_else(|e| {
            log::warn!("Error when retrieving XMP data from {}: {e}", path.display());
            XmpPacket::new()
        }),
        Ok(None) => XmpPacket::new(),
        Err(e @ MetadataError::Io { .. }) => return Err(e),
        Err(e) => {
            log::warn!("Error when retrieving XMP data: {e}");
            XmpPacket::new()
        }
    };

    let (exif_text, orientation) = match exif::read_exif_summary(path) {
        Ok(Some(summary)) => (Some(summary.text), summary.orientation),
        Ok(None) => (None, Orientation::Undefined),
        Err(e @ MetadataError::Io { .. }) => return Err(e),
        Err(e) => {
            log::warn!("Error when retrieving Exif data: {e}");
            (None, Orientation::Undefined)
        }
    };

    Ok(merge::merge(
        &packet,
        exif_text.as_ref(),
        orientation,
        config.write_policy,
    ))
}

/// Store a record into a JPEG, within the limits of the write policy.
///
/// The XMP segment is rewritten first. The EXIF segment follows when the
/// policy allows it; a failure there is reported as
/// [`MetadataError::ExifStorage`] and leaves the already stored XMP in place.
///
/// ```rust,no_run
/// use eyephoto_meta::config::{Config, WritePolicy};
/// use eyephoto_meta::pipeline::{read_metadata, write_metadata};
///
/// let config = Config { write_policy: WritePolicy::XmlAndExif, ..Default::default() };
/// let path = "eye.jpg".as_ref();
/// let mut record = read_metadata(path, &config)?;
/// record.title = Some("Left Eye".to_string());
/// write_metadata(path, &record, &config)?;
/// # Ok::<(), eyephoto_meta::error::MetadataError>(())
/// ```
pub fn write_metadata(
    path: &Path,
    record: &MetadataRecord,
    config: &Config,
) -> Result<WriteReport> {
    let policy = config.write_policy;
    if !policy.allows_jpeg_changes() {
        log::debug!(
            "Write policy {policy:?} leaves {} untouched",
            path.display()
        );
        return Ok(WriteReport::default());
    }

    validate_jpeg(path)?;

    let mut report = WriteReport {
        xmp: Some(rewrite_segment(path, &XmpEditor::new(record, policy))?),
        exif: None,
    };

    if policy.allows_exif_changes() {
        let edits = ExifTagEdits::from_record(record);
        if edits.is_empty() {
            log::debug!("No EXIF fields to store for {}", path.display());
        } else {
            let outcome = rewrite_segment(path, &ExifEditor::new(edits))
                .map_err(|e| MetadataError::ExifStorage(Box::new(e)))?;
            report.exif = Some(outcome);
        }
    }

    log::info!("Stored metadata of {}", path.display());
    Ok(report)
}

/// The DateTime field of the EXIF block, as text.
pub fn exif_date(path: &Path) -> Result<Option<String>> {
    validate_jpeg(path)?;
    exif::read_exif_date(path)
}

/// Collect JPEG files from the given paths (files or directories, recursive).
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_jpeg_name(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_jpeg_name(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

fn is_jpeg_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WritePolicy;
    use crate::exif::read_exif_text;
    use crate::record::RightLeft;
    use crate::rewrite::{RewriteStrategy, SegmentEditor, SegmentKind, temp_path};
    use crate::test_util::{jpeg_fixture, png_fixture};
    use crate::xmp::{CustomXmlStore, XmpItem};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn config(write_policy: WritePolicy) -> Config {
        Config {
            write_policy,
            ..Default::default()
        }
    }

    fn sample_record() -> MetadataRecord {
        MetadataRecord {
            title: Some("Left Eye".to_string()),
            description: Some("Follow-up after treatment".to_string()),
            subject: Some("Retina".to_string()),
            comment: Some("Checked".to_string()),
            person: Some("Jane Roe".to_string()),
            x_center: Some(0.5),
            y_center: Some(0.25),
            zoom_factor: Some(1.25),
            brightness: Some(-0.1),
            color_temperature: Some(5600),
            overlay_color: Some(-16777216),
            right_left: Some(RightLeft::Left),
            flags: Some(3),
            organize_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            orientation: Orientation::Rotate90,
            ..Default::default()
        }
    }

    // ── validate_jpeg ────────────────────────────────────────────────

    #[test]
    fn validate_accepts_jpeg() {
        let dir = TempDir::new().unwrap();
        validate_jpeg(&jpeg_fixture(dir.path(), "eye.jpg")).unwrap();
        validate_jpeg(&jpeg_fixture(dir.path(), "EYE.JPEG")).unwrap();
    }

    #[test]
    fn validate_rejects_png_content() {
        let dir = TempDir::new().unwrap();
        let path = png_fixture(dir.path(), "fake.jpg");
        match validate_jpeg(&path) {
            Err(MetadataError::NotJpeg { reason, .. }) => {
                assert_eq!(reason, NotJpegReason::MimeType("image/png".to_string()));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_extension() {
        let dir = TempDir::new().unwrap();
        let jpg = jpeg_fixture(dir.path(), "eye.jpg");
        let txt = dir.path().join("eye.txt");
        fs::copy(&jpg, &txt).unwrap();
        match validate_jpeg(&txt) {
            Err(MetadataError::NotJpeg { reason, .. }) => {
                assert_eq!(reason, NotJpegReason::Extension("txt".to_string()));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let bare = dir.path().join("eye");
        fs::copy(&jpg, &bare).unwrap();
        assert!(matches!(
            validate_jpeg(&bare),
            Err(MetadataError::NotJpeg {
                reason: NotJpegReason::MissingExtension,
                ..
            })
        ));
    }

    #[test]
    fn validate_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = validate_jpeg(&dir.path().join("gone.jpg")).unwrap_err();
        assert!(matches!(err, MetadataError::Io { .. }));
    }

    // ── read_metadata / write_metadata ───────────────────────────────

    #[test]
    fn plain_jpeg_reads_empty_record() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let record = read_metadata(&path, &Config::default()).unwrap();
        assert_eq!(record, MetadataRecord::default());
    }

    #[test]
    fn no_changes_policy_leaves_file_identical() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let before = fs::read(&path).unwrap();

        let report =
            write_metadata(&path, &sample_record(), &config(WritePolicy::NoChanges)).unwrap();

        assert!(report.is_noop());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn xml_only_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let config = config(WritePolicy::XmlOnly);
        let record = sample_record();

        let report = write_metadata(&path, &record, &config).unwrap();
        assert!(report.xmp.is_some());
        assert!(report.exif.is_none());
        assert!(!temp_path(&path).exists());
        assert!(read_exif_text(&path).unwrap().is_none());

        // Orientation lives in EXIF only, which this policy never writes
        let expected = MetadataRecord {
            orientation: Orientation::Undefined,
            ..record
        };
        assert_eq!(read_metadata(&path, &config).unwrap(), expected);
        image::open(&path).unwrap();
    }

    #[test]
    fn xml_and_exif_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let config = config(WritePolicy::XmlAndExif);
        let record = sample_record();

        let report = write_metadata(&path, &record, &config).unwrap();
        assert_eq!(report.exif.map(|o| o.strategy), Some(RewriteStrategy::Lossy));
        assert_eq!(read_metadata(&path, &config).unwrap(), record);

        let exif = read_exif_text(&path).unwrap().unwrap();
        assert_eq!(exif.image_description.as_deref(), Some("Left Eye"));
        assert_eq!(exif.comment(), Some("Checked"));

        // The EXIF block now exists and is patched in place
        let mut changed = record.clone();
        changed.title = Some("Right Eye".to_string());
        let report = write_metadata(&path, &changed, &config).unwrap();
        assert_eq!(
            report.exif.map(|o| o.strategy),
            Some(RewriteStrategy::Lossless)
        );
        assert_eq!(read_metadata(&path, &config).unwrap(), changed);
        image::open(&path).unwrap();
    }

    #[test]
    fn quoted_title_survives_exif() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let config = config(WritePolicy::XmlAndExif);

        for (title, strategy) in [
            ("He said \"hi\"", RewriteStrategy::Lossy),
            ("\"Left\" eye", RewriteStrategy::Lossless),
        ] {
            let record = MetadataRecord {
                title: Some(title.to_string()),
                ..Default::default()
            };
            let report = write_metadata(&path, &record, &config).unwrap();
            assert_eq!(report.exif.map(|o| o.strategy), Some(strategy));
            assert_eq!(read_metadata(&path, &config).unwrap(), record);
        }
    }

    #[test]
    fn exif_failure_keeps_stored_xmp() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let config = config(WritePolicy::XmlAndExif);

        // Fits the XMP segment, but not the EXIF segment once stored as
        // ImageDescription plus a UTF-16 XPTitle
        let record = MetadataRecord {
            title: Some("x".repeat(25_000)),
            zoom_factor: Some(1.5),
            ..Default::default()
        };
        let err = write_metadata(&path, &record, &config).unwrap_err();
        match err {
            MetadataError::ExifStorage(inner) => {
                assert!(matches!(*inner, MetadataError::Unreadable { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!temp_path(&path).exists());

        assert!(read_exif_text(&path).unwrap().is_none());
        let xml = read_xmp_packet(&path).unwrap().unwrap();
        let packet = XmpPacket::parse(&xml).unwrap();
        assert_eq!(packet.get(XmpItem::Title), record.title);
        assert_eq!(read_metadata(&path, &config).unwrap(), record);
    }

    #[test]
    fn failed_rename_reports_temp_and_target() {
        let dir = TempDir::new().unwrap();
        let source = jpeg_fixture(dir.path(), "eye.jpg");
        let before = fs::read(&source).unwrap();

        // A non-empty directory named like a JPEG cannot be replaced by a file
        let target = dir.path().join("album.jpg");
        fs::create_dir(&target).unwrap();
        fs::copy(&source, target.join("keep.jpg")).unwrap();

        let editor = ScriptedCopy { source: &source };
        let err = rewrite_segment(&target, &editor).unwrap_err();
        match err {
            MetadataError::WriteFailed { temp, target: failed, .. } => {
                assert_eq!(temp, temp_path(&target));
                assert_eq!(failed, target);
                assert!(temp.exists());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(target.is_dir());
        assert_eq!(fs::read(target.join("keep.jpg")).unwrap(), before);
    }

    /// Returns the bytes of another file, whatever path it is asked for.
    struct ScriptedCopy<'a> {
        source: &'a Path,
    }

    impl SegmentEditor for ScriptedCopy<'_> {
        fn kind(&self) -> SegmentKind {
            SegmentKind::Xmp
        }

        fn rewrite(&self, _source: &Path, _strategy: RewriteStrategy) -> Result<Vec<u8>> {
            Ok(fs::read(self.source).unwrap())
        }
    }

    #[test]
    fn read_write_read_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let config = config(WritePolicy::XmlAndExif);
        write_metadata(&path, &sample_record(), &config).unwrap();

        let first = read_metadata(&path, &config).unwrap();
        write_metadata(&path, &first, &config).unwrap();
        assert_eq!(read_metadata(&path, &config).unwrap(), first);
    }

    #[test]
    fn policy_decides_between_exif_and_xml() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");

        let exif_record = MetadataRecord {
            title: Some("Left Eye".to_string()),
            ..Default::default()
        };
        write_metadata(&path, &exif_record, &config(WritePolicy::XmlAndExif)).unwrap();

        let xml_record = MetadataRecord {
            title: Some("Old Title".to_string()),
            ..Default::default()
        };
        write_metadata(&path, &xml_record, &config(WritePolicy::XmlOnly)).unwrap();

        let authoritative = read_metadata(&path, &config(WritePolicy::XmlAndExif)).unwrap();
        assert_eq!(authoritative.title.as_deref(), Some("Left Eye"));

        let gap_fill = read_metadata(&path, &config(WritePolicy::XmlOnly)).unwrap();
        assert_eq!(gap_fill.title.as_deref(), Some("Old Title"));
    }

    #[test]
    fn write_keeps_foreign_xmp_properties() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let config = config(WritePolicy::XmlOnly);
        write_metadata(&path, &sample_record(), &config).unwrap();

        let xml = read_xmp_packet(&path).unwrap().unwrap();
        let tagged = xml.replacen(
            "<rdf:Description",
            "<rdf:Description xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\" xmp:Rating=\"4\"",
            1,
        );
        let mut jpeg = crate::jpeg::load_jpeg(&path).unwrap();
        crate::jpeg::set_xmp_text(&mut jpeg, &tagged).unwrap();
        fs::write(&path, crate::jpeg::encode_jpeg(jpeg)).unwrap();

        let mut record = read_metadata(&path, &config).unwrap();
        record.comment = None;
        write_metadata(&path, &record, &config).unwrap();

        let xml = read_xmp_packet(&path).unwrap().unwrap();
        assert!(xml.contains("xmp:Rating=\"4\""));
        let packet = XmpPacket::parse(&xml).unwrap();
        assert!(packet.get(XmpItem::Comment).is_none());
        assert_eq!(packet.get(XmpItem::ZoomFactor).as_deref(), Some("1.25"));
    }

    #[test]
    fn broken_xmp_does_not_hide_exif() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        let exif_record = MetadataRecord {
            title: Some("Left Eye".to_string()),
            ..Default::default()
        };
        write_metadata(&path, &exif_record, &config(WritePolicy::XmlAndExif)).unwrap();

        let mut jpeg = crate::jpeg::load_jpeg(&path).unwrap();
        crate::jpeg::set_xmp_text(&mut jpeg, "<x:xmpmeta><broken></x:xmpmeta>").unwrap();
        fs::write(&path, crate::jpeg::encode_jpeg(jpeg)).unwrap();

        let record = read_metadata(&path, &config(WritePolicy::XmlOnly)).unwrap();
        assert_eq!(record.title.as_deref(), Some("Left Eye"));
    }

    #[test]
    fn write_rejects_non_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = png_fixture(dir.path(), "fake.jpg");
        let before = fs::read(&path).unwrap();

        let err = write_metadata(&path, &sample_record(), &config(WritePolicy::XmlOnly))
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotJpeg { .. }));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn exif_date_of_plain_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = jpeg_fixture(dir.path(), "eye.jpg");
        assert!(exif_date(&path).unwrap().is_none());
    }

    // ── collect_images ───────────────────────────────────────────────

    #[test]
    fn collect_images_single_file() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("test.jpg");
        fs::write(&jpg, b"fake").unwrap();

        let images = collect_images(&[jpg.clone()]);
        assert_eq!(images, vec![jpg]);
    }

    #[test]
    fn collect_images_skips_unsupported() {
        let dir = TempDir::new().unwrap();
        let png = dir.path().join("scan.png");
        fs::write(&png, b"fake").unwrap();

        assert!(collect_images(&[png]).is_empty());
    }

    #[test]
    fn collect_images_directory_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        fs::write(dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(sub.join("b.JPEG"), b"fake").unwrap();
        fs::write(sub.join("c.txt"), b"fake").unwrap();

        let images = collect_images(&[dir.path().to_path_buf()]);
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn collect_images_nonexistent_path() {
        let images = collect_images(&[PathBuf::from("/nonexistent/path")]);
        assert!(images.is_empty());
    }
}
