//! Crash-safe replacement of one metadata segment.
//!
//! The new file is written next to the original as `<name>.tmp`, flushed to
//! disk and renamed over the original. Readers therefore see either the old
//! or the new file, never a partial one.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{MetadataError, Result};

/// Temp files that stay empty are rewritten at most this many times.
pub const MAX_WRITE_ATTEMPTS: u32 = 2;

/// Which metadata segment an editor replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Xmp,
    Exif,
}

impl SegmentKind {
    /// Strategies to try, in order.
    pub fn strategies(self) -> &'static [RewriteStrategy] {
        match self {
            Self::Xmp => &[RewriteStrategy::Lossless],
            Self::Exif => &[RewriteStrategy::Lossless, RewriteStrategy::Lossy],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// Keep every unrelated byte of the segment.
    Lossless,
    /// Rebuild the segment from what can be parsed.
    Lossy,
}

/// Produces a complete new file with one segment replaced.
pub trait SegmentEditor {
    fn kind(&self) -> SegmentKind;

    /// Build the whole new file content from `source` using `strategy`.
    fn rewrite(&self, source: &Path, strategy: RewriteStrategy) -> Result<Vec<u8>>;
}

/// How a successful rewrite went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub attempts: u32,
    pub strategy: RewriteStrategy,
}

/// The temp path used while rewriting `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.tmp"))
}

/// Replace the segment handled by `editor` in the file at `path`.
pub fn rewrite_segment(path: &Path, editor: &dyn SegmentEditor) -> Result<RewriteOutcome> {
    let temp = temp_path(path);
    discard_stale_temp(&temp);

    let mut attempts = 0;
    let strategy = loop {
        attempts += 1;
        let strategy = write_temp(path, &temp, editor)?;

        let written = fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
        if written > 0 {
            break strategy;
        }
        if attempts >= MAX_WRITE_ATTEMPTS {
            log::error!(
                "Temp file {} still empty after {attempts} attempts",
                temp.display()
            );
            discard_stale_temp(&temp);
            return Err(MetadataError::EmptyOutput(temp));
        }
        log::warn!("Temp file {} is empty - retrying", temp.display());
    };

    fs::rename(&temp, path).map_err(|source| MetadataError::WriteFailed {
        temp: temp.clone(),
        target: path.to_path_buf(),
        source,
    })?;

    log::debug!(
        "Stored {:?} segment of {} ({strategy:?}, attempt {attempts})",
        editor.kind(),
        path.display()
    );
    Ok(RewriteOutcome { attempts, strategy })
}

fn discard_stale_temp(temp: &Path) {
    if !temp.exists() {
        return;
    }
    if let Err(e) = fs::remove_file(temp) {
        log::warn!("Could not delete temp file {}: {e}", temp.display());
    }
}

/// Try each strategy of the editor until one produces content, and write it
/// to the temp file.
fn write_temp(path: &Path, temp: &Path, editor: &dyn SegmentEditor) -> Result<RewriteStrategy> {
    let strategies = editor.kind().strategies();
    let mut last_error = None;

    for (i, &strategy) in strategies.iter().enumerate() {
        match editor.rewrite(path, strategy) {
            Ok(bytes) => {
                write_file(temp, path, &bytes)?;
                return Ok(strategy);
            }
            Err(e) => {
                if let Some(next) = strategies.get(i + 1) {
                    log::warn!(
                        "{strategy:?} rewrite of {} failed, trying {next:?}: {e}",
                        path.display()
                    );
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| MetadataError::unreadable(path, "no rewrite strategy available")))
}

fn write_file(temp: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let to_error = |source: std::io::Error| MetadataError::WriteFailed {
        temp: temp.to_path_buf(),
        target: target.to_path_buf(),
        source,
    };

    let file = File::create(temp).map_err(to_error)?;
    let mut out = BufWriter::new(file);
    out.write_all(bytes).map_err(to_error)?;
    let file = out.into_inner().map_err(|e| to_error(e.into_error()))?;
    file.sync_all().map_err(to_error)?;
    Ok(())
}
