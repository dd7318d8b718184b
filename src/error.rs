use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a file was rejected as a JPEG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotJpegReason {
    /// The file name has no extension at all.
    MissingExtension,
    /// The extension does not map to `image/jpeg`.
    Extension(String),
    /// The sniffed content type is not `image/jpeg`.
    MimeType(String),
}

impl fmt::Display for NotJpegReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingExtension => write!(f, "no valid extension"),
            Self::Extension(ext) => write!(f, "bad extension {ext}"),
            Self::MimeType(mime) => write!(f, "bad MIME type {mime}"),
        }
    }
}

/// Errors raised while reading or writing photo metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("{path} is not a JPEG file ({reason}) - can handle metadata only for image/jpeg")]
    NotJpeg { path: PathBuf, reason: NotJpegReason },

    #[error("Metadata unreadable in {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Failed to write {target} via {temp}: {source}")]
    WriteFailed {
        temp: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rewritten file {0} stayed empty")]
    EmptyOutput(PathBuf),

    #[error("Error storing EXIF data: {0}")]
    ExifStorage(#[source] Box<MetadataError>),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetadataError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
