//! # eyephoto-meta
//!
//! Metadata storage for eye photos kept as JPEG files. Each photo carries a
//! fixed set of application fields (eye side, overlay geometry, image
//! adjustments, organize date, flags) in its own XMP namespace, next to the
//! standard title, description, subject and comment fields that other photo
//! tools understand.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eyephoto_meta::config::{Config, WritePolicy};
//! use eyephoto_meta::pipeline::{read_metadata, write_metadata};
//! use eyephoto_meta::record::RightLeft;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config {
//!         write_policy: WritePolicy::XmlAndExif,
//!         ..Default::default()
//!     };
//!     let path = "eye.jpg".as_ref();
//!
//!     let mut record = read_metadata(path, &config)?;
//!     record.right_left = Some(RightLeft::Left);
//!     record.zoom_factor = Some(1.25);
//!
//!     let report = write_metadata(path, &record, &config)?;
//!     println!("XMP stored: {}", report.xmp.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Write Policies
//!
//! | Policy | XMP | EXIF | Precedence on read |
//! |--------|-----|------|--------------------|
//! | `NoChanges` | untouched | untouched | XMP first, EXIF fills gaps |
//! | `XmlOnly` | rewritten | untouched | XMP first, EXIF fills gaps |
//! | `XmlAndExif` | rewritten | rewritten | EXIF first |
//!
//! Every rewrite goes through a temp file that is renamed over the original.
//!
//! ## Modules
//!
//! - [`config`]: Write policy and configuration loading/saving
//! - [`error`]: Error type shared by all operations
//! - [`exif`]: Binary EXIF reading and writing
//! - [`merge`]: Precedence rules between XMP and EXIF
//! - [`pipeline`]: JPEG validation and the read/write entry points
//! - [`record`]: The resolved metadata record
//! - [`rewrite`]: Temp-file based segment replacement
//! - [`xmp`]: XMP packet access and the application namespace

pub mod config;
pub mod error;
pub mod exif;
mod jpeg;
pub mod merge;
pub mod pipeline;
pub mod record;
pub mod rewrite;
#[cfg(test)]
mod test_util;
pub mod xmp;
