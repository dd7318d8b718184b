//! The resolved, in-memory metadata of one eye photo.
//!
//! Numbers are stored semantically here but persisted as strings in the XMP
//! packet. [`MetadataRecord::item_string`] produces the canonical string form
//! and [`MetadataRecord::set_item_string`] parses it back; the two are exact
//! inverses for every value the application produces (floats use Rust's
//! shortest round-trip formatting, so `1.25` is stored as `"1.25"`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::xmp::XmpItem;

/// Date format used for the organize date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// EXIF orientation codes, plus a distinct `Undefined` for "no information".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Undefined,
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map a raw EXIF orientation value. Anything outside 1..=8 is `Undefined`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Normal,
            2 => Self::FlipHorizontal,
            3 => Self::Rotate180,
            4 => Self::FlipVertical,
            5 => Self::Transpose,
            6 => Self::Rotate90,
            7 => Self::Transverse,
            8 => Self::Rotate270,
            _ => Self::Undefined,
        }
    }

    /// The EXIF code, or `None` for `Undefined`.
    pub fn code(self) -> Option<u16> {
        match self {
            Self::Undefined => None,
            Self::Normal => Some(1),
            Self::FlipHorizontal => Some(2),
            Self::Rotate180 => Some(3),
            Self::FlipVertical => Some(4),
            Self::Transpose => Some(5),
            Self::Rotate90 => Some(6),
            Self::Transverse => Some(7),
            Self::Rotate270 => Some(8),
        }
    }
}

/// Which eye a photo shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RightLeft {
    Right,
    Left,
}

impl RightLeft {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Right => "R",
            Self::Left => "L",
        }
    }
}

impl FromStr for RightLeft {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R" | "RIGHT" => Ok(Self::Right),
            "L" | "LEFT" => Ok(Self::Left),
            other => Err(format!("unknown eye side '{other}'")),
        }
    }
}

/// Metadata of one photo after precedence resolution.
///
/// A record is built fresh by every read, edited by the caller, and handed
/// back to a write. Nothing is cached between calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub comment: Option<String>,
    pub person: Option<String>,

    pub x_center: Option<f32>,
    pub y_center: Option<f32>,
    pub overlay_scale_factor: Option<f32>,
    pub x_position: Option<f32>,
    pub y_position: Option<f32>,
    pub zoom_factor: Option<f32>,
    pub pupil_size: Option<f32>,
    pub pupil_x_offset: Option<f32>,
    pub pupil_y_offset: Option<f32>,

    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub color_temperature: Option<i32>,
    pub overlay_color: Option<i32>,

    pub right_left: Option<RightLeft>,
    pub flags: Option<i32>,
    pub organize_date: Option<NaiveDate>,

    /// Always taken from the binary EXIF block, never from XMP.
    #[serde(default)]
    pub orientation: Orientation,
}

impl MetadataRecord {
    /// Canonical string form of the field stored under `item`.
    pub fn item_string(&self, item: XmpItem) -> Option<String> {
        match item {
            XmpItem::Title => self.title.clone(),
            XmpItem::Description => self.description.clone(),
            XmpItem::Subject => self.subject.clone(),
            XmpItem::Comment => self.comment.clone(),
            XmpItem::Person => self.person.clone(),
            XmpItem::XCenter => self.x_center.map(format_float),
            XmpItem::YCenter => self.y_center.map(format_float),
            XmpItem::OverlayScaleFactor => self.overlay_scale_factor.map(format_float),
            XmpItem::XPosition => self.x_position.map(format_float),
            XmpItem::YPosition => self.y_position.map(format_float),
            XmpItem::ZoomFactor => self.zoom_factor.map(format_float),
            XmpItem::OrganizeDate => self
                .organize_date
                .map(|d| d.format(DATE_FORMAT).to_string()),
            XmpItem::RightLeft => self.right_left.map(|rl| rl.as_str().to_string()),
            XmpItem::Brightness => self.brightness.map(format_float),
            XmpItem::Contrast => self.contrast.map(format_float),
            XmpItem::Saturation => self.saturation.map(format_float),
            XmpItem::ColorTemperature => self.color_temperature.map(|v| v.to_string()),
            XmpItem::OverlayColor => self.overlay_color.map(|v| v.to_string()),
            XmpItem::PupilSize => self.pupil_size.map(format_float),
            XmpItem::PupilXOffset => self.pupil_x_offset.map(format_float),
            XmpItem::PupilYOffset => self.pupil_y_offset.map(format_float),
            XmpItem::Flags => self.flags.map(|v| v.to_string()),
        }
    }

    /// Set the field stored under `item` from its string form.
    ///
    /// Empty strings clear the field. Values that do not parse are logged
    /// and also clear the field.
    pub fn set_item_string(&mut self, item: XmpItem, value: Option<&str>) {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match item {
            XmpItem::Title => self.title = value.map(String::from),
            XmpItem::Description => self.description = value.map(String::from),
            XmpItem::Subject => self.subject = value.map(String::from),
            XmpItem::Comment => self.comment = value.map(String::from),
            XmpItem::Person => self.person = value.map(String::from),
            XmpItem::XCenter => self.x_center = parse_item(item, value),
            XmpItem::YCenter => self.y_center = parse_item(item, value),
            XmpItem::OverlayScaleFactor => self.overlay_scale_factor = parse_item(item, value),
            XmpItem::XPosition => self.x_position = parse_item(item, value),
            XmpItem::YPosition => self.y_position = parse_item(item, value),
            XmpItem::ZoomFactor => self.zoom_factor = parse_item(item, value),
            XmpItem::OrganizeDate => self.organize_date = parse_date(value),
            XmpItem::RightLeft => self.right_left = parse_item(item, value),
            XmpItem::Brightness => self.brightness = parse_item(item, value),
            XmpItem::Contrast => self.contrast = parse_item(item, value),
            XmpItem::Saturation => self.saturation = parse_item(item, value),
            XmpItem::ColorTemperature => self.color_temperature = parse_item(item, value),
            XmpItem::OverlayColor => self.overlay_color = parse_item(item, value),
            XmpItem::PupilSize => self.pupil_size = parse_item(item, value),
            XmpItem::PupilXOffset => self.pupil_x_offset = parse_item(item, value),
            XmpItem::PupilYOffset => self.pupil_y_offset = parse_item(item, value),
            XmpItem::Flags => self.flags = parse_item(item, value),
        }
    }

    pub fn has_flag(&self, flag: i32) -> bool {
        self.flags.is_some_and(|f| f & flag != 0)
    }

    pub fn set_flag(&mut self, flag: i32) {
        self.flags = Some(self.flags.unwrap_or(0) | flag);
    }

    /// Clear a flag. The field becomes absent once no flag is left.
    pub fn clear_flag(&mut self, flag: i32) {
        self.flags = self.flags.map(|f| f & !flag).filter(|f| *f != 0);
    }
}

fn format_float(value: f32) -> String {
    value.to_string()
}

fn parse_item<T: FromStr>(item: XmpItem, value: Option<&str>) -> Option<T> {
    let value = value?;
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring unparsable {} value '{value}'", item.name());
            None
        }
    }
}

/// Parse a stored date. Full timestamps are accepted; only the date part is kept.
pub(crate) fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?;
    let date_part = value.get(..10).unwrap_or(value);
    match NaiveDate::parse_from_str(date_part, DATE_FORMAT) {
        Ok(d) => Some(d),
        Err(e) => {
            log::warn!("Ignoring unparsable date '{value}': {e}");
            None
        }
    }
}
