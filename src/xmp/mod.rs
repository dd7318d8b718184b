//! XMP metadata: the application's own field set plus the standard fields.
//!
//! - [`CustomXmlStore`]: typed access to the named properties of one packet
//! - [`XmpPacket`]: the provided store, parsed from and spliced back into
//!   the packet text so that unrelated content survives a rewrite
//! - [`segment`]: locating and replacing the XMP APP1 segment of a JPEG

mod packet;
pub mod segment;

pub use packet::XmpPacket;
pub use segment::{XmpEditor, read_xmp_packet};

use chrono::NaiveDate;

use crate::record::{DATE_FORMAT, parse_date};

/// Namespace of the application's own properties.
pub const APP_NAMESPACE: &str = "http://ns.eyephoto.app/metadata/1.0/";
pub const APP_PREFIX: &str = "ep";

/// The fixed set of application properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XmpItem {
    Title,
    Description,
    Subject,
    Comment,
    Person,
    XCenter,
    YCenter,
    OverlayScaleFactor,
    XPosition,
    YPosition,
    ZoomFactor,
    OrganizeDate,
    RightLeft,
    Brightness,
    Contrast,
    Saturation,
    ColorTemperature,
    OverlayColor,
    PupilSize,
    PupilXOffset,
    PupilYOffset,
    Flags,
}

impl XmpItem {
    pub const ALL: [XmpItem; 22] = [
        Self::Title,
        Self::Description,
        Self::Subject,
        Self::Comment,
        Self::Person,
        Self::XCenter,
        Self::YCenter,
        Self::OverlayScaleFactor,
        Self::XPosition,
        Self::YPosition,
        Self::ZoomFactor,
        Self::OrganizeDate,
        Self::RightLeft,
        Self::Brightness,
        Self::Contrast,
        Self::Saturation,
        Self::ColorTemperature,
        Self::OverlayColor,
        Self::PupilSize,
        Self::PupilXOffset,
        Self::PupilYOffset,
        Self::Flags,
    ];

    /// Local property name inside [`APP_NAMESPACE`].
    pub fn name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Subject => "subject",
            Self::Comment => "comment",
            Self::Person => "person",
            Self::XCenter => "xCenter",
            Self::YCenter => "yCenter",
            Self::OverlayScaleFactor => "overlayScaleFactor",
            Self::XPosition => "xPosition",
            Self::YPosition => "yPosition",
            Self::ZoomFactor => "zoomFactor",
            Self::OrganizeDate => "organizeDate",
            Self::RightLeft => "rightLeft",
            Self::Brightness => "brightness",
            Self::Contrast => "contrast",
            Self::Saturation => "saturation",
            Self::ColorTemperature => "colorTemperature",
            Self::OverlayColor => "overlayColor",
            Self::PupilSize => "pupilSize",
            Self::PupilXOffset => "pupilXOffset",
            Self::PupilYOffset => "pupilYOffset",
            Self::Flags => "flags",
        }
    }

    pub(crate) fn qualified_name(self) -> String {
        format!("{APP_PREFIX}:{}", self.name())
    }
}

/// How a standard property is laid out in RDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropertyForm {
    Simple,
    /// `rdf:Alt` with an `x-default` entry.
    LangAlt,
    /// `rdf:Bag`, one `rdf:li` per `"; "`-separated entry.
    Bag,
}

/// Standard XMP fields shared with other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardField {
    DcTitle,
    DcDescription,
    DcSubject,
    UserComment,
    /// Vendor (Microsoft Photo) person name.
    Person,
}

impl StandardField {
    pub const ALL: [StandardField; 5] = [
        Self::DcTitle,
        Self::DcDescription,
        Self::DcSubject,
        Self::UserComment,
        Self::Person,
    ];

    pub(crate) fn qualified_name(self) -> &'static str {
        match self {
            Self::DcTitle => "dc:title",
            Self::DcDescription => "dc:description",
            Self::DcSubject => "dc:subject",
            Self::UserComment => "exif:UserComment",
            Self::Person => "MP:PersonDisplayName",
        }
    }

    pub(crate) fn form(self) -> PropertyForm {
        match self {
            Self::DcTitle | Self::DcDescription | Self::UserComment => PropertyForm::LangAlt,
            Self::DcSubject => PropertyForm::Bag,
            Self::Person => PropertyForm::Simple,
        }
    }
}

/// Namespace URI for each prefix this crate writes.
pub(crate) fn namespace_uri(prefix: &str) -> Option<&'static str> {
    match prefix {
        APP_PREFIX => Some(APP_NAMESPACE),
        "dc" => Some("http://purl.org/dc/elements/1.1/"),
        "exif" => Some("http://ns.adobe.com/exif/1.0/"),
        "MP" => Some("http://ns.microsoft.com/photo/1.2/"),
        _ => None,
    }
}

/// Typed access to the application and standard properties of an XMP packet.
///
/// Absent and empty values are both reported as `None`; setting `None`
/// removes the property.
pub trait CustomXmlStore {
    fn get(&self, item: XmpItem) -> Option<String>;
    fn set(&mut self, item: XmpItem, value: Option<&str>);

    fn standard(&self, field: StandardField) -> Option<String>;
    fn set_standard(&mut self, field: StandardField, value: Option<&str>);

    /// Render the packet as XML text.
    fn serialize(&self) -> String;

    fn get_date(&self, item: XmpItem) -> Option<NaiveDate> {
        parse_date(self.get(item).as_deref())
    }

    fn set_date(&mut self, item: XmpItem, value: Option<NaiveDate>) {
        let text = value.map(|d| d.format(DATE_FORMAT).to_string());
        self.set(item, text.as_deref());
    }

    fn get_int(&self, item: XmpItem) -> Option<i32> {
        let text = self.get(item)?;
        match text.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Ignoring non-integer {} value '{text}'", item.name());
                None
            }
        }
    }

    fn set_int(&mut self, item: XmpItem, value: Option<i32>) {
        let text = value.map(|v| v.to_string());
        self.set(item, text.as_deref());
    }
}
