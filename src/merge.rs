//! Precedence rules between the application's XMP properties, the standard
//! XMP properties and the binary EXIF fields.
//!
//! Each text field has a fixed list of sources; the first non-empty value
//! wins. Which list applies depends on the [`WritePolicy`]: when EXIF may be
//! written it is authoritative, otherwise it only fills gaps. Numeric fields
//! live only in the application's namespace.

use crate::config::WritePolicy;
use crate::exif::ExifText;
use crate::record::{MetadataRecord, Orientation};
use crate::xmp::{CustomXmlStore, StandardField, XmpItem};

/// Where a text value can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The application's own XMP property.
    Custom,
    /// The standard XMP property shared with other tools.
    Standard,
    /// The binary EXIF block.
    Exif,
}

/// EXIF fields that map onto a text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExifSource {
    /// ImageDescription.
    Title,
    /// XPComment, falling back to UserComment.
    Comment,
    /// XPSubject.
    Subject,
}

impl ExifSource {
    fn value(self, exif: &ExifText) -> Option<&str> {
        match self {
            Self::Title => exif.image_description.as_deref(),
            Self::Comment => exif.comment(),
            Self::Subject => exif.xp_subject.as_deref(),
        }
    }
}

/// The sources of one text field.
#[derive(Debug, Clone, Copy)]
pub struct TextRule {
    pub item: XmpItem,
    pub standard: StandardField,
    pub exif: Option<ExifSource>,
}

pub const TEXT_RULES: [TextRule; 5] = [
    TextRule {
        item: XmpItem::Description,
        standard: StandardField::DcDescription,
        exif: None,
    },
    TextRule {
        item: XmpItem::Subject,
        standard: StandardField::DcSubject,
        exif: Some(ExifSource::Subject),
    },
    TextRule {
        item: XmpItem::Person,
        standard: StandardField::Person,
        exif: None,
    },
    TextRule {
        item: XmpItem::Title,
        standard: StandardField::DcTitle,
        exif: Some(ExifSource::Title),
    },
    TextRule {
        item: XmpItem::Comment,
        standard: StandardField::UserComment,
        exif: Some(ExifSource::Comment),
    },
];

/// Source order for text fields under `policy`.
///
/// The trailing `Custom` repeats the first lookup for fields without an
/// EXIF counterpart, so it never changes the result; it is kept so both
/// orders have the same shape.
pub fn source_order(policy: WritePolicy) -> &'static [Source] {
    if policy.allows_exif_changes() {
        &[Source::Exif, Source::Custom, Source::Standard, Source::Custom]
    } else {
        &[Source::Custom, Source::Standard, Source::Exif, Source::Custom]
    }
}

/// Build a record from the XMP store and the EXIF fields.
pub fn merge(
    store: &dyn CustomXmlStore,
    exif: Option<&ExifText>,
    orientation: Orientation,
    policy: WritePolicy,
) -> MetadataRecord {
    let mut record = MetadataRecord::default();

    for rule in &TEXT_RULES {
        let value = source_order(policy)
            .iter()
            .find_map(|source| candidate(rule, *source, store, exif));
        record.set_item_string(rule.item, value.as_deref());
    }

    for item in XmpItem::ALL {
        if is_text_item(item) {
            continue;
        }
        match item {
            XmpItem::OrganizeDate => record.organize_date = store.get_date(item),
            XmpItem::Flags => record.flags = store.get_int(item),
            _ => record.set_item_string(item, store.get(item).as_deref()),
        }
    }

    record.orientation = orientation;
    record
}

/// Write every field of `record` into the store. Standard properties are
/// only touched when `include_standard` is set.
pub fn store_record(store: &mut dyn CustomXmlStore, record: &MetadataRecord, include_standard: bool) {
    if include_standard {
        for rule in &TEXT_RULES {
            store.set_standard(rule.standard, record.item_string(rule.item).as_deref());
        }
    }

    for item in XmpItem::ALL {
        match item {
            XmpItem::OrganizeDate => store.set_date(item, record.organize_date),
            XmpItem::Flags => store.set_int(item, record.flags),
            _ => store.set(item, record.item_string(item).as_deref()),
        }
    }
}

fn is_text_item(item: XmpItem) -> bool {
    TEXT_RULES.iter().any(|rule| rule.item == item)
}

fn candidate(
    rule: &TextRule,
    source: Source,
    store: &dyn CustomXmlStore,
    exif: Option<&ExifText>,
) -> Option<String> {
    let value = match source {
        Source::Custom => store.get(rule.item),
        Source::Standard => store.standard(rule.standard),
        Source::Exif => rule
            .exif
            .zip(exif)
            .and_then(|(field, exif)| field.value(exif).map(String::from)),
    };
    value.filter(|v| !v.trim().is_empty())
}
