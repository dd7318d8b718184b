use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeMap, BTreeSet};

use super::{CustomXmlStore, PropertyForm, StandardField, XmpItem, namespace_uri};

const DESCRIPTION_OPEN: &str = "<rdf:Description";
const DESCRIPTION_CLOSE: &str = "</rdf:Description>";
const X_DEFAULT: &str = "x-default";

/// An XMP packet with typed access to the properties this crate knows about.
///
/// Reading goes through a real XML parser. Writing splices only the changed
/// properties into the original packet text, so everything else other tools
/// stored in the packet survives a rewrite untouched.
#[derive(Debug, Clone, Default)]
pub struct XmpPacket {
    source: Option<String>,
    /// Current value per qualified property name (e.g. `dc:title`).
    values: BTreeMap<String, String>,
    /// Properties changed since parsing, with the layout they are written in.
    changed: BTreeMap<String, PropertyForm>,
}

/// A property element being collected while parsing.
struct OpenProperty {
    name: String,
    depth: usize,
    text: String,
    items: Vec<String>,
    current_item: Option<String>,
    current_lang: Option<String>,
    /// The `x-default` entry of a language alternative.
    default_item: Option<String>,
    alternative: bool,
}

impl OpenProperty {
    fn finish(self) -> Option<String> {
        let value = if self.items.is_empty() {
            self.text.trim().to_string()
        } else if self.alternative {
            self.default_item
                .filter(|i| !i.is_empty())
                .or_else(|| self.items.into_iter().find(|i| !i.is_empty()))
                .unwrap_or_default()
        } else {
            self.items.join("; ")
        };
        if value.is_empty() { None } else { Some(value) }
    }
}

impl XmpPacket {
    /// An empty packet; serializing it produces a fresh XMP skeleton.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse packet text. Both element and attribute forms of simple
    /// properties are understood.
    pub fn parse(xml: &str) -> Result<Self, quick_xml::Error> {
        let xml = xml.trim_end_matches(['\0', ' ', '\n', '\r', '\t']);
        if xml.trim().is_empty() {
            return Ok(Self::new());
        }

        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut values = BTreeMap::new();
        let mut stack: Vec<String> = Vec::new();
        let mut open: Option<OpenProperty> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => {
                    let name = element_name(e);
                    if let Some(prop) = open.as_mut() {
                        match name.as_str() {
                            "rdf:Alt" => prop.alternative = true,
                            "rdf:li" => {
                                prop.current_item = Some(String::new());
                                prop.current_lang = language_of(e)?;
                            }
                            _ => {}
                        }
                    } else if name == "rdf:Description" {
                        read_description_attributes(e, &mut values)?;
                    } else if stack.last().is_some_and(|p| p == "rdf:Description") {
                        open = Some(OpenProperty {
                            name: name.clone(),
                            depth: stack.len(),
                            text: String::new(),
                            items: Vec::new(),
                            current_item: None,
                            current_lang: None,
                            default_item: None,
                            alternative: false,
                        });
                    }
                    stack.push(name);
                }
                Event::Empty(ref e) => {
                    if open.is_none() && element_name(e) == "rdf:Description" {
                        read_description_attributes(e, &mut values)?;
                    }
                }
                Event::Text(ref t) => {
                    if let Some(prop) = open.as_mut() {
                        let text = t.unescape()?;
                        match prop.current_item.as_mut() {
                            Some(item) => item.push_str(&text),
                            None => prop.text.push_str(&text),
                        }
                    }
                }
                Event::End(_) => {
                    let name = stack.pop().unwrap_or_default();
                    if let Some(prop) = open.as_mut() {
                        if name == "rdf:li" {
                            if let Some(item) = prop.current_item.take() {
                                let item = item.trim().to_string();
                                if prop.current_lang.take().as_deref() == Some(X_DEFAULT)
                                    && prop.default_item.is_none()
                                {
                                    prop.default_item = Some(item.clone());
                                }
                                prop.items.push(item);
                            }
                        } else if stack.len() == prop.depth {
                            if let Some(prop) = open.take() {
                                let key = prop.name.clone();
                                if let Some(value) = prop.finish() {
                                    values.insert(key, value);
                                }
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        log::debug!("Parsed XMP packet with {} known properties", values.len());
        Ok(Self {
            source: Some(xml.to_string()),
            values,
            changed: BTreeMap::new(),
        })
    }

    /// The packet text this instance was parsed from, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Value of any property by qualified name, e.g. `xmp:CreatorTool`.
    pub fn property(&self, qualified_name: &str) -> Option<&str> {
        self.values.get(qualified_name).map(String::as_str)
    }

    fn set_property(&mut self, name: String, form: PropertyForm, value: Option<&str>) {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => {
                self.values.insert(name.clone(), v.to_string());
            }
            None => {
                self.values.remove(&name);
            }
        }
        self.changed.insert(name, form);
    }
}

impl CustomXmlStore for XmpPacket {
    fn get(&self, item: XmpItem) -> Option<String> {
        self.values.get(&item.qualified_name()).cloned()
    }

    fn set(&mut self, item: XmpItem, value: Option<&str>) {
        self.set_property(item.qualified_name(), PropertyForm::Simple, value);
    }

    fn standard(&self, field: StandardField) -> Option<String> {
        self.values.get(field.qualified_name()).cloned()
    }

    fn set_standard(&mut self, field: StandardField, value: Option<&str>) {
        self.set_property(field.qualified_name().to_string(), field.form(), value);
    }

    fn serialize(&self) -> String {
        let mut xml = self.source.clone().unwrap_or_else(empty_packet);

        for name in self.changed.keys() {
            remove_property(&mut xml, name);
        }
        ensure_open_description(&mut xml);

        let mut new_elements = String::new();
        let mut prefixes = BTreeSet::new();
        for (name, form) in &self.changed {
            if let Some(value) = self.values.get(name) {
                new_elements.push_str(&render_property(name, *form, value));
                if let Some((prefix, _)) = name.split_once(':') {
                    prefixes.insert(prefix);
                }
            }
        }

        for prefix in prefixes {
            ensure_namespace(&mut xml, prefix);
        }

        if let Some(pos) = xml.find(DESCRIPTION_CLOSE) {
            xml.insert_str(pos, &new_elements);
        }
        xml
    }
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// The `xml:lang` attribute of an element.
fn language_of(e: &BytesStart) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"xml:lang" {
            return Ok(Some(attr.unescape_value()?.trim().to_string()));
        }
    }
    Ok(None)
}

fn read_description_attributes(
    e: &BytesStart,
    values: &mut BTreeMap<String, String>,
) -> Result<(), quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key.starts_with("xmlns") || key == "rdf:about" || key == "xml:lang" {
            continue;
        }
        let value = attr.unescape_value()?.trim().to_string();
        if !value.is_empty() {
            values.insert(key, value);
        }
    }
    Ok(())
}

fn empty_packet() -> String {
    let mut xmp = String::new();
    xmp.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xmp.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");
    xmp.push_str("<rdf:Description rdf:about=\"\">\n");
    xmp.push_str("</rdf:Description>\n");
    xmp.push_str("</rdf:RDF>\n");
    xmp.push_str("</x:xmpmeta>\n");
    xmp.push_str("<?xpacket end=\"w\"?>");
    xmp
}

fn render_property(name: &str, form: PropertyForm, value: &str) -> String {
    match form {
        PropertyForm::Simple => format!("  <{name}>{}</{name}>\n", xml_escape(value)),
        PropertyForm::LangAlt => format!(
            "  <{name}><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></{name}>\n",
            xml_escape(value)
        ),
        PropertyForm::Bag => {
            let mut out = format!("  <{name}><rdf:Bag>\n");
            for entry in value.split("; ") {
                out.push_str(&format!("    <rdf:li>{}</rdf:li>\n", xml_escape(entry)));
            }
            out.push_str(&format!("  </rdf:Bag></{name}>\n"));
            out
        }
    }
}

/// Make sure the first `rdf:Description` has a separate closing tag.
fn ensure_open_description(xml: &mut String) {
    if xml.contains(DESCRIPTION_CLOSE) {
        return;
    }

    if let Some(desc_start) = xml.find(DESCRIPTION_OPEN) {
        if let Some(close_pos) = xml[desc_start..].find("/>") {
            let abs_close = desc_start + close_pos;
            xml.replace_range(abs_close..abs_close + 2, ">\n</rdf:Description>");
            return;
        }
    }

    if let Some(rdf_end) = xml.find("</rdf:RDF>") {
        xml.insert_str(rdf_end, "<rdf:Description rdf:about=\"\">\n</rdf:Description>\n");
        return;
    }

    log::warn!("XMP packet has no RDF body, replacing it with a fresh packet");
    *xml = empty_packet();
}

/// Declare `prefix` on the first `rdf:Description` unless it already is.
fn ensure_namespace(xml: &mut String, prefix: &str) {
    let Some(uri) = namespace_uri(prefix) else {
        return;
    };
    let Some(desc_start) = xml.find(DESCRIPTION_OPEN) else {
        return;
    };
    let tag_end = xml[desc_start..]
        .find('>')
        .map(|p| desc_start + p)
        .unwrap_or(xml.len());
    if xml[desc_start..tag_end].contains(&format!("xmlns:{prefix}=")) {
        return;
    }
    let insert_at = desc_start + DESCRIPTION_OPEN.len();
    xml.insert_str(insert_at, &format!("\n  xmlns:{prefix}=\"{uri}\""));
}

/// Remove every element and attribute occurrence of a property.
fn remove_property(xml: &mut String, name: &str) {
    while remove_xml_element(xml, name) {}
    while remove_xml_attribute(xml, name) {}
}

/// Find `<name` followed by a tag delimiter, so `dc:title` does not match `dc:titles`.
fn find_open_tag(xml: &str, name: &str) -> Option<usize> {
    let open = format!("<{name}");
    let mut from = 0;
    while let Some(rel) = xml[from..].find(&open) {
        let start = from + rel;
        let next = xml[start + open.len()..].chars().next();
        if matches!(next, Some('>' | '/' | ' ' | '\t' | '\r' | '\n')) {
            return Some(start);
        }
        from = start + open.len();
    }
    None
}

/// Remove one element and its contents. Returns whether anything was removed.
fn remove_xml_element(xml: &mut String, tag: &str) -> bool {
    let Some(start) = find_open_tag(xml, tag) else {
        return false;
    };
    let Some(tag_end) = xml[start..].find('>').map(|p| start + p) else {
        return false;
    };

    let end = if xml[..tag_end].ends_with('/') {
        tag_end + 1
    } else {
        let close = format!("</{tag}>");
        match xml[tag_end..].find(&close) {
            Some(p) => tag_end + p + close.len(),
            None => return false,
        }
    };

    // Also take the indentation before and the newline after
    let start = xml[..start].trim_end_matches([' ', '\t']).len();
    let end = if xml.as_bytes().get(end) == Some(&b'\n') {
        end + 1
    } else {
        end
    };
    xml.replace_range(start..end, "");
    true
}

/// Remove one `name="..."` attribute. Returns whether anything was removed.
fn remove_xml_attribute(xml: &mut String, name: &str) -> bool {
    let pattern = format!("{name}=");
    let mut from = 0;
    while let Some(rel) = xml[from..].find(&pattern) {
        let start = from + rel;
        from = start + pattern.len();

        let preceded_by_space = xml[..start]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let Some(quote) = xml[from..].chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        if !preceded_by_space {
            continue;
        }
        let value_start = from + 1;
        let Some(value_len) = xml[value_start..].find(quote) else {
            return false;
        };
        let end = value_start + value_len + 1;
        let start = xml[..start].trim_end().len();
        xml.replace_range(start..end, "");
        return true;
    }
    false
}

/// Escape special XML characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
