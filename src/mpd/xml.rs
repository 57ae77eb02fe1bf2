//! A minimal, generic XML tree plus the small ISO 8601 duration/date-time
//! parsers the MPD reader leans on. The walker is element-generic (unlike
//! the FourCC-dispatched MP4 box walker) because MPD schema nesting is far
//! less regular than ISO-BMFF boxes.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{Code, EngineError, Result};

/// One XML element: its local name (namespace prefix stripped, e.g.
/// `cenc:pssh` -> `pssh` is NOT done here — callers match on the qualified
/// name so `cenc:default_KID` style attributes stay distinguishable),
/// attributes, child elements in document order, and concatenated text.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_named(&self, name: &str) -> Option<&XmlElement> {
        self.children_named(name).next()
    }

    pub fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

/// Parse a complete XML document into a single root [`XmlElement`].
pub fn parse_xml_tree(bytes: &[u8]) -> Result<XmlElement> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(element_from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let el = element_from_start(&e)?;
                push_child(&mut stack, &mut root, el);
            }
            Ok(Event::End(_)) => {
                if let Some(el) = stack.pop() {
                    push_child(&mut stack, &mut root, el);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = t.unescape().unwrap_or_default();
                    top.text.push_str(&decoded);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(EngineError::coded(
                    Code::DashInvalidXml,
                    format!("XML parse error: {e}"),
                ))
            }
        }
        buf.clear();
    }

    root.ok_or_else(|| EngineError::coded(Code::DashInvalidXml, "empty XML document"))
}

fn push_child(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, el: XmlElement) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
    } else {
        *root = Some(el);
    }
}

fn element_from_start(e: &quick_xml::events::BytesStart) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            EngineError::coded(Code::DashInvalidXml, format!("bad attribute: {err}"))
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .unwrap_or_default()
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(XmlElement {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Parse an ISO 8601 `PT...H...M...S` duration into seconds. Returns
/// `None` for an empty or unparsable string rather than failing the whole
/// manifest parse — callers treat a missing duration as "absent".
pub fn parse_iso8601_duration(s: &str) -> Option<f64> {
    let s = s.trim();
    if !s.starts_with('P') {
        return None;
    }
    let mut seconds = 0.0f64;
    let mut num = String::new();
    let mut in_time = false;
    for c in s[1..].chars() {
        match c {
            'T' => in_time = true,
            'Y' => {
                seconds += parse_num(&num) * 365.0 * 86400.0;
                num.clear();
            }
            'M' if !in_time => {
                seconds += parse_num(&num) * 30.0 * 86400.0;
                num.clear();
            }
            'D' => {
                seconds += parse_num(&num) * 86400.0;
                num.clear();
            }
            'H' => {
                seconds += parse_num(&num) * 3600.0;
                num.clear();
            }
            'M' if in_time => {
                seconds += parse_num(&num) * 60.0;
                num.clear();
            }
            'S' => {
                seconds += parse_num(&num);
                num.clear();
            }
            c if c.is_ascii_digit() || c == '.' => num.push(c),
            _ => {}
        }
    }
    Some(seconds)
}

fn parse_num(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

/// Parse an ISO 8601 UTC date-time (`availabilityStartTime`) into Unix
/// seconds.
pub fn parse_iso8601_datetime(s: &str) -> Option<f64> {
    chrono::DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.timestamp() as f64 + dt.timestamp_subsec_millis() as f64 / 1000.0)
}
