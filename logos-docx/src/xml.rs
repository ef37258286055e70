//! Pull-style XML reading over any `BufRead`.
//!
//! quick-xml events borrow the reader's buffer; [`XmlCursor`] hands out owned
//! events instead so the parser can hold them across calls without fighting
//! the borrow checker. Namespace prefixes are kept verbatim (`w:p`).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

use crate::error::{DocxError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmlEvent {
    Start { name: String, attrs: Vec<(String, String)> },
    Empty { name: String, attrs: Vec<(String, String)> },
    End { name: String },
    Text(String),
    Eof,
}

pub(crate) struct XmlCursor<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    part: String,
    /// Currently open elements.
    depth: usize,
}

impl<R: BufRead> XmlCursor<R> {
    pub fn new(inner: R, part: &str) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::with_capacity(1024),
            part: part.to_string(),
            depth: 0,
        }
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Next element-level event. Declarations, comments and processing
    /// instructions are skipped. End of input inside an open element is a
    /// [`DocxError::TruncatedStream`].
    pub fn next_event(&mut self) -> Result<XmlEvent> {
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| DocxError::from_xml(&self.part, e))?;
            let owned = match event {
                Event::Start(e) => {
                    self.depth += 1;
                    XmlEvent::Start { name: element_name(&e), attrs: attributes(&e, &self.part)? }
                }
                Event::Empty(e) => {
                    XmlEvent::Empty { name: element_name(&e), attrs: attributes(&e, &self.part)? }
                }
                Event::End(e) => {
                    self.depth = self.depth.saturating_sub(1);
                    XmlEvent::End { name: String::from_utf8_lossy(e.name().as_ref()).into_owned() }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| DocxError::from_xml(&self.part, e))?;
                    XmlEvent::Text(text.into_owned())
                }
                Event::CData(c) => XmlEvent::Text(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                Event::Eof => {
                    if self.depth > 0 {
                        return Err(DocxError::TruncatedStream(format!(
                            "{}: input ended with {} open element(s)",
                            self.part, self.depth
                        )));
                    }
                    XmlEvent::Eof
                }
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => continue,
            };
            return Ok(owned);
        }
    }

    /// Skip the rest of an element whose `Start` was just returned.
    pub fn skip_element(&mut self) -> Result<()> {
        let target = self.depth.saturating_sub(1);
        while self.depth > target {
            if let XmlEvent::Eof = self.next_event()? {
                break;
            }
        }
        Ok(())
    }

    /// Collect the text content of an element whose `Start` was just returned.
    pub fn read_text(&mut self) -> Result<String> {
        let target = self.depth.saturating_sub(1);
        let mut text = String::new();
        while self.depth > target {
            match self.next_event()? {
                XmlEvent::Text(t) => text.push_str(&t),
                XmlEvent::Eof => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>, part: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| DocxError::from_xml(part, quick_xml::Error::InvalidAttr(err)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| DocxError::from_xml(part, err))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

/// Value of attribute `key` in an owned attribute list.
pub(crate) fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Strip the `w:` prefix; other prefixes are kept.
pub(crate) fn local_w(name: &str) -> &str {
    name.strip_prefix("w:").unwrap_or(name)
}

/// Inverse of [`local_w`]: unprefixed names are WordprocessingML names.
pub(crate) fn qualified_w(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("w:{name}")
    }
}
