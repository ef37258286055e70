//! Flattening of WordprocessingML property elements into [`Format`] maps.
//!
//! ```text
//! <w:pPr>                                   key                 value
//!   <w:jc w:val="center"/>            →     jc                  center
//!   <w:keepNext/>                     →     keepNext            ""
//!   <w:spacing w:after="200"/>        →     spacing@after       200
//!   <w:numPr><w:ilvl w:val="0"/>      →     numPr/ilvl          0
//!   <w:tabs><w:tab .../><w:tab .../>  →     tabs/tab@pos, tabs/tab#1@pos
//! </w:pPr>
//! ```
//!
//! The `w:` prefix is implied; other prefixes stay in the key. Keys keep
//! document order so the writer re-emits children in schema order.

use quick_xml::escape::escape;
use std::collections::HashMap;

use crate::node::{Format, NodeKind};
use crate::xml::{local_w, qualified_w};

struct Frame {
    path: String,
    counts: HashMap<String, usize>,
    keys_at_open: usize,
}

/// Incremental reader fed with the elements found inside a property
/// container (`w:rPr`, `w:pPr`, ...).
pub(crate) struct FormatReader {
    format: Format,
    stack: Vec<Frame>,
}

impl FormatReader {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    /// Keys are rooted at `prefix` (e.g. `tblGrid`).
    pub fn with_prefix(prefix: &str) -> Self {
        Self::continue_from(Format::new(), prefix)
    }

    /// Append to an existing map.
    pub fn continue_from(format: Format, prefix: &str) -> Self {
        Self {
            format,
            stack: vec![Frame {
                path: prefix.to_string(),
                counts: HashMap::new(),
                keys_at_open: 0,
            }],
        }
    }

    pub fn open(&mut self, name: &str, attrs: &[(String, String)]) {
        let name = local_w(name);
        let keys_at_open = self.format.len();
        let path = match self.stack.last_mut() {
            Some(parent) => {
                let n = parent.counts.entry(name.to_string()).or_insert(0);
                let segment = if *n == 0 { name.to_string() } else { format!("{name}#{n}") };
                *n += 1;
                if parent.path.is_empty() {
                    segment
                } else {
                    format!("{}/{}", parent.path, segment)
                }
            }
            None => name.to_string(),
        };
        for (key, value) in attrs {
            let attr = local_w(key);
            if attr == "val" {
                self.format.insert(path.clone(), value.clone());
            } else {
                self.format.insert(format!("{path}@{attr}"), value.clone());
            }
        }
        self.stack.push(Frame { path, counts: HashMap::new(), keys_at_open });
    }

    pub fn close(&mut self) {
        // Never pop the root frame.
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(frame) = self.stack.pop() {
            if self.format.len() == frame.keys_at_open {
                self.format.insert(frame.path, String::new());
            }
        }
    }

    /// Open elements below the root.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn finish(self) -> Format {
        self.format
    }
}

// ─── Schema order ─────────────────────────────────────────────────

const RPR_ORDER: &[&str] = &[
    "rStyle", "rFonts", "b", "bCs", "i", "iCs", "caps", "smallCaps", "strike", "dstrike",
    "outline", "shadow", "emboss", "imprint", "noProof", "snapToGrid", "vanish", "webHidden",
    "color", "spacing", "w", "kern", "position", "sz", "szCs", "highlight", "u", "effect", "bdr",
    "shd", "fitText", "vertAlign", "rtl", "cs", "em", "lang", "eastAsianLayout", "specVanish",
    "oMath", "rPrChange",
];

const PPR_ORDER: &[&str] = &[
    "pStyle", "keepNext", "keepLines", "pageBreakBefore", "framePr", "widowControl", "numPr",
    "suppressLineNumbers", "pBdr", "shd", "tabs", "suppressAutoHyphens", "kinsoku", "wordWrap",
    "overflowPunct", "topLinePunct", "autoSpaceDE", "autoSpaceDN", "bidi", "adjustRightInd",
    "snapToGrid", "spacing", "ind", "contextualSpacing", "mirrorIndents", "suppressOverlap", "jc",
    "textDirection", "textAlignment", "textboxTightWrap", "outlineLvl", "divId", "cnfStyle",
    "rPr", "sectPr", "pPrChange",
];

// `tblGrid` keys share the table's map and are written after `w:tblPr`.
const TBLPR_ORDER: &[&str] = &[
    "tblStyle", "tblpPr", "tblOverlap", "bidiVisual", "tblStyleRowBandSize",
    "tblStyleColBandSize", "tblW", "jc", "tblCellSpacing", "tblInd", "tblBorders", "shd",
    "tblLayout", "tblCellMar", "tblLook", "tblCaption", "tblDescription", "tblPrChange", "tblGrid",
];

const TRPR_ORDER: &[&str] = &[
    "cnfStyle", "divId", "gridBefore", "gridAfter", "wBefore", "wAfter", "cantSplit", "trHeight",
    "tblHeader", "tblCellSpacing", "jc", "hidden", "ins", "del", "trPrChange",
];

const TCPR_ORDER: &[&str] = &[
    "cnfStyle", "tcW", "gridSpan", "hMerge", "vMerge", "tcBorders", "shd", "noWrap", "tcMar",
    "textDirection", "tcFitText", "vAlign", "hideMark", "headers", "cellIns", "cellDel",
    "cellMerge", "tcPrChange",
];

const SECTPR_ORDER: &[&str] = &[
    "headerReference", "footerReference", "footnotePr", "endnotePr", "type", "pgSz", "pgMar",
    "paperSrc", "pgBorders", "lnNumType", "pgNumType", "cols", "formProt", "vAlign", "noEndnote",
    "titlePg", "textDirection", "bidi", "rtlGutter", "docGrid", "printerSettings", "sectPrChange",
];

fn schema_order(kind: NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::Run => RPR_ORDER,
        NodeKind::Paragraph => PPR_ORDER,
        NodeKind::Table => TBLPR_ORDER,
        NodeKind::TableRow => TRPR_ORDER,
        NodeKind::TableCell => TCPR_ORDER,
        NodeKind::SectionBreak => SECTPR_ORDER,
        NodeKind::Body => &[],
    }
}

/// Top-level element a key belongs to: `numPr/ilvl` → `numPr`,
/// `tab#1@pos` → `tab`.
fn key_element(key: &str) -> &str {
    let end = key.find(['/', '@']).unwrap_or(key.len());
    segment_name(&key[..end])
}

/// Index at which a new `key` keeps the properties of a `kind` node in
/// schema order. Keys of an element already present stay together; keys
/// of unknown elements go last.
pub(crate) fn schema_position(kind: NodeKind, format: &Format, key: &str) -> usize {
    let element = key_element(key);
    if let Some(last) = format.keys().rposition(|k| key_element(k) == element) {
        return last + 1;
    }
    let order = schema_order(kind);
    let rank = |name: &str| order.iter().position(|e| *e == name);
    match rank(element) {
        Some(r) => format
            .keys()
            .position(|k| rank(key_element(k)).is_some_and(|other| other > r))
            .unwrap_or(format.len()),
        None => format.len(),
    }
}

#[derive(Debug, Default)]
struct Element {
    segment: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn child_mut(&mut self, segment: &str) -> &mut Element {
        let pos = match self.children.iter().position(|c| c.segment == segment) {
            Some(pos) => pos,
            None => {
                self.children.push(Element { segment: segment.to_string(), ..Default::default() });
                self.children.len() - 1
            }
        };
        &mut self.children[pos]
    }

    fn write(&self, out: &mut String) {
        let name = qualified_w(segment_name(&self.segment));
        out.push('<');
        out.push_str(&name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(&qualified_w(key));
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write(out);
        }
        out.push_str("</");
        out.push_str(&name);
        out.push('>');
    }
}

fn segment_name(segment: &str) -> &str {
    match segment.rsplit_once('#') {
        Some((name, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => segment,
    }
}

/// Rebuild the element tree for `keys` (already stripped of any prefix).
fn build<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> Element {
    let mut root = Element::default();
    for (key, value) in entries {
        let (path, attr) = match key.rsplit_once('/') {
            Some((head, last)) => match last.split_once('@') {
                Some((seg, attr)) => (format!("{head}/{seg}"), Some(attr)),
                None => (key.to_string(), None),
            },
            None => match key.split_once('@') {
                Some((seg, attr)) => (seg.to_string(), Some(attr)),
                None => (key.to_string(), None),
            },
        };
        let mut node = &mut root;
        for segment in path.split('/') {
            node = node.child_mut(segment);
        }
        match attr {
            Some(attr) => node.attrs.push((attr.to_string(), value.to_string())),
            None if !value.is_empty() => node.attrs.insert(0, ("val".to_string(), value.to_string())),
            None => {}
        }
    }
    root
}

/// Serialize the properties of `format` accepted by `filter` inside a
/// `container` element. Nothing is written when no key matches.
pub(crate) fn write_container(
    out: &mut String,
    container: &str,
    format: &Format,
    strip_prefix: Option<&str>,
    filter: impl Fn(&str) -> bool,
) {
    let entries = format.iter().filter(|(k, _)| filter(k)).map(|(k, v)| {
        let key = match strip_prefix {
            Some(prefix) => k.strip_prefix(prefix).unwrap_or(k),
            None => k.as_str(),
        };
        (key, v.as_str())
    });
    let root = build(entries);
    if root.children.is_empty() {
        return;
    }
    let name = qualified_w(container);
    out.push('<');
    out.push_str(&name);
    out.push('>');
    for child in &root.children {
        child.write(out);
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}
