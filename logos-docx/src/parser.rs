//! Streaming DOCX parser.
//!
//! ```text
//!  AwaitingPackageOpen ──► ParsingPart(main) ──► EmittingNode* ──► PartDone
//!                                                                    │
//!          ┌──────────── ParsingPart(styles | numbering) ◄───────────┤
//!          └──► PartDone ──► ... ──► Finished ◄──────────────────────┘
//! ```
//!
//! The parser is an `Iterator` over top-level blocks of the main document.
//! Only the subtree of the block being built is held in memory; the XML is
//! pulled from an inflating stream over the part. Once the blocks are
//! exhausted the metadata parts are read and [`StreamingDocxParser::metadata`]
//! becomes complete. Any error moves the parser to `Finished`.

use std::collections::VecDeque;
use std::io::BufReader;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{DocxError, Result};
use crate::format::FormatReader;
use crate::model::DocumentModel;
use crate::node::{Format, NodeKind, NodeTemplate};
use crate::package::{NumberingDef, PackageMetadata, PackageReader, PartMap, PartStream, StyleDef};
use crate::xml::{attr, XmlCursor, XmlEvent};

type PartCursor = XmlCursor<BufReader<PartStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
    AwaitingPackageOpen,
    ParsingPart(String),
    EmittingNode,
    PartDone,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartRole {
    Main,
    Styles,
    Numbering,
}

pub struct StreamingDocxParser {
    reader: PackageReader,
    state: ParserState,
    pending: VecDeque<(PartRole, String)>,
    role: PartRole,
    cursor: Option<PartCursor>,
    main_part: String,
    root_attributes: Vec<(String, String)>,
    metadata: PackageMetadata,
    blocks_emitted: usize,
}

impl StreamingDocxParser {
    pub fn new(reader: PackageReader) -> Self {
        Self {
            reader,
            state: ParserState::AwaitingPackageOpen,
            pending: VecDeque::new(),
            role: PartRole::Main,
            cursor: None,
            main_part: String::new(),
            root_attributes: Vec::new(),
            metadata: PackageMetadata::default(),
            blocks_emitted: 0,
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn reader(&self) -> &PackageReader {
        &self.reader
    }

    /// Main document part name; empty until the package has been opened.
    pub fn main_part(&self) -> &str {
        &self.main_part
    }

    /// Attributes of the `w:document` root element.
    pub fn root_attributes(&self) -> &[(String, String)] {
        &self.root_attributes
    }

    /// Styles and numbering definitions. Complete once the iterator is done.
    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn blocks_emitted(&self) -> usize {
        self.blocks_emitted
    }

    fn step(&mut self) -> Result<Option<NodeTemplate>> {
        match std::mem::replace(&mut self.state, ParserState::Finished) {
            ParserState::AwaitingPackageOpen => {
                self.main_part = self.reader.main_document_part()?.to_string();
                self.pending.push_back((PartRole::Main, self.main_part.clone()));
                if let Some(styles) = self.reader.styles_part() {
                    self.pending.push_back((PartRole::Styles, styles.to_string()));
                }
                if let Some(numbering) = self.reader.numbering_part() {
                    self.pending.push_back((PartRole::Numbering, numbering.to_string()));
                }
                self.state = self.next_part();
                Ok(None)
            }
            ParserState::ParsingPart(part) => {
                log::trace!("Parsing part {part}");
                let mut cursor = XmlCursor::new(self.reader.open_xml(&part)?, &part);
                match self.role {
                    PartRole::Main => {
                        self.root_attributes = open_body(&mut cursor)?;
                        self.cursor = Some(cursor);
                        self.state = ParserState::EmittingNode;
                    }
                    PartRole::Styles => {
                        self.metadata.styles = read_styles(&mut cursor)?;
                        self.state = ParserState::PartDone;
                    }
                    PartRole::Numbering => {
                        self.metadata.numbering = read_numbering(&mut cursor)?;
                        self.state = ParserState::PartDone;
                    }
                }
                Ok(None)
            }
            ParserState::EmittingNode => {
                let cursor = self
                    .cursor
                    .as_mut()
                    .ok_or_else(|| DocxError::Io("main part is not open".into()))?;
                match next_block(cursor)? {
                    Some(block) => {
                        self.blocks_emitted += 1;
                        self.state = ParserState::EmittingNode;
                        Ok(Some(block))
                    }
                    None => {
                        drain(cursor)?;
                        self.state = ParserState::PartDone;
                        Ok(None)
                    }
                }
            }
            ParserState::PartDone => {
                self.cursor = None;
                self.state = self.next_part();
                Ok(None)
            }
            ParserState::Finished => Ok(None),
        }
    }

    fn next_part(&mut self) -> ParserState {
        match self.pending.pop_front() {
            Some((role, part)) => {
                self.role = role;
                ParserState::ParsingPart(part)
            }
            None => ParserState::Finished,
        }
    }
}

impl Iterator for StreamingDocxParser {
    type Item = Result<NodeTemplate>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state == ParserState::Finished {
                return None;
            }
            match self.step() {
                Ok(Some(block)) => return Some(Ok(block)),
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("Parser failed in part {:?}: {e}", self.main_part);
                    self.state = ParserState::Finished;
                    self.cursor = None;
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Parse a whole package into a fresh model whose revision is 0.
pub fn load_document(bytes: impl Into<Arc<[u8]>>, document_id: Uuid) -> Result<DocumentModel> {
    let reader = PackageReader::open(bytes)?;
    let mut parser = StreamingDocxParser::new(reader);
    let mut model = DocumentModel::empty(document_id);
    for block in parser.by_ref() {
        model.append_block(&block?)?;
    }
    let package = PartMap {
        main_part: parser.main_part().to_string(),
        root_attributes: parser.root_attributes().to_vec(),
        parts: parser.reader().passthrough_parts(parser.main_part())?,
    };
    let metadata = parser.metadata().clone();
    log::debug!(
        "Loaded document {document_id}: {} blocks, {} styles, {} passthrough parts",
        parser.blocks_emitted(),
        metadata.styles.len(),
        package.parts.len()
    );
    model.set_package(package, metadata);
    Ok(model)
}

// ─── Main part ────────────────────────────────────────────────────────

/// Advance to just inside `w:body`, returning the `w:document` attributes.
fn open_body(c: &mut PartCursor) -> Result<Vec<(String, String)>> {
    let mut root = None;
    loop {
        match c.next_event()? {
            XmlEvent::Start { name, attrs } if root.is_none() => {
                if name != "w:document" {
                    return Err(DocxError::MalformedPackage(format!(
                        "{}: root element is {name}, expected w:document",
                        c.part()
                    )));
                }
                root = Some(attrs);
            }
            XmlEvent::Start { name, .. } if name == "w:body" => {
                return Ok(root.unwrap_or_default());
            }
            XmlEvent::Start { .. } => c.skip_element()?,
            XmlEvent::Eof => {
                return Err(DocxError::MalformedPackage(format!("{}: no w:body", c.part())));
            }
            _ => {}
        }
    }
}

/// Next top-level block, or `None` at `</w:body>`.
fn next_block(c: &mut PartCursor) -> Result<Option<NodeTemplate>> {
    loop {
        match c.next_event()? {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:p" => return paragraph(c).map(Some),
                "w:tbl" => return table(c).map(Some),
                "w:sectPr" => {
                    let mut sect = NodeTemplate::new(NodeKind::SectionBreak);
                    sect.format = properties(c, FormatReader::new())?;
                    return Ok(Some(sect));
                }
                other => {
                    log::trace!("Skipping unsupported body element {other}");
                    c.skip_element()?;
                }
            },
            XmlEvent::Empty { name, .. } => match name.as_str() {
                "w:p" => return Ok(Some(NodeTemplate::paragraph())),
                "w:sectPr" => return Ok(Some(NodeTemplate::new(NodeKind::SectionBreak))),
                _ => {}
            },
            XmlEvent::End { .. } | XmlEvent::Eof => return Ok(None),
            XmlEvent::Text(_) => {}
        }
    }
}

/// Check the remainder of the part is well formed.
fn drain(c: &mut PartCursor) -> Result<()> {
    while c.next_event()? != XmlEvent::Eof {}
    Ok(())
}

/// Read the children of a property container whose `Start` was just consumed.
fn properties(c: &mut PartCursor, mut reader: FormatReader) -> Result<Format> {
    loop {
        match c.next_event()? {
            XmlEvent::Start { name, attrs } => reader.open(&name, &attrs),
            XmlEvent::Empty { name, attrs } => {
                reader.open(&name, &attrs);
                reader.close();
            }
            XmlEvent::End { .. } => {
                if reader.depth() == 0 {
                    return Ok(reader.finish());
                }
                reader.close();
            }
            XmlEvent::Text(_) => {}
            XmlEvent::Eof => return Ok(reader.finish()),
        }
    }
}

fn paragraph(c: &mut PartCursor) -> Result<NodeTemplate> {
    let mut p = NodeTemplate::paragraph();
    let depth = c.depth();
    while c.depth() >= depth {
        match c.next_event()? {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:pPr" => p.format = properties(c, FormatReader::new())?,
                "w:r" => p.children.push(run(c)?),
                // Wrappers whose runs are flattened into the paragraph.
                "w:hyperlink" | "w:ins" | "w:smartTag" | "w:customXml" | "w:fldSimple" => {}
                _ => c.skip_element()?,
            },
            XmlEvent::Empty { name, .. } if name == "w:r" => p.children.push(NodeTemplate::run("")),
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(p)
}

fn run(c: &mut PartCursor) -> Result<NodeTemplate> {
    let mut r = NodeTemplate::run("");
    let depth = c.depth();
    while c.depth() >= depth {
        match c.next_event()? {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:rPr" => r.format = properties(c, FormatReader::new())?,
                "w:t" => {
                    let text = c.read_text()?;
                    r.text.push_str(&text);
                }
                "w:tab" => {
                    r.text.push('\t');
                    c.skip_element()?;
                }
                "w:br" | "w:cr" => {
                    r.text.push('\n');
                    c.skip_element()?;
                }
                _ => c.skip_element()?,
            },
            XmlEvent::Empty { name, .. } => match name.as_str() {
                "w:tab" => r.text.push('\t'),
                "w:br" | "w:cr" => r.text.push('\n'),
                _ => {}
            },
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(r)
}

fn table(c: &mut PartCursor) -> Result<NodeTemplate> {
    let mut t = NodeTemplate::new(NodeKind::Table);
    let depth = c.depth();
    while c.depth() >= depth {
        match c.next_event()? {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:tblPr" => {
                    let format = std::mem::take(&mut t.format);
                    t.format = properties(c, FormatReader::continue_from(format, ""))?;
                }
                "w:tblGrid" => {
                    let format = std::mem::take(&mut t.format);
                    t.format = properties(c, FormatReader::continue_from(format, "tblGrid"))?;
                }
                "w:tr" => t.children.push(row(c)?),
                _ => c.skip_element()?,
            },
            XmlEvent::Empty { name, .. } if name == "w:tr" => {
                t.children.push(NodeTemplate::new(NodeKind::TableRow))
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(t)
}

fn row(c: &mut PartCursor) -> Result<NodeTemplate> {
    let mut tr = NodeTemplate::new(NodeKind::TableRow);
    let depth = c.depth();
    while c.depth() >= depth {
        match c.next_event()? {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:trPr" => tr.format = properties(c, FormatReader::new())?,
                "w:tc" => tr.children.push(cell(c)?),
                _ => c.skip_element()?,
            },
            XmlEvent::Empty { name, .. } if name == "w:tc" => {
                tr.children.push(NodeTemplate::new(NodeKind::TableCell).with_child(NodeTemplate::paragraph()))
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(tr)
}

fn cell(c: &mut PartCursor) -> Result<NodeTemplate> {
    let mut tc = NodeTemplate::new(NodeKind::TableCell);
    let depth = c.depth();
    while c.depth() >= depth {
        match c.next_event()? {
            XmlEvent::Start { name, .. } => match name.as_str() {
                "w:tcPr" => tc.format = properties(c, FormatReader::new())?,
                "w:p" => tc.children.push(paragraph(c)?),
                "w:tbl" => tc.children.push(table(c)?),
                _ => c.skip_element()?,
            },
            XmlEvent::Empty { name, .. } if name == "w:p" => tc.children.push(NodeTemplate::paragraph()),
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    // Every cell ends with a paragraph.
    if tc.children.is_empty() {
        tc.children.push(NodeTemplate::paragraph());
    }
    Ok(tc)
}

// ─── Metadata parts ───────────────────────────────────────────────────

fn read_styles(c: &mut PartCursor) -> Result<Vec<StyleDef>> {
    let mut styles: Vec<StyleDef> = Vec::new();
    let mut in_style = false;
    loop {
        let (name, attrs) = match c.next_event()? {
            XmlEvent::Start { name, attrs } => (name, attrs),
            XmlEvent::Empty { name, attrs } => (name, attrs),
            XmlEvent::End { name } => {
                if name == "w:style" {
                    in_style = false;
                }
                continue;
            }
            XmlEvent::Text(_) => continue,
            XmlEvent::Eof => return Ok(styles),
        };
        match name.as_str() {
            "w:style" => {
                styles.push(StyleDef {
                    id: attr(&attrs, "w:styleId").unwrap_or_default().to_string(),
                    kind: attr(&attrs, "w:type").unwrap_or("paragraph").to_string(),
                    name: None,
                });
                in_style = true;
            }
            "w:name" if in_style => {
                if let Some(style) = styles.last_mut() {
                    style.name = attr(&attrs, "w:val").map(str::to_string);
                }
            }
            _ => {}
        }
    }
}

fn read_numbering(c: &mut PartCursor) -> Result<Vec<NumberingDef>> {
    let mut nums: Vec<NumberingDef> = Vec::new();
    let mut in_num = false;
    loop {
        let (name, attrs) = match c.next_event()? {
            XmlEvent::Start { name, attrs } => (name, attrs),
            XmlEvent::Empty { name, attrs } => (name, attrs),
            XmlEvent::End { name } => {
                if name == "w:num" {
                    in_num = false;
                }
                continue;
            }
            XmlEvent::Text(_) => continue,
            XmlEvent::Eof => return Ok(nums),
        };
        match name.as_str() {
            "w:num" => {
                nums.push(NumberingDef {
                    num_id: attr(&attrs, "w:numId").unwrap_or_default().to_string(),
                    abstract_num_id: None,
                });
                in_num = true;
            }
            "w:abstractNumId" if in_num => {
                if let Some(num) = nums.last_mut() {
                    num.abstract_num_id = attr(&attrs, "w:val").map(str::to_string);
                }
            }
            _ => {}
        }
    }
}
