//! DOCX container access.
//!
//! A package is a zip archive of XML parts plus a `[Content_Types].xml`
//! manifest. [`PackageReader`] reads the central directory once and then
//! hands out independent, owned streams per part; parts nobody opens are never
//! inflated.

use flate2::read::DeflateDecoder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, BufReader, Cursor, Read};
use std::sync::Arc;
use zip::{CompressionMethod, ZipArchive};

use crate::error::{DocxError, Result};
use crate::xml::{attr, XmlCursor, XmlEvent};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const DEFAULT_MAIN_PART: &str = "word/document.xml";
pub const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const MAIN_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const STYLES_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml";
const NUMBERING_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml";

// ─── Model-side package data ──────────────────────────────────────────

/// Everything in the package except the regenerated main document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartMap {
    /// Name of the main document part, e.g. `word/document.xml`.
    pub main_part: String,
    /// Attributes of the `w:document` root (namespace declarations).
    pub root_attributes: Vec<(String, String)>,
    /// All other parts in archive order, stored decompressed and unmodified.
    pub parts: IndexMap<String, Vec<u8>>,
}

impl Default for PartMap {
    fn default() -> Self {
        Self {
            main_part: DEFAULT_MAIN_PART.to_string(),
            root_attributes: vec![("xmlns:w".to_string(), WORDML_NS.to_string())],
            parts: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDef {
    pub id: String,
    /// `paragraph`, `character`, `table` or `numbering`.
    pub kind: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingDef {
    pub num_id: String,
    pub abstract_num_id: Option<String>,
}

/// The final record produced by the parser after all blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub styles: Vec<StyleDef>,
    pub numbering: Vec<NumberingDef>,
}

// ─── Reader ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PartEntry {
    data_start: u64,
    compressed_size: u64,
    size: u64,
    method: CompressionMethod,
}

#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    /// Lower-case extension → content type.
    defaults: HashMap<String, String>,
    /// Part name (no leading slash) → content type.
    overrides: IndexMap<String, String>,
}

impl ContentTypes {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = XmlCursor::new(bytes, CONTENT_TYPES_PART);
        let mut types = ContentTypes::default();
        let mut saw_root = false;
        loop {
            let event = cursor
                .next_event()
                .map_err(|e| DocxError::MalformedPackage(format!("unreadable manifest: {e}")))?;
            match event {
                XmlEvent::Start { name, .. } if name == "Types" => saw_root = true,
                XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => match name.as_str() {
                    "Default" => {
                        if let (Some(ext), Some(ct)) = (attr(&attrs, "Extension"), attr(&attrs, "ContentType")) {
                            types.defaults.insert(ext.to_ascii_lowercase(), ct.to_string());
                        }
                    }
                    "Override" => {
                        if let (Some(part), Some(ct)) = (attr(&attrs, "PartName"), attr(&attrs, "ContentType")) {
                            types
                                .overrides
                                .insert(part.trim_start_matches('/').to_string(), ct.to_string());
                        }
                    }
                    "Types" => saw_root = true,
                    _ => {}
                },
                XmlEvent::Eof => break,
                _ => {}
            }
        }
        if !saw_root {
            return Err(DocxError::MalformedPackage("manifest has no Types root".into()));
        }
        Ok(types)
    }

    pub fn get(&self, part: &str) -> Option<&str> {
        if let Some(ct) = self.overrides.get(part) {
            return Some(ct.as_str());
        }
        let ext = part.rsplit_once('.')?.1.to_ascii_lowercase();
        self.defaults.get(&ext).map(String::as_str)
    }

    fn find(&self, content_type: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|(_, ct)| ct.as_str() == content_type)
            .map(|(part, _)| part.as_str())
    }
}

type RawSlice = io::Take<Cursor<Arc<[u8]>>>;

/// An owned stream over one part's decompressed bytes.
pub enum PartStream {
    Stored(RawSlice),
    Deflated(DeflateDecoder<RawSlice>),
}

impl Read for PartStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PartStream::Stored(r) => r.read(buf),
            PartStream::Deflated(r) => r.read(buf),
        }
    }
}

/// Random access to the named parts of a package held in memory.
pub struct PackageReader {
    bytes: Arc<[u8]>,
    entries: IndexMap<String, PartEntry>,
    content_types: ContentTypes,
}

impl PackageReader {
    pub fn open(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let mut archive = ZipArchive::new(Cursor::new(&bytes[..]))
            .map_err(|e| DocxError::MalformedPackage(format!("not a zip archive: {e}")))?;

        let mut entries = IndexMap::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive
                .by_index_raw(i)
                .map_err(|e| DocxError::MalformedPackage(format!("entry {i}: {e}")))?;
            if file.is_dir() {
                continue;
            }
            entries.insert(
                file.name().to_string(),
                PartEntry {
                    data_start: file.data_start(),
                    compressed_size: file.compressed_size(),
                    size: file.size(),
                    method: file.compression(),
                },
            );
        }

        let mut reader = Self {
            bytes,
            entries,
            content_types: ContentTypes::default(),
        };
        let manifest = match reader.entries.contains_key(CONTENT_TYPES_PART) {
            true => reader.read_part(CONTENT_TYPES_PART)?,
            false => {
                return Err(DocxError::MalformedPackage(format!("missing {CONTENT_TYPES_PART}")))
            }
        };
        reader.content_types = ContentTypes::parse(&manifest)?;
        if let Some(missing) = reader
            .content_types
            .overrides
            .keys()
            .find(|part| !reader.entries.contains_key(part.as_str()))
        {
            return Err(DocxError::MalformedPackage(format!(
                "manifest lists part {missing} which is not in the archive"
            )));
        }
        log::debug!(
            "Opened package: {} parts, {} bytes",
            reader.entries.len(),
            reader.bytes.len()
        );
        Ok(reader)
    }

    /// Part names in archive order.
    pub fn list_parts(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, part: &str) -> bool {
        self.entries.contains_key(part)
    }

    /// Uncompressed size recorded in the central directory.
    pub fn part_size(&self, part: &str) -> Option<u64> {
        self.entries.get(part).map(|e| e.size)
    }

    pub fn content_type(&self, part: &str) -> Option<&str> {
        self.content_types.get(part)
    }

    /// The main document part named by the manifest.
    pub fn main_document_part(&self) -> Result<&str> {
        let part = self
            .content_types
            .find(MAIN_CONTENT_TYPE)
            .or_else(|| {
                self.content_types
                    .overrides
                    .iter()
                    .find(|(_, ct)| ct.starts_with("application/vnd.ms-word.") && ct.ends_with(".main+xml"))
                    .map(|(p, _)| p.as_str())
            })
            .or_else(|| self.contains(DEFAULT_MAIN_PART).then_some(DEFAULT_MAIN_PART));
        match part {
            Some(p) if self.contains(p) => Ok(p),
            _ => Err(DocxError::UnsupportedPart("package has no main document part".into())),
        }
    }

    pub fn styles_part(&self) -> Option<&str> {
        self.content_types.find(STYLES_CONTENT_TYPE)
    }

    pub fn numbering_part(&self) -> Option<&str> {
        self.content_types.find(NUMBERING_CONTENT_TYPE)
    }

    /// Stream one part. Only this part's bytes are inflated, lazily.
    pub fn open_part(&self, part: &str) -> Result<PartStream> {
        let entry = self
            .entries
            .get(part)
            .ok_or_else(|| DocxError::UnsupportedPart(format!("{part} not found")))?;
        let end = entry.data_start.saturating_add(entry.compressed_size);
        if end > self.bytes.len() as u64 {
            return Err(DocxError::TruncatedStream(format!(
                "{part}: data ends at {end}, archive has {} bytes",
                self.bytes.len()
            )));
        }
        let mut cursor = Cursor::new(Arc::clone(&self.bytes));
        cursor.set_position(entry.data_start);
        let raw = cursor.take(entry.compressed_size);
        match entry.method {
            CompressionMethod::Stored => Ok(PartStream::Stored(raw)),
            CompressionMethod::Deflated => Ok(PartStream::Deflated(DeflateDecoder::new(raw))),
            other => Err(DocxError::UnsupportedPart(format!(
                "{part}: compression method {other:?}"
            ))),
        }
    }

    /// Buffered stream for XML parsing.
    pub(crate) fn open_xml(&self, part: &str) -> Result<BufReader<PartStream>> {
        Ok(BufReader::new(self.open_part(part)?))
    }

    /// Read a whole part into memory.
    pub fn read_part(&self, part: &str) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.part_size(part).unwrap_or(0) as usize);
        self.open_part(part)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Every part except the main document, for pass-through on write.
    pub(crate) fn passthrough_parts(&self, main_part: &str) -> Result<IndexMap<String, Vec<u8>>> {
        self.entries
            .keys()
            .filter(|name| name.as_str() != main_part)
            .map(|name| Ok((name.clone(), self.read_part(name)?)))
            .collect()
    }
}
