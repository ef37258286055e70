//! Serialization of a [`DocumentModel`] back into a DOCX package.
//!
//! The main document part is regenerated from the node tree; every other part
//! is written back exactly as it was read.

use quick_xml::escape::{escape, partial_escape};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{DocxError, Result};
use crate::format::write_container;
use crate::model::DocumentModel;
use crate::node::{NodeId, NodeKind};
use crate::package::CONTENT_TYPES_PART;

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n";

const MINIMAL_CONTENT_TYPES: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n",
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/{main}" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#,
    r#"</Types>"#
);

const MINIMAL_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n",
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="{main}"/>"#,
    r#"</Relationships>"#
);

fn zip_err(e: zip::result::ZipError) -> DocxError {
    DocxError::Io(format!("zip: {e}"))
}

/// Write `model` as a complete package.
pub fn write_package(model: &DocumentModel) -> Result<Vec<u8>> {
    let package = model.package();
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let main_xml = document_xml(model);

    let put = |zip: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, bytes: &[u8]| -> Result<()> {
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(bytes)?;
        Ok(())
    };

    if package.parts.contains_key(CONTENT_TYPES_PART) {
        for (name, bytes) in &package.parts {
            put(&mut zip, name, bytes)?;
            if name == CONTENT_TYPES_PART {
                put(&mut zip, &package.main_part, main_xml.as_bytes())?;
            }
        }
    } else {
        // Created empty: synthesize the minimal package around the main part.
        let main = package.main_part.as_str();
        put(&mut zip, CONTENT_TYPES_PART, MINIMAL_CONTENT_TYPES.replace("{main}", main).as_bytes())?;
        put(&mut zip, "_rels/.rels", MINIMAL_RELS.replace("{main}", main).as_bytes())?;
        put(&mut zip, main, main_xml.as_bytes())?;
        for (name, bytes) in &package.parts {
            put(&mut zip, name, bytes)?;
        }
    }

    let bytes = zip.finish().map_err(zip_err)?.into_inner();
    log::debug!(
        "Wrote package for {} at revision {}: {} bytes",
        model.document_id(),
        model.revision(),
        bytes.len()
    );
    Ok(bytes)
}

/// The regenerated main document part.
pub fn document_xml(model: &DocumentModel) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(XML_DECL);
    out.push_str("<w:document");
    for (key, value) in &model.package().root_attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    out.push_str("><w:body>");
    for block in model.blocks() {
        write_node(model, *block, &mut out);
    }
    out.push_str("</w:body></w:document>");
    out
}

fn write_children(model: &DocumentModel, id: NodeId, out: &mut String) {
    for child in model.children(id) {
        write_node(model, *child, out);
    }
}

fn write_node(model: &DocumentModel, id: NodeId, out: &mut String) {
    let Some(node) = model.node(id) else { return };
    match node.kind {
        NodeKind::Paragraph => {
            out.push_str("<w:p>");
            write_container(out, "pPr", &node.format, None, |_| true);
            write_children(model, id, out);
            out.push_str("</w:p>");
        }
        NodeKind::Run => {
            out.push_str("<w:r>");
            write_container(out, "rPr", &node.format, None, |_| true);
            write_run_text(&node.text, out);
            out.push_str("</w:r>");
        }
        NodeKind::Table => {
            out.push_str("<w:tbl>");
            write_container(out, "tblPr", &node.format, None, |k| !k.starts_with("tblGrid/"));
            write_container(out, "tblGrid", &node.format, Some("tblGrid/"), |k| k.starts_with("tblGrid/"));
            write_children(model, id, out);
            out.push_str("</w:tbl>");
        }
        NodeKind::TableRow => {
            out.push_str("<w:tr>");
            write_container(out, "trPr", &node.format, None, |_| true);
            write_children(model, id, out);
            out.push_str("</w:tr>");
        }
        NodeKind::TableCell => {
            out.push_str("<w:tc>");
            write_container(out, "tcPr", &node.format, None, |_| true);
            write_children(model, id, out);
            out.push_str("</w:tc>");
        }
        NodeKind::SectionBreak => {
            let mut sect = String::new();
            write_container(&mut sect, "sectPr", &node.format, None, |_| true);
            if sect.is_empty() {
                out.push_str("<w:sectPr/>");
            } else {
                out.push_str(&sect);
            }
        }
        NodeKind::Body => write_children(model, id, out),
    }
}

fn write_run_text(text: &str, out: &mut String) {
    fn flush(segment: &mut String, out: &mut String) {
        if !segment.is_empty() {
            out.push_str("<w:t xml:space=\"preserve\">");
            out.push_str(&partial_escape(segment.as_str()));
            out.push_str("</w:t>");
            segment.clear();
        }
    }
    let mut segment = String::new();
    for ch in text.chars() {
        match ch {
            '\t' => {
                flush(&mut segment, out);
                out.push_str("<w:tab/>");
            }
            '\n' => {
                flush(&mut segment, out);
                out.push_str("<w:br/>");
            }
            c => segment.push(c),
        }
    }
    flush(&mut segment, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeTemplate;
    use crate::parser::load_document;
    use uuid::Uuid;

    #[test]
    fn test_run_text_pieces() {
        let mut out = String::new();
        write_run_text("a\tb <c>\n", &mut out);
        assert_eq!(
            out,
            r#"<w:t xml:space="preserve">a</w:t><w:tab/><w:t xml:space="preserve">b &lt;c&gt;</w:t><w:br/>"#
        );
    }

    #[test]
    fn test_empty_model_writes_loadable_package() {
        let mut model = DocumentModel::empty(Uuid::new_v4());
        model
            .append_block(&NodeTemplate::paragraph_with_text("fresh").with_format("jc", "center"))
            .unwrap();
        let bytes = write_package(&model).unwrap();

        let reloaded = load_document(bytes, model.document_id()).unwrap();
        assert!(reloaded.structurally_eq(&model));
        assert!(reloaded.package().parts.contains_key("_rels/.rels"));
    }

    #[test]
    fn test_section_break_and_blank_cell() {
        let mut model = DocumentModel::empty(Uuid::new_v4());
        model
            .append_block(
                &NodeTemplate::new(NodeKind::Table).with_child(
                    NodeTemplate::new(NodeKind::TableRow)
                        .with_child(NodeTemplate::new(NodeKind::TableCell).with_child(NodeTemplate::paragraph())),
                ),
            )
            .unwrap();
        model.append_block(&NodeTemplate::new(NodeKind::SectionBreak)).unwrap();
        let xml = document_xml(&model);
        assert!(xml.contains("<w:tc><w:p/></w:tc>"));
        assert!(xml.ends_with("<w:sectPr/></w:body></w:document>"));

        let reloaded = load_document(write_package(&model).unwrap(), model.document_id()).unwrap();
        assert!(reloaded.structurally_eq(&model));
    }
}
