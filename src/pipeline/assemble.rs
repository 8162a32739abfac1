//! Document assembly: page results → a single downloadable file.
//!
//! Two outputs, both written without any layout reconstruction:
//!
//! - [`build_word_document`]: a minimal WordprocessingML package (`.docx`)
//!   with one paragraph per line of text. Three parts are enough for Word,
//!   LibreOffice and Google Docs to open it.
//! - [`build_compressed_pdf`]: one page per encoded JPEG, each page sized to
//!   its source page's render viewport and filled edge to edge by the image. Any selectable
//!   text in the source is rasterised away; that is the price of the size
//!   reduction.

use crate::error::DocToolsError;
use crate::output::PageDimensions;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One JPEG-encoded page ready for PDF packing.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub jpeg: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    /// Size of the output page, in points.
    pub size: PageDimensions,
}

// ── Word ─────────────────────────────────────────────────────────────────

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_TAIL: &str = r#"<w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/></w:sectPr></w:body></w:document>"#;

/// Build a `.docx` from page texts in order.
///
/// Blocks are separated by a blank line; every line (blank ones included)
/// becomes one paragraph.
pub fn build_word_document(blocks: &[&str]) -> Result<Vec<u8>, DocToolsError> {
    let text = blocks
        .iter()
        .map(|b| b.trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut body = String::with_capacity(text.len() * 2 + 256);
    body.push_str(DOCUMENT_HEAD);
    let mut paragraphs = 0usize;
    for line in text.lines() {
        push_paragraph(&mut body, line);
        paragraphs += 1;
    }
    body.push_str(DOCUMENT_TAIL);
    debug!("Word document: {} paragraphs", paragraphs);

    pack_docx(&body).map_err(|e| DocToolsError::Assembly {
        detail: format!("docx packaging: {}", e),
    })
}

fn push_paragraph(out: &mut String, line: &str) {
    if line.is_empty() {
        out.push_str("<w:p/>");
        return;
    }
    out.push_str(r#"<w:p><w:pPr><w:spacing w:after="120"/></w:pPr><w:r><w:t xml:space="preserve">"#);
    escape_xml_into(out, line);
    out.push_str("</w:t></w:r></w:p>");
}

fn escape_xml_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Not representable in XML 1.0.
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
}

fn pack_docx(document_xml: &str) -> zip::result::ZipResult<Vec<u8>> {
    // Fixed timestamps keep equal input → equal bytes.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("word/document.xml", document_xml),
    ] {
        zip.start_file(name, options)?;
        zip.write_all(content.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// Per-page allowance for length and dimension fields growing with real data.
const OVERHEAD_SLACK_PER_PAGE: u64 = 16;
/// Allowance for the trailer offsets growing with real data.
const OVERHEAD_SLACK: u64 = 64;

/// Upper bound on the bytes [`build_compressed_pdf`] spends on anything but
/// JPEG data for pages of the given sizes.
///
/// Packs the same pages with empty image streams and adds a small allowance,
/// so `pdf_overhead(sizes) + Σ jpeg.len()` bounds the packed size.
pub fn pdf_overhead(sizes: &[PageDimensions]) -> Result<u64, DocToolsError> {
    if sizes.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<EncodedPage> = sizes
        .iter()
        .map(|&size| EncodedPage {
            jpeg: Vec::new(),
            width_px: u32::MAX,
            height_px: u32::MAX,
            size,
        })
        .collect();
    let bare = build_compressed_pdf(&placeholders)?.len() as u64;
    Ok(bare + OVERHEAD_SLACK_PER_PAGE * sizes.len() as u64 + OVERHEAD_SLACK)
}

/// Pack JPEG pages into a PDF, one page per image, in order.
pub fn build_compressed_pdf(pages: &[EncodedPage]) -> Result<Vec<u8>, DocToolsError> {
    if pages.is_empty() {
        return Err(DocToolsError::Assembly {
            detail: "no pages to pack".into(),
        });
    }
    let assembly = |e: lopdf::Error| DocToolsError::Assembly {
        detail: format!("PDF packing: {}", e),
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for (i, page) in pages.iter().enumerate() {
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width_px as i64,
                "Height" => page.height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg.clone(),
        )
        .with_compression(false);
        let image_id = doc.add_object(image);

        let name = format!("Im{}", i + 1);
        let (w, h) = (page.size.width_pt, page.size.height_pt);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content = content.encode().map_err(assembly)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { name.as_str() => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(|e| DocToolsError::Assembly {
        detail: format!("PDF write: {}", e),
    })?;
    debug!("Packed {} pages → {} bytes", pages.len(), buf.len());
    Ok(buf)
}
