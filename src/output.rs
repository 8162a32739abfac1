//! Result types produced by pipeline runs, plus output file naming.

use crate::error::{DocToolsError, PageError};
use crate::pipeline::assemble;
use crate::pipeline::encode::OutputFormat;
use crate::source::file_stem;
use serde::{Deserialize, Serialize};

/// An encoded output blob ready to be written or downloaded.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedArtifact {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Inferred download name, e.g. `min-photo.jpg`.
    pub filename: String,
    /// Pixel size of the encoded image (for PDFs: of the last page).
    pub width: u32,
    pub height: u32,
    /// JPEG quality (1–100) the bytes were produced at; None for lossless output.
    pub quality: Option<u8>,
    pub budget: BudgetOutcome,
}

impl EncodedArtifact {
    /// Achieved byte size.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Whether a byte budget applied and was honoured.
///
/// `Unmet` is the budget-unmet warning: the encoder exhausted its ladder
/// without reaching the target and returned the smallest result it had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetOutcome {
    /// No budget was requested (plain conversion, fixed-quality PDF pages).
    NotRequested,
    Met {
        target_bytes: u64,
    },
    Unmet {
        target_bytes: u64,
        achieved_bytes: u64,
        final_quality: u8,
    },
}

impl BudgetOutcome {
    pub fn is_unmet(&self) -> bool {
        matches!(self, BudgetOutcome::Unmet { .. })
    }
}

/// Size of a page in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageDimensions {
    /// The viewport at `scale`.
    pub fn scaled(self, scale: f32) -> Self {
        PageDimensions {
            width_pt: self.width_pt * scale,
            height_pt: self.height_pt * scale,
        }
    }
}

/// Outcome of one page within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    Success,
    /// Processed, but the result is incomplete (OCR found no text).
    Partial,
    Failed,
}

/// Per-page record for compression runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    pub status: PageStatus,
    /// Encoded size of the page image, when it succeeded.
    pub encoded_bytes: Option<usize>,
    pub error: Option<PageError>,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub duration_ms: u64,
}

/// Result of a compression run.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionOutput {
    pub artifact: EncodedArtifact,
    /// One entry per page (a single entry for image sources).
    pub pages: Vec<PageOutcome>,
    pub stats: RunStats,
}

/// What `inspect` reports about a source without processing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub mime: String,
    /// "image" or "PDF".
    pub kind: String,
    pub byte_len: usize,
    pub page_count: usize,
    /// Natural size of each page (pixels for images, points for PDFs).
    pub pages: Vec<PageDimensions>,
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Recognised text of one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_num: usize,
    pub status: PageStatus,
    pub text: String,
    /// Mean engine confidence in 0.0–1.0, if the engine reports one.
    pub confidence: Option<f32>,
    pub error: Option<PageError>,
}

/// Result of an OCR extraction run.
///
/// Page texts stay editable ([`ExtractionResult::set_page_text`]) so a user
/// can correct recognition mistakes before the Word document is assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub source_filename: String,
    pub pages: Vec<PageText>,
    pub stats: RunStats,
}

impl ExtractionResult {
    /// All page texts in page order, separated by a blank line. Failed pages
    /// contribute nothing.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .filter(|p| p.status != PageStatus::Failed)
            .map(|p| p.text.trim_end())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Replace the text of a page (manual correction).
    ///
    /// A corrected page counts as a success even if OCR originally failed;
    /// the original error is kept for reference.
    pub fn set_page_text(
        &mut self,
        page_num: usize,
        text: impl Into<String>,
    ) -> Result<(), DocToolsError> {
        let total = self.pages.len();
        let page = self
            .pages
            .iter_mut()
            .find(|p| p.page_num == page_num)
            .ok_or(DocToolsError::PageIndex {
                page: page_num,
                total,
            })?;
        page.text = text.into();
        page.status = if page.text.trim().is_empty() {
            PageStatus::Partial
        } else {
            PageStatus::Success
        };
        Ok(())
    }

    pub fn succeeded_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.status != PageStatus::Failed)
            .count()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .count()
    }

    /// Download name for the assembled document: `<stem>.docx`.
    pub fn docx_filename(&self) -> String {
        extraction_filename(&file_stem(&self.source_filename))
    }

    /// Assemble the (possibly corrected) text into a `.docx` document,
    /// one paragraph per line.
    pub fn to_word_document(&self) -> Result<EncodedArtifact, DocToolsError> {
        let blocks: Vec<&str> = self
            .pages
            .iter()
            .filter(|p| p.status != PageStatus::Failed)
            .map(|p| p.text.as_str())
            .collect();
        let bytes = assemble::build_word_document(&blocks)?;
        Ok(EncodedArtifact {
            bytes,
            format: OutputFormat::Docx,
            filename: self.docx_filename(),
            width: 0,
            height: 0,
            quality: None,
            budget: BudgetOutcome::NotRequested,
        })
    }
}

// ── Naming ───────────────────────────────────────────────────────────────

/// `<stem>-converted.<ext>`
pub fn converted_filename(stem: &str, format: OutputFormat) -> String {
    format!("{}-converted.{}", stem, format.extension())
}

/// `min-<stem>.<ext>`. A JPEG result keeps a source's `.jpeg` spelling.
pub fn compressed_image_filename(original: &str, format: OutputFormat) -> String {
    let ext = match original.rsplit_once('.') {
        Some((_, "jpeg")) if format == OutputFormat::Jpeg => "jpeg",
        _ => format.extension(),
    };
    format!("min-{}.{}", file_stem(original), ext)
}

/// `compressed-<original filename>`
pub fn compressed_pdf_filename(original: &str) -> String {
    format!("compressed-{}", original)
}

/// `<stem>.docx`
pub fn extraction_filename(stem: &str) -> String {
    format!("{}.{}", stem, OutputFormat::Docx.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page_num: usize, status: PageStatus, text: &str) -> PageText {
        PageText {
            page_num,
            status,
            text: text.to_string(),
            confidence: None,
            error: None,
        }
    }

    fn sample() -> ExtractionResult {
        ExtractionResult {
            source_filename: "scan.pdf".into(),
            pages: vec![
                page(1, PageStatus::Success, "first page\nline two\n"),
                page(2, PageStatus::Failed, ""),
                page(3, PageStatus::Success, "third"),
            ],
            stats: RunStats::default(),
        }
    }

    #[test]
    fn naming_rules() {
        assert_eq!(converted_filename("cat", OutputFormat::WebP), "cat-converted.webp");
        assert_eq!(compressed_image_filename("photo.png", OutputFormat::Jpeg), "min-photo.jpg");
        assert_eq!(compressed_pdf_filename("deck.pdf"), "compressed-deck.pdf");
        assert_eq!(extraction_filename("scan"), "scan.docx");
    }

    #[test]
    fn compressed_jpeg_keeps_source_spelling() {
        assert_eq!(compressed_image_filename("photo.jpeg", OutputFormat::Jpeg), "min-photo.jpeg");
        assert_eq!(compressed_image_filename("photo.jpg", OutputFormat::Jpeg), "min-photo.jpg");
        assert_eq!(compressed_image_filename("photo.JPEG", OutputFormat::Jpeg), "min-photo.jpg");
        assert_eq!(compressed_image_filename("icon.webp", OutputFormat::Jpeg), "min-icon.jpg");
        assert_eq!(compressed_image_filename("a.b.jpeg", OutputFormat::Jpeg), "min-a.b.jpeg");
        assert_eq!(compressed_image_filename("photo.jpeg", OutputFormat::Png), "min-photo.png");
    }

    #[test]
    fn text_skips_failed_pages_and_keeps_order() {
        assert_eq!(sample().text(), "first page\nline two\n\nthird");
    }

    #[test]
    fn manual_correction_updates_status() {
        let mut result = sample();
        result.set_page_text(2, "typed by hand").unwrap();
        assert_eq!(result.pages[1].status, PageStatus::Success);
        assert_eq!(result.failed_pages(), 0);
        assert!(result.text().contains("typed by hand"));
    }

    #[test]
    fn correcting_unknown_page_is_an_error() {
        let mut result = sample();
        let err = result.set_page_text(9, "x").unwrap_err();
        assert!(matches!(err, DocToolsError::PageIndex { page: 9, total: 3 }));
    }

    #[test]
    fn budget_outcome_flags() {
        assert!(!BudgetOutcome::NotRequested.is_unmet());
        assert!(BudgetOutcome::Unmet {
            target_bytes: 10,
            achieved_bytes: 20,
            final_quality: 10
        }
        .is_unmet());
    }

    #[test]
    fn word_document_named_after_source() {
        let artifact = sample().to_word_document().unwrap();
        assert_eq!(artifact.filename, "scan.docx");
        assert_eq!(artifact.format, OutputFormat::Docx);
        assert!(artifact.bytes.starts_with(b"PK"));
    }
}
