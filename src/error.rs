//! Error types for the edgequake-doctools library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocToolsError`]: **Fatal**: the run cannot proceed or cannot deliver
//!   an artifact (unsupported file type, corrupt bytes, packing failure).
//!   Returned as `Err(DocToolsError)` from the orchestrator operations.
//!
//! * [`PageError`]: **Non-fatal**: a single page failed (render glitch,
//!   OCR engine crash) but the other pages are fine. Stored inside
//!   [`crate::output::PageOutcome`] so callers can inspect partial success
//!   rather than losing the whole document to one bad page.
//!
//! An unreachable byte budget is neither: the encoder still returns an
//! artifact and flags it with [`crate::output::BudgetOutcome::Unmet`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doctools library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DocToolsError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Sniffed content type is neither a decodable image nor a PDF.
    #[error("Unsupported file type '{mime}'\nAccepted: PNG, JPEG, WebP, GIF, BMP, TIFF images or PDF documents.")]
    UnsupportedType { mime: String },

    /// The loaded document kind cannot be used with the requested tool.
    #[error("'{operation}' is not available for {kind} sources")]
    UnsupportedOperation {
        operation: &'static str,
        kind: &'static str,
    },

    /// Bytes are not a valid image or PDF.
    #[error("Could not decode source: {detail}")]
    Decode { detail: String },

    /// PDF requires a password but none was provided, or it was wrong.
    #[error("PDF is encrypted and the password is missing or wrong.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// Requested page index exceeds the page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageIndex { page: usize, total: usize },

    // ── Run errors ────────────────────────────────────────────────────────
    /// No document has been loaded into the run.
    #[error("No document loaded; load a file before starting a run")]
    NoDocument,

    /// Another run is already active for this document.
    #[error("A run is already in progress for this document")]
    RunInProgress,

    /// Every page failed; there is nothing to deliver.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Encoding a single-image source failed.
    #[error("Failed to encode image: {detail}")]
    Encode { detail: String },

    /// Output document/PDF packing failed after all pages were processed.
    #[error("Failed to assemble output document: {detail}")]
    Assembly { detail: String },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The OCR engine could not be started (binary or models missing).
    #[error("OCR backend '{backend}' is not available.\n{hint}")]
    OcrUnavailable { backend: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF sources need the pdfium shared library. You can:\n\
  • Place libpdfium next to the binary or in the working directory.\n\
  • Install it system-wide so the dynamic loader finds it.\n\
  • Pass --pdfium-lib /path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageOutcome`] when a page fails.
/// The run continues unless ALL pages fail.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Encoding the rendered page failed.
    #[error("Page {page}: encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The OCR engine failed on this page.
    #[error("Page {page}: text recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::EncodeFailed { page, .. }
            | PageError::RecognitionFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pages_failed_display() {
        let e = DocToolsError::AllPagesFailed {
            total: 5,
            first_error: "Page 1: rasterisation failed: bad xref".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 5 pages"), "got: {msg}");
        assert!(msg.contains("bad xref"));
    }

    #[test]
    fn unsupported_type_mentions_mime() {
        let e = DocToolsError::UnsupportedType {
            mime: "text/plain".into(),
        };
        assert!(e.to_string().contains("text/plain"));
    }

    #[test]
    fn page_index_display() {
        let e = DocToolsError::PageIndex { page: 7, total: 3 };
        assert!(e.to_string().contains("Page 7"));
        assert!(e.to_string().contains("3 pages"));
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::RecognitionFailed {
            page: 3,
            detail: "engine crashed".into(),
        };
        assert_eq!(e.page(), 3);
        assert!(e.to_string().starts_with("Page 3"));
    }
}
