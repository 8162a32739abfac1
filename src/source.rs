//! Source documents: the bytes a run operates on, classified once.
//!
//! The file type is sniffed from content (not the extension, not a
//! caller-declared MIME string) and fixed as a closed [`SourceKind`] at load
//! time. Every later stage matches on the variant instead of re-inspecting
//! MIME strings.
//!
//! A `SourceDocument` is cheap to clone (the bytes sit behind an `Arc`) and
//! carries the single-flight flag for that document: [`SourceDocument::try_begin_run`]
//! hands out at most one [`RunGuard`] at a time, across all clones.

use crate::error::DocToolsError;
use image::ImageFormat;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// What kind of document the bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A single raster image in the given container format.
    Image(ImageFormat),
    /// A PDF document with one or more pages.
    Pdf,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Image(_) => "image",
            SourceKind::Pdf => "PDF",
        }
    }
}

/// An immutable, loaded input file.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    inner: Arc<SourceInner>,
}

#[derive(Debug)]
struct SourceInner {
    bytes: Vec<u8>,
    filename: String,
    mime: String,
    kind: SourceKind,
    page_count: OnceLock<usize>,
    busy: AtomicBool,
}

impl SourceDocument {
    /// Classify `bytes` and wrap them as a source.
    ///
    /// # Errors
    /// [`DocToolsError::UnsupportedType`] when the content is neither a PDF
    /// nor an image format this build can decode.
    pub fn from_bytes(bytes: Vec<u8>, filename: impl Into<String>) -> Result<Self, DocToolsError> {
        let filename = filename.into();
        let (kind, mime) = sniff(&bytes)?;
        debug!("Loaded '{}' as {} ({} bytes)", filename, mime, bytes.len());

        let page_count = OnceLock::new();
        if let SourceKind::Image(_) = kind {
            let _ = page_count.set(1);
        }

        Ok(Self {
            inner: Arc::new(SourceInner {
                bytes,
                filename,
                mime,
                kind,
                page_count,
                busy: AtomicBool::new(false),
            }),
        })
    }

    /// Read a local file and classify it.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, DocToolsError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DocToolsError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => DocToolsError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Self::from_bytes(bytes, filename)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.inner.bytes.len()
    }

    /// Original file name, including extension.
    pub fn filename(&self) -> &str {
        &self.inner.filename
    }

    /// File name without its last extension.
    pub fn stem(&self) -> String {
        file_stem(&self.inner.filename)
    }

    /// Sniffed MIME type, e.g. `image/png` or `application/pdf`.
    pub fn mime(&self) -> &str {
        &self.inner.mime
    }

    pub fn kind(&self) -> SourceKind {
        self.inner.kind
    }

    /// Page count: always 1 for images; known for PDFs once a renderer has
    /// opened the document.
    pub fn page_count(&self) -> Option<usize> {
        self.inner.page_count.get().copied()
    }

    pub(crate) fn record_page_count(&self, n: usize) {
        let _ = self.inner.page_count.set(n);
    }

    /// Claim the document for a run.
    ///
    /// # Errors
    /// [`DocToolsError::RunInProgress`] if another guard is alive.
    pub fn try_begin_run(&self) -> Result<RunGuard, DocToolsError> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DocToolsError::RunInProgress)?;
        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Whether a run currently holds this document.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }
}

/// Proof that the holder is the only active run on a document.
///
/// Released on drop, which includes a run future being dropped mid-flight.
#[derive(Debug)]
pub struct RunGuard {
    inner: Arc<SourceInner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
    }
}

/// Sniff content type from magic bytes.
pub fn sniff(bytes: &[u8]) -> Result<(SourceKind, String), DocToolsError> {
    let Some(detected) = infer::get(bytes) else {
        return Err(DocToolsError::UnsupportedType {
            mime: "application/octet-stream".to_string(),
        });
    };
    let mime = detected.mime_type();

    if mime == "application/pdf" {
        return Ok((SourceKind::Pdf, mime.to_string()));
    }

    if detected.matcher_type() == infer::MatcherType::Image {
        if let Some(format) = ImageFormat::from_mime_type(mime) {
            if format.reading_enabled() {
                return Ok((SourceKind::Image(format), mime.to_string()));
            }
        }
    }

    Err(DocToolsError::UnsupportedType {
        mime: mime.to_string(),
    })
}

/// Strip the last extension; names without one are returned unchanged.
pub fn file_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn sniffs_png_as_image() {
        let (kind, mime) = sniff(&png_bytes()).unwrap();
        assert_eq!(kind, SourceKind::Image(ImageFormat::Png));
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn sniffs_pdf_magic() {
        let (kind, mime) = sniff(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").unwrap();
        assert_eq!(kind, SourceKind::Pdf);
        assert_eq!(mime, "application/pdf");
    }

    #[test]
    fn rejects_plain_text() {
        let err = sniff(b"hello, this is not an image").unwrap_err();
        assert!(matches!(err, DocToolsError::UnsupportedType { .. }));
    }

    #[test]
    fn rejects_non_image_known_types() {
        // ZIP local file header
        let err = sniff(b"PK\x03\x04\x14\x00\x00\x00\x08\x00").unwrap_err();
        match err {
            DocToolsError::UnsupportedType { mime } => assert!(!mime.starts_with("image/")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn image_sources_have_one_page() {
        let doc = SourceDocument::from_bytes(png_bytes(), "photo.png").unwrap();
        assert_eq!(doc.page_count(), Some(1));
        assert_eq!(doc.stem(), "photo");
        assert_eq!(doc.kind().label(), "image");
    }

    #[test]
    fn single_flight_guard_is_shared_across_clones() {
        let doc = SourceDocument::from_bytes(png_bytes(), "a.png").unwrap();
        let clone = doc.clone();

        let guard = doc.try_begin_run().unwrap();
        assert!(clone.is_busy());
        assert!(matches!(
            clone.try_begin_run(),
            Err(DocToolsError::RunInProgress)
        ));

        drop(guard);
        assert!(!doc.is_busy());
        assert!(clone.try_begin_run().is_ok());
    }

    #[test]
    fn stem_handles_odd_names() {
        assert_eq!(file_stem("report.final.pdf"), "report.final");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(""), "document");
    }
}
