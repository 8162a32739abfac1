//! End-to-end tests against the real engines.
//!
//! These need the pdfium shared library and the `tesseract` binary on the
//! machine, so they are gated behind the `E2E_ENABLED` environment variable
//! and do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 LD_LIBRARY_PATH=. cargo test --test e2e -- --nocapture
//!
//! The PDFs are generated on the fly with the crate's own PDF writer, so no
//! fixture files are needed.

use edgequake_doctools::pipeline::assemble::{build_compressed_pdf, EncodedPage};
use edgequake_doctools::pipeline::encode::encode_surface;
use edgequake_doctools::{
    compress_file, extract_file, inspect_file, write_artifact, DocToolsError, NoopProgress,
    OutputFormat, PageDimensions, PageStatus, PipelineConfig,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

macro_rules! e2e_skip_unless_enabled {
    () => {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    };
}

/// Write a PDF with one solid page per `(width_pt, height_pt)` entry.
fn write_pdf(dir: &Path, name: &str, sizes: &[(f32, f32)]) -> PathBuf {
    let pages: Vec<EncodedPage> = sizes
        .iter()
        .enumerate()
        .map(|(i, &(w, h))| {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
                w as u32,
                h as u32,
                Rgb([(i * 60) as u8, 120, 180]),
            ));
            EncodedPage {
                jpeg: encode_surface(&img, OutputFormat::Jpeg, 85, [255; 3]).unwrap(),
                width_px: w as u32,
                height_px: h as u32,
                size: PageDimensions {
                    width_pt: w,
                    height_pt: h,
                },
            }
        })
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, build_compressed_pdf(&pages).unwrap()).unwrap();
    path
}

fn write_blank_png(dir: &Path, name: &str) -> PathBuf {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 80, Rgb([255, 255, 255])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    let path = dir.join(name);
    std::fs::write(&path, buf).unwrap();
    path
}

// ── pdfium ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_generated_pdf() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(dir.path(), "two.pdf", &[(612.0, 792.0), (842.0, 595.0)]);

    let info = inspect_file(&path, &PipelineConfig::default())
        .await
        .expect("inspect should succeed");

    assert_eq!(info.kind, "PDF");
    assert_eq!(info.page_count, 2);
    assert!((info.pages[1].width_pt - 842.0).abs() < 0.5);
    println!("Info: {:?}", info);
}

#[tokio::test]
async fn test_compress_generated_pdf() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let path = write_pdf(dir.path(), "scan.pdf", &[(300.0, 400.0); 3]);

    let out = compress_file(&path, None, &PipelineConfig::default(), &NoopProgress)
        .await
        .expect("compression should succeed");

    assert_eq!(out.artifact.filename, "compressed-scan.pdf");
    assert_eq!(out.stats.processed_pages, 3);

    let written = write_artifact(&out.artifact, dir.path().join(&out.artifact.filename))
        .await
        .unwrap();
    let doc = lopdf::Document::load(&written).unwrap();
    assert_eq!(doc.get_pages().len(), 3);

    // Output pages are the render viewport: 1.5 × the source page.
    for page_id in doc.get_pages().values() {
        let mediabox = doc
            .get_object(*page_id)
            .and_then(|o| o.as_dict())
            .and_then(|d| d.get(b"MediaBox"))
            .and_then(|o| o.as_array())
            .unwrap();
        assert!((mediabox[2].as_float().unwrap() - 450.0).abs() < 0.5);
        assert!((mediabox[3].as_float().unwrap() - 600.0).abs() < 0.5);
    }
}

#[tokio::test]
async fn test_garbage_pdf_is_a_decode_error() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.pdf");
    std::fs::write(&path, b"%PDF-1.7\nthis is not a pdf body").unwrap();

    let err = inspect_file(&path, &PipelineConfig::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, DocToolsError::Decode { .. } | DocToolsError::PasswordRequired),
        "got {err:?}"
    );
}

// ── tesseract ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_blank_image_extracts_as_partial() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let path = write_blank_png(dir.path(), "blank.png");

    let result = extract_file(&path, &PipelineConfig::default(), &NoopProgress)
        .await
        .expect("extraction should succeed");

    assert_eq!(result.pages.len(), 1);
    assert_eq!(result.pages[0].status, PageStatus::Partial);
    assert_eq!(result.docx_filename(), "blank.docx");
}

#[tokio::test]
async fn test_missing_language_pack_is_reported() {
    e2e_skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let path = write_blank_png(dir.path(), "blank.png");
    let config = PipelineConfig::builder()
        .ocr_language("zzz")
        .build()
        .unwrap();

    let err = extract_file(&path, &config, &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, DocToolsError::OcrUnavailable { .. }), "got {err:?}");
}
