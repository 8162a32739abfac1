//! Pipeline stages for conversion, compression and extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (a different OCR engine, a fake renderer in tests)
//! without touching the other stages.
//!
//! ## Data Flow
//!
//! ```text
//!          ┌──▶ encode ─────────────────────────▶ assemble (PDF)
//! render ──┤
//!          └──▶ ocr ──▶ postprocess ────────────▶ assemble (docx)
//! (image/pdfium) (tesseract/ocrs) (cleanup)
//! ```
//!
//! 1. [`render`]: decode an image or rasterise one PDF page; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]: encode a surface, optionally walking the quality ladder
//!    down to a byte budget
//! 3. [`ocr`]: recognise text with an engine started once per run
//! 4. [`postprocess`]: deterministic cleanup of raw OCR text
//! 5. [`assemble`]: pack page results into a `.docx` or an image-only PDF

pub mod assemble;
pub mod encode;
pub mod ocr;
pub mod postprocess;
pub mod render;
