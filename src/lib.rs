//! # edgequake-doctools
//!
//! On-device document tools for images and PDFs: format conversion,
//! size-targeted compression, and OCR text extraction into a Word document.
//!
//! ## Why this crate?
//!
//! The usual answer to "make this scan smaller" or "get the text out of this
//! photo" is to upload it somewhere. Nothing here leaves the machine: PDF
//! pages are rasterised with pdfium, images are re-encoded with `image`, and
//! text is recognised by a local OCR engine (the `tesseract` binary, or the
//! pure-Rust `ocrs` engine behind a feature flag).
//!
//! ## Pipeline Overview
//!
//! ```text
//! image / PDF bytes
//!  │
//!  ├─ 1. Load      sniff the MIME type from content, reject anything else
//!  ├─ 2. Render    decode the image or rasterise each PDF page (spawn_blocking)
//!  ├─ 3a. Encode   one format conversion, or walk the quality ladder to a byte budget
//!  ├─ 3b. OCR      one engine session per run, one recognition per page
//!  ├─ 4. Clean     deterministic OCR text cleanup
//!  └─ 5. Assemble  image-only PDF or a .docx with one paragraph per line
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doctools::{
//!     compress_file, write_artifact, CompressionTarget, NoopProgress, PipelineConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let target = CompressionTarget::bytes(200 * 1024);
//!     let output = compress_file("photo.png", Some(target), &config, &NoopProgress).await?;
//!     if output.artifact.budget.is_unmet() {
//!         eprintln!("budget not reachable, kept the smallest attempt");
//!     }
//!     write_artifact(&output.artifact, &output.artifact.filename).await?;
//!     Ok(())
//! }
//! ```
//!
//! For explicit state (a run that can be inspected, reset and reused) or to
//! swap the raster or OCR engine, drive an [`Orchestrator`] with a
//! [`PipelineRun`] directly.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doctools` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `ocrs`  | off     | Pure-Rust OCR backend (ocrs + rten) as an alternative to `tesseract` |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doctools = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OcrBackend, PipelineConfig, PipelineConfigBuilder, QualityLadder};
pub use convert::{
    compress_file, compress_file_sync, convert_file, default_output_path, extract_file,
    inspect_file, write_artifact,
};
pub use error::{DocToolsError, PageError};
pub use orchestrator::{Orchestrator, PipelineRun, RunState};
pub use output::{
    BudgetOutcome, CompressionOutput, DocumentInfo, EncodedArtifact, ExtractionResult,
    PageDimensions, PageOutcome, PageStatus, PageText, RunStats,
};
pub use pipeline::encode::{CompressionTarget, OutputFormat};
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, ProgressState, Stage};
pub use source::{SourceDocument, SourceKind};
pub use stream::{progress_channel, ProgressStream};
