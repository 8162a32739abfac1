//! Pipeline orchestration: one run, start to finish.
//!
//! A [`PipelineRun`] is the explicit state of one user session: the loaded
//! source, where the run is in its lifecycle, and the last progress. The
//! [`Orchestrator`] owns the engines and configuration and drives a run
//! through one of three tools:
//!
//! ```text
//! convert : render ──▶ encode (fixed quality)
//! compress: render ──▶ encode_to_budget            (per page for PDFs) ──▶ assemble PDF
//! extract : start OCR ──▶ render ──▶ recognize ──▶ cleanup (per page) ──▶ stop OCR
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──load──▶ Loaded ──run──▶ Running ──▶ Succeeded | PartiallySucceeded | Failed
//!   ▲                                              │ (run again, or reset)
//!   └───────────────────reset──────────────────────┘
//! ```
//!
//! Pages are processed strictly one after another: one page surface is
//! resident at a time and progress accounting stays simple. A page that
//! fails to render, encode or recognise is recorded and skipped; the run
//! only fails when no page at all could be processed.

use crate::config::{to_percent, PipelineConfig};
use crate::error::{DocToolsError, PageError};
use crate::output::{
    compressed_image_filename, compressed_pdf_filename, converted_filename, BudgetOutcome,
    CompressionOutput, DocumentInfo, EncodedArtifact, ExtractionResult, PageOutcome, PageStatus,
    PageText, RunStats,
};
use crate::pipeline::assemble::{build_compressed_pdf, pdf_overhead, EncodedPage};
use crate::pipeline::encode::{
    encode_surface_blocking, encode_to_budget_blocking, BudgetRequest, CompressionTarget,
    OutputFormat,
};
use crate::pipeline::ocr::{provider_for, OcrProvider, OcrSession};
use crate::pipeline::postprocess::clean_ocr_text;
use crate::pipeline::render::{DefaultRasterEngine, PageRenderer, RasterEngine};
use crate::progress::{ProgressSink, ProgressState, ProgressTracker, Stage};
use crate::source::{RunGuard, SourceDocument, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Share of the progress bar spent before the first page (opening the
/// source, starting engines).
const PAGES_START: f32 = 5.0;
/// Share reached when every page is done; the rest is assembly.
const PAGES_END: f32 = 90.0;

/// Where a [`PipelineRun`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Loaded,
    Running,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::PartiallySucceeded | RunState::Failed
        )
    }
}

/// The state of one session: a loaded document and its latest run.
///
/// Operations take it by `&mut`, so a run cannot be started on it while
/// another is in flight. Clones of the same [`SourceDocument`] loaded into
/// different runs are additionally guarded by the document's run flag.
#[derive(Debug)]
pub struct PipelineRun {
    state: RunState,
    source: Option<SourceDocument>,
    progress: ProgressState,
    last_error: Option<String>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            source: None,
            progress: ProgressState::default(),
            last_error: None,
        }
    }

    /// Load a file from bytes, classifying it by content.
    ///
    /// On an unsupported type the run goes back to `Idle` and the error is
    /// both returned and kept in [`PipelineRun::last_error`].
    pub fn load(
        &mut self,
        bytes: Vec<u8>,
        filename: impl Into<String>,
    ) -> Result<SourceKind, DocToolsError> {
        let loaded = SourceDocument::from_bytes(bytes, filename);
        self.accept(loaded)
    }

    /// Load a local file.
    pub async fn load_path(&mut self, path: impl AsRef<Path>) -> Result<SourceKind, DocToolsError> {
        let loaded = SourceDocument::from_path(path).await;
        self.accept(loaded)
    }

    /// Load an already classified document.
    pub fn load_source(&mut self, source: SourceDocument) -> SourceKind {
        let kind = source.kind();
        self.install(source);
        kind
    }

    fn accept(
        &mut self,
        loaded: Result<SourceDocument, DocToolsError>,
    ) -> Result<SourceKind, DocToolsError> {
        match loaded {
            Ok(source) => Ok(self.load_source(source)),
            Err(e) => {
                self.reset();
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn install(&mut self, source: SourceDocument) {
        info!(
            "Loaded '{}' ({}, {} bytes)",
            source.filename(),
            source.mime(),
            source.byte_len()
        );
        self.source = Some(source);
        self.state = RunState::Loaded;
        self.progress = ProgressState::default();
        self.last_error = None;
    }

    /// Drop the document and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = RunState::Idle;
        self.source = None;
        self.progress = ProgressState::default();
        self.last_error = None;
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn source(&self) -> Option<&SourceDocument> {
        self.source.as_ref()
    }

    /// Progress as of the end of the last run.
    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    /// User-facing message of the last fatal error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Enter `Running`: claims the document and resets progress.
    fn begin(&mut self) -> Result<(SourceDocument, RunGuard), DocToolsError> {
        let source = self.source.clone().ok_or(DocToolsError::NoDocument)?;
        let guard = source.try_begin_run()?;
        self.state = RunState::Running;
        self.progress = ProgressState::default();
        self.last_error = None;
        Ok((source, guard))
    }

    /// Leave `Running` for the terminal state matching `result`.
    fn end<T>(
        &mut self,
        result: &Result<Finished<T>, DocToolsError>,
        progress: ProgressState,
    ) {
        self.progress = progress;
        self.state = match result {
            Ok(f) if f.partial => RunState::PartiallySucceeded,
            Ok(_) => RunState::Succeeded,
            Err(e) => {
                self.last_error = Some(e.to_string());
                RunState::Failed
            }
        };
        info!("Run finished: {:?}", self.state);
    }
}

/// A completed run's value and whether any page failed.
struct Finished<T> {
    value: T,
    partial: bool,
}

impl<T> Finished<T> {
    fn complete(value: T) -> Self {
        Self {
            value,
            partial: false,
        }
    }
}

/// Drives runs. Holds the configuration and the engines.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doctools::{
///     CompressionTarget, NoopProgress, Orchestrator, PipelineConfig, PipelineRun,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(PipelineConfig::default());
/// let mut run = PipelineRun::new();
/// run.load_path("photo.png").await?;
///
/// let output = orchestrator
///     .compress(&mut run, Some(CompressionTarget::bytes(50 * 1024)), &NoopProgress)
///     .await?;
/// println!("{} → {} bytes", output.artifact.filename, output.artifact.size());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    config: PipelineConfig,
    raster: Arc<dyn RasterEngine>,
    ocr: Option<Arc<dyn OcrProvider>>,
}

impl Orchestrator {
    /// Use the default engines: `image` + pdfium for rendering, and the OCR
    /// backend named in `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let raster = Arc::new(DefaultRasterEngine::from_config(&config));
        Self {
            config,
            raster,
            ocr: None,
        }
    }

    pub fn with_raster_engine(mut self, engine: impl RasterEngine + 'static) -> Self {
        self.raster = Arc::new(engine);
        self
    }

    pub fn with_ocr_provider(mut self, provider: impl OcrProvider + 'static) -> Self {
        self.ocr = Some(Arc::new(provider));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── convert ──────────────────────────────────────────────────────────

    /// Re-encode an image source into `format` at `convert_quality`.
    ///
    /// # Errors
    /// [`DocToolsError::UnsupportedOperation`] for PDF sources.
    pub async fn convert(
        &self,
        run: &mut PipelineRun,
        format: OutputFormat,
        sink: &dyn ProgressSink,
    ) -> Result<EncodedArtifact, DocToolsError> {
        require_image(run, "convert")?;
        if !matches!(
            format,
            OutputFormat::Jpeg | OutputFormat::Png | OutputFormat::WebP
        ) {
            return Err(DocToolsError::InvalidConfig(format!(
                "cannot convert an image to {:?}",
                format
            )));
        }

        let (source, _guard) = run.begin()?;
        let tracker = ProgressTracker::start(sink, "Loading image");
        let result = self.convert_inner(&source, format, &tracker).await;
        if result.is_ok() {
            tracker.finish();
        }
        run.end(&result, tracker.state());
        result.map(|f| f.value)
    }

    async fn convert_inner(
        &self,
        source: &SourceDocument,
        format: OutputFormat,
        tracker: &ProgressTracker<'_>,
    ) -> Result<Finished<EncodedArtifact>, DocToolsError> {
        let renderer = self.raster.open(source).await?;
        tracker.report(Stage::Rendering, "Decoding image", 20.0);
        let surface = renderer.render_page(0, 1.0).await?;

        let quality = to_percent(self.config.convert_quality);
        tracker.report(Stage::Encoding, format!("Encoding {}", format.extension()), 50.0);
        let (width, height) = (surface.width(), surface.height());
        let bytes =
            encode_surface_blocking(surface.image, format, quality, self.config.background).await?;

        info!(
            "Converted '{}' → {} ({} bytes)",
            source.filename(),
            format.extension(),
            bytes.len()
        );
        Ok(Finished::complete(EncodedArtifact {
            bytes,
            format,
            filename: converted_filename(&source.stem(), format),
            width,
            height,
            quality: format.is_lossy().then_some(quality),
            budget: BudgetOutcome::NotRequested,
        }))
    }

    // ── compress ─────────────────────────────────────────────────────────

    /// Compress the loaded source.
    ///
    /// Images are encoded as JPEG at or under `target.target_bytes`,
    /// optionally resized first. PDFs are rasterised page by page at
    /// `compress_scale` and repacked as an image-only PDF of the same
    /// viewport size. A target bounds the whole file: what the container
    /// leaves is shared out across pages. Without one every page uses
    /// `pdf_page_quality`.
    ///
    /// # Errors
    /// [`DocToolsError::InvalidConfig`] for an image without a target;
    /// [`DocToolsError::AllPagesFailed`] when no PDF page survived.
    pub async fn compress(
        &self,
        run: &mut PipelineRun,
        target: Option<CompressionTarget>,
        sink: &dyn ProgressSink,
    ) -> Result<CompressionOutput, DocToolsError> {
        let kind = run
            .source()
            .map(|s| s.kind())
            .ok_or(DocToolsError::NoDocument)?;
        if matches!(kind, SourceKind::Image(_)) && target.is_none() {
            return Err(DocToolsError::InvalidConfig(
                "image compression needs a target size".into(),
            ));
        }

        let (source, _guard) = run.begin()?;
        let tracker = ProgressTracker::start(sink, format!("Loading {}", kind.label()));
        let started = Instant::now();
        let result = match (kind, target) {
            (SourceKind::Image(_), Some(target)) => {
                self.compress_image(&source, target, &tracker).await
            }
            _ => self.compress_pdf(&source, target, &tracker).await,
        }
        .map(|mut f| {
            f.value.stats.duration_ms = started.elapsed().as_millis() as u64;
            f
        });
        if result.is_ok() {
            tracker.finish();
        }
        run.end(&result, tracker.state());
        result.map(|f| f.value)
    }

    async fn compress_image(
        &self,
        source: &SourceDocument,
        target: CompressionTarget,
        tracker: &ProgressTracker<'_>,
    ) -> Result<Finished<CompressionOutput>, DocToolsError> {
        let renderer = self.raster.open(source).await?;
        tracker.report(Stage::Rendering, "Decoding image", 10.0);
        let surface = renderer.render_page(0, 1.0).await?;

        let format = OutputFormat::Png.budget_format();
        let request = BudgetRequest {
            target_bytes: target.target_bytes,
            format,
            dimensions: target.resolve_dimensions((surface.width(), surface.height())),
            ladder: self.config.quality_ladder,
            background: self.config.background,
        };

        let encoded = encode_to_budget_blocking(surface.image, request, |attempt| {
            let done = attempt.attempt as f32 / attempt.max_attempts.max(1) as f32;
            tracker.report(
                Stage::Encoding,
                format!("Compressing (quality {}%)", attempt.quality),
                20.0 + 75.0 * done,
            );
        })
        .await?;

        info!(
            "Compressed '{}': {} → {} bytes ({:?})",
            source.filename(),
            source.byte_len(),
            encoded.bytes.len(),
            encoded.budget
        );

        let size = encoded.bytes.len();
        let artifact = EncodedArtifact {
            bytes: encoded.bytes,
            format,
            filename: compressed_image_filename(source.filename(), format),
            width: encoded.width,
            height: encoded.height,
            quality: encoded.quality,
            budget: encoded.budget,
        };
        Ok(Finished::complete(CompressionOutput {
            artifact,
            pages: vec![PageOutcome {
                page_num: 1,
                status: PageStatus::Success,
                encoded_bytes: Some(size),
                error: None,
            }],
            stats: RunStats {
                total_pages: 1,
                processed_pages: 1,
                failed_pages: 0,
                duration_ms: 0,
            },
        }))
    }

    async fn compress_pdf(
        &self,
        source: &SourceDocument,
        target: Option<CompressionTarget>,
        tracker: &ProgressTracker<'_>,
    ) -> Result<Finished<CompressionOutput>, DocToolsError> {
        let renderer = self.raster.open(source).await?;
        let total = renderer.page_count();
        if let Some(t) = target.filter(|t| t.width.is_some() || t.height.is_some()) {
            warn!(
                "Ignoring requested dimensions {:?}x{:?} for PDF compression",
                t.width, t.height
            );
        }

        // Budget left for JPEG data once the container is paid for. Each page
        // gets an even share of what the pages before it left over.
        let mut remaining = match target {
            Some(t) => {
                let viewports: Vec<_> = (0..total)
                    .filter_map(|i| renderer.page_size(i).ok())
                    .map(|size| size.scaled(self.config.compress_scale))
                    .collect();
                let overhead = pdf_overhead(&viewports)?;
                debug!("PDF container overhead: {} bytes", overhead);
                Some(t.target_bytes.saturating_sub(overhead))
            }
            None => None,
        };
        let fixed_quality = to_percent(self.config.pdf_page_quality);
        let band = (PAGES_START, PAGES_END);
        tracker.report(Stage::Loading, format!("Loaded {} pages", total), PAGES_START);

        let mut encoded_pages = Vec::with_capacity(total);
        let mut outcomes = Vec::with_capacity(total);
        let mut qualities = Vec::with_capacity(total);

        for index in 0..total {
            let page_num = index + 1;
            let status = format!("Processing page {} of {}", page_num, total);
            tracker.report_pages(Stage::Rendering, status.clone(), index, 0.0, total, band);

            let page_budget = remaining.map(|r| (r / (total - index) as u64).max(1));
            let page = self
                .compress_pdf_page(
                    &*renderer,
                    index,
                    page_budget,
                    fixed_quality,
                    |fraction| {
                        tracker.report_pages(
                            Stage::Encoding,
                            status.clone(),
                            index,
                            fraction,
                            total,
                            band,
                        )
                    },
                )
                .await;

            match page {
                Ok((encoded, quality)) => {
                    if let Some(r) = remaining.as_mut() {
                        *r = r.saturating_sub(encoded.jpeg.len() as u64);
                    }
                    outcomes.push(PageOutcome {
                        page_num,
                        status: PageStatus::Success,
                        encoded_bytes: Some(encoded.jpeg.len()),
                        error: None,
                    });
                    qualities.push(quality);
                    encoded_pages.push(encoded);
                }
                Err(PageFailure::Fatal(e)) => return Err(e),
                Err(PageFailure::Page(e)) => {
                    warn!("{}", e);
                    outcomes.push(PageOutcome {
                        page_num,
                        status: PageStatus::Failed,
                        encoded_bytes: None,
                        error: Some(e),
                    });
                }
            }
            tracker.report_pages(Stage::Encoding, status, index, 1.0, total, band);
        }

        let failed = outcomes.iter().filter(|o| o.status == PageStatus::Failed).count();
        if encoded_pages.is_empty() {
            let errors = outcomes.iter().filter_map(|o| o.error.as_ref());
            return Err(all_pages_failed(total, errors));
        }

        tracker.report(Stage::Assembling, "Building PDF", 95.0);
        let bytes = build_compressed_pdf(&encoded_pages)?;
        let (width, height) = encoded_pages
            .last()
            .map(|p| (p.width_px, p.height_px))
            .unwrap_or_default();

        let min_quality = qualities.iter().copied().min();
        let budget = match target {
            None => BudgetOutcome::NotRequested,
            Some(t) if bytes.len() as u64 <= t.target_bytes => BudgetOutcome::Met {
                target_bytes: t.target_bytes,
            },
            Some(t) => {
                warn!(
                    "PDF budget of {} bytes not reached ({} bytes)",
                    t.target_bytes,
                    bytes.len()
                );
                BudgetOutcome::Unmet {
                    target_bytes: t.target_bytes,
                    achieved_bytes: bytes.len() as u64,
                    final_quality: min_quality.unwrap_or(fixed_quality),
                }
            }
        };

        info!(
            "Compressed '{}': {} pages ({} failed), {} → {} bytes",
            source.filename(),
            total,
            failed,
            source.byte_len(),
            bytes.len()
        );

        let artifact = EncodedArtifact {
            bytes,
            format: OutputFormat::Pdf,
            filename: compressed_pdf_filename(source.filename()),
            width,
            height,
            quality: if target.is_none() {
                Some(fixed_quality)
            } else {
                min_quality
            },
            budget,
        };
        Ok(Finished {
            value: CompressionOutput {
                artifact,
                pages: outcomes,
                stats: RunStats {
                    total_pages: total,
                    processed_pages: total - failed,
                    failed_pages: failed,
                    duration_ms: 0,
                },
            },
            partial: failed > 0,
        })
    }

    /// Render and encode one PDF page. Returns the page and its JPEG quality.
    async fn compress_pdf_page(
        &self,
        renderer: &dyn PageRenderer,
        index: usize,
        budget: Option<u64>,
        fixed_quality: u8,
        on_fraction: impl Fn(f32) + Send + Sync,
    ) -> Result<(EncodedPage, u8), PageFailure> {
        let page = index + 1;
        let surface = renderer
            .render_page(index, self.config.compress_scale)
            .await
            .map_err(|e| PageFailure::render(page, e))?;
        on_fraction(0.3);

        let size = surface.natural_size.scaled(self.config.compress_scale);
        let (width_px, height_px) = (surface.width(), surface.height());
        let encode_failed = |e: DocToolsError| match e {
            DocToolsError::Internal(_) => PageFailure::Fatal(e),
            other => PageFailure::Page(PageError::EncodeFailed {
                page,
                detail: other.to_string(),
            }),
        };

        let (jpeg, quality) = match budget {
            Some(target_bytes) => {
                let request = BudgetRequest {
                    target_bytes,
                    format: OutputFormat::Jpeg,
                    dimensions: None,
                    ladder: self.config.quality_ladder,
                    background: self.config.background,
                };
                let encoded = encode_to_budget_blocking(surface.image, request, |attempt| {
                    let done = attempt.attempt as f32 / attempt.max_attempts.max(1) as f32;
                    on_fraction(0.3 + 0.7 * done);
                })
                .await
                .map_err(encode_failed)?;
                let quality = encoded.quality.unwrap_or(fixed_quality);
                (encoded.bytes, quality)
            }
            None => {
                let bytes = encode_surface_blocking(
                    surface.image,
                    OutputFormat::Jpeg,
                    fixed_quality,
                    self.config.background,
                )
                .await
                .map_err(encode_failed)?;
                (bytes, fixed_quality)
            }
        };
        debug!("Page {}: {} bytes at q{}", page, jpeg.len(), quality);

        Ok((
            EncodedPage {
                jpeg,
                width_px,
                height_px,
                size,
            },
            quality,
        ))
    }

    // ── extract ──────────────────────────────────────────────────────────

    /// Recognise the text of every page.
    ///
    /// The OCR engine is started once, used for every page, and terminated
    /// before this returns, whatever the outcome.
    ///
    /// # Errors
    /// [`DocToolsError::OcrUnavailable`] when the engine cannot start;
    /// [`DocToolsError::AllPagesFailed`] when no page could be recognised.
    pub async fn extract(
        &self,
        run: &mut PipelineRun,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractionResult, DocToolsError> {
        let (source, _guard) = run.begin()?;
        let tracker = ProgressTracker::start(sink, "Loading document");
        let started = Instant::now();
        let result = self
            .extract_inner(&source, &tracker)
            .await
            .map(|mut f| {
                f.value.stats.duration_ms = started.elapsed().as_millis() as u64;
                f
            });
        if result.is_ok() {
            tracker.finish();
        }
        run.end(&result, tracker.state());
        result.map(|f| f.value)
    }

    async fn extract_inner(
        &self,
        source: &SourceDocument,
        tracker: &ProgressTracker<'_>,
    ) -> Result<Finished<ExtractionResult>, DocToolsError> {
        let renderer = self.raster.open(source).await?;
        let provider: Arc<dyn OcrProvider> = match &self.ocr {
            Some(p) => Arc::clone(p),
            None => Arc::from(provider_for(&self.config)?),
        };

        tracker.report(
            Stage::Loading,
            format!("Starting {} engine", provider.name()),
            2.0,
        );
        let mut session = provider.start(&self.config.ocr_language).await?;

        let pages = self
            .recognize_pages(source, &*renderer, &mut *session, tracker)
            .await;
        session.terminate().await;
        let pages = pages?;

        let total = pages.len();
        let failed = pages.iter().filter(|p| p.status == PageStatus::Failed).count();
        if failed == total {
            let errors = pages.iter().filter_map(|p| p.error.as_ref());
            return Err(all_pages_failed(total, errors));
        }

        tracker.report(Stage::Assembling, "Collecting text", 95.0);
        info!(
            "Extracted '{}': {} pages ({} failed)",
            source.filename(),
            total,
            failed
        );

        Ok(Finished {
            value: ExtractionResult {
                source_filename: source.filename().to_string(),
                pages,
                stats: RunStats {
                    total_pages: total,
                    processed_pages: total - failed,
                    failed_pages: failed,
                    duration_ms: 0,
                },
            },
            partial: failed > 0,
        })
    }

    async fn recognize_pages(
        &self,
        source: &SourceDocument,
        renderer: &dyn PageRenderer,
        session: &mut dyn OcrSession,
        tracker: &ProgressTracker<'_>,
    ) -> Result<Vec<PageText>, DocToolsError> {
        let total = renderer.page_count();
        let scale = match source.kind() {
            SourceKind::Image(_) => 1.0,
            SourceKind::Pdf => self.config.ocr_scale,
        };
        let band = (PAGES_START, PAGES_END);
        let mut pages = Vec::with_capacity(total);

        for index in 0..total {
            let page_num = index + 1;
            let status = format!("Recognizing page {} of {}", page_num, total);
            tracker.report_pages(Stage::Rendering, status.clone(), index, 0.0, total, band);

            let recognized = match renderer.render_page(index, scale).await {
                Ok(surface) => {
                    let progress = |fraction: f32| {
                        tracker.report_pages(
                            Stage::Recognizing,
                            status.clone(),
                            index,
                            fraction,
                            total,
                            band,
                        )
                    };
                    session
                        .recognize(&surface, &progress)
                        .await
                        .map_err(PageFailure::Page)
                }
                Err(e) => Err(PageFailure::render(page_num, e)),
            };

            let page = match recognized {
                Ok(r) => {
                    let text = clean_ocr_text(&r.text);
                    let status = if text.is_empty() {
                        warn!("Page {}: no text recognised", page_num);
                        PageStatus::Partial
                    } else {
                        PageStatus::Success
                    };
                    PageText {
                        page_num,
                        status,
                        text,
                        confidence: r.confidence,
                        error: None,
                    }
                }
                Err(PageFailure::Fatal(e)) => return Err(e),
                Err(PageFailure::Page(e)) => {
                    warn!("{}", e);
                    PageText {
                        page_num,
                        status: PageStatus::Failed,
                        text: String::new(),
                        confidence: None,
                        error: Some(e),
                    }
                }
            };
            pages.push(page);
            tracker.report_pages(Stage::Recognizing, status, index, 1.0, total, band);
        }
        Ok(pages)
    }

    // ── inspect ──────────────────────────────────────────────────────────

    /// Describe a source without processing it.
    pub async fn inspect(&self, source: &SourceDocument) -> Result<DocumentInfo, DocToolsError> {
        let renderer = self.raster.open(source).await?;
        let pages = (0..renderer.page_count())
            .map(|i| renderer.page_size(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DocumentInfo {
            filename: source.filename().to_string(),
            mime: source.mime().to_string(),
            kind: source.kind().label().to_string(),
            byte_len: source.byte_len(),
            page_count: pages.len(),
            pages,
        })
    }
}

/// A per-page failure, or an error that must abort the run anyway.
enum PageFailure {
    Page(PageError),
    Fatal(DocToolsError),
}

impl PageFailure {
    /// Page-local unless the engine itself is unusable.
    fn render(page: usize, e: DocToolsError) -> Self {
        match e {
            DocToolsError::PdfiumBindingFailed(_)
            | DocToolsError::PasswordRequired
            | DocToolsError::Internal(_) => PageFailure::Fatal(e),
            other => PageFailure::Page(PageError::RenderFailed {
                page,
                detail: other.to_string(),
            }),
        }
    }
}

fn require_image(run: &PipelineRun, operation: &'static str) -> Result<(), DocToolsError> {
    match run.source().map(|s| s.kind()) {
        None => Err(DocToolsError::NoDocument),
        Some(SourceKind::Image(_)) => Ok(()),
        Some(kind) => Err(DocToolsError::UnsupportedOperation {
            operation,
            kind: kind.label(),
        }),
    }
}

fn all_pages_failed<'a>(
    total: usize,
    mut errors: impl Iterator<Item = &'a PageError>,
) -> DocToolsError {
    DocToolsError::AllPagesFailed {
        total,
        first_error: errors
            .next()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 30, 30, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn unsupported_file_returns_to_idle_with_error() {
        let mut run = PipelineRun::new();
        let err = run.load(b"just some text".to_vec(), "notes.txt").unwrap_err();
        assert!(matches!(err, DocToolsError::UnsupportedType { .. }));
        assert_eq!(run.state(), RunState::Idle);
        assert!(run.last_error().is_some());
    }

    #[test]
    fn load_then_reset() {
        let mut run = PipelineRun::new();
        let kind = run.load(png(4, 4), "a.png").unwrap();
        assert!(matches!(kind, SourceKind::Image(_)));
        assert_eq!(run.state(), RunState::Loaded);
        run.reset();
        assert_eq!(run.state(), RunState::Idle);
        assert!(run.source().is_none());
    }

    #[tokio::test]
    async fn running_without_document_fails() {
        let orchestrator = Orchestrator::new(PipelineConfig::default());
        let mut run = PipelineRun::new();
        let err = orchestrator
            .convert(&mut run, OutputFormat::Png, &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DocToolsError::NoDocument));
    }

    #[tokio::test]
    async fn convert_png_to_webp() {
        let orchestrator = Orchestrator::new(PipelineConfig::default());
        let mut run = PipelineRun::new();
        run.load(png(12, 8), "cat.png").unwrap();

        let artifact = orchestrator
            .convert(&mut run, OutputFormat::WebP, &NoopProgress)
            .await
            .unwrap();
        assert_eq!(artifact.filename, "cat-converted.webp");
        assert_eq!(artifact.quality, None);
        assert_eq!(run.state(), RunState::Succeeded);
        assert_eq!(run.progress().percent, 100);

        let decoded = image::load_from_memory(&artifact.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
    }

    #[tokio::test]
    async fn image_compression_needs_a_target() {
        let orchestrator = Orchestrator::new(PipelineConfig::default());
        let mut run = PipelineRun::new();
        run.load(png(4, 4), "a.png").unwrap();
        let err = orchestrator
            .compress(&mut run, None, &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DocToolsError::InvalidConfig(_)));
        assert_eq!(run.state(), RunState::Loaded);
    }

    #[tokio::test]
    async fn compress_resizes_with_aspect_lock() {
        let orchestrator = Orchestrator::new(PipelineConfig::default());
        let mut run = PipelineRun::new();
        run.load(png(200, 100), "wide.png").unwrap();

        let target = CompressionTarget {
            target_bytes: 1_000_000,
            width: Some(50),
            height: None,
            lock_aspect: true,
        };
        let out = orchestrator
            .compress(&mut run, Some(target), &NoopProgress)
            .await
            .unwrap();
        assert_eq!((out.artifact.width, out.artifact.height), (50, 25));
        assert_eq!(out.artifact.filename, "min-wide.jpg");
        assert_eq!(out.artifact.format, OutputFormat::Jpeg);
    }

    #[tokio::test]
    async fn inspect_reports_image_size() {
        let orchestrator = Orchestrator::new(PipelineConfig::default());
        let source = SourceDocument::from_bytes(png(30, 20), "x.png").unwrap();
        let info = orchestrator.inspect(&source).await.unwrap();
        assert_eq!(info.kind, "image");
        assert_eq!(info.page_count, 1);
        assert_eq!(info.pages[0].width_pt, 30.0);
    }
}
