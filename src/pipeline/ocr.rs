//! OCR extractor: recognise text on rendered page surfaces.
//!
//! ## Why a provider/session split?
//!
//! Starting an engine is expensive (locating and probing the tesseract
//! binary and its language packs, or loading ~12 MB of ocrs models). A
//! [`OcrProvider`] does that work once in [`OcrProvider::start`] and hands
//! back an [`OcrSession`] that the orchestrator keeps for every page of the
//! run. The session is consumed by [`OcrSession::terminate`], which the
//! orchestrator calls on every exit path, so temp directories and model
//! memory are released when the run ends rather than when something
//! happens to drop them.
//!
//! ## Backends
//!
//! - **tesseract** (default): the `tesseract` CLI via `tokio::process`, one
//!   subprocess per page, reading TSV output so per-word confidence is
//!   available.
//! - **ocrs** (feature `ocrs`): the pure-Rust engine on `rten`, run on a
//!   blocking thread. English only.

use crate::config::{OcrBackend, PipelineConfig};
use crate::error::{DocToolsError, PageError};
use crate::pipeline::encode::{encode_surface_blocking, OutputFormat};
use crate::pipeline::render::PageSurface;
use async_trait::async_trait;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Text recognised on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean confidence in 0.0–1.0, when the engine reports one.
    pub confidence: Option<f32>,
}

/// Starts OCR sessions. One per engine kind.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pay the engine's cold-start cost and return a live session.
    ///
    /// # Errors
    /// [`DocToolsError::OcrUnavailable`] when the engine, its models or the
    /// requested language are missing.
    async fn start(&self, language: &str) -> Result<Box<dyn OcrSession>, DocToolsError>;
}

/// A started engine, exclusively owned by one run.
#[async_trait]
pub trait OcrSession: Send {
    /// Recognise text on `surface`. `progress` receives this page's
    /// completion in `[0, 1]`.
    async fn recognize(
        &mut self,
        surface: &PageSurface,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<Recognition, PageError>;

    /// Release the engine's resources.
    async fn terminate(self: Box<Self>);
}

/// The provider selected by `config.ocr_backend`.
pub fn provider_for(config: &PipelineConfig) -> Result<Box<dyn OcrProvider>, DocToolsError> {
    match &config.ocr_backend {
        OcrBackend::Tesseract => Ok(Box::new(TesseractProvider::default())),
        #[cfg(feature = "ocrs")]
        OcrBackend::Ocrs { model_dir } => Ok(Box::new(ocrs_backend::OcrsProvider::new(
            model_dir.clone(),
        ))),
        #[cfg(not(feature = "ocrs"))]
        OcrBackend::Ocrs { .. } => Err(DocToolsError::OcrUnavailable {
            backend: "ocrs".into(),
            hint: "This build does not include the ocrs engine; rebuild with `--features ocrs`."
                .into(),
        }),
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Drives the `tesseract` command-line tool.
#[derive(Debug, Clone, Default)]
pub struct TesseractProvider {
    /// Explicit binary; resolved on `PATH` when None.
    pub binary: Option<PathBuf>,
}

#[async_trait]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn start(&self, language: &str) -> Result<Box<dyn OcrSession>, DocToolsError> {
        let binary = match &self.binary {
            Some(path) => path.clone(),
            None => which::which("tesseract").map_err(|_| tesseract_missing())?,
        };

        check_languages(&binary, language).await?;

        let workdir = TempDir::with_prefix("doctools-ocr-").map_err(|e| {
            DocToolsError::Internal(format!("Failed to create OCR work directory: {}", e))
        })?;
        info!("Started tesseract session ({}, lang={})", binary.display(), language);

        Ok(Box::new(TesseractSession {
            binary,
            language: language.to_string(),
            workdir,
        }))
    }
}

fn tesseract_missing() -> DocToolsError {
    DocToolsError::OcrUnavailable {
        backend: "tesseract".into(),
        hint: "Tesseract not installed. Install with: apt install tesseract-ocr \
               (or brew install tesseract)"
            .into(),
    }
}

/// Fail early when the binary cannot run or a requested language pack is
/// not installed.
async fn check_languages(binary: &std::path::Path, language: &str) -> Result<(), DocToolsError> {
    let output = match tokio::process::Command::new(binary)
        .arg("--list-langs")
        .output()
        .await
    {
        Ok(output) if output.status.success() => output,
        Ok(_) => {
            warn!("Could not list tesseract languages; skipping language check");
            return Ok(());
        }
        Err(e) => {
            warn!("Cannot run {}: {}", binary.display(), e);
            return Err(tesseract_missing());
        }
    };

    // Older releases print the list on stderr.
    let listing = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let installed: Vec<&str> = listing
        .lines()
        .skip_while(|l| !l.starts_with("List of available languages"))
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let missing: Vec<&str> = language
        .split('+')
        .filter(|lang| !installed.contains(lang))
        .collect();
    if missing.is_empty() || installed.is_empty() {
        return Ok(());
    }
    Err(DocToolsError::OcrUnavailable {
        backend: "tesseract".into(),
        hint: format!(
            "Language pack(s) {} not installed. Installed: {}",
            missing.join(", "),
            installed.join(", ")
        ),
    })
}

struct TesseractSession {
    binary: PathBuf,
    language: String,
    workdir: TempDir,
}

#[async_trait]
impl OcrSession for TesseractSession {
    async fn recognize(
        &mut self,
        surface: &PageSurface,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<Recognition, PageError> {
        let page = surface.page_index + 1;
        let fail = |detail: String| PageError::RecognitionFailed { page, detail };
        progress(0.0);

        let png = encode_surface_blocking(surface.image.clone(), OutputFormat::Png, 100, [255; 3])
            .await
            .map_err(|e| fail(e.to_string()))?;
        let input = self.workdir.path().join(format!("page-{:04}.png", page));
        tokio::fs::write(&input, &png)
            .await
            .map_err(|e| fail(format!("writing page image: {}", e)))?;
        progress(0.2);

        let output = tokio::process::Command::new(&self.binary)
            .arg(&input)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .output()
            .await
            .map_err(|e| fail(format!("spawning tesseract: {}", e)))?;

        let _ = tokio::fs::remove_file(&input).await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("tesseract failed: {}", stderr.trim())));
        }

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            "Page {}: {} chars, confidence {:?}",
            page,
            recognition.text.len(),
            recognition.confidence
        );
        progress(1.0);
        Ok(recognition)
    }

    async fn terminate(self: Box<Self>) {
        let path = self.workdir.path().to_path_buf();
        if let Err(e) = self.workdir.close() {
            warn!("Failed to remove OCR work directory {}: {}", path.display(), e);
        }
        debug!("Tesseract session terminated");
    }
}

/// Rebuild page text and mean confidence from tesseract's TSV output.
///
/// Columns: level, page, block, par, line, word, left, top, width, height,
/// conf, text. Words on the same line are joined by a space; a new block or
/// paragraph starts after a blank line.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut current: Option<(u32, u32, u32)> = None;
    let mut conf_sum = 0.0f64;
    let mut conf_n = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].parse::<u32>().unwrap_or(0);
        let key = (num(2), num(3), num(4));

        match current {
            None => {}
            Some((block, par, _)) if (block, par) != (key.0, key.1) => text.push_str("\n\n"),
            Some(prev) if prev != key => text.push('\n'),
            Some(_) => text.push(' '),
        }
        text.push_str(word);
        current = Some(key);

        if let Ok(conf) = cols[10].parse::<f64>() {
            if conf >= 0.0 {
                conf_sum += conf;
                conf_n += 1;
            }
        }
    }

    Recognition {
        text,
        confidence: (conf_n > 0).then(|| (conf_sum / conf_n as f64 / 100.0) as f32),
    }
}

// ── ocrs ─────────────────────────────────────────────────────────────────

#[cfg(feature = "ocrs")]
mod ocrs_backend {
    use super::*;
    use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
    use rten::Model;
    use std::sync::Arc;

    const DETECTION_MODEL: &str = "text-detection.rten";
    const RECOGNITION_MODEL: &str = "text-recognition.rten";

    pub struct OcrsProvider {
        model_dir: PathBuf,
    }

    impl OcrsProvider {
        pub fn new(model_dir: Option<PathBuf>) -> Self {
            Self {
                model_dir: model_dir.unwrap_or_else(|| PathBuf::from("ocrs-models")),
            }
        }
    }

    fn unavailable(hint: String) -> DocToolsError {
        DocToolsError::OcrUnavailable {
            backend: "ocrs".into(),
            hint,
        }
    }

    #[async_trait]
    impl OcrProvider for OcrsProvider {
        fn name(&self) -> &'static str {
            "ocrs"
        }

        async fn start(&self, language: &str) -> Result<Box<dyn OcrSession>, DocToolsError> {
            if language != "eng" {
                warn!("ocrs only recognises Latin script; ignoring language '{}'", language);
            }
            let detection = self.model_dir.join(DETECTION_MODEL);
            let recognition = self.model_dir.join(RECOGNITION_MODEL);
            for path in [&detection, &recognition] {
                if !path.exists() {
                    return Err(unavailable(format!(
                        "Model not found at {}. Run `ocrs` once to download models, or pass --model-dir.",
                        path.display()
                    )));
                }
            }

            let engine = tokio::task::spawn_blocking(move || {
                let detection_model = Model::load_file(&detection)
                    .map_err(|e| unavailable(format!("failed to load detection model: {}", e)))?;
                let recognition_model = Model::load_file(&recognition)
                    .map_err(|e| unavailable(format!("failed to load recognition model: {}", e)))?;
                OcrEngine::new(OcrEngineParams {
                    detection_model: Some(detection_model),
                    recognition_model: Some(recognition_model),
                    ..Default::default()
                })
                .map_err(|e| unavailable(format!("failed to initialise engine: {}", e)))
            })
            .await
            .map_err(|e| DocToolsError::Internal(format!("Model load task panicked: {}", e)))??;

            info!("Started ocrs session ({})", self.model_dir.display());
            Ok(Box::new(OcrsSession {
                engine: Arc::new(engine),
            }))
        }
    }

    struct OcrsSession {
        engine: Arc<OcrEngine>,
    }

    #[async_trait]
    impl OcrSession for OcrsSession {
        async fn recognize(
            &mut self,
            surface: &PageSurface,
            progress: &(dyn Fn(f32) + Send + Sync),
        ) -> Result<Recognition, PageError> {
            let page = surface.page_index + 1;
            progress(0.0);

            let engine = Arc::clone(&self.engine);
            let rgb = surface.image.to_rgb8();
            let text = tokio::task::spawn_blocking(move || {
                let (width, height) = rgb.dimensions();
                let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
                    .map_err(|e| format!("image source ({}x{}): {}", width, height, e))?;
                let input = engine
                    .prepare_input(source)
                    .map_err(|e| format!("preprocessing: {}", e))?;
                engine
                    .get_text(&input)
                    .map_err(|e| format!("recognition: {}", e))
            })
            .await
            .map_err(|e| format!("OCR task panicked: {}", e))
            .and_then(|r| r)
            .map_err(|detail| PageError::RecognitionFailed { page, detail })?;

            progress(1.0);
            Ok(Recognition {
                text,
                confidence: None,
            })
        }

        async fn terminate(self: Box<Self>) {
            debug!("ocrs session terminated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96\tHello
5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t90\tworld
5\t1\t1\t1\t2\t1\t10\t40\t50\t20\t80\tsecond
5\t1\t2\t1\t1\t1\t10\t90\t50\t20\t70\tNext
5\t1\t2\t1\t1\t2\t70\t90\t50\t20\t-1\t
";

    #[test]
    fn tsv_rebuilds_lines_and_blocks() {
        let r = parse_tsv(TSV);
        assert_eq!(r.text, "Hello world\nsecond\n\nNext");
    }

    #[test]
    fn tsv_confidence_is_mean_of_scored_words() {
        let r = parse_tsv(TSV);
        let conf = r.confidence.unwrap();
        assert!((conf - 0.84).abs() < 1e-4, "got {conf}");
    }

    #[test]
    fn empty_tsv_has_no_text_or_confidence() {
        let r = parse_tsv("level\tpage_num\n");
        assert_eq!(r.text, "");
        assert_eq!(r.confidence, None);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let provider = TesseractProvider {
            binary: Some(PathBuf::from("/nonexistent/tesseract")),
        };
        let err = provider.start("eng").await.err().unwrap();
        assert!(matches!(
            err,
            DocToolsError::OcrUnavailable { ref backend, .. } if backend == "tesseract"
        ));
    }

    #[tokio::test]
    async fn failing_binary_fails_per_page() {
        // Runs, but neither lists languages nor recognises anything.
        let Ok(binary) = which::which("false") else {
            return;
        };
        let provider = TesseractProvider {
            binary: Some(binary),
        };
        let mut session = provider.start("eng").await.unwrap();
        let surface = PageSurface {
            image: image::DynamicImage::new_rgb8(8, 8),
            page_index: 0,
            natural_size: crate::output::PageDimensions {
                width_pt: 8.0,
                height_pt: 8.0,
            },
        };
        let err = session.recognize(&surface, &|_| {}).await.unwrap_err();
        assert!(matches!(err, PageError::RecognitionFailed { page: 1, .. }));
        session.terminate().await;
    }

    #[cfg(not(feature = "ocrs"))]
    #[test]
    fn ocrs_backend_requires_feature() {
        let config = PipelineConfig::builder()
            .ocr_backend(OcrBackend::Ocrs { model_dir: None })
            .build()
            .unwrap();
        assert!(matches!(
            provider_for(&config),
            Err(DocToolsError::OcrUnavailable { .. })
        ));
    }
}
