//! Configuration types for a document pipeline run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Every value is supplied per invocation:
//! nothing is read from the environment and nothing is persisted between
//! runs, so two runs with equal configs over equal bytes produce equal
//! artifacts.

use crate::error::DocToolsError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one conversion, compression or extraction run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_doctools::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .ocr_scale(2.5)
///     .ocr_language("deu")
///     .build()
///     .unwrap();
/// assert_eq!(config.ocr_language, "deu");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Quality ladder walked by the size-targeted encoder.
    pub quality_ladder: QualityLadder,

    /// Lossy quality used by plain format conversion. Range: 0.01–1.0. Default: 0.9.
    pub convert_quality: f32,

    /// Render scale for PDF pages during compression. Default: 1.5.
    ///
    /// The rendered page is re-encoded as JPEG, so this is the resolution
    /// the compressed PDF keeps.
    pub compress_scale: f32,

    /// Render scale for PDF pages fed to OCR. Default: 2.0.
    ///
    /// Recognition accuracy drops sharply on small glyphs; rendering at twice
    /// the natural size keeps body text well above the engine's minimum
    /// x-height at the cost of a 4× larger surface.
    pub ocr_scale: f32,

    /// Fixed JPEG quality for PDF pages when compression is run without a
    /// per-page byte budget. Default: 0.7.
    pub pdf_page_quality: f32,

    /// Maximum rendered dimension (width or height) in pixels. Default: 6000.
    ///
    /// A safety cap independent of scale: an A0 poster at scale 2.0 would
    /// otherwise allocate several hundred megabytes for a single surface.
    pub max_rendered_pixels: u32,

    /// Opaque colour alpha is flattened onto when the target format cannot
    /// carry transparency. Default: white.
    pub background: [u8; 3],

    /// OCR language code (tesseract naming, e.g. "eng", "deu"). Default: "eng".
    pub ocr_language: String,

    /// OCR engine to start for extraction runs. Default: tesseract.
    pub ocr_backend: OcrBackend,

    /// Explicit pdfium shared library. If None, the working directory is
    /// tried first, then the system library search path.
    pub pdfium_library_path: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_ladder: QualityLadder::default(),
            convert_quality: 0.9,
            compress_scale: 1.5,
            ocr_scale: 2.0,
            pdf_page_quality: 0.7,
            max_rendered_pixels: 6000,
            background: [255, 255, 255],
            ocr_language: "eng".to_string(),
            ocr_backend: OcrBackend::default(),
            pdfium_library_path: None,
            password: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn quality_ladder(mut self, ladder: QualityLadder) -> Self {
        self.config.quality_ladder = ladder;
        self
    }

    pub fn convert_quality(mut self, q: f32) -> Self {
        self.config.convert_quality = q.clamp(0.01, 1.0);
        self
    }

    pub fn compress_scale(mut self, scale: f32) -> Self {
        self.config.compress_scale = scale;
        self
    }

    pub fn ocr_scale(mut self, scale: f32) -> Self {
        self.config.ocr_scale = scale;
        self
    }

    pub fn pdf_page_quality(mut self, q: f32) -> Self {
        self.config.pdf_page_quality = q.clamp(0.01, 1.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn background(mut self, rgb: [u8; 3]) -> Self {
        self.config.background = rgb;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_backend(mut self, backend: OcrBackend) -> Self {
        self.config.ocr_backend = backend;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocToolsError> {
        let c = &self.config;
        c.quality_ladder.validate()?;
        for (name, scale) in [("compress_scale", c.compress_scale), ("ocr_scale", c.ocr_scale)] {
            if !(0.1..=8.0).contains(&scale) {
                return Err(DocToolsError::InvalidConfig(format!(
                    "{name} must be 0.1–8.0, got {scale}"
                )));
            }
        }
        if c.ocr_language.trim().is_empty() {
            return Err(DocToolsError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Quality ladder ───────────────────────────────────────────────────────

/// The monotone-decreasing quality search walked by the size-targeted encoder.
///
/// Starting at `start`, each attempt lowers quality by `step` until the
/// budget is met, `max_iterations` attempts were made, or the next step would
/// fall below `floor`. The ladder is evaluated in whole percent so the same
/// configuration always yields the same rungs; floating-point drift would
/// otherwise decide whether the last rung is 0.1 or 0.0999.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityLadder {
    /// First quality tried. Default: 0.9.
    pub start: f32,
    /// Decrement between attempts. Default: 0.1.
    pub step: f32,
    /// Lowest quality the encoder may use. Default: 0.1.
    pub floor: f32,
    /// Hard cap on encode attempts. Default: 10.
    pub max_iterations: u32,
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self {
            start: 0.9,
            step: 0.1,
            floor: 0.1,
            max_iterations: 10,
        }
    }
}

impl QualityLadder {
    /// Expand the ladder into the JPEG qualities (1–100) the encoder will try,
    /// in order.
    pub fn rungs(&self) -> Vec<u8> {
        let start = to_percent(self.start);
        let step = to_percent(self.step).max(1);
        let floor = to_percent(self.floor);

        let mut rungs = Vec::new();
        let mut q = start;
        for _ in 0..self.max_iterations {
            rungs.push(q);
            if q < floor.saturating_add(step) {
                break;
            }
            q -= step;
        }
        rungs
    }

    fn validate(&self) -> Result<(), DocToolsError> {
        if !(self.floor > 0.0 && self.floor <= self.start && self.start <= 1.0) {
            return Err(DocToolsError::InvalidConfig(format!(
                "quality ladder needs 0 < floor ≤ start ≤ 1, got floor={} start={}",
                self.floor, self.start
            )));
        }
        if self.step <= 0.0 {
            return Err(DocToolsError::InvalidConfig(
                "quality step must be > 0".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(DocToolsError::InvalidConfig(
                "quality ladder needs at least one iteration".into(),
            ));
        }
        Ok(())
    }
}

/// Map a 0.0–1.0 quality onto the 1–100 scale used by the JPEG encoder.
pub(crate) fn to_percent(q: f32) -> u8 {
    (q * 100.0).round().clamp(1.0, 100.0) as u8
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which OCR engine an extraction run starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum OcrBackend {
    /// The `tesseract` command-line tool, spawned once per page. (default)
    #[default]
    Tesseract,
    /// The pure-Rust `ocrs` engine (requires the `ocrs` feature). If
    /// `model_dir` is None, `./ocrs-models` is used.
    Ocrs { model_dir: Option<PathBuf> },
}

impl OcrBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrBackend::Tesseract => "tesseract",
            OcrBackend::Ocrs { .. } => "ocrs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_walks_ninety_down_to_ten() {
        let rungs = QualityLadder::default().rungs();
        assert_eq!(rungs, vec![90, 80, 70, 60, 50, 40, 30, 20, 10]);
    }

    #[test]
    fn ladder_respects_iteration_cap() {
        let ladder = QualityLadder {
            start: 1.0,
            step: 0.05,
            floor: 0.05,
            max_iterations: 10,
        };
        let rungs = ladder.rungs();
        assert_eq!(rungs.len(), 10);
        assert_eq!(rungs[0], 100);
        assert_eq!(rungs[9], 55);
    }

    #[test]
    fn ladder_never_drops_below_floor() {
        let ladder = QualityLadder {
            start: 0.85,
            step: 0.2,
            floor: 0.3,
            max_iterations: 10,
        };
        assert_eq!(ladder.rungs(), vec![85, 65, 45]);
    }

    #[test]
    fn builder_rejects_inverted_ladder() {
        let err = PipelineConfig::builder()
            .quality_ladder(QualityLadder {
                start: 0.2,
                step: 0.1,
                floor: 0.5,
                max_iterations: 10,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("floor"));
    }

    #[test]
    fn builder_rejects_silly_scale() {
        assert!(PipelineConfig::builder().ocr_scale(0.0).build().is_err());
        assert!(PipelineConfig::builder().compress_scale(20.0).build().is_err());
    }

    #[test]
    fn builder_clamps_quality() {
        let c = PipelineConfig::builder()
            .convert_quality(3.0)
            .pdf_page_quality(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.convert_quality, 1.0);
        assert_eq!(c.pdf_page_quality, 0.01);
    }

    #[test]
    fn to_percent_rounds_and_clamps() {
        assert_eq!(to_percent(0.7), 70);
        assert_eq!(to_percent(0.0), 1);
        assert_eq!(to_percent(1.5), 100);
    }
}
