//! Size-targeted encoding: `DynamicImage` → bytes at or under a byte budget.
//!
//! ## Why a descending ladder instead of a binary search?
//!
//! Each attempt is a full JPEG encode, and the size/quality curve is not
//! strictly monotone on every image. Walking a fixed ladder from the top
//! gives a bounded attempt count, the highest quality that fits on the
//! common path, and the same bytes for the same input every time.
//!
//! ## Why is JPEG the only lossy target?
//!
//! The `image` crate's WebP encoder is lossless-only and PNG has no quality
//! knob, so for those formats the ladder collapses to one attempt. Budgeted
//! image compression therefore always coerces to JPEG; see
//! [`OutputFormat::budget_format`].

use crate::config::QualityLadder;
use crate::error::DocToolsError;
use crate::output::BudgetOutcome;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::error::{ImageFormatHint, UnsupportedError};
use image::{DynamicImage, ImageError, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, warn};

/// Format tag of an output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Pdf,
    Docx,
}

impl OutputFormat {
    /// Parse a user-facing image format name (`jpg`, `jpeg`, `png`, `webp`).
    pub fn parse_image(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Docx => "docx",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// Whether the format can carry an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        matches!(self, OutputFormat::Png | OutputFormat::WebP)
    }

    /// Whether the encoder honours a quality setting for this format.
    pub fn is_lossy(&self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }

    /// Format actually produced when a byte budget applies.
    pub fn budget_format(&self) -> Self {
        OutputFormat::Jpeg
    }

    fn is_image(&self) -> bool {
        matches!(
            self,
            OutputFormat::Jpeg | OutputFormat::Png | OutputFormat::WebP
        )
    }
}

/// What the caller asks of the size-targeted encoder.
///
/// Width and height are both optional. With `lock_aspect` set, a missing (or
/// disagreeing) side is derived from the other using the natural aspect ratio;
/// width wins when both are given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionTarget {
    pub target_bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub lock_aspect: bool,
}

impl CompressionTarget {
    pub fn bytes(target_bytes: u64) -> Self {
        Self {
            target_bytes,
            width: None,
            height: None,
            lock_aspect: true,
        }
    }

    /// Output dimensions for an image of natural size `(w, h)`, or None to
    /// keep the natural size.
    pub fn resolve_dimensions(&self, natural: (u32, u32)) -> Option<(u32, u32)> {
        let (nw, nh) = natural;
        let aspect = nw.max(1) as f64 / nh.max(1) as f64;
        let derive_h = |w: u32| ((w as f64 / aspect).round() as u32).max(1);
        let derive_w = |h: u32| ((h as f64 * aspect).round() as u32).max(1);

        let dims = match (self.width, self.height, self.lock_aspect) {
            (None, None, _) => return None,
            (Some(w), _, true) => (w, derive_h(w)),
            (None, Some(h), true) => (derive_w(h), h),
            (Some(w), Some(h), false) => (w, h),
            (Some(w), None, false) => (w, nh),
            (None, Some(h), false) => (nw, h),
        };
        let dims = (dims.0.max(1), dims.1.max(1));
        (dims != natural).then_some(dims)
    }
}

/// One step of the quality ladder, reported as it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeAttempt {
    /// 1-based attempt number.
    pub attempt: usize,
    /// Attempts the ladder allows at most.
    pub max_attempts: usize,
    pub quality: u8,
    pub size: usize,
}

/// Parameters for [`encode_to_budget`].
#[derive(Debug, Clone)]
pub struct BudgetRequest {
    pub target_bytes: u64,
    pub format: OutputFormat,
    /// Resample to these dimensions once before the first attempt.
    pub dimensions: Option<(u32, u32)>,
    pub ladder: QualityLadder,
    pub background: [u8; 3],
}

/// Result of [`encode_to_budget`].
#[derive(Debug, Clone)]
pub struct BudgetedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Quality of the returned bytes; None for lossless formats.
    pub quality: Option<u8>,
    pub budget: BudgetOutcome,
}

/// Encode `image` once at `quality` (1–100; ignored for lossless formats).
///
/// Alpha is flattened onto `background` when the format cannot carry it.
pub fn encode_surface(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    background: [u8; 3],
) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let rgb = flatten(image, background);
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
        OutputFormat::Png => {
            image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
        OutputFormat::WebP => {
            // The WebP encoder only takes 8-bit RGB(A).
            let pixels = if image.color().has_alpha() {
                DynamicImage::ImageRgba8(image.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(image.to_rgb8())
            };
            pixels.write_with_encoder(WebPEncoder::new_lossless(&mut buf))?;
        }
        OutputFormat::Pdf | OutputFormat::Docx => {
            return Err(ImageError::Unsupported(UnsupportedError::from(
                ImageFormatHint::Name(format.extension().to_string()),
            )));
        }
    }
    debug!(
        "Encoded {}x{} → {} bytes as {:?} q{}",
        image.width(),
        image.height(),
        buf.len(),
        format,
        quality
    );
    Ok(buf)
}

/// Encode `image` at or under `req.target_bytes`, walking the quality ladder.
///
/// Never fails for an unreachable budget: the smallest attempt is returned
/// with [`BudgetOutcome::Unmet`]. Resampling to `req.dimensions` happens
/// once, before the first attempt. `on_attempt` sees every attempt.
pub fn encode_to_budget(
    image: &DynamicImage,
    req: &BudgetRequest,
    on_attempt: &mut dyn FnMut(&EncodeAttempt),
) -> Result<BudgetedImage, ImageError> {
    let resized;
    let image = match req.dimensions {
        Some((w, h)) if (w, h) != (image.width(), image.height()) => {
            debug!("Resampling {}x{} → {}x{}", image.width(), image.height(), w, h);
            resized = image.resize_exact(w, h, FilterType::Lanczos3);
            &resized
        }
        _ => image,
    };

    let rungs = if req.format.is_lossy() {
        req.ladder.rungs()
    } else {
        vec![100]
    };
    let max_attempts = rungs.len();

    let mut best: Option<(Vec<u8>, u8)> = None;
    for (i, &quality) in rungs.iter().enumerate() {
        let bytes = encode_surface(image, req.format, quality, req.background)?;
        on_attempt(&EncodeAttempt {
            attempt: i + 1,
            max_attempts,
            quality,
            size: bytes.len(),
        });

        if bytes.len() as u64 <= req.target_bytes {
            debug!(
                "Budget met at q{} ({} ≤ {} bytes)",
                quality,
                bytes.len(),
                req.target_bytes
            );
            return Ok(finish(image, req, bytes, quality, BudgetOutcome::Met {
                target_bytes: req.target_bytes,
            }));
        }

        let smaller = best.as_ref().map_or(true, |(b, _)| bytes.len() < b.len());
        if smaller {
            best = Some((bytes, quality));
        }
    }

    let (bytes, quality) = best.ok_or_else(|| {
        ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::Generic("empty quality ladder".into()),
        ))
    })?;
    warn!(
        "Budget of {} bytes not reached; smallest result {} bytes at q{}",
        req.target_bytes,
        bytes.len(),
        quality
    );
    let outcome = BudgetOutcome::Unmet {
        target_bytes: req.target_bytes,
        achieved_bytes: bytes.len() as u64,
        final_quality: quality,
    };
    Ok(finish(image, req, bytes, quality, outcome))
}

fn finish(
    image: &DynamicImage,
    req: &BudgetRequest,
    bytes: Vec<u8>,
    quality: u8,
    budget: BudgetOutcome,
) -> BudgetedImage {
    BudgetedImage {
        bytes,
        width: image.width(),
        height: image.height(),
        quality: req.format.is_lossy().then_some(quality),
        budget,
    }
}

/// [`encode_to_budget`] on a blocking thread, forwarding each attempt to
/// `on_attempt` on the calling task as it happens.
pub async fn encode_to_budget_blocking(
    image: DynamicImage,
    req: BudgetRequest,
    mut on_attempt: impl FnMut(&EncodeAttempt) + Send,
) -> Result<BudgetedImage, DocToolsError> {
    if !req.format.is_image() {
        return Err(DocToolsError::Encode {
            detail: format!("{:?} is not an image format", req.format),
        });
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        encode_to_budget(&image, &req, &mut |attempt| {
            let _ = tx.send(*attempt);
        })
    });

    // The sender is dropped when the blocking task returns.
    while let Some(attempt) = rx.recv().await {
        on_attempt(&attempt);
    }

    handle
        .await
        .map_err(|e| DocToolsError::Internal(format!("Encode task panicked: {}", e)))?
        .map_err(|e| DocToolsError::Encode {
            detail: e.to_string(),
        })
}

/// [`encode_surface`] on a blocking thread.
pub async fn encode_surface_blocking(
    image: DynamicImage,
    format: OutputFormat,
    quality: u8,
    background: [u8; 3],
) -> Result<Vec<u8>, DocToolsError> {
    tokio::task::spawn_blocking(move || encode_surface(&image, format, quality, background))
        .await
        .map_err(|e| DocToolsError::Internal(format!("Encode task panicked: {}", e)))?
        .map_err(|e| DocToolsError::Encode {
            detail: e.to_string(),
        })
}

/// Composite `image` over an opaque `background`.
pub fn flatten(image: &DynamicImage, background: [u8; 3]) -> DynamicImage {
    if !image.color().has_alpha() {
        return DynamicImage::ImageRgb8(image.to_rgb8());
    }
    let rgba = image.to_rgba8();
    let out = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u16;
        let blend = |c: u8, bg: u8| ((c as u16 * a + bg as u16 * (255 - a) + 127) / 255) as u8;
        Rgb([
            blend(r, background[0]),
            blend(g, background[1]),
            blend(b, background[2]),
        ])
    });
    DynamicImage::ImageRgb8(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// Deterministic noise: compresses badly, so budgets bite.
    fn noisy(w: u32, h: u32) -> DynamicImage {
        let mut seed: u32 = 0x2545_f491;
        let img = RgbaImage::from_fn(w, h, |_, _| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let [a, b, c, _] = seed.to_le_bytes();
            Rgba([a, b, c, 255])
        });
        DynamicImage::ImageRgba8(img)
    }

    fn request(target_bytes: u64, format: OutputFormat) -> BudgetRequest {
        BudgetRequest {
            target_bytes,
            format,
            dimensions: None,
            ladder: QualityLadder::default(),
            background: [255, 255, 255],
        }
    }

    #[test]
    fn generous_budget_stops_at_first_rung() {
        let mut attempts = Vec::new();
        let req = request(10_000_000, OutputFormat::Jpeg);
        let out = encode_to_budget(&noisy(32, 32), &req, &mut |a| attempts.push(*a)).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(out.quality, Some(90));
        assert_eq!(out.budget, BudgetOutcome::Met { target_bytes: 10_000_000 });
    }

    #[test]
    fn unreachable_budget_is_flagged_not_failed() {
        let mut attempts = Vec::new();
        let out = encode_to_budget(&noisy(128, 128), &request(100, OutputFormat::Jpeg), &mut |a| {
            attempts.push(*a)
        })
        .unwrap();

        assert_eq!(attempts.len(), 9);
        let qualities: Vec<u8> = attempts.iter().map(|a| a.quality).collect();
        assert!(qualities.windows(2).all(|w| w[0] > w[1]));
        match out.budget {
            BudgetOutcome::Unmet {
                target_bytes,
                achieved_bytes,
                final_quality,
            } => {
                assert_eq!(target_bytes, 100);
                assert_eq!(achieved_bytes as usize, out.bytes.len());
                assert_eq!(final_quality, 10);
            }
            other => panic!("expected Unmet, got {other:?}"),
        }
        let smallest = attempts.iter().map(|a| a.size).min().unwrap();
        assert_eq!(out.bytes.len(), smallest);
    }

    #[test]
    fn met_budget_is_honoured() {
        let img = noisy(96, 96);
        let top = encode_surface(&img, OutputFormat::Jpeg, 90, [255; 3]).unwrap().len() as u64;
        let target = top * 2 / 3;
        let req = request(target, OutputFormat::Jpeg);
        let out = encode_to_budget(&img, &req, &mut |_| {}).unwrap();
        if !out.budget.is_unmet() {
            assert!(out.bytes.len() as u64 <= target);
            assert!(out.quality.unwrap() < 90);
        }
    }

    #[test]
    fn resamples_once_before_encoding() {
        let mut req = request(10_000_000, OutputFormat::Jpeg);
        req.dimensions = Some((20, 10));
        let out = encode_to_budget(&noisy(40, 40), &req, &mut |_| {}).unwrap();
        assert_eq!((out.width, out.height), (20, 10));
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[test]
    fn lossless_format_makes_a_single_attempt() {
        let mut count = 0;
        let req = request(10, OutputFormat::Png);
        let out = encode_to_budget(&noisy(16, 16), &req, &mut |_| count += 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(out.quality, None);
        assert!(out.budget.is_unmet());
    }

    #[test]
    fn transparent_pixels_flatten_to_background() {
        let clear = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0])));
        let flat = flatten(&clear, [255, 255, 255]);
        assert_eq!(flat.to_rgb8().get_pixel(3, 3).0, [255, 255, 255]);

        let jpeg = encode_surface(&clear, OutputFormat::Jpeg, 90, [255, 255, 255]).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert!(decoded.get_pixel(4, 4).0.iter().all(|&c| c > 245));
    }

    #[test]
    fn encoding_is_deterministic() {
        let img = noisy(48, 48);
        let a = encode_to_budget(&img, &request(2_000, OutputFormat::Jpeg), &mut |_| {}).unwrap();
        let b = encode_to_budget(&img, &request(2_000, OutputFormat::Jpeg), &mut |_| {}).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn aspect_lock_derives_missing_side() {
        let mut t = CompressionTarget::bytes(1);
        assert_eq!(t.resolve_dimensions((400, 200)), None);

        t.width = Some(100);
        assert_eq!(t.resolve_dimensions((400, 200)), Some((100, 50)));

        t.width = None;
        t.height = Some(50);
        assert_eq!(t.resolve_dimensions((400, 200)), Some((100, 50)));

        t.width = Some(100);
        t.height = Some(90);
        assert_eq!(t.resolve_dimensions((400, 200)), Some((100, 50)));

        t.lock_aspect = false;
        assert_eq!(t.resolve_dimensions((400, 200)), Some((100, 90)));
    }

    #[test]
    fn format_names() {
        assert_eq!(OutputFormat::parse_image("JPEG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse_image("webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::parse_image("gif"), None);
        assert!(!OutputFormat::Jpeg.supports_alpha());
        assert_eq!(OutputFormat::Png.budget_format(), OutputFormat::Jpeg);
    }

    #[tokio::test]
    async fn blocking_variant_forwards_attempts() {
        let mut seen = Vec::new();
        let out = encode_to_budget_blocking(noisy(64, 64), request(100, OutputFormat::Jpeg), |a| {
            seen.push(a.attempt)
        })
        .await
        .unwrap();
        assert_eq!(seen, (1..=9).collect::<Vec<_>>());
        assert!(out.budget.is_unmet());
    }
}
