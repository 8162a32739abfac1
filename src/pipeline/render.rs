//! Raster source adapter: turn an image or one PDF page into a pixel surface.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Decoding and resampling large images is CPU-bound as well. Both run on
//! `tokio::task::spawn_blocking` threads so the Tokio workers never stall.
//!
//! ## Why re-open the PDF per page?
//!
//! A pdfium `PdfDocument` borrows its `Pdfium` binding and cannot cross
//! threads on its own. Opening the document from the in-memory bytes inside
//! each blocking task keeps exactly one page surface resident at a time and
//! needs no self-referential state. Opening is cheap next to rendering.
//!
//! ## Why cap pixels as well as scale?
//!
//! Page sizes vary wildly: an A0 poster at scale 2.0 would produce a
//! 6,700 × 9,500 px surface. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.

use crate::config::PipelineConfig;
use crate::error::DocToolsError;
use crate::output::PageDimensions;
use crate::source::{SourceDocument, SourceKind};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A rendered page: pixels plus the page's natural size.
///
/// Produced fresh by every [`PageRenderer::render_page`] call and consumed
/// by value by the encode or OCR stage, so it never outlives its page.
#[derive(Debug, Clone)]
pub struct PageSurface {
    pub image: DynamicImage,
    /// 0-based page index within the source.
    pub page_index: usize,
    /// Size of the page at scale 1.0 (points for PDFs, pixels for images).
    pub natural_size: PageDimensions,
}

impl PageSurface {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }
}

/// An opened source that can rasterise its pages one at a time.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn page_count(&self) -> usize;

    /// Natural size of page `index` (0-based).
    fn page_size(&self, index: usize) -> Result<PageDimensions, DocToolsError>;

    /// Render page `index` at `scale` × natural size.
    ///
    /// # Errors
    /// [`DocToolsError::PageIndex`] if `index` is out of range; any other
    /// error concerns this page only.
    async fn render_page(&self, index: usize, scale: f32) -> Result<PageSurface, DocToolsError>;
}

/// Opens sources for rendering. Swappable so runs can be driven without a
/// pdfium library.
#[async_trait]
pub trait RasterEngine: Send + Sync {
    /// # Errors
    /// [`DocToolsError::Decode`] if the bytes are not a valid image/PDF,
    /// [`DocToolsError::PasswordRequired`] for locked PDFs.
    async fn open(&self, source: &SourceDocument) -> Result<Box<dyn PageRenderer>, DocToolsError>;
}

/// The production engine: `image` for raster sources, pdfium for PDFs.
#[derive(Debug, Clone)]
pub struct DefaultRasterEngine {
    pdfium_library_path: Option<PathBuf>,
    password: Option<String>,
    max_rendered_pixels: u32,
}

impl DefaultRasterEngine {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            pdfium_library_path: config.pdfium_library_path.clone(),
            password: config.password.clone(),
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }
}

#[async_trait]
impl RasterEngine for DefaultRasterEngine {
    async fn open(&self, source: &SourceDocument) -> Result<Box<dyn PageRenderer>, DocToolsError> {
        match source.kind() {
            SourceKind::Image(_) => {
                let raster = ImageRaster::decode(source.clone(), self.max_rendered_pixels).await?;
                Ok(Box::new(raster))
            }
            SourceKind::Pdf => {
                let raster = PdfiumRaster::open(source.clone(), self).await?;
                Ok(Box::new(raster))
            }
        }
    }
}

// ── Images ───────────────────────────────────────────────────────────────

/// A decoded single-image source. Its one page is the image itself.
pub struct ImageRaster {
    image: Arc<DynamicImage>,
    max_pixels: u32,
}

impl ImageRaster {
    async fn decode(source: SourceDocument, max_pixels: u32) -> Result<Self, DocToolsError> {
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory(source.bytes()).map_err(|e| DocToolsError::Decode {
                detail: format!("{}: {}", source.filename(), e),
            })
        })
        .await
        .map_err(|e| DocToolsError::Internal(format!("Decode task panicked: {}", e)))??;

        debug!("Decoded image {}x{} ({:?})", image.width(), image.height(), image.color());
        Ok(Self {
            image: Arc::new(image),
            max_pixels,
        })
    }
}

#[async_trait]
impl PageRenderer for ImageRaster {
    fn page_count(&self) -> usize {
        1
    }

    fn page_size(&self, index: usize) -> Result<PageDimensions, DocToolsError> {
        check_index(index, 1)?;
        Ok(PageDimensions {
            width_pt: self.image.width() as f32,
            height_pt: self.image.height() as f32,
        })
    }

    async fn render_page(&self, index: usize, scale: f32) -> Result<PageSurface, DocToolsError> {
        let natural_size = self.page_size(index)?;
        let image = Arc::clone(&self.image);
        let max_pixels = self.max_pixels;

        let surface = tokio::task::spawn_blocking(move || {
            // The cap bounds upscaling only; an image is never shrunk below
            // its natural size by it.
            let cap = max_pixels.max(image.width().max(image.height()));
            let (w, h) = scaled_size(image.width(), image.height(), scale, cap);
            let image = if (w, h) == (image.width(), image.height()) {
                (*image).clone()
            } else {
                image.resize_exact(w, h, FilterType::Lanczos3)
            };
            PageSurface {
                image,
                page_index: index,
                natural_size,
            }
        })
        .await
        .map_err(|e| DocToolsError::Internal(format!("Resample task panicked: {}", e)))?;

        Ok(surface)
    }
}

// ── PDFs ─────────────────────────────────────────────────────────────────

/// A PDF source rendered through pdfium.
pub struct PdfiumRaster {
    source: SourceDocument,
    library_path: Option<PathBuf>,
    password: Option<String>,
    max_pixels: u32,
    page_sizes: Vec<PageDimensions>,
}

impl PdfiumRaster {
    async fn open(
        source: SourceDocument,
        engine: &DefaultRasterEngine,
    ) -> Result<Self, DocToolsError> {
        let library_path = engine.pdfium_library_path.clone();
        let password = engine.password.clone();
        let src = source.clone();
        let lib = library_path.clone();
        let pwd = password.clone();

        let page_sizes = tokio::task::spawn_blocking(move || {
            read_page_sizes(src.bytes(), lib.as_deref(), pwd.as_deref())
        })
        .await
        .map_err(|e| DocToolsError::Internal(format!("PDF open task panicked: {}", e)))??;

        info!("PDF loaded: {} pages", page_sizes.len());
        source.record_page_count(page_sizes.len());

        Ok(Self {
            source,
            library_path,
            password,
            max_pixels: engine.max_rendered_pixels,
            page_sizes,
        })
    }
}

#[async_trait]
impl PageRenderer for PdfiumRaster {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn page_size(&self, index: usize) -> Result<PageDimensions, DocToolsError> {
        check_index(index, self.page_sizes.len())?;
        Ok(self.page_sizes[index])
    }

    async fn render_page(&self, index: usize, scale: f32) -> Result<PageSurface, DocToolsError> {
        let natural_size = self.page_size(index)?;
        let source = self.source.clone();
        let library_path = self.library_path.clone();
        let password = self.password.clone();
        let max_pixels = self.max_pixels;

        let image = tokio::task::spawn_blocking(move || {
            render_page_blocking(
                source.bytes(),
                library_path.as_deref(),
                password.as_deref(),
                index,
                scale,
                max_pixels,
            )
        })
        .await
        .map_err(|e| DocToolsError::Internal(format!("Render task panicked: {}", e)))??;

        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );

        Ok(PageSurface {
            image,
            page_index: index,
            natural_size,
        })
    }
}

/// Bind to pdfium: the explicit path if given, else the working directory,
/// else the system library search path.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, DocToolsError> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| DocToolsError::PdfiumBindingFailed(e.to_string()))
}

fn load_error(err: PdfiumError) -> DocToolsError {
    let detail = format!("{:?}", err);
    if detail.contains("Password") || detail.contains("password") {
        DocToolsError::PasswordRequired
    } else {
        DocToolsError::Decode { detail }
    }
}

fn read_page_sizes(
    bytes: &[u8],
    library_path: Option<&Path>,
    password: Option<&str>,
) -> Result<Vec<PageDimensions>, DocToolsError> {
    let pdfium = bind_pdfium(library_path)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(load_error)?;

    Ok(document
        .pages()
        .iter()
        .map(|page| PageDimensions {
            width_pt: page.width().value,
            height_pt: page.height().value,
        })
        .collect())
}

fn render_page_blocking(
    bytes: &[u8],
    library_path: Option<&Path>,
    password: Option<&str>,
    index: usize,
    scale: f32,
    max_pixels: u32,
) -> Result<DynamicImage, DocToolsError> {
    let pdfium = bind_pdfium(library_path)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(load_error)?;

    let pages = document.pages();
    let page = pages
        .get(pdfium_page_index(index, usize::from(pages.len()))?)
        .map_err(|e| DocToolsError::Decode {
            detail: format!("page {}: {:?}", index + 1, e),
        })?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| DocToolsError::Decode {
            detail: format!("page {}: {:?}", index + 1, e),
        })?;

    Ok(bitmap.as_image())
}

fn check_index(index: usize, total: usize) -> Result<(), DocToolsError> {
    if index >= total {
        return Err(DocToolsError::PageIndex {
            page: index + 1,
            total,
        });
    }
    Ok(())
}

/// pdfium addresses pages with a `u16`.
fn pdfium_page_index(index: usize, total: usize) -> Result<u16, DocToolsError> {
    check_index(index, total)?;
    u16::try_from(index).map_err(|_| DocToolsError::PageIndex {
        page: index + 1,
        total,
    })
}

/// `scale × (w, h)`, shrunk proportionally so the longest edge fits `max_pixels`.
pub(crate) fn scaled_size(w: u32, h: u32, scale: f32, max_pixels: u32) -> (u32, u32) {
    let mut sw = (w as f32 * scale).round().max(1.0);
    let mut sh = (h as f32 * scale).round().max(1.0);
    let longest = sw.max(sh);
    if max_pixels > 0 && longest > max_pixels as f32 {
        let shrink = max_pixels as f32 / longest;
        sw = (sw * shrink).round().max(1.0);
        sh = (sh * shrink).round().max(1.0);
    }
    (sw as u32, sh as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_source(w: u32, h: u32) -> SourceDocument {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 128])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        SourceDocument::from_bytes(buf, "tile.png").unwrap()
    }

    #[test]
    fn scaled_size_applies_scale_then_cap() {
        assert_eq!(scaled_size(100, 50, 2.0, 6000), (200, 100));
        assert_eq!(scaled_size(1000, 500, 10.0, 2000), (2000, 1000));
        assert_eq!(scaled_size(3, 3, 0.01, 6000), (1, 1));
    }

    #[test]
    fn pdfium_page_index_never_truncates() {
        assert_eq!(pdfium_page_index(3, 10).unwrap(), 3);
        assert!(matches!(
            pdfium_page_index(10, 10),
            Err(DocToolsError::PageIndex { page: 11, total: 10 })
        ));
        assert!(matches!(
            pdfium_page_index(70_000, 80_000),
            Err(DocToolsError::PageIndex {
                page: 70_001,
                total: 80_000
            })
        ));
    }

    #[tokio::test]
    async fn image_source_renders_one_page() {
        let engine = DefaultRasterEngine::from_config(&PipelineConfig::default());
        let renderer = engine.open(&png_source(40, 20)).await.unwrap();
        assert_eq!(renderer.page_count(), 1);

        let surface = renderer.render_page(0, 1.0).await.unwrap();
        assert_eq!((surface.width(), surface.height()), (40, 20));
        assert!(surface.has_alpha());
        assert_eq!(surface.natural_size.width_pt, 40.0);

        let doubled = renderer.render_page(0, 2.0).await.unwrap();
        assert_eq!((doubled.width(), doubled.height()), (80, 40));
    }

    #[tokio::test]
    async fn image_page_index_out_of_range() {
        let engine = DefaultRasterEngine::from_config(&PipelineConfig::default());
        let renderer = engine.open(&png_source(4, 4)).await.unwrap();
        let err = renderer.render_page(1, 1.0).await.unwrap_err();
        assert!(matches!(err, DocToolsError::PageIndex { page: 2, total: 1 }));
    }

    #[tokio::test]
    async fn truncated_image_is_a_decode_error() {
        let mut bytes = Vec::new();
        DynamicImage::new_rgb8(16, 16)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes.truncate(40);
        let source = SourceDocument::from_bytes(bytes, "broken.png").unwrap();

        let engine = DefaultRasterEngine::from_config(&PipelineConfig::default());
        let err = engine.open(&source).await.err().unwrap();
        assert!(matches!(err, DocToolsError::Decode { .. }));
    }
}
