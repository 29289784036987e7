//! PDF page rasterization via PDFium.
//!
//! Each page is rendered to a PNG at a caller-given DPI for the local OCR
//! tier. The `Pdfium` handle is loaded per call because the upstream type
//! is `!Send`; the OS caches the library load, so repeats are near-free.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::debug;

/// Cap on either rendered dimension. Oversized pages keep their aspect
/// ratio and are scaled down to fit.
const MAX_DIMENSION_PX: u32 = 4096;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

pub trait PageRasterizer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize>;

    /// Render one zero-indexed page to PNG bytes.
    fn rasterize_page(&self, pdf_path: &Path, page_index: usize, dpi: u32) -> Result<Vec<u8>>;
}

pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    /// Fails fast when the PDFium library cannot be loaded.
    pub fn new() -> Result<Self> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|error| anyhow!("failed to load {}: {error}", pdf_path.display()))?;
        Ok(document.pages().len() as usize)
    }

    fn rasterize_page(&self, pdf_path: &Path, page_index: usize, dpi: u32) -> Result<Vec<u8>> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|error| anyhow!("failed to load {}: {error}", pdf_path.display()))?;
        let pages = document.pages();

        let page_number = u16::try_from(page_index)
            .map_err(|_| anyhow!("page index {page_index} out of range"))?;
        let page = pages.get(page_number).map_err(|error| {
            anyhow!(
                "page {page_index} not found in {} ({} pages): {error}",
                pdf_path.display(),
                pages.len()
            )
        })?;

        let (width, height) =
            compute_render_dimensions(page.width().value, page.height().value, dpi);
        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);

        let bitmap = page.render_with_config(&config).map_err(|error| {
            anyhow!(
                "failed to render page {page_index} of {}: {error}",
                pdf_path.display()
            )
        })?;

        let mut cursor = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut cursor, ImageFormat::Png)
            .context("failed to encode rendered page as PNG")?;
        let png_bytes = cursor.into_inner();

        debug!(
            page = page_index,
            width,
            height,
            png_size = png_bytes.len(),
            "rasterized page"
        );

        Ok(png_bytes)
    }
}

fn load_pdfium() -> Result<Pdfium> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|error| anyhow!("failed to load PDFium from {path}: {error}"))?;
        return Ok(Pdfium::new(bindings));
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|error| {
        anyhow!("PDFium library not found; set PDFIUM_DYNAMIC_LIB_PATH or install it: {error}")
    })?;
    Ok(Pdfium::new(bindings))
}

/// Pixel dimensions for rendering at `dpi`, clamped to
/// [1, MAX_DIMENSION_PX] with aspect ratio preserved when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_width = (width_points * scale).max(1.0);
    let raw_height = (height_points * scale).max(1.0);

    let max_dimension = raw_width.max(raw_height);
    if max_dimension > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dimension;
        let width = ((raw_width * ratio).round() as u32).clamp(1, MAX_DIMENSION_PX);
        let height = ((raw_height * ratio).round() as u32).clamp(1, MAX_DIMENSION_PX);
        (width, height)
    } else {
        (raw_width.round() as u32, raw_height.round() as u32)
    }
}
