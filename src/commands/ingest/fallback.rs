use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::IngestCounts;
use crate::rasterize::PageRasterizer;
use crate::services::{ImageCaptioner, ImageOcr};
use crate::util::ensure_directory;

/// Contextual prompt sent with every captioning request.
pub(super) const DIAGRAM_CONTEXT_PROMPT: &str =
    "Explain this diagram in the context of an electromagnetics course.";

/// Local transcription tier: rasterize every page, OCR each image, and
/// optionally append a captioned diagram explanation. Page images are kept
/// on disk as cache/debug artifacts, keyed by document stem and page index
/// so re-runs overwrite deterministically.
pub(super) struct FallbackTranscriber<'a> {
    pub rasterizer: &'a dyn PageRasterizer,
    pub ocr: &'a dyn ImageOcr,
    pub captioner: Option<&'a dyn ImageCaptioner>,
    pub image_dir: &'a Path,
    pub dpi: u32,
}

/// What one page contributed: the raw OCR text and the full text including
/// any diagram explanation block.
pub(super) struct PageContribution {
    pub page_index: usize,
    pub ocr_text: String,
    pub text: String,
}

impl FallbackTranscriber<'_> {
    /// Transcribe every page in increasing page order. OCR failure is a
    /// hard failure for the tier; captioning failure is logged and skipped.
    pub fn transcribe_pages(
        &self,
        pdf_path: &Path,
        max_pages: Option<usize>,
        counts: &mut IngestCounts,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<PageContribution>> {
        let mut page_count = self.rasterizer.page_count(pdf_path)?;
        if let Some(limit) = max_pages {
            page_count = page_count.min(limit);
        }

        ensure_directory(self.image_dir)?;
        let stem = pdf_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("document");

        info!(pdf = %pdf_path.display(), pages = page_count, "local fallback transcription");

        let mut pages = Vec::with_capacity(page_count);
        for page_index in 0..page_count {
            let png = self.rasterizer.rasterize_page(pdf_path, page_index, self.dpi)?;
            let image_path = self.image_dir.join(format!("{stem}_page_{page_index}.png"));
            fs::write(&image_path, &png)
                .with_context(|| format!("failed to write {}", image_path.display()))?;
            counts.pages_rasterized += 1;

            let ocr_text = self.ocr.ocr_image(&png)?;
            counts.pages_ocr += 1;

            let mut text = ocr_text.clone();
            if let Some(captioner) = self.captioner {
                match captioner.caption_image(&png, DIAGRAM_CONTEXT_PROMPT) {
                    Ok(caption) if !caption.trim().is_empty() => {
                        text.push_str("\n\n[Diagram Explanation]\n");
                        text.push_str(caption.trim());
                        counts.pages_captioned += 1;
                    }
                    Ok(_) => {
                        counts.captions_skipped += 1;
                    }
                    Err(error) => {
                        warn!(
                            pdf = %pdf_path.display(),
                            page = page_index,
                            error = %error,
                            "diagram captioning failed, skipping"
                        );
                        warnings.push(format!(
                            "captioning failed for {} page {page_index}: {error}",
                            pdf_path.display()
                        ));
                        counts.captions_skipped += 1;
                    }
                }
            }

            pages.push(PageContribution {
                page_index,
                ocr_text,
                text,
            });
        }

        Ok(pages)
    }
}
