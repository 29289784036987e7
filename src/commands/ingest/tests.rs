use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use crate::corpus::CorpusWriter;
use crate::error::ServiceError;
use crate::model::{IngestCounts, Record};
use crate::rasterize::PageRasterizer;
use crate::services::{DocumentTranscriber, ImageCaptioner, ImageOcr, JobHandle};
use crate::tagging::RuleTable;

use super::fallback::FallbackTranscriber;
use super::run::{process_convert_document, process_ocr_document};

const INSTRUCTION: &str = "Explain or derive the following expression or concept:";

struct ScriptedTranscriber {
    result: Result<String, ()>,
}

impl DocumentTranscriber for ScriptedTranscriber {
    fn submit(&self, _pdf_path: &Path) -> Result<JobHandle, ServiceError> {
        match &self.result {
            Ok(_) => Ok(JobHandle::new("job-1".to_string())),
            Err(()) => Err(ServiceError::Remote {
                service: "transcription",
                message: "submit rejected".to_string(),
            }),
        }
    }

    fn await_result(&self, _job: &JobHandle, _deadline: Instant) -> Result<String, ServiceError> {
        match &self.result {
            Ok(text) => Ok(text.clone()),
            Err(()) => Err(ServiceError::Remote {
                service: "transcription",
                message: "job errored".to_string(),
            }),
        }
    }
}

struct RecordingRasterizer {
    pages: usize,
    rendered: RefCell<Vec<usize>>,
}

impl RecordingRasterizer {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            rendered: RefCell::new(Vec::new()),
        }
    }
}

impl PageRasterizer for RecordingRasterizer {
    fn page_count(&self, _pdf_path: &Path) -> Result<usize> {
        Ok(self.pages)
    }

    fn rasterize_page(&self, _pdf_path: &Path, page_index: usize, _dpi: u32) -> Result<Vec<u8>> {
        self.rendered.borrow_mut().push(page_index);
        Ok(format!("png-{page_index}").into_bytes())
    }
}

struct NeverRasterizer;

impl PageRasterizer for NeverRasterizer {
    fn page_count(&self, _pdf_path: &Path) -> Result<usize> {
        bail!("rasterizer must not run when the service tier succeeds");
    }

    fn rasterize_page(&self, _pdf_path: &Path, _page_index: usize, _dpi: u32) -> Result<Vec<u8>> {
        bail!("rasterizer must not run when the service tier succeeds");
    }
}

struct SequentialOcr {
    calls: RefCell<usize>,
    texts: Vec<String>,
}

impl SequentialOcr {
    fn new(texts: Vec<String>) -> Self {
        Self {
            calls: RefCell::new(0),
            texts,
        }
    }
}

impl ImageOcr for SequentialOcr {
    fn ocr_image(&self, _png_bytes: &[u8]) -> Result<String, ServiceError> {
        let mut calls = self.calls.borrow_mut();
        let text = self.texts[*calls].clone();
        *calls += 1;
        Ok(text)
    }
}

/// Caption script: first call succeeds, second fails, third returns blank.
struct FlakyCaptioner {
    calls: RefCell<usize>,
}

impl ImageCaptioner for FlakyCaptioner {
    fn caption_image(&self, _png_bytes: &[u8], _context: &str) -> Result<String, ServiceError> {
        let mut calls = self.calls.borrow_mut();
        let call = *calls;
        *calls += 1;
        match call {
            0 => Ok("A sketch of the field lines around a dipole".to_string()),
            1 => Err(ServiceError::Remote {
                service: "captioning",
                message: "model overloaded".to_string(),
            }),
            _ => Ok("   ".to_string()),
        }
    }
}

fn read_records(path: &Path) -> Vec<Record> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn service_failure_falls_back_to_every_page_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.jsonl");
    let image_dir = dir.path().join("images");

    let transcriber = ScriptedTranscriber { result: Err(()) };
    let rasterizer = RecordingRasterizer::new(3);
    let ocr = SequentialOcr::new(vec![
        "OCR transcript of page zero".to_string(),
        "OCR transcript of page one".to_string(),
        "OCR transcript of page two".to_string(),
    ]);
    let captioner = FlakyCaptioner {
        calls: RefCell::new(0),
    };

    let fallback = FallbackTranscriber {
        rasterizer: &rasterizer,
        ocr: &ocr,
        captioner: Some(&captioner),
        image_dir: &image_dir,
        dpi: 300,
    };

    let mut writer = CorpusWriter::create(&corpus_path).unwrap();
    let mut counts = IngestCounts::default();
    let mut warnings = Vec::new();
    let rules = RuleTable::blocks();

    process_convert_document(
        &transcriber,
        &fallback,
        Path::new("slides/week1.pdf"),
        "week1.pdf",
        INSTRUCTION,
        &rules,
        10,
        None,
        Duration::from_secs(1),
        &mut writer,
        &mut counts,
        &mut warnings,
    )
    .unwrap();
    drop(writer);

    // Every page, in increasing page order.
    assert_eq!(*rasterizer.rendered.borrow(), vec![0, 1, 2]);
    assert_eq!(counts.fallback_tier_docs, 1);
    assert_eq!(counts.service_tier_docs, 0);
    assert_eq!(counts.pages_rasterized, 3);
    assert_eq!(counts.pages_ocr, 3);
    assert_eq!(counts.pages_captioned, 1);
    assert_eq!(counts.captions_skipped, 2);

    // Page images are cached on disk, keyed by stem and page index.
    assert!(image_dir.join("week1_page_0.png").exists());
    assert!(image_dir.join("week1_page_2.png").exists());

    // Block order matches page order even though captioning was skipped
    // for the later pages.
    let records = read_records(&corpus_path);
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].output, "OCR transcript of page zero");
    assert!(records[1].output.contains("[Diagram Explanation]"));
    assert!(records[1].output.contains("dipole"));
    assert_eq!(records[2].output, "OCR transcript of page one");
    assert_eq!(records[3].output, "OCR transcript of page two");
    assert_eq!(records[1].meta.tags, vec!["visual_reasoning"]);
    assert_eq!(records[0].meta.tags, vec!["other"]);

    assert_eq!(counts.records_written, 4);
    assert!(
        warnings
            .iter()
            .any(|warning| warning.contains("captioning failed"))
    );
    assert!(
        warnings
            .iter()
            .any(|warning| warning.contains("service tier failed"))
    );
}

#[test]
fn service_success_segments_tags_and_discards_short_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.jsonl");
    let image_dir = dir.path().join("images");

    let transcriber = ScriptedTranscriber {
        result: Ok("x = 1\ny = 2\n\nThe divergence theorem relates flux and volume.\n\nshort"
            .to_string()),
    };
    let rasterizer = NeverRasterizer;
    let ocr = SequentialOcr::new(Vec::new());

    let fallback = FallbackTranscriber {
        rasterizer: &rasterizer,
        ocr: &ocr,
        captioner: None,
        image_dir: &image_dir,
        dpi: 300,
    };

    let mut writer = CorpusWriter::create(&corpus_path).unwrap();
    let mut counts = IngestCounts::default();
    let mut warnings = Vec::new();
    let rules = RuleTable::blocks();

    process_convert_document(
        &transcriber,
        &fallback,
        Path::new("slides/week2.pdf"),
        "week2.pdf",
        INSTRUCTION,
        &rules,
        10,
        None,
        Duration::from_secs(1),
        &mut writer,
        &mut counts,
        &mut warnings,
    )
    .unwrap();
    drop(writer);

    assert_eq!(counts.service_tier_docs, 1);
    assert_eq!(counts.fallback_tier_docs, 0);
    assert_eq!(counts.blocks_segmented, 3);
    assert_eq!(counts.blocks_discarded_short, 1);
    assert_eq!(counts.records_written, 2);
    assert!(warnings.is_empty());

    let records = read_records(&corpus_path);
    assert_eq!(records.len(), 2);
    // Whitespace is collapsed at record construction.
    assert_eq!(records[0].output, "x = 1 y = 2");
    assert_eq!(records[0].meta.line, Some(0));
    assert_eq!(records[0].meta.tags, vec!["other"]);
    assert_eq!(records[1].meta.line, Some(1));
    assert_eq!(records[1].meta.tags, vec!["electromagnetics"]);
    assert_eq!(counts.tag_counts.get("electromagnetics"), Some(&1));
    assert_eq!(counts.tag_counts.get("other"), Some(&1));
}

#[test]
fn ocr_only_mode_writes_one_record_per_page() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_path = dir.path().join("corpus.jsonl");
    let image_dir = dir.path().join("images");

    let rasterizer = RecordingRasterizer::new(2);
    let ocr = SequentialOcr::new(vec![
        "A full page of raw transcription text".to_string(),
        "tiny".to_string(),
    ]);

    let fallback = FallbackTranscriber {
        rasterizer: &rasterizer,
        ocr: &ocr,
        captioner: None,
        image_dir: &image_dir,
        dpi: 300,
    };

    let mut writer = CorpusWriter::create(&corpus_path).unwrap();
    let mut counts = IngestCounts::default();
    let mut warnings = Vec::new();
    let rules = RuleTable::raw_ocr();

    process_ocr_document(
        &fallback,
        Path::new("book/chapter3.pdf"),
        "chapter3.pdf",
        INSTRUCTION,
        &rules,
        10,
        None,
        &mut writer,
        &mut counts,
        &mut warnings,
    )
    .unwrap();
    drop(writer);

    assert_eq!(*rasterizer.rendered.borrow(), vec![0, 1]);
    assert_eq!(counts.pages_discarded_short, 1);
    assert_eq!(counts.records_written, 1);

    let records = read_records(&corpus_path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].meta.page, Some(0));
    assert_eq!(records[0].meta.line, None);
    assert_eq!(records[0].meta.source, "chapter3.pdf");
    assert_eq!(records[0].meta.tags, vec!["ocr"]);
}
