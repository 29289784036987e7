use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::util::clean_text;

/// One instruction-style training example, serialized as a single JSONL
/// line in `instruction`/`input`/`output`/`meta` field order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    pub output: String,
    pub meta: RecordMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMeta {
    pub source: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<usize>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept_tags: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    /// Block-level record produced by the convert ingestion mode. Text
    /// fields are sanitized at construction so persisted records carry no
    /// control characters or uncollapsed whitespace.
    pub fn block(
        instruction: &str,
        output: &str,
        source: &str,
        line: usize,
        tags: Vec<String>,
    ) -> Self {
        Self {
            instruction: clean_text(instruction),
            input: String::new(),
            output: clean_text(output),
            meta: RecordMeta {
                source: source.to_string(),
                line: Some(line),
                tags,
                ..RecordMeta::default()
            },
        }
    }

    /// Page-level record produced by the ocr-only ingestion mode.
    pub fn page(
        instruction: &str,
        output: &str,
        source: &str,
        page: usize,
        tags: Vec<String>,
    ) -> Self {
        Self {
            instruction: clean_text(instruction),
            input: String::new(),
            output: clean_text(output),
            meta: RecordMeta {
                source: source.to_string(),
                page: Some(page),
                tags,
                ..RecordMeta::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.instruction.trim().is_empty() {
            return Err(RecordError::EmptyField("instruction"));
        }
        if self.output.trim().is_empty() {
            return Err(RecordError::EmptyField("output"));
        }
        if self.meta.tags.is_empty() {
            return Err(RecordError::NoTags);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfEntry {
    pub filename: String,
    pub root: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_roots: Vec<String>,
    pub pdf_count: usize,
    pub pdfs: Vec<PdfEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPaths {
    pub materials_roots: Vec<String>,
    pub image_dir: String,
    pub corpus_path: String,
    pub manifest_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestCounts {
    pub pdf_count: usize,
    pub processed_pdf_count: usize,
    pub failed_pdf_count: usize,
    pub service_tier_docs: usize,
    pub fallback_tier_docs: usize,
    pub pages_rasterized: usize,
    pub pages_ocr: usize,
    pub pages_captioned: usize,
    pub captions_skipped: usize,
    pub pages_discarded_short: usize,
    pub blocks_segmented: usize,
    pub blocks_discarded_short: usize,
    pub records_written: usize,
    pub tag_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub mode: String,
    pub started_at: String,
    pub updated_at: String,
    pub paths: IngestPaths,
    pub counts: IngestCounts,
    pub source_hashes: Vec<PdfEntry>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanCounts {
    pub valid: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SalvageCounts {
    pub salvaged: usize,
    pub dropped_incomplete: usize,
    pub leftover_lines: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TagCounts {
    pub records: usize,
    pub skipped: usize,
    pub tag_counts: BTreeMap<String, usize>,
}
