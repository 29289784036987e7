use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{IngestArgs, IngestMode};
use crate::commands::inventory;
use crate::corpus::CorpusWriter;
use crate::error::ServiceError;
use crate::model::{IngestCounts, IngestPaths, IngestRunManifest, Record};
use crate::rasterize::PdfiumRasterizer;
use crate::segment::segment;
use crate::services::{DocumentTranscriber, ImageCaptioner, MathpixClient, VisionCaptionClient};
use crate::tagging::RuleTable;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::fallback::FallbackTranscriber;

/// Task framing stamped on every record unless overridden.
const DEFAULT_INSTRUCTION: &str =
    "Explain or derive the following expression or concept from the course materials:";

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let materials_roots = inventory::resolve_materials_roots(&args.materials_roots);
    let manifest_dir = args
        .manifest_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("data/manifests"));
    ensure_directory(&manifest_dir)?;
    let manifest_path =
        manifest_dir.join(format!("ingest_run_{}.json", utc_compact_string(started_ts)));

    info!(
        run_id = %run_id,
        mode = args.mode.as_str(),
        corpus = %args.output_path.display(),
        "starting ingest"
    );

    let pdf_inventory = inventory::build_manifest(&materials_roots)?;

    let service = MathpixClient::from_env(
        &args.transcription_base_url,
        Duration::from_secs(args.poll_interval_secs),
    )?;
    let rasterizer = PdfiumRasterizer::new()?;
    let captioner = if matches!(args.mode, IngestMode::Convert) && !args.no_captions {
        let client = VisionCaptionClient::from_env(&args.caption_base_url, &args.caption_model);
        if client.is_none() {
            warn!("OPENAI_API_KEY not set, diagram captioning disabled");
        }
        client
    } else {
        None
    };

    let instruction = args
        .instruction
        .clone()
        .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string());
    let block_rules = RuleTable::blocks();
    let ocr_rules = RuleTable::raw_ocr();
    let service_timeout = Duration::from_secs(args.service_timeout_secs);

    let mut writer = CorpusWriter::create(&args.output_path)?;
    let mut counts = IngestCounts {
        pdf_count: pdf_inventory.pdf_count,
        ..IngestCounts::default()
    };
    let mut warnings = Vec::new();

    let fallback = FallbackTranscriber {
        rasterizer: &rasterizer,
        ocr: &service,
        captioner: captioner.as_ref().map(|client| client as &dyn ImageCaptioner),
        image_dir: &args.image_dir,
        dpi: args.dpi,
    };

    for entry in &pdf_inventory.pdfs {
        let pdf_path = PathBuf::from(&entry.root).join(&entry.filename);

        let result = match args.mode {
            IngestMode::Convert => process_convert_document(
                &service,
                &fallback,
                &pdf_path,
                &entry.filename,
                &instruction,
                &block_rules,
                args.min_block_chars,
                args.max_pages_per_doc,
                service_timeout,
                &mut writer,
                &mut counts,
                &mut warnings,
            ),
            IngestMode::OcrOnly => process_ocr_document(
                &fallback,
                &pdf_path,
                &entry.filename,
                &instruction,
                &ocr_rules,
                args.min_block_chars,
                args.max_pages_per_doc,
                &mut writer,
                &mut counts,
                &mut warnings,
            ),
        };

        match result {
            Ok(()) => counts.processed_pdf_count += 1,
            Err(error) => {
                counts.failed_pdf_count += 1;
                warn!(
                    pdf = %pdf_path.display(),
                    error = %error,
                    "document failed, continuing with the rest of the corpus"
                );
                warnings.push(format!("{} failed: {error:#}", entry.filename));
            }
        }
    }

    let updated_at = now_utc_string();
    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        status: "completed".to_string(),
        mode: args.mode.as_str().to_string(),
        started_at,
        updated_at,
        paths: IngestPaths {
            materials_roots: materials_roots
                .iter()
                .map(|root| root.display().to_string())
                .collect(),
            image_dir: args.image_dir.display().to_string(),
            corpus_path: args.output_path.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
        },
        counts: counts.clone(),
        source_hashes: pdf_inventory.pdfs,
        warnings,
        notes: vec![
            "Corpus file is append-only; cleaning and salvage write new files.".to_string(),
        ],
    };

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote ingest run manifest");

    for (tag, count) in &counts.tag_counts {
        info!(tag = %tag, count, "tag summary");
    }
    info!(
        records = writer.records_written(),
        processed = counts.processed_pdf_count,
        failed = counts.failed_pdf_count,
        "ingest completed"
    );

    Ok(())
}

/// One document through the convert pipeline: cloud tier first, local OCR
/// fallback on any service failure, then segment, tag, and append.
#[allow(clippy::too_many_arguments)]
pub(super) fn process_convert_document(
    transcriber: &dyn DocumentTranscriber,
    fallback: &FallbackTranscriber<'_>,
    pdf_path: &Path,
    source: &str,
    instruction: &str,
    rules: &RuleTable,
    min_block_chars: usize,
    max_pages: Option<usize>,
    service_timeout: Duration,
    writer: &mut CorpusWriter,
    counts: &mut IngestCounts,
    warnings: &mut Vec<String>,
) -> Result<()> {
    info!(pdf = %pdf_path.display(), "processing document");

    let text = match transcribe_via_service(transcriber, pdf_path, service_timeout) {
        Ok(text) => {
            counts.service_tier_docs += 1;
            text
        }
        Err(error) => {
            warn!(
                pdf = %pdf_path.display(),
                error = %error,
                "transcription service failed, falling back to local OCR"
            );
            warnings.push(format!("service tier failed for {source}: {error}"));
            counts.fallback_tier_docs += 1;

            let pages = fallback.transcribe_pages(pdf_path, max_pages, counts, warnings)?;
            pages
                .into_iter()
                .map(|page| page.text)
                .collect::<Vec<String>>()
                .join("\n\n")
        }
    };

    for (index, block) in segment(&text).enumerate() {
        counts.blocks_segmented += 1;

        let trimmed = block.trim();
        if trimmed.chars().count() < min_block_chars {
            counts.blocks_discarded_short += 1;
            continue;
        }

        let tags = rules.tag(trimmed);
        let record = Record::block(instruction, trimmed, source, index, tags);
        writer.append(&record)?;
        for tag in &record.meta.tags {
            *counts.tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        counts.records_written += 1;
    }

    Ok(())
}

/// One document through the ocr-only pipeline: every page is rasterized
/// and OCRed locally, producing one record per sufficiently long page.
#[allow(clippy::too_many_arguments)]
pub(super) fn process_ocr_document(
    fallback: &FallbackTranscriber<'_>,
    pdf_path: &Path,
    source: &str,
    instruction: &str,
    rules: &RuleTable,
    min_block_chars: usize,
    max_pages: Option<usize>,
    writer: &mut CorpusWriter,
    counts: &mut IngestCounts,
    warnings: &mut Vec<String>,
) -> Result<()> {
    info!(pdf = %pdf_path.display(), "ocr-only processing");
    counts.fallback_tier_docs += 1;

    let pages = fallback.transcribe_pages(pdf_path, max_pages, counts, warnings)?;
    for page in pages {
        let trimmed = page.ocr_text.trim();
        if trimmed.chars().count() < min_block_chars {
            counts.pages_discarded_short += 1;
            continue;
        }

        let tags = rules.tag(trimmed);
        let record = Record::page(instruction, trimmed, source, page.page_index, tags);
        writer.append(&record)?;
        for tag in &record.meta.tags {
            *counts.tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        counts.records_written += 1;
    }

    Ok(())
}

fn transcribe_via_service(
    transcriber: &dyn DocumentTranscriber,
    pdf_path: &Path,
    timeout: Duration,
) -> Result<String, ServiceError> {
    let job = transcriber.submit(pdf_path)?;
    let deadline = Instant::now() + timeout;
    transcriber.await_result(&job, deadline)
}
