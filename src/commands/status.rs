use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::IngestRunManifest;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args
        .manifest_dir
        .unwrap_or_else(|| args.data_dir.join("manifests"));

    info!(data_dir = %args.data_dir.display(), "status requested");

    match newest_run_manifest(&manifest_dir)? {
        Some(path) => {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: IngestRunManifest = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            info!(
                run_id = %manifest.run_id,
                status = %manifest.status,
                mode = %manifest.mode,
                started_at = %manifest.started_at,
                updated_at = %manifest.updated_at,
                pdfs_processed = manifest.counts.processed_pdf_count,
                pdfs_failed = manifest.counts.failed_pdf_count,
                records_written = manifest.counts.records_written,
                warnings = manifest.warnings.len(),
                "latest ingest run"
            );
        }
        None => {
            warn!(path = %manifest_dir.display(), "no ingest run manifests found");
        }
    }

    let mut corpus_files = discover_jsonl_files(&args.data_dir)?;
    corpus_files.sort();

    if corpus_files.is_empty() {
        warn!(path = %args.data_dir.display(), "no corpus files found");
        return Ok(());
    }

    for path in corpus_files {
        let records = count_lines(&path)?;
        info!(path = %path.display(), records, "corpus file");
    }

    Ok(())
}

/// Run manifests are named `ingest_run_{timestamp}.json`, so the
/// lexicographically greatest filename is the most recent run.
fn newest_run_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut manifests = Vec::new();
    let entries = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?;

    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?;
        let path = entry.path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with("ingest_run_") && name.ends_with(".json"))
            .unwrap_or(false);

        if is_run_manifest {
            manifests.push(path);
        }
    }

    manifests.sort();
    Ok(manifests.pop())
}

fn discover_jsonl_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !data_dir.exists() {
        return Ok(files);
    }

    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("failed to read {}", data_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", data_dir.display()))?;
        let path = entry.path();

        let is_jsonl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
            .unwrap_or(false);

        if is_jsonl {
            files.push(path);
        }
    }

    Ok(files)
}

fn count_lines(path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        line.with_context(|| format!("failed to read {}", path.display()))?;
        count += 1;
    }
    Ok(count)
}
