use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::Record;
use crate::util::ensure_directory;

/// Append-only line-delimited corpus writer.
///
/// Each record is validated, serialized to one line and written with a
/// single write followed by a flush, so a record is either fully present
/// in the file or absent. Prior lines are never rewritten.
pub struct CorpusWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: usize,
}

impl CorpusWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open corpus file: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    pub fn append(&mut self, record: &Record) -> Result<()> {
        record.validate().with_context(|| {
            format!(
                "refusing to append invalid record from {}",
                record.meta.source
            )
        })?;

        let mut line = serde_json::to_string(record).context("failed to serialize record")?;
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;

        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }
}
