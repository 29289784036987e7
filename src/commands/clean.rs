use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::cli::CleanArgs;
use crate::error::RecordError;
use crate::model::CleanCounts;
use crate::util::{clean_text, ensure_directory};

/// Offline cleaning pass: keep only decodable records with both required
/// fields non-empty, sanitize their text fields, and write them to a new
/// file. Running the pass on an already-clean file reproduces it exactly.
pub fn run(args: CleanArgs) -> Result<()> {
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    if let Some(parent) = args.output.parent() {
        ensure_directory(parent)?;
    }
    let output = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let counts = clean_stream(BufReader::new(input), BufWriter::new(output))?;

    info!(
        valid = counts.valid,
        invalid = counts.invalid,
        output = %args.output.display(),
        "clean completed"
    );

    Ok(())
}

pub(crate) fn clean_stream<R: BufRead, W: Write>(reader: R, mut writer: W) -> Result<CleanCounts> {
    let mut counts = CleanCounts::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read input line")?;

        match clean_line(&line) {
            Ok(cleaned) => {
                writeln!(writer, "{cleaned}").context("failed to write cleaned record")?;
                counts.valid += 1;
            }
            Err(error) => {
                debug!(line = index + 1, error = %error, "dropped invalid record");
                counts.invalid += 1;
            }
        }
    }

    writer.flush().context("failed to flush cleaned output")?;
    Ok(counts)
}

fn clean_line(line: &str) -> Result<String, RecordError> {
    let mut value: Value = serde_json::from_str(line)?;
    let object = value.as_object_mut().ok_or(RecordError::NotAnObject)?;

    let instruction = object
        .get("instruction")
        .and_then(Value::as_str)
        .map(clean_text)
        .ok_or(RecordError::MissingField("instruction"))?;
    let output = object
        .get("output")
        .and_then(Value::as_str)
        .map(clean_text)
        .ok_or(RecordError::MissingField("output"))?;

    if instruction.is_empty() {
        return Err(RecordError::EmptyField("instruction"));
    }
    if output.is_empty() {
        return Err(RecordError::EmptyField("output"));
    }

    let input = object
        .get("input")
        .and_then(Value::as_str)
        .map(clean_text)
        .unwrap_or_default();

    object.insert("instruction".to_string(), Value::String(instruction));
    object.insert("input".to_string(), Value::String(input));
    object.insert("output".to_string(), Value::String(output));

    Ok(serde_json::to_string(&value)?)
}
