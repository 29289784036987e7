use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::cli::SalvageArgs;
use crate::model::SalvageCounts;
use crate::util::ensure_directory;

/// Recover complete records from a corpus file containing truncated or
/// concatenated line-delimited entries, writing them to a new file. The
/// original file is never touched.
pub fn run(args: SalvageArgs) -> Result<()> {
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    if let Some(parent) = args.output.parent() {
        ensure_directory(parent)?;
    }
    let output = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let counts = salvage_stream(BufReader::new(input), BufWriter::new(output))?;

    info!(
        salvaged = counts.salvaged,
        dropped_incomplete = counts.dropped_incomplete,
        leftover_lines = counts.leftover_lines,
        output = %args.output.display(),
        "salvage completed"
    );

    Ok(())
}

/// Single-pass streaming accumulator. Non-blank lines are buffered; after
/// each append the concatenated buffer is parsed. A successful parse
/// resets the buffer whether or not the object is usable: well-formed
/// objects missing a non-empty instruction or output are dropped rather
/// than carried forward. An unterminated trailing fragment is discarded.
pub(crate) fn salvage_stream<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
) -> Result<SalvageCounts> {
    let mut counts = SalvageCounts::default();
    let mut buffer: Vec<String> = Vec::new();

    for line in reader.lines() {
        let line = line.context("failed to read input line")?;
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }

        buffer.push(stripped.to_string());

        let joined = buffer.concat();
        match serde_json::from_str::<Value>(&joined) {
            Ok(value) => {
                if has_required_fields(&value) {
                    let line =
                        serde_json::to_string(&value).context("failed to serialize record")?;
                    writeln!(writer, "{line}").context("failed to write salvaged record")?;
                    counts.salvaged += 1;
                } else {
                    counts.dropped_incomplete += 1;
                }
                buffer.clear();
            }
            Err(_) => {
                // Not yet a complete object; keep accumulating.
            }
        }
    }

    counts.leftover_lines = buffer.len();
    if !buffer.is_empty() {
        debug!(
            lines = buffer.len(),
            "discarding unterminated trailing fragment"
        );
    }

    writer.flush().context("failed to flush salvaged output")?;
    Ok(counts)
}

fn has_required_fields(value: &Value) -> bool {
    ["instruction", "output"].iter().all(|field| {
        value
            .get(field)
            .and_then(Value::as_str)
            .map(|text| !text.trim().is_empty())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salvage_to_string(input: &str) -> (String, SalvageCounts) {
        let mut output = Vec::new();
        let counts = salvage_stream(input.as_bytes(), &mut output).unwrap();
        (String::from_utf8(output).unwrap(), counts)
    }

    #[test]
    fn reconstructs_records_split_across_physical_lines() {
        let input = concat!(
            r#"{"instruction":"Q1","output":"A1"}"#,
            "\n",
            r#"{"instruction":"Q2","out"#,
            "\n",
            r#"put":"A2"}"#,
            "\n",
            r#"{"instruction":"Q3","output":"A3"}"#,
            "\n",
        );

        let (salvaged, counts) = salvage_to_string(input);

        assert_eq!(counts.salvaged, 3);
        assert_eq!(counts.dropped_incomplete, 0);
        assert_eq!(counts.leftover_lines, 0);

        let records: Vec<Value> = salvaged
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        // The split record comes back with the same field values as an
        // unsplit equivalent.
        assert_eq!(records[1]["instruction"], "Q2");
        assert_eq!(records[1]["output"], "A2");
    }

    #[test]
    fn parseable_objects_missing_fields_are_dropped_and_reset_the_buffer() {
        let input = concat!(
            r#"{"instruction":"Q1"}"#,
            "\n",
            r#"{"instruction":"Q2","output":"A2"}"#,
            "\n",
            r#"{"instruction":"Q3","output":"  "}"#,
            "\n",
        );

        let (salvaged, counts) = salvage_to_string(input);

        assert_eq!(counts.salvaged, 1);
        assert_eq!(counts.dropped_incomplete, 2);
        assert_eq!(salvaged.lines().count(), 1);
        assert!(salvaged.contains("\"A2\""));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let input = concat!(
            r#"{"instruction":"Q","out"#,
            "\n",
            "\n",
            r#"put":"A"}"#,
            "\n",
        );

        let (salvaged, counts) = salvage_to_string(input);

        assert_eq!(counts.salvaged, 1);
        assert_eq!(salvaged.lines().count(), 1);
    }

    #[test]
    fn unterminated_trailing_fragment_is_discarded() {
        let input = concat!(
            r#"{"instruction":"Q1","output":"A1"}"#,
            "\n",
            r#"{"instruction":"Q2","outp"#,
            "\n",
        );

        let (salvaged, counts) = salvage_to_string(input);

        assert_eq!(counts.salvaged, 1);
        assert_eq!(counts.leftover_lines, 1);
        assert_eq!(salvaged.lines().count(), 1);
    }

    #[test]
    fn salvaged_count_never_exceeds_valid_objects() {
        // Two corrupt fragments that never form a parseable object.
        let input = "{\"instruction\":\n{\"output\":\n";
        let (salvaged, counts) = salvage_to_string(input);

        assert_eq!(counts.salvaged, 0);
        assert!(salvaged.is_empty());
        assert_eq!(counts.leftover_lines, 2);
    }
}
