use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::cli::{TagArgs, TagMode};
use crate::model::TagCounts;
use crate::tagging::RuleTable;
use crate::util::ensure_directory;

/// Offline tagging pass over an existing JSONL file. Subject mode rebuilds
/// `meta` from the instruction text; concepts mode adds fine-grained
/// `meta.concept_tags` from the output text. Undecodable lines are skipped
/// and counted, never fatal.
pub fn run(args: TagArgs) -> Result<()> {
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    if let Some(parent) = args.output.parent() {
        ensure_directory(parent)?;
    }
    let output = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let source_name = args
        .input
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unknown")
        .to_string();

    let table = match args.mode {
        TagMode::Subject => RuleTable::subjects(),
        TagMode::Concepts => RuleTable::concepts()?,
    };

    let counts = tag_stream(
        BufReader::new(input),
        BufWriter::new(output),
        &table,
        args.mode,
        &source_name,
    )?;

    for (tag, count) in &counts.tag_counts {
        info!(tag = %tag, count, "tag summary");
    }
    info!(
        mode = args.mode.as_str(),
        records = counts.records,
        skipped = counts.skipped,
        output = %args.output.display(),
        "tagging completed"
    );

    Ok(())
}

pub(crate) fn tag_stream<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    table: &RuleTable,
    mode: TagMode,
    source_name: &str,
) -> Result<TagCounts> {
    let mut counts = TagCounts::default();

    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.context("failed to read input line")?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            warn!(line = number, "skipping empty line");
            counts.skipped += 1;
            continue;
        }

        let mut value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(error) => {
                warn!(line = number, error = %error, "skipping undecodable line");
                counts.skipped += 1;
                continue;
            }
        };
        let Some(object) = value.as_object_mut() else {
            warn!(line = number, "skipping non-object line");
            counts.skipped += 1;
            continue;
        };

        let tags = match mode {
            TagMode::Subject => {
                let instruction = object
                    .get("instruction")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let tags = table.tag(instruction);
                object.insert(
                    "meta".to_string(),
                    json!({
                        "source": source_name,
                        "line": number,
                        "tags": tags.clone(),
                    }),
                );
                tags
            }
            TagMode::Concepts => {
                let output_text = object.get("output").and_then(Value::as_str).unwrap_or("");
                let tags = table.tag(output_text);

                if !object.get("meta").map(Value::is_object).unwrap_or(false) {
                    object.insert("meta".to_string(), Value::Object(Map::new()));
                }
                if let Some(meta) = object.get_mut("meta").and_then(Value::as_object_mut) {
                    meta.insert("concept_tags".to_string(), json!(tags.clone()));
                }
                tags
            }
        };

        for tag in tags {
            *counts.tag_counts.entry(tag).or_insert(0) += 1;
        }

        let line = serde_json::to_string(&value).context("failed to serialize tagged record")?;
        writeln!(writer, "{line}").context("failed to write tagged record")?;
        counts.records += 1;
    }

    writer.flush().context("failed to flush tagged output")?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_to_string(input: &str, mode: TagMode) -> (String, TagCounts) {
        let table = match mode {
            TagMode::Subject => RuleTable::subjects(),
            TagMode::Concepts => RuleTable::concepts().unwrap(),
        };

        let mut output = Vec::new();
        let counts = tag_stream(
            input.as_bytes(),
            &mut output,
            &table,
            mode,
            "course_train.jsonl",
        )
        .unwrap();
        (String::from_utf8(output).unwrap(), counts)
    }

    #[test]
    fn subject_mode_rebuilds_meta_from_instruction() {
        let input = concat!(
            r#"{"instruction":"Find the cross product of the two vectors","output":"A"}"#,
            "\n",
            r#"{"instruction":"Unrelated","output":"B","meta":{"tags":["stale"]}}"#,
            "\n",
        );

        let (tagged, counts) = tag_to_string(input, TagMode::Subject);
        let records: Vec<Value> = tagged
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(counts.records, 2);
        assert_eq!(records[0]["meta"]["source"], "course_train.jsonl");
        assert_eq!(records[0]["meta"]["line"], 1);
        assert_eq!(records[0]["meta"]["tags"], json!(["vector"]));
        // Existing meta is replaced wholesale in subject mode.
        assert_eq!(records[1]["meta"]["tags"], json!(["other"]));
        assert_eq!(counts.tag_counts.get("vector"), Some(&1));
        assert_eq!(counts.tag_counts.get("other"), Some(&1));
    }

    #[test]
    fn concepts_mode_adds_concept_tags_preserving_meta() {
        let input = concat!(
            r#"{"instruction":"Q","output":"The reflection coefficient on a transmission line","meta":{"source":"a.pdf","tags":["ocr"]}}"#,
            "\n",
        );

        let (tagged, counts) = tag_to_string(input, TagMode::Concepts);
        let record: Value = serde_json::from_str(tagged.trim_end()).unwrap();

        assert_eq!(counts.records, 1);
        assert_eq!(record["meta"]["tags"], json!(["ocr"]));
        assert_eq!(record["meta"]["source"], "a.pdf");
        assert_eq!(
            record["meta"]["concept_tags"],
            json!(["reflection_coefficient", "transmission_lines"])
        );
    }

    #[test]
    fn undecodable_and_blank_lines_are_skipped_and_counted() {
        let input = concat!(
            "\n",
            "not json\n",
            r#"{"instruction":"Q","output":"A"}"#,
            "\n",
        );

        let (tagged, counts) = tag_to_string(input, TagMode::Concepts);

        assert_eq!(counts.records, 1);
        assert_eq!(counts.skipped, 2);
        assert_eq!(tagged.lines().count(), 1);
        let record: Value = serde_json::from_str(tagged.trim_end()).unwrap();
        assert_eq!(record["meta"]["concept_tags"], json!(["other"]));
    }
}
