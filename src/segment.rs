//! Block segmentation of transcribed page text.
//!
//! Raw transcription output is split on blank lines; candidates containing
//! math operator characters are grouped so a derivation spanning several
//! blank-line-separated lines becomes one block. Length filtering is the
//! caller's job.

/// Characters that mark a candidate as formula-like.
const FORMULA_OPERATORS: &[char] = &['=', '+', '-', '*', '/', '^', '\\'];

/// Lazily segment `text` into blocks. The iterator is finite and
/// restartable: calling `segment` again on the same input yields the same
/// sequence.
pub fn segment(text: &str) -> Blocks<'_> {
    Blocks {
        candidates: text.split("\n\n"),
        pending: Vec::new(),
        queued: None,
    }
}

pub struct Blocks<'a> {
    candidates: std::str::Split<'a, &'static str>,
    pending: Vec<&'a str>,
    queued: Option<String>,
}

impl Iterator for Blocks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if let Some(block) = self.queued.take() {
            return Some(block);
        }

        loop {
            let Some(candidate) = self.candidates.next() else {
                if self.pending.is_empty() {
                    return None;
                }
                let group = self.pending.join("\n");
                self.pending.clear();
                return Some(group);
            };

            let candidate = candidate.trim();
            if is_formula_like(candidate) {
                self.pending.push(candidate);
                continue;
            }

            if self.pending.is_empty() {
                return Some(candidate.to_string());
            }

            let group = self.pending.join("\n");
            self.pending.clear();
            self.queued = Some(candidate.to_string());
            return Some(group);
        }
    }
}

fn is_formula_like(candidate: &str) -> bool {
    candidate.contains(FORMULA_OPERATORS)
}
