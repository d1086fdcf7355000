//! JSON-Lines work source.
//!
//! One object per line: `{"id"?, "text", "alt_text"?, "speaker"?, "translation"?}`.
//! Lines without an `id` get `line-<n>` from their 1-based line number, so
//! ids stay stable across runs as long as the file is not reordered. Records
//! that already carry a translation are never enumerated.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::{Map, Value};

use crate::engine::{Payload, WorkItem};
use crate::error::LocflowError;

/// One parsed source line, unknown fields preserved.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub id: String,
    pub text: String,
    pub alt_text: Option<String>,
    pub speaker: Option<String>,
    pub translation: Option<String>,
    pub raw: Map<String, Value>,
}

impl SourceRecord {
    pub fn is_translated(&self) -> bool {
        self.translation.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn needs_translation(&self) -> bool {
        !self.is_translated() && !self.text.trim().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct JsonlSource {
    records: Vec<SourceRecord>,
}

impl JsonlSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LocflowError> {
        let file = File::open(path.as_ref())?;
        Self::parse(BufReader::new(file))
    }

    pub fn parse(reader: impl BufRead) -> Result<Self, LocflowError> {
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw = match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(source_err(line_no, "expected a JSON object")),
                Err(e) => return Err(source_err(line_no, e.to_string())),
            };
            records.push(record_from(line_no, raw)?);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records that already had a translation in the input.
    pub fn translated_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_translated()).count()
    }

    /// Work items for every untranslated line, each with up to
    /// `context_window` neighbours on either side as scene context.
    pub fn items(&self, context_window: usize) -> Vec<WorkItem> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.needs_translation())
            .map(|(i, r)| {
                WorkItem::new(
                    r.id.clone(),
                    Payload {
                        text: r.text.clone(),
                        alt_text: r.alt_text.clone(),
                        speaker: r.speaker.clone(),
                        context: self.context_around(i, context_window),
                    },
                )
            })
            .collect()
    }

    fn context_around(&self, index: usize, window: usize) -> Option<String> {
        if window == 0 {
            return None;
        }
        let start = index.saturating_sub(window);
        let end = (index + window + 1).min(self.records.len());
        let blocks: Vec<String> = (start..end)
            .filter(|&j| j != index)
            .map(|j| format_neighbour(&self.records[j]))
            .collect();
        (!blocks.is_empty()).then(|| blocks.join("\n\n"))
    }
}

fn format_neighbour(r: &SourceRecord) -> String {
    let mut block = format!(
        "[{}] speaker={}\nTEXT: {}",
        r.id,
        r.speaker.as_deref().unwrap_or(""),
        r.text
    );
    if let Some(alt) = r.alt_text.as_deref().filter(|a| !a.is_empty()) {
        block.push_str(&format!("\nALT: {alt}"));
    }
    block
}

fn record_from(line: usize, raw: Map<String, Value>) -> Result<SourceRecord, LocflowError> {
    let id = match raw.get("id") {
        None | Some(Value::Null) => format!("line-{line}"),
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(source_err(line, "\"id\" must be a non-empty string or number")),
    };
    let text = match raw.get("text") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(_) => return Err(source_err(line, "\"text\" must be a string")),
    };
    Ok(SourceRecord {
        id,
        text,
        alt_text: optional_str(&raw, "alt_text"),
        speaker: optional_str(&raw, "speaker"),
        translation: optional_str(&raw, "translation"),
        raw,
    })
}

fn optional_str(raw: &Map<String, Value>, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn source_err(line: usize, message: impl Into<String>) -> LocflowError {
    LocflowError::Source {
        line,
        message: message.into(),
    }
}
