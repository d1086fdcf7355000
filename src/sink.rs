//! JSON-Lines result sink and the `export` merge.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::ResultSink;
use crate::error::LocflowError;
use crate::source::JsonlSource;

#[derive(Debug, Serialize, Deserialize)]
struct ResultRow {
    id: String,
    translation: String,
}

/// Appends `{"id","translation"}` rows. Writing a row identical to one
/// already in the file is a no-op. Each new row is synced to disk before
/// `write` returns.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: HashMap<String, String>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LocflowError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| sink_err(&path, e))?;
        }

        let (written, torn) = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| sink_err(&path, e))?;
            (parse_rows(&contents), !contents.is_empty() && !contents.ends_with('\n'))
        } else {
            (HashMap::new(), false)
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| sink_err(&path, e))?;
        let mut writer = BufWriter::new(file);
        if torn {
            writer.write_all(b"\n").map_err(|e| sink_err(&path, e))?;
        }

        debug!(path = %path.display(), rows = written.len(), "result sink opened");
        Ok(Self {
            path,
            writer,
            written,
        })
    }

    /// Read a results file into an id → translation map; last row wins.
    #[cfg(test)]
    pub fn read(path: impl AsRef<Path>) -> Result<HashMap<String, String>, LocflowError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| sink_err(path, e))?;
        Ok(parse_rows(&contents))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.written.len()
    }
}

impl ResultSink for JsonlSink {
    fn write(&mut self, item_id: &str, result: &str) -> Result<(), LocflowError> {
        if self.written.get(item_id).is_some_and(|r| r == result) {
            return Ok(());
        }
        let row = ResultRow {
            id: item_id.to_string(),
            translation: result.to_string(),
        };
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| sink_err(&self.path, e))?;
        self.flush()?;
        self.written.insert(row.id, row.translation);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LocflowError> {
        self.writer.flush().map_err(|e| sink_err(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| sink_err(&self.path, e))
    }
}

fn parse_rows(contents: &str) -> HashMap<String, String> {
    let mut rows = HashMap::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ResultRow>(line) {
            Ok(row) => {
                rows.insert(row.id, row.translation);
            }
            Err(e) => warn!(line = idx + 1, error = %e, "skipping unreadable result row"),
        }
    }
    rows
}

fn sink_err(path: &Path, e: std::io::Error) -> LocflowError {
    LocflowError::Sink(format!("{}: {e}", path.display()))
}

/// Counts reported by [`export_merged`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportStats {
    pub records: usize,
    /// Empty translations filled from `translations`.
    pub filled: usize,
    /// Existing translations left untouched.
    pub kept: usize,
    /// Lines still without a translation.
    pub missing: usize,
}

/// Write every source record to `out`, filling only empty `translation`
/// fields from `translations`. Existing translations are never replaced.
pub fn export_merged(
    source: &JsonlSource,
    translations: &HashMap<String, String>,
    out: &Path,
) -> Result<ExportStats, LocflowError> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| sink_err(out, e))?;
    }
    let file = File::create(out).map_err(|e| sink_err(out, e))?;
    let mut writer = BufWriter::new(file);
    let mut stats = ExportStats::default();

    for record in source.records() {
        let mut raw = record.raw.clone();
        stats.records += 1;
        if record.is_translated() {
            stats.kept += 1;
        } else if let Some(t) = translations.get(&record.id) {
            raw.insert("translation".to_string(), Value::String(t.clone()));
            stats.filled += 1;
        } else if !record.text.trim().is_empty() {
            stats.missing += 1;
        }
        let mut line = serde_json::to_string(&raw)?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .map_err(|e| sink_err(out, e))?;
    }

    writer.flush().map_err(|e| sink_err(out, e))?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_and_reloads_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/results.jsonl");
        {
            let mut sink = JsonlSink::open(&path).unwrap();
            sink.write("a", "甲").unwrap();
            sink.write("b", "乙").unwrap();
            sink.flush().unwrap();
        }
        let rows = JsonlSink::read(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["b"], "乙");
    }

    #[test]
    fn identical_write_is_idempotent_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        {
            let mut sink = JsonlSink::open(&path).unwrap();
            sink.write("a", "x").unwrap();
            sink.write("a", "x").unwrap();
            sink.flush().unwrap();
        }
        let mut sink = JsonlSink::open(&path).unwrap();
        assert_eq!(sink.len(), 1);
        sink.write("a", "x").unwrap();
        sink.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn torn_last_row_is_skipped_and_terminated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        std::fs::write(&path, "{\"id\":\"a\",\"translation\":\"x\"}\n{\"id\":\"b\",\"tra").unwrap();

        let mut sink = JsonlSink::open(&path).unwrap();
        assert_eq!(sink.len(), 1);
        sink.write("b", "y").unwrap();
        sink.flush().unwrap();

        let rows = JsonlSink::read(&path).unwrap();
        assert_eq!(rows["a"], "x");
        assert_eq!(rows["b"], "y");
    }

    #[test]
    fn written_row_is_on_disk_without_explicit_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.jsonl");
        let mut sink = JsonlSink::open(&path).unwrap();
        sink.write("a", "甲").unwrap();

        // The sink is still open; nothing has called `flush`.
        let rows = JsonlSink::read(&path).unwrap();
        assert_eq!(rows.get("a").map(String::as_str), Some("甲"));
    }

    #[test]
    fn read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(JsonlSink::read(dir.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn export_fills_only_empty_translations() {
        let dir = TempDir::new().unwrap();
        let source = JsonlSource::parse(
            concat!(
                "{\"id\":\"a\",\"text\":\"one\",\"sheet\":\"Main\"}\n",
                "{\"id\":\"b\",\"text\":\"two\",\"translation\":\"人工\"}\n",
                "{\"id\":\"c\",\"text\":\"three\",\"translation\":\"\"}\n",
            )
            .as_bytes(),
        )
        .unwrap();
        let translations = HashMap::from([
            ("a".to_string(), "一".to_string()),
            ("b".to_string(), "机器".to_string()),
        ]);
        let out = dir.path().join("merged.jsonl");

        let stats = export_merged(&source, &translations, &out).unwrap();
        assert_eq!(
            stats,
            ExportStats {
                records: 3,
                filled: 1,
                kept: 1,
                missing: 1
            }
        );

        let lines: Vec<Value> = std::fs::read_to_string(&out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["translation"], "一");
        assert_eq!(lines[0]["sheet"], "Main");
        assert_eq!(lines[1]["translation"], "人工");
        assert_eq!(lines[2]["translation"], "");
    }
}
