//! Append-only JSONL checkpoint of completed items.
//!
//! Each line is one [`CheckpointRecord`]. Loading is tolerant: blank,
//! malformed or truncated lines (a crash mid-write) are skipped, and when
//! duplicates exist the last record for an id wins. Appends are buffered and
//! made durable every `flush_every` records or on an explicit [`flush`].
//!
//! [`flush`]: CheckpointStore::flush

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LocflowError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub item_id: String,
    pub result: String,
    pub ts: DateTime<Utc>,
}

struct Inner {
    writer: BufWriter<File>,
    completed: HashMap<String, String>,
    unflushed: usize,
}

pub struct CheckpointStore {
    path: PathBuf,
    flush_every: usize,
    inner: Mutex<Inner>,
}

impl CheckpointStore {
    /// Open (or create) the checkpoint at `path` and load its records.
    pub fn open(path: impl AsRef<Path>, flush_every: usize) -> Result<Self, LocflowError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| checkpoint_err(&path, e))?;
        }

        let completed = if path.exists() {
            Self::read_records(&path)?
        } else {
            HashMap::new()
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| checkpoint_err(&path, e))?;
        if needs_newline(&mut file).map_err(|e| checkpoint_err(&path, e))? {
            // Terminate a torn final record so the next append starts clean.
            file.write_all(b"\n").map_err(|e| checkpoint_err(&path, e))?;
            file.sync_data().map_err(|e| checkpoint_err(&path, e))?;
        }

        debug!(path = %path.display(), completed = completed.len(), "checkpoint opened");
        Ok(Self {
            path,
            flush_every: flush_every.max(1),
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                completed,
                unflushed: 0,
            }),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has(&self, item_id: &str) -> bool {
        self.lock().completed.contains_key(item_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().completed.len()
    }

    /// Authoritative id → result view.
    pub fn load_all(&self) -> HashMap<String, String> {
        self.lock().completed.clone()
    }

    /// Record a completed item. Re-recording an identical result is a no-op.
    pub fn append(&self, item_id: &str, result: &str) -> Result<(), LocflowError> {
        let mut inner = self.lock();
        if inner.completed.get(item_id).is_some_and(|r| r == result) {
            return Ok(());
        }

        let record = CheckpointRecord {
            item_id: item_id.to_string(),
            result: result.to_string(),
            ts: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        inner
            .writer
            .write_all(line.as_bytes())
            .map_err(|e| checkpoint_err(&self.path, e))?;
        inner
            .completed
            .insert(record.item_id, record.result);
        inner.unflushed += 1;

        if inner.unflushed >= self.flush_every {
            Self::sync(&mut inner, &self.path)?;
        }
        Ok(())
    }

    /// Make every appended record durable.
    pub fn flush(&self) -> Result<(), LocflowError> {
        let mut inner = self.lock();
        if inner.unflushed == 0 {
            return Ok(());
        }
        Self::sync(&mut inner, &self.path)
    }

    /// Records appended but not yet durable.
    #[cfg(test)]
    pub fn unflushed(&self) -> usize {
        self.lock().unflushed
    }

    fn sync(inner: &mut Inner, path: &Path) -> Result<(), LocflowError> {
        inner.writer.flush().map_err(|e| checkpoint_err(path, e))?;
        inner
            .writer
            .get_ref()
            .sync_data()
            .map_err(|e| checkpoint_err(path, e))?;
        debug!(records = inner.unflushed, "checkpoint flushed");
        inner.unflushed = 0;
        Ok(())
    }

    fn read_records(path: &Path) -> Result<HashMap<String, String>, LocflowError> {
        let file = File::open(path).map_err(|e| checkpoint_err(path, e))?;
        let mut completed = HashMap::new();
        let mut skipped = 0usize;

        for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
            let bytes = line.map_err(|e| checkpoint_err(path, e))?;
            let Ok(text) = std::str::from_utf8(&bytes) else {
                skipped += 1;
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointRecord>(text) {
                Ok(record) => {
                    completed.insert(record.item_id, record.result);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(line = idx + 1, error = %e, "skipping unreadable checkpoint record");
                }
            }
        }

        if skipped > 0 {
            warn!(path = %path.display(), skipped, "checkpoint had unreadable records");
        }
        Ok(completed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for CheckpointStore {
    fn drop(&mut self) {
        let mut inner = self.lock();
        if inner.unflushed > 0
            && let Err(e) = Self::sync(&mut inner, &self.path)
        {
            warn!(error = %e, "final checkpoint flush failed");
        }
    }
}

fn needs_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn checkpoint_err(path: &Path, e: std::io::Error) -> LocflowError {
    LocflowError::Checkpoint(format!("{}: {e}", path.display()))
}
