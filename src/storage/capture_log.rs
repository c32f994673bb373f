//! Durable capture log
//!
//! Append-only JSON Lines file, one [`FlowRecord`] per line, flushed after
//! every write.

use crate::models::FlowRecord;
use anyhow::Context;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct CaptureLog {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl CaptureLog {
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating capture directory {:?}", dir))?;
            }
        }
        Ok(Self {
            path,
            writer: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line and flush it to the file.
    pub fn append(&self, record: &FlowRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record).context("serializing flow record")?;
        line.push(b'\n');

        let mut guard = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("capture log lock poisoned: {}", e))?;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("opening capture log {:?}", self.path))?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            let written = file.write_all(&line).and_then(|_| file.flush());
            if let Err(err) = written {
                // Reopen on the next append
                *guard = None;
                return Err(err).with_context(|| format!("appending to {:?}", self.path));
            }
        }
        Ok(())
    }

    /// Truncate the log to zero length.
    pub fn truncate(&self) -> anyhow::Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("capture log lock poisoned: {}", e))?;
        *guard = None;
        File::create(&self.path).with_context(|| format!("truncating {:?}", self.path))?;
        Ok(())
    }

    /// Every well-formed record in file order. Malformed lines are skipped; a
    /// missing file is empty.
    pub fn load_all(&self) -> anyhow::Result<Vec<FlowRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("opening capture log {:?}", self.path))
            }
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in BufReader::new(file).split(b'\n') {
            let line = line.with_context(|| format!("reading {:?}", self.path))?;
            let line = trim_line(&line);
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<FlowRecord>(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!("Skipped {} malformed lines in {:?}", skipped, self.path);
        }
        Ok(records)
    }
}

/// Strip surrounding ASCII whitespace from one raw log line.
pub(crate) fn trim_line(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
