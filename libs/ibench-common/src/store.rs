//! Rollout log semantics
//!
//! One JSON object per line, UTF-8, newline-terminated. The evaluator is the
//! only writer during a run and only ever appends; the external editor
//! rewrites the file between runs. Nothing here takes a lock.

use crate::types::RolloutRecord;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

pub const LOG_EXTENSION: &str = "jsonl";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rollout log I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize rollout record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("malformed rollout record at {path}:{line}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Default log location: `<dir>/<split>_<YYYYmmdd_HHMMSS>.jsonl`
pub fn default_log_path(dir: &Path, split: &str, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{}_{}.{}",
        split,
        now.format("%Y%m%d_%H%M%S"),
        LOG_EXTENSION
    ))
}

/// Destination for finished rollout records
pub trait RolloutSink {
    /// Persist one record. Must not return until the record is durable.
    fn append(&mut self, record: &RolloutRecord) -> Result<(), StoreError>;
}

impl RolloutSink for Vec<RolloutRecord> {
    fn append(&mut self, record: &RolloutRecord) -> Result<(), StoreError> {
        self.push(record.clone());
        Ok(())
    }
}

/// Single-writer append handle over a rollout log
pub struct RolloutWriter {
    path: PathBuf,
    file: File,
}

impl RolloutWriter {
    /// Open (or create) a log for appending.
    ///
    /// An unterminated final line is judged the same way `read_rollouts`
    /// judges it: a complete record only lacks its newline, which is added;
    /// anything else is a torn write and is cut back to the last full line.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;

        let mut existing = Vec::new();
        file.read_to_end(&mut existing).map_err(io_err(&path))?;
        if existing.last().is_some_and(|b| *b != b'\n') {
            let keep = existing
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |pos| pos + 1);
            let tail = String::from_utf8_lossy(&existing[keep..]);

            if serde_json::from_str::<RolloutRecord>(tail.trim()).is_ok() {
                tracing::info!(path = %path.display(), "Terminating final rollout record");
                file.write_all(b"\n").map_err(io_err(&path))?;
            } else {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = existing.len() - keep,
                    "Rollout log ends with a partial record; truncating it"
                );
                file.set_len(keep as u64).map_err(io_err(&path))?;
            }
            file.sync_data().map_err(io_err(&path))?;
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RolloutSink for RolloutWriter {
    fn append(&mut self, record: &RolloutRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        // One write per record so the offset only advances past whole lines
        self.file
            .write_all(line.as_bytes())
            .map_err(io_err(&self.path))?;
        self.file.flush().map_err(io_err(&self.path))?;
        self.file.sync_data().map_err(io_err(&self.path))?;
        Ok(())
    }
}

/// Read every record in a log.
///
/// Blank lines are skipped. An unparseable final line with no trailing newline
/// is a torn write from an interrupted run and is skipped with a warning; any
/// other unparseable line is an error.
pub fn read_rollouts(path: &Path) -> Result<Vec<RolloutRecord>, StoreError> {
    let content = fs::read_to_string(path).map_err(io_err(path))?;
    let terminated = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();

    let mut records = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RolloutRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) if idx + 1 == lines.len() && !terminated => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping torn final line in rollout log"
                );
            }
            Err(source) => {
                return Err(StoreError::Malformed {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    source,
                })
            }
        }
    }
    Ok(records)
}

/// Natural keys already present in a log; empty if the log does not exist
pub fn completed_keys(path: &Path) -> Result<HashSet<(String, u32)>, StoreError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(read_rollouts(path)?.iter().map(RolloutRecord::key).collect())
}

/// Listing entry for a rollout log
#[derive(Debug, Clone, PartialEq)]
pub struct LogFileInfo {
    pub name: String,
    pub lines: usize,
    pub size_kb: f64,
    modified: SystemTime,
}

/// All `*.jsonl` logs in a directory, newest first
pub fn list_logs(dir: &Path) -> Result<Vec<LogFileInfo>, StoreError> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
            continue;
        }
        let meta = entry.metadata().map_err(io_err(&path))?;
        let content = fs::read_to_string(&path).map_err(io_err(&path))?;
        logs.push(LogFileInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            lines: content.lines().count(),
            size_kb: (meta.len() as f64 / 1024.0 * 10.0).round() / 10.0,
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    logs.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(logs)
}
