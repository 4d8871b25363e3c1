use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{FacegateError, Result};
use crate::identity::Partition;
use crate::storage::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// One recognition attempt, as recorded for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub id: u64,
    pub status: ResultStatus,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub origin: Partition,
    pub timestamp: DateTime<Utc>,
}

/// Fields supplied by the caller; id and timestamp are assigned on append.
#[derive(Debug, Clone, Deserialize)]
pub struct NewResult {
    pub status: ResultStatus,
    pub label: String,
    #[serde(default)]
    pub score: Option<f32>,
    pub origin: Partition,
}

struct Entries {
    items: Vec<RecognitionResult>,
    next_id: u64,
}

/// Append-only log of recognition results, optionally mirrored to a
/// JSON-lines file.
pub struct AuditLog {
    path: Option<PathBuf>,
    entries: Mutex<Entries>,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Entries {
                items: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Load the log at `path`. A final line cut short by a crash is dropped
    /// and the file rewritten without it; a bad line anywhere else is fatal.
    pub fn open(path: &Path) -> Result<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(FacegateError::persistence(path, e)),
        };
        let raw = String::from_utf8_lossy(&raw);
        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();

        let mut items = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<RecognitionResult>(line) {
                Ok(record) => items.push(record),
                Err(e) if i + 1 == lines.len() => {
                    warn!(
                        "dropping torn last line of {} ({}): {:?}",
                        path.display(),
                        e,
                        line
                    );
                    write_atomic(path, encode_lines(path, &items)?.as_bytes())?;
                }
                Err(e) => {
                    return Err(FacegateError::CorruptSnapshot {
                        path: path.to_path_buf(),
                        reason: format!("line {}: {e}", i + 1),
                    })
                }
            }
        }

        let next_id = items.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        info!("loaded {} audit records from {}", items.len(), path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(Entries { items, next_id }),
        })
    }

    pub fn append(&self, new: NewResult) -> Result<RecognitionResult> {
        let mut entries = self.entries.lock();
        let record = RecognitionResult {
            id: entries.next_id,
            status: new.status,
            label: new.label,
            score: new.score,
            origin: new.origin,
            timestamp: Utc::now(),
        };

        if let Some(path) = &self.path {
            let line = serde_json::to_string(&record)
                .map_err(|e| FacegateError::persistence(path, e.into()))?;
            append_line(path, &line)?;
        }
        debug!(
            "audit #{}: {:?} '{}' from {}",
            record.id, record.status, record.label, record.origin
        );

        entries.next_id += 1;
        entries.items.push(record.clone());
        Ok(record)
    }

    pub fn list(&self) -> Vec<RecognitionResult> {
        self.entries.lock().items.clone()
    }

    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        self.rewrite(&[])?;
        entries.items.clear();
        Ok(())
    }

    pub fn remove(&self, id: u64) -> Result<()> {
        let mut entries = self.entries.lock();
        let Some(pos) = entries.items.iter().position(|r| r.id == id) else {
            return Err(FacegateError::ResultNotFound(id));
        };
        let mut remaining = entries.items.clone();
        remaining.remove(pos);
        self.rewrite(&remaining)?;
        entries.items = remaining;
        Ok(())
    }

    fn rewrite(&self, items: &[RecognitionResult]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, encode_lines(path, items)?.as_bytes())
    }
}

fn encode_lines(path: &Path, items: &[RecognitionResult]) -> Result<String> {
    let mut out = String::new();
    for item in items {
        let line =
            serde_json::to_string(item).map_err(|e| FacegateError::persistence(path, e.into()))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FacegateError::persistence(parent, e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FacegateError::persistence(path, e))?;
    writeln!(file, "{line}").map_err(|e| FacegateError::persistence(path, e))?;
    file.sync_all().map_err(|e| FacegateError::persistence(path, e))
}
