//! Append-only JSON-lines logs with size-based rotation.
//!
//! Both the ingestion audit log and the healing log use this shape: one
//! JSON object per line, rotated into the backup directory once the file
//! crosses the configured size. Log failures are reported as warnings and
//! never propagate into the operation that triggered them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// One audit entry. `action` covers direct ingestion verbs; `trigger`
/// covers hook-driven batches. Everything else rides in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AuditRecord {
    pub fn action(action: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            action: Some(action.to_string()),
            trigger: None,
            path: None,
            task_id: None,
            agent: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn trigger(trigger: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            action: None,
            trigger: Some(trigger.to_string()),
            path: None,
            task_id: None,
            agent: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>, agent: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self.agent = Some(agent.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Filter for reading a log back.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Match `action` or `trigger` exactly.
    pub action: Option<String>,
    /// Substring match on `path`.
    pub path_contains: Option<String>,
    /// Entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// At most this many entries (most recent last).
    pub limit: Option<usize>,
}

/// An append-only JSONL log with rotation.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
    rotate_bytes: u64,
    backup_dir: PathBuf,
}

impl JsonlLog {
    pub fn new(path: PathBuf, rotate_bytes: u64, backup_dir: PathBuf) -> Self {
        Self {
            path,
            rotate_bytes,
            backup_dir,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one record. Failures are logged and swallowed.
    pub fn append(&self, record: &AuditRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }

    /// Append an arbitrary JSON value (healing entries carry their own shape).
    pub fn append_value(&self, value: &Value) {
        if let Err(e) = self.try_append_value(value) {
            tracing::warn!(path = %self.path.display(), error = %e, "log append failed");
        }
    }

    fn try_append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| std::io::Error::other(format!("serialize audit record: {e}")))?;
        self.try_append_value(&value)
    }

    fn try_append_value(&self, value: &Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed();

        let mut line = value.to_string();
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Rename the log into the backup directory once it crosses the size cap.
    fn rotate_if_needed(&self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < self.rotate_bytes {
            return;
        }
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("log");
        let rotated = self.backup_dir.join(format!(
            "{stem}-{}.jsonl",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        ));
        if let Err(e) = std::fs::create_dir_all(&self.backup_dir)
            .and_then(|_| std::fs::rename(&self.path, &rotated))
        {
            tracing::warn!(path = %self.path.display(), error = %e, "log rotation failed");
        } else {
            tracing::info!(from = %self.path.display(), to = %rotated.display(), "rotated log");
        }
    }

    /// Read every parseable entry, skipping corrupt lines.
    pub fn read_all(&self) -> Vec<Value> {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(value) => entries.push(value),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "skipping corrupt log line");
                }
            }
        }
        entries
    }

    /// Read entries matching a filter.
    pub fn query(&self, filter: &LogFilter) -> Vec<Value> {
        let mut entries: Vec<Value> = self
            .read_all()
            .into_iter()
            .filter(|entry| {
                if let Some(action) = &filter.action {
                    let hit = entry.get("action").and_then(Value::as_str) == Some(action)
                        || entry.get("trigger").and_then(Value::as_str) == Some(action);
                    if !hit {
                        return false;
                    }
                }
                if let Some(fragment) = &filter.path_contains {
                    let hit = entry
                        .get("path")
                        .and_then(Value::as_str)
                        .map(|p| p.contains(fragment.as_str()))
                        .unwrap_or(false);
                    if !hit {
                        return false;
                    }
                }
                if let Some(since) = &filter.since {
                    let ts = entry
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<DateTime<Utc>>().ok());
                    match ts {
                        Some(ts) if ts >= *since => {}
                        _ => return false,
                    }
                }
                true
            })
            .collect();

        if let Some(limit) = filter.limit {
            let excess = entries.len().saturating_sub(limit);
            entries.drain(..excess);
        }
        entries
    }
}
