//! Incremental registry updates.
//!
//! The updater is the only writer of the registry document. Changes arrive
//! either from the file watcher or as on-demand batches; both funnel into a
//! pending map keyed by normalized absolute path where the last event per
//! path wins. A flush drains the map under a cross-process advisory lock,
//! applies per-file semantics with failures isolated to the file that
//! caused them, rebuilds every reverse edge, and commits atomically.
//!
//! Lock discipline: the lock file lives beside the registry. Acquisition is
//! non-blocking with a bounded number of jittered retries; a lock whose
//! file has not been touched within the staleness window is treated as
//! abandoned and broken. On acquisition failure the pending entries are put
//! back so the next flush retries them.

use crate::analysis;
use crate::audit::{AuditRecord, JsonlLog, LogFilter};
use crate::config::RegistryConfig;
use crate::content_hash::ContentHash;
use crate::entity::{Adaptability, Category, Entity, RegistryDocument};
use crate::error::{RegistryError, Result};
use crate::store::{read_document, write_document_atomic, Registry};
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A single file-system event handed to the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Change,
    Unlink,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Add => "add",
            ChangeAction::Change => "change",
            ChangeAction::Unlink => "unlink",
        }
    }
}

/// One item of an on-demand batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub action: ChangeAction,
    pub path: PathBuf,
}

impl Change {
    pub fn new(action: ChangeAction, path: impl Into<PathBuf>) -> Self {
        Self {
            action,
            path: path.into(),
        }
    }
}

/// Completed-task hook payload.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub task_id: String,
    pub agent: String,
}

/// What a flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub skipped: usize,
    /// Per-file failures; peers in the batch are unaffected.
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn processed(&self) -> usize {
        self.added + self.changed + self.removed
    }
}

enum Applied {
    Added(String),
    Changed(String),
    Removed(String),
    Skipped,
}

/// Watcher- and batch-driven mutator of the registry document.
pub struct RegistryUpdater {
    registry: Arc<Registry>,
    audit: JsonlLog,
    pending: Mutex<HashMap<PathBuf, ChangeAction>>,
    // In-process serialization: one flush at a time; later batches wait
    // here (deferred, never dropped).
    flush_gate: tokio::sync::Mutex<()>,
}

impl RegistryUpdater {
    pub fn new(registry: Arc<Registry>) -> Self {
        let config = registry.config();
        let audit = JsonlLog::new(
            config.audit_log_path.clone(),
            config.log_rotate_bytes,
            config.backup_dir.clone(),
        );
        Self {
            registry,
            audit,
            pending: Mutex::new(HashMap::new()),
            flush_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn config(&self) -> &RegistryConfig {
        self.registry.config()
    }

    /// Queue one event. Last action per path wins within a window.
    pub(crate) fn enqueue(&self, path: PathBuf, action: ChangeAction) {
        self.pending.lock().insert(path, action);
    }

    /// Number of queued, unflushed events.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run an on-demand batch: normalize, queue, flush.
    pub async fn process_changes(&self, batch: Vec<Change>) -> Result<BatchOutcome> {
        for change in batch {
            let path = self.normalize(&change.path, change.action);
            self.enqueue(path, change.action);
        }
        self.flush().await
    }

    /// Classify completed-task artifacts (existing file ⇒ change, missing ⇒
    /// unlink), run them as one batch, and record the trigger.
    pub async fn on_agent_task_complete(
        &self,
        task: &AgentTask,
        artifacts: &[PathBuf],
    ) -> Result<BatchOutcome> {
        let batch: Vec<Change> = artifacts
            .iter()
            .map(|path| {
                let action = if path.exists() {
                    ChangeAction::Change
                } else {
                    ChangeAction::Unlink
                };
                Change::new(action, path.clone())
            })
            .collect();

        let artifact_count = batch.len();
        let outcome = self.process_changes(batch).await?;

        self.audit.append(
            &AuditRecord::trigger("agent-task-complete")
                .with_task(&task.task_id, &task.agent)
                .with_extra("artifacts", serde_json::json!(artifact_count)),
        );
        Ok(outcome)
    }

    /// Read the audit log back.
    pub fn query_audit_log(&self, filter: &LogFilter) -> Vec<serde_json::Value> {
        self.audit.query(filter)
    }

    /// Resolve symlinks for live files; lexical cleanup for unlinks, whose
    /// target no longer exists.
    fn normalize(&self, path: &Path, action: ChangeAction) -> PathBuf {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config().repo_root.join(path)
        };
        match action {
            // Resolve symlinks, but never out of the repo tree.
            ChangeAction::Add | ChangeAction::Change => match std::fs::canonicalize(&absolute) {
                Ok(canon) if canon.starts_with(&self.config().repo_root) => canon,
                _ => absolute,
            },
            ChangeAction::Unlink => absolute,
        }
    }

    /// Drain the pending map and commit one batch.
    pub async fn flush(&self) -> Result<BatchOutcome> {
        let _gate = self.flush_gate.lock().await;

        let batch: HashMap<PathBuf, ChangeAction> = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let lock = match self.acquire_lock().await {
            Ok(lock) => lock,
            Err(e) => {
                // Put the entries back; newer events for the same path win.
                let mut pending = self.pending.lock();
                for (path, action) in batch {
                    pending.entry(path).or_insert(action);
                }
                return Err(e);
            }
        };

        // The on-disk document is authoritative while we hold the lock;
        // another process may have committed since our last read.
        let mut doc = read_document(&self.config().registry_path);
        let mut outcome = BatchOutcome::default();
        let mut applied = Vec::new();
        let mut mutated = false;

        // Deterministic application order within the batch.
        let mut items: Vec<(PathBuf, ChangeAction)> = batch.into_iter().collect();
        items.sort();

        for (path, action) in items {
            match self.apply(&mut doc, &path, action) {
                Ok(Applied::Added(rel)) => {
                    outcome.added += 1;
                    mutated = true;
                    applied.push(("add", rel));
                }
                Ok(Applied::Changed(rel)) => {
                    outcome.changed += 1;
                    mutated = true;
                    applied.push(("change", rel));
                }
                Ok(Applied::Removed(rel)) => {
                    outcome.removed += 1;
                    mutated = true;
                    applied.push(("unlink", rel));
                }
                Ok(Applied::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "change failed, continuing batch");
                    outcome.errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        if mutated {
            doc.rebuild_used_by();
            doc.touch_metadata();
            write_document_atomic(&self.config().registry_path, &doc).map_err(|e| {
                tracing::error!(error = %e, "registry write failed, batch aborted");
                RegistryError::WriteFailed(e.to_string())
            })?;
            self.registry.replace(doc);
        }
        drop(lock);

        for (action, rel) in applied {
            self.audit.append(&AuditRecord::action(action).with_path(rel));
        }

        Ok(outcome)
    }

    fn apply(
        &self,
        doc: &mut RegistryDocument,
        path: &Path,
        action: ChangeAction,
    ) -> Result<Applied> {
        match action {
            ChangeAction::Add => self.apply_add(doc, path),
            ChangeAction::Change => self.apply_change(doc, path),
            ChangeAction::Unlink => Ok(self.apply_unlink(doc, path)),
        }
    }

    fn apply_add(&self, doc: &mut RegistryDocument, path: &Path) -> Result<Applied> {
        let config = self.config();
        if !config.is_ingestible(path) {
            return Ok(Applied::Skipped);
        }
        let Some(category) = config.category_for(path) else {
            return Ok(Applied::Skipped);
        };
        let id = entity_id_for(path);
        if id.is_empty() {
            return Ok(Applied::Skipped);
        }
        if doc.contains_id(&id) {
            tracing::warn!(id = %id, path = %path.display(), "duplicate entity id, skipping ingestion");
            return Ok(Applied::Skipped);
        }

        let Some(bytes) = self.read_artifact(path)? else {
            return Ok(Applied::Skipped);
        };
        let text = String::from_utf8_lossy(&bytes);
        let known: Vec<String> = doc.all_entities().map(|e| e.id.clone()).collect();
        let dependencies: Vec<String> = analysis::detect_dependencies(
            &text,
            &id,
            known.iter().map(String::as_str),
        )
        .into_iter()
        .collect();

        let rel = config.relative_path(path);
        let entity = Entity {
            id: id.clone(),
            category,
            artifact_type: category.artifact_type().to_string(),
            path: rel.clone(),
            purpose: analysis::extract_purpose(&text),
            keywords: analysis::extract_keywords(&text),
            dependencies,
            used_by: Vec::new(),
            adaptability: Adaptability::with_score(config.default_adaptability),
            checksum: ContentHash::from_bytes(&bytes),
            last_verified: Utc::now(),
            create_justification: None,
        };
        doc.insert(entity);
        Ok(Applied::Added(rel))
    }

    fn apply_change(&self, doc: &mut RegistryDocument, path: &Path) -> Result<Applied> {
        let config = self.config();
        let rel = config.relative_path(path);

        let exists = doc.all_entities().any(|e| e.path == rel);
        if !exists {
            // Unknown path: promote to add.
            return self.apply_add(doc, path);
        }

        let Some(bytes) = self.read_artifact(path)? else {
            return Ok(Applied::Skipped);
        };
        let new_checksum = ContentHash::from_bytes(&bytes);

        let known: Vec<String> = doc.all_entities().map(|e| e.id.clone()).collect();
        let Some(entity) = doc.all_entities_mut().find(|e| e.path == rel) else {
            return Ok(Applied::Skipped);
        };

        if entity.checksum != new_checksum {
            let text = String::from_utf8_lossy(&bytes);
            entity.purpose = analysis::extract_purpose(&text);
            entity.keywords = analysis::extract_keywords(&text);
            entity.dependencies = analysis::detect_dependencies(
                &text,
                &entity.id,
                known.iter().map(String::as_str),
            )
            .into_iter()
            .collect();
            entity.checksum = new_checksum;
        }
        entity.last_verified = Utc::now();
        Ok(Applied::Changed(rel))
    }

    fn apply_unlink(&self, doc: &mut RegistryDocument, path: &Path) -> Applied {
        let rel = self.config().relative_path(path);
        let id = entity_id_for(path);
        if doc.remove_by_id_and_path(&id, &rel).is_some() {
            // Reverse edges to the removed entity vanish in the post-batch
            // usedBy rebuild.
            Applied::Removed(rel)
        } else {
            Applied::Skipped
        }
    }

    /// Read artifact bytes; permission problems are skips, not batch errors.
    fn read_artifact(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!(path = %path.display(), "permission denied, skipping file");
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "file vanished before ingestion, skipping");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire the cross-process advisory lock with bounded jittered
    /// retries and stale-lock takeover.
    async fn acquire_lock(&self) -> Result<std::fs::File> {
        let config = self.config();
        let lock_path = &config.lock_path;
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for attempt in 1..=config.lock_retries {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(lock_path)?;

            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    // Stamp the lock so other processes can judge staleness.
                    let mut file = file;
                    let _ = file.set_len(0);
                    let _ = writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339());
                    return Ok(file);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if self.lock_is_stale(lock_path) {
                        tracing::warn!(path = %lock_path.display(), "breaking stale registry lock");
                        let _ = std::fs::remove_file(lock_path);
                        continue;
                    }
                    let jitter = rand::thread_rng().gen_range(0..50u64);
                    let backoff = Duration::from_millis(50 * u64::from(attempt) + jitter);
                    tracing::debug!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "registry lock contended, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::LockContended {
            path: lock_path.display().to_string(),
            attempts: config.lock_retries,
        })
    }

    fn lock_is_stale(&self, lock_path: &Path) -> bool {
        let stale = Duration::from_millis(self.config().lock_stale_ms);
        std::fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .map(|age| age > stale)
            .unwrap_or(false)
    }
}

/// Entity id: the artifact's file stem.
pub fn entity_id_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
