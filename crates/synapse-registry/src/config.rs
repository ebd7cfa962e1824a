//! Registry configuration.
//!
//! All paths and thresholds are derived from a repo root but individually
//! overridable. The defaults here are the recognized option set; callers
//! construct one config up front and hand it to the registry, updater, and
//! healer so every component agrees on where the durable state lives.

use crate::entity::Category;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory under the repo root that holds all durable registry state.
pub const STATE_DIR: &str = ".synapse";

/// Configuration shared by the registry store, updater, watcher, and healer.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Repository root all entity paths are expressed relative to.
    pub repo_root: PathBuf,
    /// The canonical registry document.
    pub registry_path: PathBuf,
    /// Append-only ingestion audit log (JSON lines).
    pub audit_log_path: PathBuf,
    /// Append-only healing log (JSON lines).
    pub healing_log_path: PathBuf,
    /// Backup directory for pre-heal snapshots and rotated logs.
    pub backup_dir: PathBuf,
    /// Advisory lock file guarding registry mutation.
    pub lock_path: PathBuf,
    /// One source tree per category.
    pub category_roots: BTreeMap<Category, PathBuf>,
    /// File extensions eligible for ingestion (with leading dot).
    pub included_extensions: Vec<String>,
    /// Change-stability window for the watcher.
    pub debounce_ms: u64,
    /// Age at which a held lock is considered abandoned.
    pub lock_stale_ms: u64,
    /// Lock acquisition attempts before a flush gives up.
    pub lock_retries: u32,
    /// Rotate audit/healing logs past this size.
    pub log_rotate_bytes: u64,
    /// Pre-heal backups retained (oldest pruned first).
    pub healer_backups: usize,
    /// `lastVerified` older than this is a stale-verification issue.
    pub stale_verification_days: i64,
    /// Adaptability score assigned to freshly ingested entities.
    pub default_adaptability: f64,
}

impl RegistryConfig {
    /// Build a config rooted at `repo_root` with every default applied:
    /// state under `.synapse/`, one `<root>/<category>` tree per category,
    /// 100 ms debounce, 10 s lock staleness with 3 attempts, 5 MiB log
    /// rotation, 10 retained backups, 7-day verification staleness.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let state_dir = repo_root.join(STATE_DIR);
        let registry_path = state_dir.join("entity-registry.json");
        let lock_path = state_dir.join("entity-registry.json.lock");

        let mut category_roots = BTreeMap::new();
        for category in Category::ALL {
            category_roots.insert(category, repo_root.join(category.as_str()));
        }

        Self {
            repo_root,
            registry_path,
            audit_log_path: state_dir.join("registry-audit-log.jsonl"),
            healing_log_path: state_dir.join("registry-healing-log.jsonl"),
            backup_dir: state_dir.join("backups"),
            lock_path,
            category_roots,
            included_extensions: [".md", ".yaml", ".yml", ".json", ".js", ".sh", ".txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debounce_ms: 100,
            lock_stale_ms: 10_000,
            lock_retries: 3,
            log_rotate_bytes: 5 * 1024 * 1024,
            healer_backups: 10,
            stale_verification_days: 7,
            default_adaptability: 0.5,
        }
    }

    /// Override the source tree for one category.
    pub fn with_category_root(mut self, category: Category, root: impl Into<PathBuf>) -> Self {
        self.category_roots.insert(category, root.into());
        self
    }

    /// Override the debounce window.
    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    /// Override lock staleness and retry budget.
    pub fn with_lock_policy(mut self, stale_ms: u64, retries: u32) -> Self {
        self.lock_stale_ms = stale_ms;
        self.lock_retries = retries;
        self
    }

    /// Override the retained backup count.
    pub fn with_healer_backups(mut self, keep: usize) -> Self {
        self.healer_backups = keep;
        self
    }

    /// Whether a file name is eligible for ingestion at all.
    ///
    /// Test doubles, READMEs, and the registry's own durable state never
    /// become entities.
    pub fn is_ingestible(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.ends_with(".test.js") || name.ends_with(".spec.js") {
            return false;
        }
        if name.eq_ignore_ascii_case("readme.md") || name.eq_ignore_ascii_case("readme") {
            return false;
        }
        if path.starts_with(&self.backup_dir) {
            return false;
        }
        if path == self.registry_path
            || path == self.audit_log_path
            || path == self.healing_log_path
            || path == self.lock_path
        {
            return false;
        }
        self.included_extensions
            .iter()
            .any(|ext| name.len() > ext.len() && name.ends_with(ext.as_str()))
    }

    /// Resolve which category a path belongs to, if any.
    pub fn category_for(&self, path: &Path) -> Option<Category> {
        self.category_roots
            .iter()
            .find(|(_, root)| path.starts_with(root))
            .map(|(category, _)| *category)
    }

    /// Repo-relative, forward-slash form of a path.
    pub fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.repo_root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}
