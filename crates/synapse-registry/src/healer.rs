//! Registry health checks and bounded auto-healing.
//!
//! Six rules cover the ways the registry drifts from the filesystem:
//!
//! | rule | severity | auto-heal |
//! |------|----------|-----------|
//! | `missing-file` | critical | no |
//! | `checksum-mismatch` | high | yes |
//! | `orphaned-usedBy` | medium | yes |
//! | `orphaned-dependency` | medium | yes |
//! | `missing-keywords` | low | yes |
//! | `stale-verification` | low | yes |
//!
//! Healing runs as one in-memory pass under a pre-heal backup. If the
//! final serialize fails the backup is restored automatically. Every healed
//! or errored item lands in the healing log; warnings for manual-only
//! issues go to an optional notification sink, best-effort.

use crate::analysis;
use crate::audit::{JsonlLog, LogFilter};
use crate::content_hash::ContentHash;
use crate::entity::{Category, RegistryDocument};
use crate::error::{RegistryError, Result};
use crate::store::{read_document, write_document_atomic, Registry};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The integrity rules a health check evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealRule {
    #[serde(rename = "missing-file")]
    MissingFile,
    #[serde(rename = "checksum-mismatch")]
    ChecksumMismatch,
    #[serde(rename = "orphaned-usedBy")]
    OrphanedUsedBy,
    #[serde(rename = "orphaned-dependency")]
    OrphanedDependency,
    #[serde(rename = "missing-keywords")]
    MissingKeywords,
    #[serde(rename = "stale-verification")]
    StaleVerification,
}

impl HealRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealRule::MissingFile => "missing-file",
            HealRule::ChecksumMismatch => "checksum-mismatch",
            HealRule::OrphanedUsedBy => "orphaned-usedBy",
            HealRule::OrphanedDependency => "orphaned-dependency",
            HealRule::MissingKeywords => "missing-keywords",
            HealRule::StaleVerification => "stale-verification",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            HealRule::MissingFile => Severity::Critical,
            HealRule::ChecksumMismatch => Severity::High,
            HealRule::OrphanedUsedBy | HealRule::OrphanedDependency => Severity::Medium,
            HealRule::MissingKeywords | HealRule::StaleVerification => Severity::Low,
        }
    }

    /// Whether the fix is safe to apply without a human.
    pub fn auto_healable(&self) -> bool {
        !matches!(self, HealRule::MissingFile)
    }
}

/// Issue severity, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// One finding from a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthIssue {
    pub rule: HealRule,
    pub severity: Severity,
    pub entity_id: String,
    pub category: Category,
    pub path: String,
    pub detail: String,
    pub auto_healable: bool,
}

/// Aggregate view of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub auto_healable: usize,
    pub needs_manual: usize,
    pub auto_healable_rate: f64,
}

/// Issues sorted by severity plus the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub issues: Vec<HealthIssue>,
    pub summary: HealthSummary,
}

/// Options for a heal pass.
#[derive(Debug, Clone, Copy)]
pub struct HealOptions {
    /// Only apply fixes that are safe without a human.
    pub auto_only: bool,
    /// Compute everything but write nothing.
    pub dry_run: bool,
}

impl Default for HealOptions {
    fn default() -> Self {
        Self {
            auto_only: true,
            dry_run: false,
        }
    }
}

/// One applied fix, with its before/after values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealedItem {
    pub entity_id: String,
    pub rule: HealRule,
    pub before: Value,
    pub after: Value,
}

/// One issue that was not applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub entity_id: String,
    pub rule: HealRule,
    pub reason: String,
}

/// One fix that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealErrorItem {
    pub entity_id: String,
    pub rule: HealRule,
    pub error: String,
}

/// Result of a heal pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealOutcome {
    pub healed: Vec<HealedItem>,
    pub skipped: Vec<SkippedItem>,
    pub errors: Vec<HealErrorItem>,
    pub batch_id: String,
    pub backup_path: Option<PathBuf>,
}

/// Structured warning for an issue that needs a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualFixWarning {
    pub entity_id: String,
    pub path: String,
    pub rule: HealRule,
    pub severity: Severity,
    pub suggested_actions: Vec<String>,
}

/// Optional channel for manual-fix warnings. Delivery is best-effort;
/// failures are logged and never affect healing.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, warning: &ManualFixWarning) -> std::result::Result<(), String>;
}

/// On-demand and scheduled registry repair.
pub struct RegistryHealer {
    registry: Arc<Registry>,
    log: JsonlLog,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl RegistryHealer {
    pub fn new(registry: Arc<Registry>) -> Self {
        let config = registry.config();
        let log = JsonlLog::new(
            config.healing_log_path.clone(),
            config.log_rotate_bytes,
            config.backup_dir.clone(),
        );
        Self {
            registry,
            log,
            sink: None,
        }
    }

    /// Attach a notification channel for manual-fix warnings.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Evaluate every rule against every entity.
    ///
    /// An entity whose file is missing yields only the `missing-file`
    /// issue; the remaining rules would all be noise on top of it.
    pub fn run_health_check(&self) -> HealthReport {
        let config = self.registry.config().clone();
        let doc = self.registry.snapshot();
        let stale_cutoff = Utc::now() - ChronoDuration::days(config.stale_verification_days);
        let mut issues = Vec::new();

        for entity in doc.all_entities() {
            let abs = config.repo_root.join(&entity.path);
            let issue = |rule: HealRule, detail: String| HealthIssue {
                rule,
                severity: rule.severity(),
                entity_id: entity.id.clone(),
                category: entity.category,
                path: entity.path.clone(),
                detail,
                auto_healable: rule.auto_healable(),
            };

            if !abs.exists() {
                issues.push(issue(
                    HealRule::MissingFile,
                    format!("file not found at {}", entity.path),
                ));
                continue;
            }

            match ContentHash::from_file(&abs) {
                Ok(hash) if hash != entity.checksum => {
                    issues.push(issue(
                        HealRule::ChecksumMismatch,
                        format!("stored {} but file is {}", entity.checksum, hash),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(id = %entity.id, path = %abs.display(), error = %e, "health check could not read file");
                }
            }

            let orphaned_used_by: Vec<&String> = entity
                .used_by
                .iter()
                .filter(|id| !doc.contains_id(id))
                .collect();
            if !orphaned_used_by.is_empty() {
                issues.push(issue(
                    HealRule::OrphanedUsedBy,
                    format!("unknown consumers: {orphaned_used_by:?}"),
                ));
            }

            let orphaned_deps: Vec<&String> = entity
                .dependencies
                .iter()
                .filter(|id| !doc.contains_id(id))
                .collect();
            if !orphaned_deps.is_empty() {
                issues.push(issue(
                    HealRule::OrphanedDependency,
                    format!("unknown dependencies: {orphaned_deps:?}"),
                ));
            }

            if entity.keywords.is_empty() {
                issues.push(issue(
                    HealRule::MissingKeywords,
                    "no keywords recorded".to_string(),
                ));
            }

            if entity.last_verified < stale_cutoff {
                issues.push(issue(
                    HealRule::StaleVerification,
                    format!("last verified {}", entity.last_verified.to_rfc3339()),
                ));
            }
        }

        issues.sort_by_key(|issue| issue.severity);

        let auto_healable = issues.iter().filter(|i| i.auto_healable).count();
        let mut by_severity = BTreeMap::new();
        for issue in &issues {
            *by_severity
                .entry(issue.severity.as_str().to_string())
                .or_insert(0) += 1;
        }
        let total = issues.len();
        let summary = HealthSummary {
            total,
            by_severity,
            auto_healable,
            needs_manual: total - auto_healable,
            auto_healable_rate: if total == 0 {
                0.0
            } else {
                auto_healable as f64 / total as f64
            },
        };

        HealthReport { issues, summary }
    }

    /// Apply fixes for the given issues in one in-memory pass.
    pub async fn heal(&self, issues: &[HealthIssue], opts: HealOptions) -> Result<HealOutcome> {
        let config = self.registry.config().clone();
        let batch_id = format!(
            "heal-{}-{:06x}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            rand::thread_rng().gen_range(0..0xFF_FFFFu32)
        );

        let backup_path = if opts.dry_run {
            None
        } else {
            self.create_backup(&batch_id)?
        };

        let mut doc = read_document(&config.registry_path);
        let mut outcome = HealOutcome {
            healed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            batch_id: batch_id.clone(),
            backup_path,
        };

        for issue in issues {
            if !issue.auto_healable {
                outcome.skipped.push(SkippedItem {
                    entity_id: issue.entity_id.clone(),
                    rule: issue.rule,
                    reason: "requires manual intervention".to_string(),
                });
                self.warn_manual(issue).await;
                continue;
            }
            match self.apply_fix(&mut doc, issue) {
                Ok(Some(item)) => outcome.healed.push(item),
                Ok(None) => outcome.skipped.push(SkippedItem {
                    entity_id: issue.entity_id.clone(),
                    rule: issue.rule,
                    reason: "entity no longer present".to_string(),
                }),
                Err(e) => outcome.errors.push(HealErrorItem {
                    entity_id: issue.entity_id.clone(),
                    rule: issue.rule,
                    error: e.to_string(),
                }),
            }
        }

        if !opts.dry_run && !outcome.healed.is_empty() {
            doc.touch_metadata();
            if let Err(e) = write_document_atomic(&config.registry_path, &doc) {
                tracing::error!(error = %e, batch_id = %batch_id, "heal serialize failed, rolling back");
                self.rollback(&batch_id)?;
                self.log.append_value(&json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "batchId": batch_id,
                    "action": "error",
                    "success": false,
                    "error": e.to_string(),
                }));
                return Err(RegistryError::WriteFailed(e.to_string()));
            }
            self.registry.replace(doc);
        }

        if !opts.dry_run {
            for item in &outcome.healed {
                self.log.append_value(&json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "batchId": batch_id,
                    "action": "heal",
                    "ruleId": item.rule.as_str(),
                    "entityId": item.entity_id,
                    "before": item.before,
                    "after": item.after,
                    "success": true,
                }));
            }
            for item in &outcome.errors {
                self.log.append_value(&json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "batchId": batch_id,
                    "action": "heal",
                    "ruleId": item.rule.as_str(),
                    "entityId": item.entity_id,
                    "success": false,
                    "error": item.error,
                }));
            }
        }

        Ok(outcome)
    }

    /// Restore the registry from the named heal batch's backup.
    pub fn rollback(&self, batch_id: &str) -> Result<()> {
        let config = self.registry.config();
        let backup = self
            .registry_backups()?
            .into_iter()
            .find(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.contains(batch_id))
                    .unwrap_or(false)
            })
            .ok_or_else(|| RegistryError::BackupNotFound(batch_id.to_string()))?;

        std::fs::copy(&backup, &config.registry_path)?;
        self.registry.invalidate();

        self.log.append_value(&json!({
            "timestamp": Utc::now().to_rfc3339(),
            "batchId": batch_id,
            "action": "rollback",
            "success": true,
        }));
        tracing::info!(batch_id, backup = %backup.display(), "registry rolled back");
        Ok(())
    }

    /// Read the healing log back.
    pub fn query_healing_log(&self, filter: &LogFilter) -> Vec<Value> {
        self.log.query(filter)
    }

    /// One full maintenance cycle: health check plus auto-only heal.
    pub async fn run_health_cycle(&self) -> Result<(HealthReport, Option<HealOutcome>)> {
        let report = self.run_health_check();
        if report.issues.is_empty() {
            return Ok((report, None));
        }
        let outcome = self
            .heal(&report.issues, HealOptions::default())
            .await?;
        Ok((report, Some(outcome)))
    }

    /// Run maintenance cycles on an interval until the handle is aborted.
    /// Cycle failures are logged and the loop keeps going.
    pub fn spawn_scheduled(self: Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; consume it so the first
            // cycle lands one interval in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.run_health_cycle().await {
                    Ok((report, outcome)) => {
                        if report.summary.total > 0 {
                            tracing::info!(
                                issues = report.summary.total,
                                healed = outcome.as_ref().map(|o| o.healed.len()).unwrap_or(0),
                                "scheduled maintenance cycle completed"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "scheduled maintenance cycle failed");
                    }
                }
            }
        })
    }

    fn apply_fix(
        &self,
        doc: &mut RegistryDocument,
        issue: &HealthIssue,
    ) -> Result<Option<HealedItem>> {
        let config = self.registry.config().clone();
        let known: Vec<String> = doc.all_entities().map(|e| e.id.clone()).collect();
        let Some(entity) = doc.find_mut(&issue.entity_id) else {
            return Ok(None);
        };
        let abs = config.repo_root.join(&entity.path);

        let item = match issue.rule {
            HealRule::ChecksumMismatch | HealRule::StaleVerification => {
                let before = json!({
                    "checksum": entity.checksum.to_string(),
                    "lastVerified": entity.last_verified.to_rfc3339(),
                });
                entity.checksum = ContentHash::from_file(&abs)?;
                entity.last_verified = Utc::now();
                HealedItem {
                    entity_id: entity.id.clone(),
                    rule: issue.rule,
                    before,
                    after: json!({
                        "checksum": entity.checksum.to_string(),
                        "lastVerified": entity.last_verified.to_rfc3339(),
                    }),
                }
            }
            HealRule::OrphanedUsedBy => {
                let before = json!(entity.used_by);
                entity.used_by.retain(|id| known.contains(id));
                HealedItem {
                    entity_id: entity.id.clone(),
                    rule: issue.rule,
                    before,
                    after: json!(entity.used_by),
                }
            }
            HealRule::OrphanedDependency => {
                let before = json!(entity.dependencies);
                entity.dependencies.retain(|id| known.contains(id));
                HealedItem {
                    entity_id: entity.id.clone(),
                    rule: issue.rule,
                    before,
                    after: json!(entity.dependencies),
                }
            }
            HealRule::MissingKeywords => {
                let bytes = std::fs::read(&abs)?;
                let before = json!(entity.keywords);
                entity.keywords = analysis::extract_keywords(&String::from_utf8_lossy(&bytes));
                HealedItem {
                    entity_id: entity.id.clone(),
                    rule: issue.rule,
                    before,
                    after: json!(entity.keywords),
                }
            }
            HealRule::MissingFile => return Ok(None),
        };
        Ok(Some(item))
    }

    /// Copy the registry into the backup directory and prune old backups.
    fn create_backup(&self, batch_id: &str) -> Result<Option<PathBuf>> {
        let config = self.registry.config();
        if !config.registry_path.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(&config.backup_dir)
            .map_err(|e| RegistryError::BackupFailed(e.to_string()))?;
        let name = format!(
            "entity-registry-{}-{batch_id}.json",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        );
        let backup = config.backup_dir.join(name);
        std::fs::copy(&config.registry_path, &backup)
            .map_err(|e| RegistryError::BackupFailed(e.to_string()))?;

        // Retention: newest N stay, the rest go.
        let mut backups = self.registry_backups()?;
        backups.sort();
        while backups.len() > config.healer_backups {
            let oldest = backups.remove(0);
            if let Err(e) = std::fs::remove_file(&oldest) {
                tracing::warn!(path = %oldest.display(), error = %e, "failed to prune backup");
            }
        }
        Ok(Some(backup))
    }

    fn registry_backups(&self) -> Result<Vec<PathBuf>> {
        let config = self.registry.config();
        let Ok(read_dir) = std::fs::read_dir(&config.backup_dir) else {
            return Ok(Vec::new());
        };
        Ok(read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("entity-registry-") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn warn_manual(&self, issue: &HealthIssue) {
        let warning = ManualFixWarning {
            entity_id: issue.entity_id.clone(),
            path: issue.path.clone(),
            rule: issue.rule,
            severity: issue.severity,
            suggested_actions: vec![
                format!("restore {} from version control", issue.path),
                "re-create the artifact and re-ingest it".to_string(),
                "process an unlink change if the removal was intentional".to_string(),
            ],
        };
        tracing::warn!(
            entity = %warning.entity_id,
            rule = warning.rule.as_str(),
            "manual fix required"
        );
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.notify(&warning).await {
                tracing::warn!(error = %e, "notification sink failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::entity::{Adaptability, Entity};
    use std::path::Path;

    fn entity_on_disk(dir: &Path, id: &str, body: &[u8]) -> Entity {
        let rel = format!("tasks/{id}.md");
        let abs = dir.join(&rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, body).unwrap();
        Entity {
            id: id.to_string(),
            category: Category::Tasks,
            artifact_type: "task".to_string(),
            path: rel,
            purpose: "purpose".to_string(),
            keywords: vec!["keyword".to_string()],
            dependencies: Vec::new(),
            used_by: Vec::new(),
            adaptability: Adaptability::with_score(0.5),
            checksum: ContentHash::from_bytes(body),
            last_verified: Utc::now(),
            create_justification: None,
        }
    }

    fn persist(registry: &Registry, doc: &RegistryDocument) {
        write_document_atomic(&registry.config().registry_path, doc).unwrap();
        registry.invalidate();
    }

    fn setup(dir: &Path) -> (Arc<Registry>, RegistryHealer) {
        let registry = Arc::new(Registry::new(RegistryConfig::new(dir)));
        let healer = RegistryHealer::new(Arc::clone(&registry));
        (registry, healer)
    }

    #[test]
    fn test_clean_registry_has_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        doc.insert(entity_on_disk(dir.path(), "foo", b"body"));
        doc.touch_metadata();
        persist(&registry, &doc);

        let report = healer.run_health_check();
        assert_eq!(report.summary.total, 0);
        assert!((report.summary.auto_healable_rate - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file_short_circuits_other_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        std::fs::remove_file(dir.path().join(&e.path)).unwrap();
        e.keywords.clear(); // would be missing-keywords, must not surface
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let report = healer.run_health_check();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.issues[0].rule, HealRule::MissingFile);
        assert!(!report.issues[0].auto_healable);
        assert_eq!(report.summary.needs_manual, 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_detected_and_healed() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        e.checksum = ContentHash::from_bytes(b"something else");
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let report = healer.run_health_check();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.issues[0].rule, HealRule::ChecksumMismatch);

        let outcome = healer
            .heal(&report.issues, HealOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.healed.len(), 1);
        assert!(outcome.errors.is_empty());
        assert!(outcome.backup_path.is_some());

        registry.invalidate();
        assert!(registry.verify_checksum("foo").unwrap());

        let entries = healer.query_healing_log(&LogFilter::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["action"], "heal");
        assert_eq!(entries[0]["ruleId"], "checksum-mismatch");
        assert!(entries[0]["before"]["checksum"]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));
        assert_ne!(entries[0]["before"]["checksum"], entries[0]["after"]["checksum"]);
    }

    #[tokio::test]
    async fn test_orphaned_edges_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        e.used_by = vec!["ghost".to_string()];
        e.dependencies = vec!["phantom".to_string()];
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let report = healer.run_health_check();
        let rules: Vec<HealRule> = report.issues.iter().map(|i| i.rule).collect();
        assert!(rules.contains(&HealRule::OrphanedUsedBy));
        assert!(rules.contains(&HealRule::OrphanedDependency));

        healer
            .heal(&report.issues, HealOptions::default())
            .await
            .unwrap();
        registry.invalidate();
        let healed = registry.get("foo").unwrap();
        assert!(healed.used_by.is_empty());
        assert!(healed.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_leaves_registry_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        e.checksum = ContentHash::from_bytes(b"other");
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let before = std::fs::read(&registry.config().registry_path).unwrap();
        let report = healer.run_health_check();
        let outcome = healer
            .heal(
                &report.issues,
                HealOptions {
                    auto_only: true,
                    dry_run: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.healed.len(), 1);
        let after = std::fs::read(&registry.config().registry_path).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_heal_then_rollback_restores_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        e.checksum = ContentHash::from_bytes(b"other");
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let before = std::fs::read(&registry.config().registry_path).unwrap();
        let report = healer.run_health_check();
        let outcome = healer
            .heal(&report.issues, HealOptions::default())
            .await
            .unwrap();

        let mutated = std::fs::read(&registry.config().registry_path).unwrap();
        assert_ne!(before, mutated);

        healer.rollback(&outcome.batch_id).unwrap();
        let restored = std::fs::read(&registry.config().registry_path).unwrap();
        assert_eq!(before, restored);

        let rollbacks = healer.query_healing_log(&LogFilter {
            action: Some("rollback".to_string()),
            ..Default::default()
        });
        assert_eq!(rollbacks.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_unknown_batch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (_registry, healer) = setup(dir.path());
        assert!(matches!(
            healer.rollback("heal-nope"),
            Err(RegistryError::BackupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_backup_retention_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(
            RegistryConfig::new(dir.path()).with_healer_backups(3),
        ));
        let healer = RegistryHealer::new(Arc::clone(&registry));

        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        e.checksum = ContentHash::from_bytes(b"other");
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        for _ in 0..6 {
            let report = healer.run_health_check();
            healer
                .heal(&report.issues, HealOptions::default())
                .await
                .unwrap();
            // Re-introduce the mismatch so the next pass heals again.
            let mut doc = registry.snapshot();
            if let Some(e) = doc.find_mut("foo") {
                e.checksum = ContentHash::from_bytes(b"other");
            }
            persist(&registry, &doc);
        }

        assert!(healer.registry_backups().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn test_health_cycle_checks_and_heals_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, healer) = setup(dir.path());
        let mut doc = RegistryDocument::empty();
        let mut e = entity_on_disk(dir.path(), "foo", b"body");
        e.checksum = ContentHash::from_bytes(b"drifted");
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let (report, outcome) = healer.run_health_cycle().await.unwrap();
        assert_eq!(report.summary.total, 1);
        assert_eq!(outcome.unwrap().healed.len(), 1);
        registry.invalidate();
        assert!(registry.verify_checksum("foo").unwrap());

        // A clean registry cycles without healing.
        let (report, outcome) = healer.run_health_cycle().await.unwrap();
        assert_eq!(report.summary.total, 0);
        assert!(outcome.is_none());
    }

    struct RecordingSink(parking_lot::Mutex<Vec<String>>);

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, warning: &ManualFixWarning) -> std::result::Result<(), String> {
            self.0.lock().push(warning.entity_id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_manual_issues_notify_sink_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(RegistryConfig::new(dir.path())));
        let sink = Arc::new(RecordingSink(parking_lot::Mutex::new(Vec::new())));
        let healer =
            RegistryHealer::new(Arc::clone(&registry)).with_notification_sink(sink.clone());

        let mut doc = RegistryDocument::empty();
        let e = entity_on_disk(dir.path(), "foo", b"body");
        std::fs::remove_file(dir.path().join(&e.path)).unwrap();
        doc.insert(e);
        doc.touch_metadata();
        persist(&registry, &doc);

        let report = healer.run_health_check();
        let outcome = healer
            .heal(&report.issues, HealOptions::default())
            .await
            .unwrap();
        assert!(outcome.healed.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(sink.0.lock().as_slice(), &["foo".to_string()]);
    }
}
