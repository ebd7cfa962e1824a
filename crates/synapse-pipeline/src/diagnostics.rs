//! Diagnostics over the persisted pipeline metrics.
//!
//! Read-only consumer of the two metrics documents the pipeline writes
//! after each run (last-run snapshot and cumulative per-layer counters).
//! Absent or corrupt files read as empty; the reporter always produces a
//! report.

use crate::pipeline::{ASSEMBLY_METRICS_FILE, HOOK_METRICS_FILE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Cumulative counters for one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerTotals {
    pub loads: u64,
    pub empties: u64,
    pub skips: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}

impl LayerTotals {
    pub fn executions(&self) -> u64 {
        self.loads + self.empties + self.skips + self.errors
    }

    pub fn average_duration_ms(&self) -> f64 {
        let executions = self.executions();
        if executions == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / executions as f64
        }
    }
}

/// Snapshot of the last pipeline run, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub timestamp: String,
    pub bracket: String,
    pub context_percent: f64,
    pub prompt_count: u64,
    pub total_duration_ms: u64,
    pub layers: Vec<LastRunLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRunLayer {
    pub layer: String,
    pub status: String,
    pub duration_ms: u64,
    pub rule_count: usize,
}

/// The assembled diagnostics report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    pub runs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
    pub layer_totals: BTreeMap<String, LayerTotals>,
    /// `healthy`, `degraded` (errors present), or `idle` (no runs yet).
    pub health: String,
}

/// Builds reports from the metrics directory.
pub struct DiagnosticsReporter {
    metrics_dir: PathBuf,
}

impl DiagnosticsReporter {
    pub fn new(metrics_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.into(),
        }
    }

    /// Read both documents and assemble the report.
    pub fn report(&self) -> DiagnosticsReport {
        let last_run = read_json(&self.metrics_dir.join(ASSEMBLY_METRICS_FILE))
            .and_then(|value| serde_json::from_value::<LastRun>(value).ok());

        let hook = read_json(&self.metrics_dir.join(HOOK_METRICS_FILE));
        let runs = hook
            .as_ref()
            .and_then(|v| v.get("runs"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let mut layer_totals = BTreeMap::new();
        if let Some(layers) = hook.as_ref().and_then(|v| v.get("layers")).and_then(Value::as_object)
        {
            for (layer, value) in layers {
                match serde_json::from_value::<LayerTotals>(value.clone()) {
                    Ok(totals) => {
                        layer_totals.insert(layer.clone(), totals);
                    }
                    Err(e) => {
                        tracing::warn!(layer = %layer, error = %e, "unreadable layer totals, skipping");
                    }
                }
            }
        }

        let health = if runs == 0 {
            "idle"
        } else if layer_totals.values().any(|t| t.errors > 0) {
            "degraded"
        } else {
            "healthy"
        };

        DiagnosticsReport {
            generated_at: Utc::now(),
            runs,
            last_run,
            layer_totals,
            health: health.to_string(),
        }
    }
}

/// Best-effort JSON read: absent or corrupt files read as nothing.
fn read_json(path: &Path) -> Option<Value> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt metrics document, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_metrics_dir_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let report = DiagnosticsReporter::new(dir.path()).report();
        assert_eq!(report.health, "idle");
        assert_eq!(report.runs, 0);
        assert!(report.last_run.is_none());
    }

    #[test]
    fn test_corrupt_documents_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ASSEMBLY_METRICS_FILE), b"{nope").unwrap();
        std::fs::write(dir.path().join(HOOK_METRICS_FILE), b"[]").unwrap();
        let report = DiagnosticsReporter::new(dir.path()).report();
        assert_eq!(report.health, "idle");
    }

    #[test]
    fn test_report_reads_persisted_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ASSEMBLY_METRICS_FILE),
            serde_json::to_vec(&json!({
                "timestamp": "2026-08-01T10:00:00Z",
                "bracket": "MODERATE",
                "contextPercent": 55.0,
                "promptCount": 18,
                "totalDurationMs": 12,
                "layers": [
                    {"layer": "constitution", "status": "loaded", "durationMs": 3, "ruleCount": 5}
                ],
            }))
            .unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(HOOK_METRICS_FILE),
            serde_json::to_vec(&json!({
                "runs": 4,
                "layers": {
                    "constitution": {"loads": 4, "empties": 0, "skips": 0, "errors": 0, "totalDurationMs": 12},
                    "keyword": {"loads": 1, "empties": 2, "skips": 0, "errors": 1, "totalDurationMs": 9},
                },
            }))
            .unwrap(),
        )
        .unwrap();

        let report = DiagnosticsReporter::new(dir.path()).report();
        assert_eq!(report.runs, 4);
        assert_eq!(report.health, "degraded");
        let last = report.last_run.unwrap();
        assert_eq!(last.bracket, "MODERATE");
        assert_eq!(last.layers.len(), 1);
        let keyword = &report.layer_totals["keyword"];
        assert_eq!(keyword.executions(), 4);
        assert!((keyword.average_duration_ms() - 2.25).abs() < 1e-9);
    }
}
