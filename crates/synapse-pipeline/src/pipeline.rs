//! The prompt-assembly pipeline.
//!
//! On each prompt: compute the remaining-context bracket from the session,
//! run the bracket's active layers concurrently (each under its own
//! timeout and circuit breaker), collect per-layer outcomes in canonical
//! order, and persist diagnostic metrics best-effort. A layer that times
//! out or fails is recorded and skipped; the pipeline always produces a
//! run.

use crate::bracket::{
    calculate_bracket, estimate_context_percent, BracketConfig, ContextBracket, Layer,
};
use crate::layers::{
    ConstitutionLayer, GlobalLayer, KeywordLayer, LayerLoader, LayerRequest, LayerResult,
    MemoryLayer, MemoryProvider, SessionEntityLayer, StarCommandLayer,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_advisor::{BreakerConfig, CircuitBreaker};
use synapse_session::Session;

/// File names of the persisted metrics documents.
pub const ASSEMBLY_METRICS_FILE: &str = "assembly-metrics.json";
pub const HOOK_METRICS_FILE: &str = "hook-metrics.json";

/// Where rule files and metrics live, and how layers are bounded.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding constitution/global/agents/workflows/tasks/squads/
    /// domains rule files.
    pub rules_dir: PathBuf,
    /// Directory the two metrics documents are written into.
    pub metrics_dir: PathBuf,
    pub layer_timeout: Duration,
    pub breaker: BreakerConfig,
    pub bracket: BracketConfig,
    /// Domain files the keyword layer may pull per prompt.
    pub max_keyword_domains: usize,
}

impl PipelineConfig {
    pub fn new(rules_dir: impl Into<PathBuf>, metrics_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
            metrics_dir: metrics_dir.into(),
            layer_timeout: Duration::from_millis(2_000),
            breaker: BreakerConfig::default(),
            bracket: BracketConfig::default(),
            max_keyword_domains: 3,
        }
    }

    pub fn with_layer_timeout(mut self, timeout: Duration) -> Self {
        self.layer_timeout = timeout;
        self
    }
}

/// How a layer's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    /// Contributed rules or hints.
    Loaded,
    /// Ran fine but had nothing for this prompt.
    Empty,
    /// Timed out or was refused by its breaker.
    Skipped,
    /// The loader failed.
    Error,
}

/// One layer's execution record for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOutcome {
    pub layer: Layer,
    pub status: LayerStatus,
    pub duration_ms: u64,
    pub rule_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<LayerResult>,
}

/// Everything one prompt produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub bracket: ContextBracket,
    pub context_percent: f64,
    pub prompt_count: u64,
    pub outcomes: Vec<LayerOutcome>,
    pub total_duration_ms: u64,
}

impl PipelineRun {
    /// Outcomes that actually contributed, in canonical order.
    pub fn contributions(&self) -> impl Iterator<Item = &LayerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == LayerStatus::Loaded)
    }
}

/// Bracket-aware concurrent layer executor.
pub struct PromptPipeline {
    config: PipelineConfig,
    loaders: Vec<Arc<dyn LayerLoader>>,
    breakers: HashMap<Layer, CircuitBreaker>,
}

impl PromptPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_memory_provider(config, None)
    }

    /// Build the standard loader set; the memory layer takes the optional
    /// provider.
    pub fn with_memory_provider(
        config: PipelineConfig,
        memory: Option<Arc<dyn MemoryProvider>>,
    ) -> Self {
        let rules = &config.rules_dir;
        let loaders: Vec<Arc<dyn LayerLoader>> = vec![
            Arc::new(ConstitutionLayer {
                path: rules.join("constitution.md"),
            }),
            Arc::new(GlobalLayer {
                path: rules.join("global.md"),
            }),
            Arc::new(SessionEntityLayer::agent(rules.join("agents"))),
            Arc::new(SessionEntityLayer::workflow(rules.join("workflows"))),
            Arc::new(SessionEntityLayer::task(rules.join("tasks"))),
            Arc::new(SessionEntityLayer::squad(rules.join("squads"))),
            Arc::new(KeywordLayer {
                dir: rules.join("domains"),
                max_domains: config.max_keyword_domains,
            }),
            Arc::new(StarCommandLayer {
                path: rules.join("star-commands.md"),
            }),
            Arc::new(MemoryLayer { provider: memory }),
        ];

        let breakers = loaders
            .iter()
            .map(|loader| {
                (
                    loader.layer(),
                    CircuitBreaker::new(format!("layer-{}", loader.layer()), config.breaker),
                )
            })
            .collect();

        Self {
            config,
            loaders,
            breakers,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn breaker_state(&self, layer: Layer) -> Option<synapse_advisor::BreakerState> {
        self.breakers.get(&layer).map(|b| b.get_state())
    }

    /// Execute one prompt's worth of layer loading.
    pub async fn run(&self, prompt: &str, session: Option<&Session>) -> PipelineRun {
        let started = Instant::now();
        let prompt_count = session.map(|s| s.prompt_count).unwrap_or(0);
        let context_percent = estimate_context_percent(prompt_count, &self.config.bracket);
        let bracket = calculate_bracket(context_percent, &self.config.bracket);

        let request = LayerRequest {
            prompt,
            session,
            bracket,
            context_percent,
        };

        let active: Vec<&Arc<dyn LayerLoader>> = self
            .loaders
            .iter()
            .filter(|loader| bracket.is_active(loader.layer()))
            .collect();

        let executions = active
            .iter()
            .map(|loader| self.run_layer(loader.as_ref(), &request));
        let outcomes = futures::future::join_all(executions).await;

        let run = PipelineRun {
            bracket,
            context_percent,
            prompt_count,
            outcomes,
            total_duration_ms: started.elapsed().as_millis() as u64,
        };

        self.persist_metrics(&run);
        run
    }

    async fn run_layer(&self, loader: &dyn LayerLoader, request: &LayerRequest<'_>) -> LayerOutcome {
        let layer = loader.layer();
        let started = Instant::now();

        if let Some(breaker) = self.breakers.get(&layer) {
            if !breaker.is_allowed() {
                tracing::warn!(layer = %layer, "breaker open, skipping layer");
                return LayerOutcome {
                    layer,
                    status: LayerStatus::Skipped,
                    duration_ms: started.elapsed().as_millis() as u64,
                    rule_count: 0,
                    result: None,
                };
            }
        }

        let (status, result) =
            match tokio::time::timeout(self.config.layer_timeout, loader.load(request)).await {
                Ok(Ok(Some(result))) => {
                    self.record(layer, true);
                    (LayerStatus::Loaded, Some(result))
                }
                Ok(Ok(None)) => {
                    self.record(layer, true);
                    (LayerStatus::Empty, None)
                }
                Ok(Err(e)) => {
                    self.record(layer, false);
                    tracing::warn!(layer = %layer, error = %e, "layer failed, continuing");
                    (LayerStatus::Error, None)
                }
                Err(_) => {
                    self.record(layer, false);
                    tracing::warn!(
                        layer = %layer,
                        timeout_ms = self.config.layer_timeout.as_millis() as u64,
                        "layer timed out, continuing"
                    );
                    (LayerStatus::Skipped, None)
                }
            };

        LayerOutcome {
            layer,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            rule_count: result.as_ref().map(|r| r.payload.len()).unwrap_or(0),
            result,
        }
    }

    fn record(&self, layer: Layer, success: bool) {
        if let Some(breaker) = self.breakers.get(&layer) {
            if success {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }
    }

    /// Write the last-run document and fold the run into the cumulative
    /// counters. Failures are logged and swallowed; metrics never break a
    /// prompt.
    fn persist_metrics(&self, run: &PipelineRun) {
        if let Err(e) = self.try_persist_metrics(run) {
            tracing::warn!(error = %e, "failed to persist pipeline metrics");
        }
    }

    fn try_persist_metrics(&self, run: &PipelineRun) -> crate::error::Result<()> {
        std::fs::create_dir_all(&self.config.metrics_dir)?;

        // Last-run snapshot, without the payloads.
        let assembly = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "bracket": run.bracket,
            "contextPercent": run.context_percent,
            "promptCount": run.prompt_count,
            "totalDurationMs": run.total_duration_ms,
            "layers": run.outcomes.iter().map(|o| json!({
                "layer": o.layer,
                "status": o.status,
                "durationMs": o.duration_ms,
                "ruleCount": o.rule_count,
            })).collect::<Vec<_>>(),
        });
        std::fs::write(
            self.config.metrics_dir.join(ASSEMBLY_METRICS_FILE),
            serde_json::to_vec_pretty(&assembly)?,
        )?;

        // Cumulative per-layer counters.
        let hook_path = self.config.metrics_dir.join(HOOK_METRICS_FILE);
        let mut hook: serde_json::Value = std::fs::read(&hook_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .filter(serde_json::Value::is_object)
            .unwrap_or_else(|| json!({ "runs": 0, "layers": {} }));
        if !hook["layers"].is_object() {
            hook["layers"] = json!({});
        }

        hook["runs"] = json!(hook["runs"].as_u64().unwrap_or(0) + 1);
        hook["timestamp"] = json!(Utc::now().to_rfc3339());
        for outcome in &run.outcomes {
            let entry = &mut hook["layers"][outcome.layer.as_str()];
            if entry.is_null() {
                *entry = json!({
                    "loads": 0, "empties": 0, "skips": 0, "errors": 0, "totalDurationMs": 0
                });
            }
            let bucket = match outcome.status {
                LayerStatus::Loaded => "loads",
                LayerStatus::Empty => "empties",
                LayerStatus::Skipped => "skips",
                LayerStatus::Error => "errors",
            };
            entry[bucket] = json!(entry[bucket].as_u64().unwrap_or(0) + 1);
            entry["totalDurationMs"] =
                json!(entry["totalDurationMs"].as_u64().unwrap_or(0) + outcome.duration_ms);
        }
        std::fs::write(&hook_path, serde_json::to_vec_pretty(&hook)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::layers::MemoryHint;
    use async_trait::async_trait;

    fn rules_fixture(dir: &std::path::Path) -> PipelineConfig {
        let rules = dir.join("rules");
        std::fs::create_dir_all(rules.join("agents")).unwrap();
        std::fs::create_dir_all(rules.join("domains")).unwrap();
        std::fs::write(
            rules.join("constitution.md"),
            "- verify before you trust\n- stay within scope\n",
        )
        .unwrap();
        std::fs::write(rules.join("global.md"), "- prefer registry reuse\n").unwrap();
        std::fs::write(rules.join("agents/dev.md"), "- write tests alongside\n").unwrap();
        std::fs::write(rules.join("star-commands.md"), "- *agent switches agents\n").unwrap();
        PipelineConfig::new(rules, dir.join("metrics"))
    }

    fn session_with_prompts(prompt_count: u64) -> Session {
        let mut session = Session::new("u", "/repo", "main");
        session.prompt_count = prompt_count;
        session.active_agent = Some(synapse_session::ActiveAgent {
            id: "dev".to_string(),
            quality: None,
            activated_at: chrono::Utc::now(),
        });
        session
    }

    #[tokio::test]
    async fn test_fresh_session_runs_fresh_layer_set() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PromptPipeline::new(rules_fixture(dir.path()));
        let session = session_with_prompts(0);

        let run = pipeline.run("hello there", Some(&session)).await;
        assert_eq!(run.bracket, ContextBracket::Fresh);
        let layers: Vec<Layer> = run.outcomes.iter().map(|o| o.layer).collect();
        assert_eq!(
            layers,
            vec![
                Layer::Constitution,
                Layer::Global,
                Layer::Agent,
                Layer::StarCommand
            ]
        );
        // Star-command layer ran but had nothing for a plain prompt.
        let star = run
            .outcomes
            .iter()
            .find(|o| o.layer == Layer::StarCommand)
            .unwrap();
        assert_eq!(star.status, LayerStatus::Empty);
        assert_eq!(run.contributions().count(), 3);
    }

    #[tokio::test]
    async fn test_critical_session_runs_minimal_set() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PromptPipeline::new(rules_fixture(dir.path()));
        let session = session_with_prompts(40); // 100 - 40*2.5 = 0

        let run = pipeline.run("hello", Some(&session)).await;
        assert_eq!(run.bracket, ContextBracket::Critical);
        let layers: Vec<Layer> = run.outcomes.iter().map(|o| o.layer).collect();
        assert_eq!(layers, vec![Layer::Constitution, Layer::Agent]);
    }

    struct FailingProvider;

    #[async_trait]
    impl crate::layers::MemoryProvider for FailingProvider {
        async fn hints(&self, _prompt: &str) -> crate::error::Result<Vec<MemoryHint>> {
            Err(PipelineError::Layer("provider offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_layer_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PromptPipeline::with_memory_provider(
            rules_fixture(dir.path()),
            Some(Arc::new(FailingProvider)),
        );
        let session = session_with_prompts(30); // 25% -> DEPLETED, memory active

        let run = pipeline.run("hello", Some(&session)).await;
        assert_eq!(run.bracket, ContextBracket::Depleted);
        let memory = run
            .outcomes
            .iter()
            .find(|o| o.layer == Layer::Memory)
            .unwrap();
        assert_eq!(memory.status, LayerStatus::Error);
        // The constitution still landed.
        let constitution = run
            .outcomes
            .iter()
            .find(|o| o.layer == Layer::Constitution)
            .unwrap();
        assert_eq!(constitution.status, LayerStatus::Loaded);
    }

    struct StallingProvider;

    #[async_trait]
    impl crate::layers::MemoryProvider for StallingProvider {
        async fn hints(&self, _prompt: &str) -> crate::error::Result<Vec<MemoryHint>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_layer_timeout_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = rules_fixture(dir.path()).with_layer_timeout(Duration::from_millis(30));
        let pipeline =
            PromptPipeline::with_memory_provider(config, Some(Arc::new(StallingProvider)));
        let session = session_with_prompts(30);

        let run = pipeline.run("hello", Some(&session)).await;
        let memory = run
            .outcomes
            .iter()
            .find(|o| o.layer == Layer::Memory)
            .unwrap();
        assert_eq!(memory.status, LayerStatus::Skipped);
        assert!(memory.duration_ms >= 25);
    }

    #[tokio::test]
    async fn test_metrics_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PromptPipeline::new(rules_fixture(dir.path()));

        pipeline.run("hello", None).await;
        pipeline.run("again", None).await;

        let assembly: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("metrics").join(ASSEMBLY_METRICS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(assembly["bracket"], "FRESH");
        assert!(assembly["layers"].as_array().unwrap().len() >= 3);

        let hook: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("metrics").join(HOOK_METRICS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(hook["runs"], 2);
        assert_eq!(hook["layers"]["constitution"]["loads"], 2);
    }
}
