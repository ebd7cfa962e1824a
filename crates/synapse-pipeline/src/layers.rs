//! Layer loaders.
//!
//! Each loader turns one rule source into a [`LayerResult`]: the
//! constitution and global files always apply, the agent/workflow/task/
//! squad files key off the session, the keyword layer matches prompt
//! keywords against domain rule files, the star-command layer answers
//! `*`-prefixed prompts, and the memory layer consults an optional
//! provider. A loader that has nothing to contribute returns `Ok(None)`;
//! per-loader failures are isolated by the pipeline.
//!
//! Rule files are markdown: list items (`- ` / `* `) are rules, headings
//! and prose are ignored.

use crate::bracket::{ContextBracket, Layer};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synapse_registry::analysis::extract_keywords;
use synapse_session::Session;

/// A hint surfaced by the memory layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHint {
    pub topic: String,
    pub hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// What a layer produced: plain rules, or hint objects for memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LayerPayload {
    Rules { rules: Vec<String> },
    MemoryHints { hints: Vec<MemoryHint> },
}

impl LayerPayload {
    pub fn len(&self) -> usize {
        match self {
            LayerPayload::Rules { rules } => rules.len(),
            LayerPayload::MemoryHints { hints } => hints.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Provenance attached to a layer's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub source: String,
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

/// One layer's contribution to the rule block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerResult {
    pub payload: LayerPayload,
    pub metadata: LayerMetadata,
}

impl LayerResult {
    pub fn rules(layer: Layer, source: impl Into<String>, rules: Vec<String>) -> Self {
        Self {
            payload: LayerPayload::Rules { rules },
            metadata: LayerMetadata {
                source: source.into(),
                layer,
                extra: serde_json::Map::new(),
            },
        }
    }
}

/// Everything a loader may consult for one prompt.
pub struct LayerRequest<'a> {
    pub prompt: &'a str,
    pub session: Option<&'a Session>,
    pub bracket: ContextBracket,
    pub context_percent: f64,
}

/// One rule source.
#[async_trait]
pub trait LayerLoader: Send + Sync {
    fn layer(&self) -> Layer;

    /// `Ok(None)` when the layer has nothing for this prompt.
    async fn load(&self, request: &LayerRequest<'_>) -> Result<Option<LayerResult>>;
}

/// Optional provider behind the memory layer. Without one the layer
/// contributes nothing, which keeps the pipeline runnable in minimal
/// installs.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn hints(&self, prompt: &str) -> Result<Vec<MemoryHint>>;
}

/// Parse rule lines out of a markdown file: list items only.
fn parse_rules(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .map(str::trim)
                .filter(|rule| !rule.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// Read a rule file; a missing file is an empty contribution, any other
/// IO problem is a loader error.
fn read_rules(path: &Path) -> Result<Option<Vec<String>>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let rules = parse_rules(&content);
            Ok(if rules.is_empty() { None } else { Some(rules) })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PipelineError::Layer(format!(
            "{}: {e}",
            path.display()
        ))),
    }
}

fn file_layer_result(layer: Layer, path: &Path) -> Result<Option<LayerResult>> {
    Ok(read_rules(path)?
        .map(|rules| LayerResult::rules(layer, path.display().to_string(), rules)))
}

/// Always-on framework constitution.
pub struct ConstitutionLayer {
    pub path: PathBuf,
}

#[async_trait]
impl LayerLoader for ConstitutionLayer {
    fn layer(&self) -> Layer {
        Layer::Constitution
    }

    async fn load(&self, _request: &LayerRequest<'_>) -> Result<Option<LayerResult>> {
        file_layer_result(Layer::Constitution, &self.path)
    }
}

/// Project-wide rules.
pub struct GlobalLayer {
    pub path: PathBuf,
}

#[async_trait]
impl LayerLoader for GlobalLayer {
    fn layer(&self) -> Layer {
        Layer::Global
    }

    async fn load(&self, _request: &LayerRequest<'_>) -> Result<Option<LayerResult>> {
        file_layer_result(Layer::Global, &self.path)
    }
}

/// Rules for whichever entity the session currently points at
/// (agent, workflow, task, or squad).
pub struct SessionEntityLayer {
    layer: Layer,
    dir: PathBuf,
    select: fn(&Session) -> Option<&str>,
}

impl SessionEntityLayer {
    pub fn agent(dir: PathBuf) -> Self {
        Self {
            layer: Layer::Agent,
            dir,
            select: |s| s.active_agent.as_ref().map(|a| a.id.as_str()),
        }
    }

    pub fn workflow(dir: PathBuf) -> Self {
        Self {
            layer: Layer::Workflow,
            dir,
            select: |s| s.active_workflow.as_deref(),
        }
    }

    pub fn task(dir: PathBuf) -> Self {
        Self {
            layer: Layer::Task,
            dir,
            select: |s| s.active_task.as_deref(),
        }
    }

    pub fn squad(dir: PathBuf) -> Self {
        Self {
            layer: Layer::Squad,
            dir,
            select: |s| s.active_squad.as_deref(),
        }
    }
}

#[async_trait]
impl LayerLoader for SessionEntityLayer {
    fn layer(&self) -> Layer {
        self.layer
    }

    async fn load(&self, request: &LayerRequest<'_>) -> Result<Option<LayerResult>> {
        let Some(id) = request.session.and_then(|s| (self.select)(s)) else {
            return Ok(None);
        };
        // Session ids come from user-influenced state; keep them inside
        // the rules directory.
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            tracing::warn!(layer = %self.layer, id, "unsafe entity id, skipping rule file");
            return Ok(None);
        }
        let path = self.dir.join(format!("{id}.md"));
        let mut result = file_layer_result(self.layer, &path)?;
        if let Some(result) = result.as_mut() {
            result
                .metadata
                .extra
                .insert("entity".to_string(), Value::String(id.to_string()));
        }
        Ok(result)
    }
}

/// Domain rules triggered by prompt keywords: `<dir>/<keyword>.md`.
pub struct KeywordLayer {
    pub dir: PathBuf,
    /// At most this many domain files contribute per prompt.
    pub max_domains: usize,
}

#[async_trait]
impl LayerLoader for KeywordLayer {
    fn layer(&self) -> Layer {
        Layer::Keyword
    }

    async fn load(&self, request: &LayerRequest<'_>) -> Result<Option<LayerResult>> {
        let mut rules = Vec::new();
        let mut matched = Vec::new();
        for keyword in extract_keywords(request.prompt) {
            if matched.len() == self.max_domains {
                break;
            }
            let path = self.dir.join(format!("{keyword}.md"));
            if let Some(mut domain_rules) = read_rules(&path)? {
                rules.append(&mut domain_rules);
                matched.push(Value::String(keyword));
            }
        }
        if rules.is_empty() {
            return Ok(None);
        }
        let mut result = LayerResult::rules(Layer::Keyword, self.dir.display().to_string(), rules);
        result
            .metadata
            .extra
            .insert("domains".to_string(), Value::Array(matched));
        Ok(Some(result))
    }
}

/// Star-command catalog; contributes only to `*`-prefixed prompts.
pub struct StarCommandLayer {
    pub path: PathBuf,
}

#[async_trait]
impl LayerLoader for StarCommandLayer {
    fn layer(&self) -> Layer {
        Layer::StarCommand
    }

    async fn load(&self, request: &LayerRequest<'_>) -> Result<Option<LayerResult>> {
        if !request.prompt.trim_start().starts_with('*') {
            return Ok(None);
        }
        file_layer_result(Layer::StarCommand, &self.path)
    }
}

/// Memory hints from an optional provider.
pub struct MemoryLayer {
    pub provider: Option<Arc<dyn MemoryProvider>>,
}

#[async_trait]
impl LayerLoader for MemoryLayer {
    fn layer(&self) -> Layer {
        Layer::Memory
    }

    async fn load(&self, request: &LayerRequest<'_>) -> Result<Option<LayerResult>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };
        let hints = provider.hints(request.prompt).await?;
        if hints.is_empty() {
            return Ok(None);
        }
        Ok(Some(LayerResult {
            payload: LayerPayload::MemoryHints { hints },
            metadata: LayerMetadata {
                source: "memory-provider".to_string(),
                layer: Layer::Memory,
                extra: serde_json::Map::new(),
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &'static str) -> LayerRequest<'static> {
        LayerRequest {
            prompt,
            session: None,
            bracket: ContextBracket::Moderate,
            context_percent: 50.0,
        }
    }

    #[test]
    fn test_parse_rules_takes_list_items_only() {
        let rules = parse_rules("# Heading\n\nprose line\n- rule one\n* rule two\n-not a rule\n");
        assert_eq!(rules, vec!["rule one", "rule two"]);
    }

    #[tokio::test]
    async fn test_constitution_layer_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layer = ConstitutionLayer {
            path: dir.path().join("constitution.md"),
        };
        assert!(layer.load(&request("hello")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_constitution_layer_reads_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constitution.md");
        std::fs::write(&path, "# Constitution\n- always verify\n- never block\n").unwrap();
        let layer = ConstitutionLayer { path };
        let result = layer.load(&request("hello")).await.unwrap().unwrap();
        assert_eq!(result.payload.len(), 2);
        assert_eq!(result.metadata.layer, Layer::Constitution);
    }

    #[tokio::test]
    async fn test_agent_layer_follows_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(
            dir.path().join("agents/dev.md"),
            "- prefer small diffs\n",
        )
        .unwrap();

        let layer = SessionEntityLayer::agent(dir.path().join("agents"));
        assert!(layer.load(&request("x")).await.unwrap().is_none());

        let mut session = Session::new("u", "/repo", "main");
        session.active_agent = Some(synapse_session::ActiveAgent {
            id: "dev".to_string(),
            quality: None,
            activated_at: chrono::Utc::now(),
        });
        let req = LayerRequest {
            prompt: "x",
            session: Some(&session),
            bracket: ContextBracket::Moderate,
            context_percent: 50.0,
        };
        let result = layer.load(&req).await.unwrap().unwrap();
        assert_eq!(result.payload.len(), 1);
        assert_eq!(result.metadata.extra["entity"], "dev");
    }

    #[tokio::test]
    async fn test_agent_layer_rejects_unsafe_ids() {
        let dir = tempfile::tempdir().unwrap();
        let layer = SessionEntityLayer::agent(dir.path().to_path_buf());
        let mut session = Session::new("u", "/repo", "main");
        session.active_agent = Some(synapse_session::ActiveAgent {
            id: "../escape".to_string(),
            quality: None,
            activated_at: chrono::Utc::now(),
        });
        let req = LayerRequest {
            prompt: "x",
            session: Some(&session),
            bracket: ContextBracket::Moderate,
            context_percent: 50.0,
        };
        assert!(layer.load(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyword_layer_matches_domains() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deploy.md"), "- check rollback plan\n").unwrap();
        std::fs::write(dir.path().join("database.md"), "- snapshot first\n").unwrap();

        let layer = KeywordLayer {
            dir: dir.path().to_path_buf(),
            max_domains: 3,
        };
        let result = layer
            .load(&request("deploy the database changes"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.payload.len(), 2);
        let domains = result.metadata.extra["domains"].as_array().unwrap();
        assert_eq!(domains.len(), 2);

        assert!(layer
            .load(&request("unrelated prompt text"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_star_command_layer_gates_on_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("star-commands.md");
        std::fs::write(&path, "- *agent switches the active agent\n").unwrap();
        let layer = StarCommandLayer { path };

        assert!(layer.load(&request("plain prompt")).await.unwrap().is_none());
        assert!(layer.load(&request("*agent dev")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_layer_without_provider_is_empty() {
        let layer = MemoryLayer { provider: None };
        assert!(layer.load(&request("anything")).await.unwrap().is_none());
    }

    struct FixedProvider;

    #[async_trait]
    impl MemoryProvider for FixedProvider {
        async fn hints(&self, _prompt: &str) -> Result<Vec<MemoryHint>> {
            Ok(vec![MemoryHint {
                topic: "deploys".to_string(),
                hint: "previous rollout failed on migrations".to_string(),
                score: Some(0.8),
            }])
        }
    }

    #[tokio::test]
    async fn test_memory_layer_with_provider_yields_hints() {
        let layer = MemoryLayer {
            provider: Some(Arc::new(FixedProvider)),
        };
        let result = layer.load(&request("deploy")).await.unwrap().unwrap();
        match &result.payload {
            LayerPayload::MemoryHints { hints } => assert_eq!(hints.len(), 1),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
