//! Context brackets: how much window is left, and which layers run.
//!
//! The remaining-context estimate decays linearly with the prompt count
//! (`percent = 100 − prompt_count × percent_per_prompt`, clamped to
//! [0, 100]); the rate is configurable so hosts with different window
//! economics can tune it. The bracket then selects which rule layers are
//! worth their tokens: a fresh session affords the full ceremony, a
//! critical one gets only the constitution and the active agent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The rule layers the pipeline knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    Constitution,
    Global,
    Agent,
    Workflow,
    Task,
    Squad,
    Keyword,
    StarCommand,
    Memory,
}

impl Layer {
    /// Canonical loading order.
    pub const ALL: [Layer; 9] = [
        Layer::Constitution,
        Layer::Global,
        Layer::Agent,
        Layer::Workflow,
        Layer::Task,
        Layer::Squad,
        Layer::Keyword,
        Layer::StarCommand,
        Layer::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Constitution => "constitution",
            Layer::Global => "global",
            Layer::Agent => "agent",
            Layer::Workflow => "workflow",
            Layer::Task => "task",
            Layer::Squad => "squad",
            Layer::Keyword => "keyword",
            Layer::StarCommand => "star-command",
            Layer::Memory => "memory",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative buckets of remaining context capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextBracket {
    Fresh,
    Moderate,
    Depleted,
    Critical,
}

impl ContextBracket {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextBracket::Fresh => "FRESH",
            ContextBracket::Moderate => "MODERATE",
            ContextBracket::Depleted => "DEPLETED",
            ContextBracket::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ContextBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ContextBracket {
    /// The layers active in this bracket.
    pub fn active_layers(&self) -> &'static [Layer] {
        match self {
            ContextBracket::Fresh => &[
                Layer::Constitution,
                Layer::Global,
                Layer::Agent,
                Layer::StarCommand,
            ],
            ContextBracket::Moderate => &[
                Layer::Constitution,
                Layer::Global,
                Layer::Agent,
                Layer::Workflow,
                Layer::Task,
                Layer::Squad,
                Layer::Keyword,
                Layer::StarCommand,
            ],
            ContextBracket::Depleted => &Layer::ALL,
            ContextBracket::Critical => &[Layer::Constitution, Layer::Agent],
        }
    }

    pub fn is_active(&self, layer: Layer) -> bool {
        self.active_layers().contains(&layer)
    }
}

/// Decay curve and bracket thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BracketConfig {
    /// Context percent consumed per prompt.
    pub percent_per_prompt: f64,
    /// Percent at or above which the session is FRESH.
    pub fresh_min: f64,
    /// Percent at or above which the session is MODERATE.
    pub moderate_min: f64,
    /// Percent at or above which the session is DEPLETED.
    pub depleted_min: f64,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            percent_per_prompt: 2.5,
            fresh_min: 70.0,
            moderate_min: 40.0,
            depleted_min: 15.0,
        }
    }
}

/// Remaining context as a percent, non-increasing in `prompt_count`.
pub fn estimate_context_percent(prompt_count: u64, config: &BracketConfig) -> f64 {
    (100.0 - prompt_count as f64 * config.percent_per_prompt).clamp(0.0, 100.0)
}

/// Map a percent to its bracket.
pub fn calculate_bracket(percent: f64, config: &BracketConfig) -> ContextBracket {
    if percent >= config.fresh_min {
        ContextBracket::Fresh
    } else if percent >= config.moderate_min {
        ContextBracket::Moderate
    } else if percent >= config.depleted_min {
        ContextBracket::Depleted
    } else {
        ContextBracket::Critical
    }
}
