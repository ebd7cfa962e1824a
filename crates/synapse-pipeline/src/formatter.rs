//! Rule-block assembly and token budgeting.
//!
//! Emits one `<synapse-rules>` block with sections in a fixed canonical
//! order. Three sections are protected and survive any budget:
//! `CONTEXT_BRACKET`, `CONSTITUTION`, `AGENT`. When the estimate exceeds
//! the budget, droppable sections go in a fixed order (summary first,
//! workflow last) until the block fits.
//!
//! Token estimate: `ceil(words × 4/3)` over whitespace-separated words,
//! the usual ~0.75 words-per-token approximation.

use crate::bracket::{ContextBracket, Layer};
use crate::layers::LayerPayload;
use crate::pipeline::{LayerOutcome, LayerStatus, PipelineRun};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use synapse_session::Session;

/// The sections of a rendered rule block, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Section {
    ContextBracket,
    Constitution,
    Agent,
    Workflow,
    Task,
    Squad,
    Keyword,
    MemoryHints,
    StarCommands,
    Devmode,
    Summary,
}

impl Section {
    /// Canonical emission order.
    pub const ORDER: [Section; 11] = [
        Section::ContextBracket,
        Section::Constitution,
        Section::Agent,
        Section::Workflow,
        Section::Task,
        Section::Squad,
        Section::Keyword,
        Section::MemoryHints,
        Section::StarCommands,
        Section::Devmode,
        Section::Summary,
    ];

    /// Sections dropped under budget pressure, in drop order.
    pub const DROP_ORDER: [Section; 8] = [
        Section::Summary,
        Section::Keyword,
        Section::MemoryHints,
        Section::Squad,
        Section::StarCommands,
        Section::Devmode,
        Section::Task,
        Section::Workflow,
    ];

    /// Never truncated, never dropped.
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            Section::ContextBracket | Section::Constitution | Section::Agent
        )
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Section::ContextBracket => "CONTEXT_BRACKET",
            Section::Constitution => "CONSTITUTION",
            Section::Agent => "AGENT",
            Section::Workflow => "WORKFLOW",
            Section::Task => "TASK",
            Section::Squad => "SQUAD",
            Section::Keyword => "KEYWORD",
            Section::MemoryHints => "MEMORY_HINTS",
            Section::StarCommands => "STAR_COMMANDS",
            Section::Devmode => "DEVMODE",
            Section::Summary => "SUMMARY",
        }
    }
}

/// Which section a layer's rules land in. Global folds into the
/// constitution section; the two are one voice to the model.
fn section_for(layer: Layer) -> Section {
    match layer {
        Layer::Constitution | Layer::Global => Section::Constitution,
        Layer::Agent => Section::Agent,
        Layer::Workflow => Section::Workflow,
        Layer::Task => Section::Task,
        Layer::Squad => Section::Squad,
        Layer::Keyword => Section::Keyword,
        Layer::StarCommand => Section::StarCommands,
        Layer::Memory => Section::MemoryHints,
    }
}

/// Inputs to one formatting pass.
pub struct FormatArgs<'a> {
    pub results: &'a [LayerOutcome],
    pub bracket: ContextBracket,
    pub context_percent: f64,
    pub session: Option<&'a Session>,
    pub devmode: bool,
    /// Pipeline metrics for the DEVMODE section.
    pub metrics: Option<&'a PipelineRun>,
    /// Token budget for the whole block; `None` disables truncation.
    pub budget: Option<usize>,
    /// Extra warning surfaced in the bracket section.
    pub warning: Option<String>,
}

/// Estimate tokens in a text: `ceil(words × 4/3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 4).div_ceil(3)
}

/// Assemble the final `<synapse-rules>` block.
pub fn format_synapse_rules(args: &FormatArgs<'_>) -> String {
    let mut sections: BTreeMap<Section, Vec<String>> = BTreeMap::new();

    // CONTEXT_BRACKET is always present.
    let mut bracket_lines = vec![format!(
        "bracket: {} ({:.1}% context remaining)",
        args.bracket, args.context_percent
    )];
    if let Some(session) = args.session {
        bracket_lines.push(format!("prompt: #{}", session.prompt_count));
    }
    if let Some(warning) = &args.warning {
        bracket_lines.push(format!("warning: {warning}"));
    }
    sections.insert(Section::ContextBracket, bracket_lines);

    for outcome in args.results {
        if outcome.status != LayerStatus::Loaded {
            continue;
        }
        let Some(result) = &outcome.result else {
            continue;
        };
        if result.payload.is_empty() {
            continue;
        }
        let lines = sections.entry(section_for(outcome.layer)).or_default();
        match &result.payload {
            LayerPayload::Rules { rules } => {
                lines.extend(rules.iter().map(|rule| format!("- {rule}")));
            }
            LayerPayload::MemoryHints { hints } => {
                lines.extend(
                    hints
                        .iter()
                        .map(|hint| format!("- {}: {}", hint.topic, hint.hint)),
                );
            }
        }
    }

    let any_results = sections.keys().any(|s| *s != Section::ContextBracket);

    if args.devmode {
        if let Some(metrics) = args.metrics {
            let mut lines = vec![format!(
                "pipeline: {} layers in {} ms",
                metrics.outcomes.len(),
                metrics.total_duration_ms
            )];
            for outcome in &metrics.outcomes {
                lines.push(format!(
                    "- {}: {:?} in {} ms ({} rules)",
                    outcome.layer,
                    outcome.status,
                    outcome.duration_ms,
                    outcome.rule_count
                ));
            }
            sections.insert(Section::Devmode, lines);
        }
    }

    // SUMMARY closes the block whenever anything contributed.
    if any_results {
        let contributed = sections
            .iter()
            .filter(|(s, _)| !matches!(s, Section::ContextBracket | Section::Devmode | Section::Summary))
            .count();
        let rule_count: usize = sections
            .iter()
            .filter(|(s, _)| !matches!(s, Section::ContextBracket | Section::Devmode | Section::Summary))
            .map(|(_, lines)| lines.len())
            .sum();
        sections.insert(
            Section::Summary,
            vec![format!(
                "{} sections, {} rules, bracket {}",
                contributed, rule_count, args.bracket
            )],
        );
    }

    // Budget: drop sections in order until the estimate fits.
    if let Some(budget) = args.budget {
        let mut rendered = render(&sections);
        if estimate_tokens(&rendered) > budget {
            for section in Section::DROP_ORDER {
                if !sections.contains_key(&section) {
                    continue;
                }
                debug_assert!(!section.is_protected());
                sections.remove(&section);
                tracing::debug!(section = section.heading(), "dropped section for token budget");
                rendered = render(&sections);
                if estimate_tokens(&rendered) <= budget {
                    break;
                }
            }
        }
        rendered
    } else {
        render(&sections)
    }
}

fn render(sections: &BTreeMap<Section, Vec<String>>) -> String {
    let mut out = String::from("<synapse-rules>\n");
    for section in Section::ORDER {
        let Some(lines) = sections.get(&section) else {
            continue;
        };
        if lines.is_empty() {
            continue;
        }
        out.push_str("## ");
        out.push_str(section.heading());
        out.push('\n');
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str("</synapse-rules>");
    out
}
