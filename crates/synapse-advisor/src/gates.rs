//! Concrete advisory gates for the authoring workflow.
//!
//! Each gate is a thin composition over the decision engine: it shapes the
//! intent out of its workflow context, runs an analysis (or two), and
//! surfaces the ranked matches as opportunities. All four are advisory.

use crate::engine::{AnalysisContext, AnalysisResult, Decision, IntentAnalyzer};
use crate::error::Result;
use crate::gate::{Gate, GateConfig, GateContext, GateLogic, GateVerdict, Opportunity};
use async_trait::async_trait;
use std::sync::Arc;

fn opportunities_from(result: &AnalysisResult) -> Vec<Opportunity> {
    result
        .recommendations
        .iter()
        .map(|rec| Opportunity {
            entity: rec.entity_id.clone(),
            relevance: rec.relevance_score,
            recommendation: match rec.decision {
                Decision::Reuse => "REUSE".to_string(),
                Decision::Adapt => "ADAPT".to_string(),
                Decision::Create => "CREATE".to_string(),
            },
            reason: rec.rationale.clone(),
        })
        .collect()
}

fn verdict_from(result: &AnalysisResult) -> GateVerdict {
    let opportunities = opportunities_from(result);
    let mut warnings = result.warnings.clone();
    if let Some(top) = result.recommendations.first() {
        if top.decision != Decision::Create {
            warnings.push(format!(
                "existing entity {} covers this intent ({:?}, relevance {:.3})",
                top.entity_id, top.decision, top.relevance_score
            ));
        }
    }
    GateVerdict {
        passed: true,
        blocking: false,
        warnings,
        opportunities,
    }
}

/// G1: runs at epic creation with the full intent.
pub struct EpicCreationGate {
    engine: Arc<dyn IntentAnalyzer>,
}

#[async_trait]
impl GateLogic for EpicCreationGate {
    fn gate_id(&self) -> &'static str {
        "epic-creation"
    }

    async fn do_verify(&self, context: &GateContext) -> Result<GateVerdict> {
        let result = self
            .engine
            .analyze_intent(&context.intent, &AnalysisContext::default())
            .await?;
        Ok(verdict_from(&result))
    }
}

/// G2: runs at story creation; the intent is enriched with acceptance
/// criteria and both task and template matches are considered.
pub struct StoryCreationGate {
    engine: Arc<dyn IntentAnalyzer>,
}

#[async_trait]
impl GateLogic for StoryCreationGate {
    fn gate_id(&self) -> &'static str {
        "story-creation"
    }

    async fn do_verify(&self, context: &GateContext) -> Result<GateVerdict> {
        let mut intent = context.intent.clone();
        if !context.acceptance_criteria.is_empty() {
            intent.push(' ');
            intent.push_str(&context.acceptance_criteria.join(" "));
        }

        let tasks = self
            .engine
            .analyze_intent(&intent, &AnalysisContext::of_type("task"))
            .await?;
        let templates = self
            .engine
            .analyze_intent(&intent, &AnalysisContext::of_type("template"))
            .await?;

        let mut opportunities = opportunities_from(&tasks);
        opportunities.extend(opportunities_from(&templates));
        opportunities.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut warnings = tasks.warnings.clone();
        if let Some(top) = opportunities.first() {
            if top.recommendation != "CREATE" {
                warnings.push(format!(
                    "existing entity {} covers this story ({}, relevance {:.3})",
                    top.entity, top.recommendation, top.relevance
                ));
            }
        }

        Ok(GateVerdict {
            passed: true,
            blocking: false,
            warnings,
            opportunities,
        })
    }
}

/// G3: runs at task breakdown; candidates narrow to executable artifacts.
pub struct TaskBreakdownGate {
    engine: Arc<dyn IntentAnalyzer>,
}

#[async_trait]
impl GateLogic for TaskBreakdownGate {
    fn gate_id(&self) -> &'static str {
        "task-breakdown"
    }

    async fn do_verify(&self, context: &GateContext) -> Result<GateVerdict> {
        let analysis_context = AnalysisContext {
            artifact_type: context.artifact_type.clone().or_else(|| Some("task".to_string())),
            category: None,
        };
        let result = self
            .engine
            .analyze_intent(&context.intent, &analysis_context)
            .await?;
        Ok(verdict_from(&result))
    }
}

/// G4: runs before a new artifact is created, narrowed to its category.
pub struct ArtifactCreationGate {
    engine: Arc<dyn IntentAnalyzer>,
}

#[async_trait]
impl GateLogic for ArtifactCreationGate {
    fn gate_id(&self) -> &'static str {
        "artifact-creation"
    }

    async fn do_verify(&self, context: &GateContext) -> Result<GateVerdict> {
        let analysis_context = AnalysisContext {
            artifact_type: context.artifact_type.clone(),
            category: context.category.clone(),
        };
        let result = self
            .engine
            .analyze_intent(&context.intent, &analysis_context)
            .await?;
        Ok(verdict_from(&result))
    }
}

/// Build G1 with the default lifecycle config.
pub fn epic_creation_gate(engine: Arc<dyn IntentAnalyzer>) -> Gate<EpicCreationGate> {
    Gate::new(EpicCreationGate { engine })
}

pub fn epic_creation_gate_with(
    engine: Arc<dyn IntentAnalyzer>,
    config: GateConfig,
) -> Gate<EpicCreationGate> {
    Gate::with_config(EpicCreationGate { engine }, config)
}

/// Build G2.
pub fn story_creation_gate(engine: Arc<dyn IntentAnalyzer>) -> Gate<StoryCreationGate> {
    Gate::new(StoryCreationGate { engine })
}

/// Build G3.
pub fn task_breakdown_gate(engine: Arc<dyn IntentAnalyzer>) -> Gate<TaskBreakdownGate> {
    Gate::new(TaskBreakdownGate { engine })
}

/// Build G4.
pub fn artifact_creation_gate(engine: Arc<dyn IntentAnalyzer>) -> Gate<ArtifactCreationGate> {
    Gate::new(ArtifactCreationGate { engine })
}
