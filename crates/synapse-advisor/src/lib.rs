//! SYNAPSE Advisor
//!
//! The advisory layer over the entity registry: a reuse/adapt/create
//! decision engine, a circuit breaker, and template-method verification
//! gates for the authoring workflow.
//!
//! Gates are advisory by construction: whatever happens inside a check
//! (engine failure, timeout, open breaker) the workflow proceeds with a
//! passed-with-warning result. Breakers isolate repeated failures so a
//! broken dependency cannot slow every authoring step to its timeout.

pub mod breaker;
pub mod cache;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gates;

// Re-exports for convenience
pub use breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker, Clock};
pub use cache::TtlCache;
pub use engine::{
    AnalysisContext, AnalysisResult, AnalysisSummary, Confidence, Decision, DecisionEngine,
    EngineConfig, ImpactAnalysis, IntentAnalyzer, PromotionReview, PromotionStatus,
    Recommendation,
};
pub use error::{AdvisorError, Result};
pub use gate::{
    Gate, GateConfig, GateContext, GateLogic, GateResult, GateStats, GateVerdict, Opportunity,
};
pub use gates::{
    artifact_creation_gate, epic_creation_gate, epic_creation_gate_with, story_creation_gate,
    task_breakdown_gate, ArtifactCreationGate, EpicCreationGate, StoryCreationGate,
    TaskBreakdownGate,
};
