//! SYNAPSE Prompt Pipeline
//!
//! On every user prompt, the pipeline synthesizes a bounded, bracket-aware
//! rule block out of priority-ordered rule layers:
//!
//! 1. The session's prompt count maps to a remaining-context percent and a
//!    bracket (`FRESH` / `MODERATE` / `DEPLETED` / `CRITICAL`).
//! 2. The bracket selects the active layer set; layers load concurrently,
//!    each guarded by its own timeout and circuit breaker.
//! 3. The formatter assembles `<synapse-rules>` with sections in canonical
//!    order and enforces the token budget without ever touching the
//!    protected sections.
//! 4. Diagnostic metrics persist after each run for the read-only
//!    diagnostics reporter.

pub mod bracket;
pub mod diagnostics;
pub mod error;
pub mod formatter;
pub mod layers;
pub mod pipeline;

// Re-exports for convenience
pub use bracket::{
    calculate_bracket, estimate_context_percent, BracketConfig, ContextBracket, Layer,
};
pub use diagnostics::{DiagnosticsReport, DiagnosticsReporter, LastRun, LayerTotals};
pub use error::{PipelineError, Result};
pub use formatter::{estimate_tokens, format_synapse_rules, FormatArgs, Section};
pub use layers::{
    LayerLoader, LayerMetadata, LayerPayload, LayerRequest, LayerResult, MemoryHint,
    MemoryProvider,
};
pub use pipeline::{
    LayerOutcome, LayerStatus, PipelineConfig, PipelineRun, PromptPipeline,
    ASSEMBLY_METRICS_FILE, HOOK_METRICS_FILE,
};
