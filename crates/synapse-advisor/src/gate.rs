//! Template-method verification gate.
//!
//! A gate is a named advisory check tied to a workflow step. Concrete
//! gates supply only `do_verify`; the harness owns the lifecycle:
//!
//! 1. Refuse early (passed-with-warning) when the gate's breaker is open.
//! 2. Run `do_verify` under a timeout; a timeout is a passed-with-warning.
//! 3. Record success/failure on the breaker; a thrown error becomes a
//!    passed-with-warning.
//!
//! No error ever reaches the caller of `verify`: authoring workflows keep
//! moving, and degradation shows up as warnings plus breaker state.

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Context handed to a gate by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateContext {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl GateContext {
    pub fn with_intent(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            ..Default::default()
        }
    }
}

/// A reuse opportunity surfaced by a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub entity: String,
    pub relevance: f64,
    pub recommendation: String,
    pub reason: String,
}

/// What a gate's inner check concluded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateVerdict {
    pub passed: bool,
    pub blocking: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
}

impl GateVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    pub fn pass_with_warning(warning: impl Into<String>) -> Self {
        Self {
            passed: true,
            blocking: false,
            warnings: vec![warning.into()],
            opportunities: Vec::new(),
        }
    }
}

/// The structured record a `verify` call always returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub gate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
    pub result: GateVerdict,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_note: Option<String>,
    pub execution_ms: u64,
    pub circuit_breaker_state: String,
}

/// Counters per gate.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GateStats {
    pub invocations: u64,
    pub short_circuits: u64,
    pub timeouts: u64,
    pub inner_errors: u64,
}

/// The domain half of a gate: just the check.
#[async_trait]
pub trait GateLogic: Send + Sync {
    fn gate_id(&self) -> &'static str;

    /// Whether a failed verdict may block. Advisory gates leave this false.
    fn blocking(&self) -> bool {
        false
    }

    async fn do_verify(&self, context: &GateContext) -> Result<GateVerdict>;
}

/// Timing knobs for the harness.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub timeout: Duration,
    pub breaker: BreakerConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2_000),
            breaker: BreakerConfig::default(),
        }
    }
}

/// The lifecycle half of a gate: breaker + timeout + wrapping.
pub struct Gate<L: GateLogic> {
    logic: L,
    config: GateConfig,
    breaker: CircuitBreaker,
    stats: Mutex<GateStats>,
}

impl<L: GateLogic> Gate<L> {
    pub fn new(logic: L) -> Self {
        Self::with_config(logic, GateConfig::default())
    }

    pub fn with_config(logic: L, config: GateConfig) -> Self {
        let breaker = CircuitBreaker::new(logic.gate_id(), config.breaker);
        Self {
            logic,
            config,
            breaker,
            stats: Mutex::new(GateStats::default()),
        }
    }

    pub fn gate_id(&self) -> &'static str {
        self.logic.gate_id()
    }

    pub fn get_stats(&self) -> GateStats {
        *self.stats.lock()
    }

    pub fn get_breaker_state(&self) -> BreakerState {
        self.breaker.get_state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run the gate. Never fails; the worst outcome is a pass with warnings.
    pub async fn verify(&self, context: &GateContext) -> GateResult {
        let started = Instant::now();
        self.stats.lock().invocations += 1;

        let verdict = if !self.breaker.is_allowed() {
            self.stats.lock().short_circuits += 1;
            tracing::warn!(gate = self.gate_id(), "breaker open, skipping verification");
            GateVerdict::pass_with_warning(format!(
                "{} verification skipped: circuit breaker open",
                self.gate_id()
            ))
        } else {
            match tokio::time::timeout(self.config.timeout, self.logic.do_verify(context)).await {
                Ok(Ok(mut verdict)) => {
                    self.breaker.record_success();
                    // Advisory gates always pass; only a blocking gate may
                    // carry a failed verdict through.
                    let blocking = self.logic.blocking() && !verdict.passed;
                    if !self.logic.blocking() {
                        verdict.passed = true;
                    }
                    verdict.blocking = blocking;
                    verdict
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure();
                    self.stats.lock().inner_errors += 1;
                    tracing::warn!(gate = self.gate_id(), error = %e, "verification failed, proceeding");
                    GateVerdict::pass_with_warning(format!(
                        "{} verification failed: {e}",
                        self.gate_id()
                    ))
                }
                Err(_) => {
                    self.breaker.record_failure();
                    self.stats.lock().timeouts += 1;
                    tracing::warn!(gate = self.gate_id(), timeout_ms = self.config.timeout.as_millis() as u64, "verification timed out, proceeding");
                    GateVerdict::pass_with_warning(format!(
                        "{} verification timed out after {} ms",
                        self.gate_id(),
                        self.config.timeout.as_millis()
                    ))
                }
            }
        };

        GateResult {
            gate_id: self.gate_id().to_string(),
            agent: context.agent.clone(),
            timestamp: Utc::now(),
            context: serde_json::to_value(context).unwrap_or(Value::Null),
            result: verdict,
            override_note: None,
            execution_ms: started.elapsed().as_millis() as u64,
            circuit_breaker_state: self.breaker.get_state().to_string(),
        }
    }
}
