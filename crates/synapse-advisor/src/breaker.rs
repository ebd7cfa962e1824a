//! Circuit breaker for fallible calls.
//!
//! Three states:
//!
//! - `CLOSED`: calls flow; consecutive failures at the threshold trip to
//!   `OPEN`.
//! - `OPEN`: calls are refused until the reset timeout elapses, then the
//!   breaker half-opens for probing.
//! - `HALF_OPEN`: probes flow; enough consecutive successes close the
//!   breaker, any failure re-opens it and restarts the timer.
//!
//! All transitions happen under one mutex so recording is thread-safe and
//! repeated records in the same state are harmless. Time comes from an
//! injectable `now` closure (wall clock by default) so the reset timeout
//! is testable without sleeping.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current instant. Defaults to the wall clock; tests swap
/// in a manual clock to step through the reset timeout.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Breaker states. Rendered in their conventional spelling
/// (`CLOSED` / `OPEN` / `HALF_OPEN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Thresholds and timing for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker.
    pub success_threshold: u32,
    /// Time an open breaker waits before half-opening.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BreakerStats {
    /// Times the breaker tripped open.
    pub trips: u64,
    /// `is_allowed` checks observed.
    pub attempts: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Milliseconds since the last trip, if any.
    pub last_trip_age_ms: Option<u64>,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_trip: Option<Instant>,
    trips: u64,
    attempts: u64,
    total_failures: u64,
    total_successes: u64,
}

/// A per-operation failure-isolation switch.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Clock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(Instant::now))
    }

    /// Build with an explicit clock. Production code uses [`Self::new`];
    /// this exists so tests can step time instead of sleeping.
    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Clock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                last_trip: None,
                trips: 0,
                attempts: 0,
                total_failures: 0,
                total_successes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn now(&self) -> Instant {
        (self.clock)()
    }

    /// Whether a call may proceed. An open breaker past its reset timeout
    /// transitions to half-open here and admits the probe.
    pub fn is_allowed(&self) -> bool {
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.attempts += 1;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    tracing::debug!(breaker = %self.name, "half-opening for probe");
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "breaker closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Closed | BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = self.now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_successes = 0;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Self::trip(&self.name, &mut inner, now);
                }
            }
            BreakerState::HalfOpen => {
                // A failed probe re-opens immediately and restarts the timer.
                Self::trip(&self.name, &mut inner, now);
            }
            BreakerState::Open => {
                inner.opened_at = Some(now);
            }
        }
    }

    fn trip(name: &str, inner: &mut Inner, now: Instant) {
        tracing::warn!(breaker = %name, failures = inner.consecutive_failures, "breaker tripped open");
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.last_trip = Some(now);
        inner.trips += 1;
        inner.consecutive_failures = 0;
    }

    pub fn get_state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let now = self.now();
        let inner = self.inner.lock();
        BreakerStats {
            trips: inner.trips,
            attempts: inner.attempts,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            last_trip_age_ms: inner
                .last_trip
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Manual clock: tests advance it explicitly, no sleeping.
    fn manual_clock() -> (Arc<Mutex<Instant>>, Clock) {
        let current = Arc::new(Mutex::new(Instant::now()));
        let handle = Arc::clone(&current);
        (current, Arc::new(move || *handle.lock()))
    }

    fn advance(clock: &Arc<Mutex<Instant>>, by: Duration) {
        let mut now = clock.lock();
        *now += by;
    }

    fn breaker(reset_ms: u64) -> (Arc<Mutex<Instant>>, CircuitBreaker) {
        let (clock, now) = manual_clock();
        let breaker = CircuitBreaker::with_clock(
            "test",
            BreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                reset_timeout: Duration::from_millis(reset_ms),
            },
            now,
        );
        (clock, breaker)
    }

    #[test]
    fn test_trips_after_consecutive_failures() {
        let (_clock, b) = breaker(30_000);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.get_state(), BreakerState::Closed);
        assert!(b.is_allowed());
        b.record_failure();
        assert_eq!(b.get_state(), BreakerState::Open);
        assert!(!b.is_allowed());
        assert_eq!(b.stats().trips, 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let (_clock, b) = breaker(30_000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.get_state(), BreakerState::Closed);
    }

    #[test]
    fn test_open_blocks_for_the_full_reset_timeout() {
        let (clock, b) = breaker(30_000);
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(!b.is_allowed());

        // One tick short of the timeout: still refused.
        advance(&clock, Duration::from_millis(29_999));
        assert!(!b.is_allowed());
        assert_eq!(b.get_state(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_probe_then_close() {
        let (clock, b) = breaker(30_000);
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(!b.is_allowed());

        advance(&clock, Duration::from_millis(30_000));
        assert!(b.is_allowed());
        assert_eq!(b.get_state(), BreakerState::HalfOpen);

        b.record_success();
        assert_eq!(b.get_state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.get_state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_timer() {
        let (clock, b) = breaker(30_000);
        for _ in 0..3 {
            b.record_failure();
        }
        advance(&clock, Duration::from_millis(30_000));
        assert!(b.is_allowed());
        b.record_failure();
        assert_eq!(b.get_state(), BreakerState::Open);
        assert_eq!(b.stats().trips, 2);

        // The timer restarted at the failed probe, so a partial wait is
        // still refused and a full one half-opens again.
        advance(&clock, Duration::from_millis(15_000));
        assert!(!b.is_allowed());
        advance(&clock, Duration::from_millis(15_000));
        assert!(b.is_allowed());
        assert_eq!(b.get_state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_stats_accumulate() {
        let (clock, b) = breaker(30_000);
        assert!(b.is_allowed());
        b.record_success();
        b.record_failure();
        let stats = b.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 1);
        assert!(stats.last_trip_age_ms.is_none());

        b.record_failure();
        b.record_failure();
        advance(&clock, Duration::from_millis(250));
        assert_eq!(b.stats().last_trip_age_ms, Some(250));
    }
}
