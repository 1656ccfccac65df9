//! Per-source rate-limit and backoff state.
//!
//! Every source gets a small state record that the merge engine consults
//! before each call:
//! - `disabled_until` (a date): set when a daily-quota source answers
//!   rate-limited with no retry time. The source stays off through the end of
//!   the current calendar day.
//! - `blocked_until` (a timestamp): set from an explicit retry-after, or when
//!   the circuit breaker trips after consecutive failures.
//! - a request budget: minimum spacing between calls to one source.
//!
//! State lives in memory only. Quotas reset daily, so nothing needs to survive a restart.

use crate::clock::Clock;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether a source may be called right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceGate {
    Open,
    /// Daily quota exhausted; callable again on this date.
    DisabledUntil(NaiveDate),
    /// Explicit retry window or tripped breaker.
    BlockedUntil(DateTime<Utc>),
}

impl SourceGate {
    pub fn is_open(&self) -> bool {
        matches!(self, SourceGate::Open)
    }
}

#[derive(Debug, Default)]
struct SourceState {
    disabled_until: Option<NaiveDate>,
    blocked_until: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_request: Option<DateTime<Utc>>,
}

/// Circuit-breaker settings: trip after `failure_threshold` consecutive
/// failures and refuse calls for `cooldown`.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    /// 30-minute cooldown, trips after 3 consecutive failures.
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30 * 60),
        }
    }
}

/// Rate-limit state for all sources, owned by the merge engine.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, SourceState>>,
    min_spacing: HashMap<String, Duration>,
    breaker: BreakerSettings,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, breaker: BreakerSettings) -> Self {
        Self {
            clock,
            states: Mutex::new(HashMap::new()),
            min_spacing: HashMap::new(),
            breaker,
        }
    }

    /// Limit `source` to `requests_per_minute` calls. Zero means unlimited.
    pub fn with_budget(mut self, source: &str, requests_per_minute: u32) -> Self {
        if requests_per_minute > 0 {
            let spacing = Duration::from_secs_f64(60.0 / requests_per_minute as f64);
            self.min_spacing.insert(source.to_string(), spacing);
        }
        self
    }

    /// Current gate for `source`. Expired windows are cleared on the way through.
    pub fn gate(&self, source: &str) -> SourceGate {
        let today = self.clock.today();
        let now = self.clock.now();
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(source) else {
            return SourceGate::Open;
        };

        if let Some(until) = state.disabled_until {
            if until > today {
                return SourceGate::DisabledUntil(until);
            }
            debug!(source, "daily disable expired");
            state.disabled_until = None;
        }
        if let Some(until) = state.blocked_until {
            if until > now {
                return SourceGate::BlockedUntil(until);
            }
            debug!(source, "retry window expired");
            state.blocked_until = None;
            state.consecutive_failures = 0;
        }
        SourceGate::Open
    }

    pub fn is_allowed(&self, source: &str) -> bool {
        self.gate(source).is_open()
    }

    /// Disable `source` through the end of the current calendar day.
    pub fn disable_for_today(&self, source: &str) {
        let until = self.clock.today() + ChronoDuration::days(1);
        warn!(source, %until, "daily quota exhausted, source disabled");
        self.states.lock().entry(source.to_string()).or_default().disabled_until = Some(until);
    }

    /// Refuse calls to `source` for `wait` from now.
    pub fn block_for(&self, source: &str, wait: Duration) {
        let until = self.clock.now() + to_chrono(wait);
        info!(source, %until, "source blocked");
        let mut states = self.states.lock();
        let state = states.entry(source.to_string()).or_default();
        state.blocked_until = Some(state.blocked_until.map_or(until, |prev| prev.max(until)));
    }

    /// Record a successful call. Resets the failure counter.
    pub fn record_success(&self, source: &str) {
        if let Some(state) = self.states.lock().get_mut(source) {
            state.consecutive_failures = 0;
        }
    }

    /// Record a failed call. Trips the breaker once the threshold is reached.
    pub fn record_failure(&self, source: &str) {
        let tripped = {
            let mut states = self.states.lock();
            let state = states.entry(source.to_string()).or_default();
            state.consecutive_failures += 1;
            state.consecutive_failures >= self.breaker.failure_threshold
        };
        if tripped {
            warn!(source, threshold = self.breaker.failure_threshold, "circuit breaker tripped");
            self.block_for(source, self.breaker.cooldown);
        }
    }

    /// Wait until `source`'s request budget allows another call, then stamp it.
    pub fn await_budget(&self, source: &str) {
        let Some(spacing) = self.min_spacing.get(source).copied() else {
            return;
        };
        let wait = {
            let states = self.states.lock();
            states
                .get(source)
                .and_then(|s| s.last_request)
                .map(|last| last + to_chrono(spacing) - self.clock.now())
                .and_then(|remaining| remaining.to_std().ok())
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            debug!(source, wait_ms = wait.as_millis() as u64, "pacing request");
            self.clock.sleep(wait);
        }
        self.states.lock().entry(source.to_string()).or_default().last_request =
            Some(self.clock.now());
    }
}

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::days(365))
}
