//! Per-instance circuit breaking.
//!
//! Each backend instance the gateway has ever dispatched to gets its own
//! fault-memory record. A repeatedly failing instance is cut off for a
//! cooldown period so doomed network calls are rejected before they are
//! attempted, and the instance gets room to recover.
//!
//! ## States
//!
//! - **Closed**: requests pass; consecutive failures are counted, a success
//!   resets the counter (isolated failures are forgiven, not accumulated)
//! - **Open**: requests fail fast until `open_until` elapses
//! - **Half-open**: exactly one trial request is admitted; success closes
//!   the circuit, failure re-opens it with a longer cooldown
//!
//! `check` runs before dispatch and `record_outcome` after the forwarded
//! call completes. The split matters: a request rejected by `check` never
//! counts as a backend failure.
//!
//! The record table takes a short outer lock only to look up or create an
//! entry; state transitions lock the single instance's record, so traffic to
//! one instance never serializes behind another's bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown after the first opening
    pub base_cooldown: Duration,
    /// Cap on the backed-off cooldown
    pub max_cooldown: Duration,
    /// Cooldown multiplier per consecutive opening
    pub backoff_multiplier: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl BreakerConfig {
    /// Cooldown for the `opened_count`-th consecutive opening (1-based),
    /// growing exponentially up to `max_cooldown`.
    pub fn calculate_cooldown(&self, opened_count: u32) -> Duration {
        let base_ms = self.base_cooldown.as_millis() as f64;
        let multiplier = self
            .backoff_multiplier
            .powi(opened_count.saturating_sub(1) as i32);
        let cooldown_ms = (base_ms * multiplier) as u64;
        let max_ms = self.max_cooldown.as_millis() as u64;
        Duration::from_millis(cooldown_ms.min(max_ms))
    }
}

/// Serializable view of one instance's circuit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds until an open circuit admits a trial; 0 otherwise
    pub cooldown_remaining_ms: u64,
}

/// Mutable per-instance record.
#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    /// Consecutive openings, drives exponential backoff
    opened_count: u32,
    last_failure: Option<Instant>,
    open_until: Option<Instant>,
    /// The half-open trial slot has been claimed
    trial_inflight: bool,
    /// When the claimed trial went out
    trial_started: Option<Instant>,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_count: 0,
            last_failure: None,
            open_until: None,
            trial_inflight: false,
            trial_started: None,
        }
    }

    fn open(&mut self, config: &BreakerConfig, now: Instant) {
        self.opened_count += 1;
        self.state = CircuitState::Open;
        self.open_until = Some(now + config.calculate_cooldown(self.opened_count));
        self.trial_inflight = false;
        self.trial_started = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_count = 0;
        self.open_until = None;
        self.trial_inflight = false;
        self.trial_started = None;
    }
}

/// Registry of per-instance circuit records.
pub struct CircuitBreaker {
    config: BreakerConfig,
    entries: RwLock<HashMap<String, Arc<Mutex<CircuitEntry>>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a dispatch to `addr` may be attempted right now.
    ///
    /// Read-only on state except for the timer-driven open → half-open
    /// transition; in half-open, the single trial slot is claimed by the
    /// first caller and everyone else is rejected until the trial's outcome
    /// is recorded.
    pub fn check(&self, addr: &str) -> bool {
        let entry = self.entry(addr);
        let mut entry = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = entry.open_until.map(|until| now >= until).unwrap_or(true);
                if elapsed {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_inflight = true;
                    entry.trial_started = Some(now);
                    info!("Circuit for {} half-open, admitting one trial", addr);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // A trial whose outcome never arrives (the caller was
                // cancelled mid-flight) must not pin the circuit half-open
                // forever; reclaim the slot once the cooldown cap has passed.
                let trial_expired = entry
                    .trial_started
                    .map(|started| now.duration_since(started) > self.config.max_cooldown)
                    .unwrap_or(true);
                if entry.trial_inflight && !trial_expired {
                    false
                } else {
                    entry.trial_inflight = true;
                    entry.trial_started = Some(now);
                    true
                }
            }
        }
    }

    /// Records the outcome of a forwarded call to `addr`.
    ///
    /// Only called for requests that passed `check` and actually went out on
    /// the wire, so rejected requests never skew the failure count.
    pub fn record_outcome(&self, addr: &str, success: bool) {
        let entry = self.entry(addr);
        let mut entry = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        match entry.state {
            CircuitState::Closed => {
                if success {
                    entry.consecutive_failures = 0;
                } else {
                    entry.consecutive_failures += 1;
                    entry.last_failure = Some(now);
                    if entry.consecutive_failures >= self.config.failure_threshold {
                        entry.open(&self.config, now);
                        warn!(
                            "Circuit for {} opened after {} consecutive failures",
                            addr, entry.consecutive_failures
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    entry.close();
                    info!("Circuit for {} closed after successful trial", addr);
                } else {
                    entry.last_failure = Some(now);
                    entry.open(&self.config, now);
                    warn!("Circuit for {} re-opened after failed trial", addr);
                }
            }
            // A late outcome can arrive after the timer already moved the
            // state on; it carries no information worth acting on.
            CircuitState::Open => {}
        }
    }

    /// Drops the record for an instance that left the registry.
    pub fn remove(&self, addr: &str) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(addr);
    }

    pub fn state(&self, addr: &str) -> Option<CircuitState> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(addr).map(|entry| {
            entry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .state
        })
    }

    /// Snapshot of one instance's record, if it exists.
    pub fn snapshot(&self, addr: &str) -> Option<CircuitSnapshot> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(addr).map(|entry| {
            let entry = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let now = Instant::now();
            CircuitSnapshot {
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                cooldown_remaining_ms: entry
                    .open_until
                    .and_then(|until| until.checked_duration_since(now))
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            }
        })
    }

    fn entry(&self, addr: &str) -> Arc<Mutex<CircuitEntry>> {
        {
            let entries = match self.entries.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(entry) = entries.get(addr) {
                return Arc::clone(entry);
            }
        }

        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            entries
                .entry(addr.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitEntry::new()))),
        )
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
