//! Admission control for the gateway.
//!
//! Fixed-window counting per `(caller, capability)` pair: each key gets a
//! window of `window` duration holding at most `max_requests` admissions;
//! a breach rejects the request with a retry hint, it never queues.
//!
//! The counter increment and the limit check happen under the same write
//! lock, so concurrent bursts for one key cannot overshoot the limit.
//! Idle buckets are swept periodically to bound memory.
//!
//! Rate limiting is optional: the default configuration admits everything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Rate limiter configuration.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum admissions per window per key
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
    /// Interval between stale-bucket sweeps
    pub cleanup_interval: Duration,
    /// How long an idle bucket is kept before sweeping
    pub entry_ttl: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300),
        }
    }

    /// `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// `n` requests per minute.
    pub fn per_minute(n: u32) -> Self {
        Self::new(n, Duration::from_secs(60))
    }
}

impl Default for RateLimitConfig {
    /// Rate limiting disabled.
    fn default() -> Self {
        Self {
            max_requests: u32::MAX,
            window: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300),
        }
    }
}

/// Result of an admission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Admitted; `remaining` admissions left in the current window
    Allowed { remaining: u32 },
    /// Rejected; the window has `retry_after` left before it resets
    Limited { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed { .. } => None,
            Self::Limited { retry_after } => Some(*retry_after),
        }
    }
}

/// One fixed window for a single `(caller, capability)` key.
#[derive(Debug)]
struct WindowBucket {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

impl WindowBucket {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// Rolls the window if it has elapsed, then tries to take one slot.
    fn try_admit(&mut self, config: &RateLimitConfig, now: Instant) -> RateLimitResult {
        self.last_seen = now;

        if now.duration_since(self.window_start) >= config.window {
            self.count = 0;
            self.window_start = now;
        }

        if self.count < config.max_requests {
            self.count += 1;
            RateLimitResult::Allowed {
                remaining: config.max_requests - self.count,
            }
        } else {
            let elapsed = now.duration_since(self.window_start);
            RateLimitResult::Limited {
                retry_after: config.window.saturating_sub(elapsed),
            }
        }
    }
}

/// Fixed-window rate limiter keyed by `(caller, capability)`.
///
/// Cloning is cheap and shares the underlying buckets.
#[derive(Clone)]
pub struct RateLimiter {
    pub config: RateLimitConfig,
    buckets: Arc<RwLock<HashMap<(String, String), WindowBucket>>>,
    last_cleanup: Arc<RwLock<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
            last_cleanup: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.max_requests != u32::MAX
    }

    /// Checks admission for one request from `caller` to `capability`.
    ///
    /// The whole check-and-increment runs under the bucket map's write lock,
    /// which is what makes the limit race-free for concurrent requests on
    /// the same key.
    pub async fn check(&self, caller: &str, capability: &str) -> RateLimitResult {
        if !self.is_enabled() {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
            };
        }

        let now = Instant::now();

        {
            let mut last_cleanup = self.last_cleanup.write().await;
            if now.duration_since(*last_cleanup) >= self.config.cleanup_interval {
                self.sweep_stale(now).await;
                *last_cleanup = now;
            }
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry((caller.to_string(), capability.to_string()))
            .or_insert_with(|| WindowBucket::new(now));

        bucket.try_admit(&self.config, now)
    }

    async fn sweep_stale(&self, now: Instant) {
        let mut buckets = self.buckets.write().await;
        buckets.retain(|_, bucket| now.duration_since(bucket.last_seen) < self.config.entry_ttl);
    }

    /// Number of tracked keys; for tests and monitoring.
    pub async fn tracked_key_count(&self) -> usize {
        self.buckets.read().await.len()
    }
}
