use crate::snapshot::{InstanceMetrics, MetricsSnapshot, RouteMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Instant, SystemTime};

/// Latency samples kept per route for percentile estimation.
const LATENCY_WINDOW: usize = 512;

/// Limits on the metrics maps.
///
/// Route and instance maps are bounded so an endless stream of distinct keys
/// (e.g. a misbehaving client probing capability names) cannot grow memory
/// without bound. Once a map is full, new keys are dropped; existing keys
/// keep recording.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub max_routes: usize,
    pub max_instances: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_routes: 256,
            max_instances: 128,
        }
    }
}

/// Per-route counters and a latency ring buffer.
struct RouteEntry {
    call_count: u64,
    success_count: u64,
    failure_count: u64,
    latency_sum_us: u64,
    latencies_us: Vec<u64>,
    next_slot: usize,
}

impl RouteEntry {
    fn new() -> Self {
        Self {
            call_count: 0,
            success_count: 0,
            failure_count: 0,
            latency_sum_us: 0,
            latencies_us: Vec::with_capacity(LATENCY_WINDOW),
            next_slot: 0,
        }
    }

    fn record(&mut self, latency_us: u64, success: bool) {
        self.call_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.latency_sum_us += latency_us;

        if self.latencies_us.len() < LATENCY_WINDOW {
            self.latencies_us.push(latency_us);
        } else {
            self.latencies_us[self.next_slot] = latency_us;
            self.next_slot = (self.next_slot + 1) % LATENCY_WINDOW;
        }
    }

    fn metrics(&self) -> RouteMetrics {
        let mut sorted = self.latencies_us.clone();
        sorted.sort_unstable();

        RouteMetrics {
            call_count: self.call_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            avg_latency_us: if self.call_count > 0 {
                self.latency_sum_us / self.call_count
            } else {
                0
            },
            p50_latency_us: percentile(&sorted, 0.50),
            p95_latency_us: percentile(&sorted, 0.95),
            p99_latency_us: percentile(&sorted, 0.99),
        }
    }
}

struct InstanceEntry {
    request_count: u64,
    last_request_ms: u64,
}

/// Percentile over a sorted sample window; 0 for an empty window.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Thread-safe metrics storage.
///
/// Totals are lock-free atomics; the route and instance maps take a short
/// write lock per record. Locking is per-registry, and the registry is only
/// touched after a dispatch completes, off the latency-critical path of the
/// forwarded call itself.
pub struct MetricsRegistry {
    config: MetricsConfig,
    started_at: Instant,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    routes: RwLock<HashMap<String, RouteEntry>>,
    instances: RwLock<HashMap<String, InstanceEntry>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            routes: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Records one completed dispatch on `route` (`capability/action`).
    pub fn record_dispatch(&self, route: &str, latency_us: u64, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let mut routes = match self.routes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !routes.contains_key(route) && routes.len() >= self.config.max_routes {
            return;
        }
        routes
            .entry(route.to_string())
            .or_insert_with(RouteEntry::new)
            .record(latency_us, success);
    }

    /// Records that a request was forwarded to `addr`.
    pub fn record_instance_request(&self, addr: &str) {
        let mut instances = match self.instances.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !instances.contains_key(addr) && instances.len() >= self.config.max_instances {
            return;
        }
        let entry = instances.entry(addr.to_string()).or_insert(InstanceEntry {
            request_count: 0,
            last_request_ms: 0,
        });
        entry.request_count += 1;
        entry.last_request_ms = epoch_millis();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let routes = match self.routes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let route_metrics = routes
            .iter()
            .map(|(name, entry)| (name.clone(), entry.metrics()))
            .collect();
        drop(routes);

        let instances = match self.instances.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let instance_metrics = instances
            .iter()
            .map(|(addr, entry)| {
                (
                    addr.clone(),
                    InstanceMetrics {
                        addr: addr.clone(),
                        request_count: entry.request_count,
                        last_request_ms: entry.last_request_ms,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
            routes: route_metrics,
            instances: instance_metrics,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let registry = MetricsRegistry::new();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.successful_requests, 0);
        assert_eq!(snapshot.failed_requests, 0);
        assert!(snapshot.routes.is_empty());
        assert!(snapshot.instances.is_empty());
    }

    #[test]
    fn test_record_dispatch_counts() {
        let registry = MetricsRegistry::new();
        registry.record_dispatch("resume/parse", 1200, true);
        registry.record_dispatch("resume/parse", 800, true);
        registry.record_dispatch("resume/parse", 5000, false);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);

        let route = snapshot.routes.get("resume/parse").unwrap();
        assert_eq!(route.call_count, 3);
        assert_eq!(route.success_count, 2);
        assert_eq!(route.failure_count, 1);
        assert!(route.avg_latency_us > 0);
    }

    #[test]
    fn test_percentiles_from_known_samples() {
        let registry = MetricsRegistry::new();
        for latency in 1..=100u64 {
            registry.record_dispatch("chat/chat", latency, true);
        }

        let snapshot = registry.snapshot();
        let route = snapshot.routes.get("chat/chat").unwrap();
        assert_eq!(route.p50_latency_us, 51);
        assert_eq!(route.p95_latency_us, 95);
        assert_eq!(route.p99_latency_us, 99);
    }

    #[test]
    fn test_percentile_helper_edge_cases() {
        assert_eq!(percentile(&[], 0.5), 0);
        assert_eq!(percentile(&[42], 0.5), 42);
        assert_eq!(percentile(&[42], 0.99), 42);
    }

    #[test]
    fn test_instance_distribution() {
        let registry = MetricsRegistry::new();
        registry.record_instance_request("127.0.0.1:7511");
        registry.record_instance_request("127.0.0.1:7511");
        registry.record_instance_request("127.0.0.1:7512");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.instances.len(), 2);
        assert_eq!(
            snapshot.instances.get("127.0.0.1:7511").unwrap().request_count,
            2
        );
        assert_eq!(
            snapshot.instances.get("127.0.0.1:7512").unwrap().request_count,
            1
        );
        assert!(snapshot.instances.get("127.0.0.1:7511").unwrap().last_request_ms > 0);
    }

    #[test]
    fn test_route_map_is_bounded() {
        let registry = MetricsRegistry::with_config(MetricsConfig {
            max_routes: 2,
            max_instances: 2,
        });
        registry.record_dispatch("a/x", 1, true);
        registry.record_dispatch("b/x", 1, true);
        registry.record_dispatch("c/x", 1, true);

        let snapshot = registry.snapshot();
        // The third route was dropped, but totals still count it
        assert_eq!(snapshot.routes.len(), 2);
        assert_eq!(snapshot.total_requests, 3);
    }

    #[test]
    fn test_latency_window_wraps() {
        let registry = MetricsRegistry::new();
        for i in 0..(LATENCY_WINDOW as u64 + 100) {
            registry.record_dispatch("vector/search", i, true);
        }
        let snapshot = registry.snapshot();
        let route = snapshot.routes.get("vector/search").unwrap();
        assert_eq!(route.call_count, LATENCY_WINDOW as u64 + 100);
        // Percentiles computed over the window, not the full history
        assert!(route.p99_latency_us >= 100);
    }
}
