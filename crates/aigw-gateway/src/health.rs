//! Background health monitoring.
//!
//! A single spawned task drives two maintenance duties on each tick, both
//! independent of request handling:
//!
//! 1. **Heartbeat eviction**: instances whose heartbeat age exceeds the TTL
//!    are removed from the registry (and their circuit records dropped), so
//!    stale instances never reach the load balancer.
//! 2. **Liveness probes**: every remaining instance's `GET /health` is hit
//!    concurrently with a bounded timeout; after `failure_threshold`
//!    consecutive probe failures an instance is marked unhealthy and leaves
//!    the discovery set until a probe succeeds again.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use aigw_common::HttpClient;

use crate::breaker::CircuitBreaker;
use crate::instance::ServiceInstance;
use crate::registry::{ProbeTransition, ServiceRegistry};

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Time between monitor ticks
    pub interval: Duration,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Consecutive probe failures before an instance is marked unhealthy
    pub failure_threshold: u32,
    /// Heartbeat age beyond which an instance is evicted
    pub instance_ttl: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(2000),
            failure_threshold: 3,
            instance_ttl: Duration::from_secs(60),
        }
    }
}

/// Periodic health monitor for registered instances.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    breaker: Arc<CircuitBreaker>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breaker: Arc<CircuitBreaker>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            registry,
            breaker,
            config,
        }
    }

    /// Starts the monitor task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// One maintenance pass: evict, then probe.
    pub async fn tick(&self) {
        let evicted = self.registry.evict_expired(self.config.instance_ttl).await;
        for (_, addr) in &evicted {
            self.breaker.remove(addr);
        }

        let instances = self.registry.all_instances().await;
        if instances.is_empty() {
            return;
        }

        let probes: Vec<_> = instances
            .into_iter()
            .map(|instance| {
                let timeout = self.config.timeout;
                async move {
                    let ok = Self::probe_instance(&instance, timeout).await;
                    (instance, ok)
                }
            })
            .collect();

        let results = join_all(probes).await;

        for (instance, probe_ok) in results {
            let transition = self
                .registry
                .record_probe(
                    instance.capability,
                    &instance.addr(),
                    probe_ok,
                    self.config.failure_threshold,
                )
                .await;

            match transition {
                ProbeTransition::BecameUnhealthy => warn!(
                    "Instance {} of '{}' marked unhealthy after {} failed probe(s)",
                    instance.addr(),
                    instance.capability,
                    self.config.failure_threshold
                ),
                ProbeTransition::BecameHealthy => info!(
                    "Instance {} of '{}' is healthy",
                    instance.addr(),
                    instance.capability
                ),
                ProbeTransition::Unchanged => {}
            }
        }
    }

    /// Probes one instance's health endpoint within `timeout`.
    pub async fn probe_instance(instance: &ServiceInstance, timeout: Duration) -> bool {
        let url = format!("{}/health", instance.base_url());
        matches!(
            HttpClient::get_json(&url, timeout).await,
            Ok((status, _)) if status == 200
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    #[test]
    fn test_config_defaults() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.instance_ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_tick_marks_unreachable_instances_unhealthy() {
        let registry = Arc::new(ServiceRegistry::new());
        let breaker = Arc::new(CircuitBreaker::default());
        // Port 1 is unbound; probes fail fast
        registry.register(Capability::Chat, "127.0.0.1", 1).await;

        let monitor = HealthMonitor::new(
            registry.clone(),
            breaker,
            HealthCheckConfig {
                failure_threshold: 2,
                timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );

        monitor.tick().await;
        // One failure: still dispatchable
        assert_eq!(registry.discover(Capability::Chat).await.len(), 1);

        monitor.tick().await;
        // Threshold reached: out of the discovery set
        assert!(registry.discover(Capability::Chat).await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_evicts_stale_heartbeats_and_circuit_records() {
        let registry = Arc::new(ServiceRegistry::new());
        let breaker = Arc::new(CircuitBreaker::default());
        registry.register(Capability::Vector, "10.0.0.9", 7514).await;
        breaker.record_outcome("10.0.0.9:7514", false);

        let monitor = HealthMonitor::new(
            registry.clone(),
            breaker.clone(),
            HealthCheckConfig {
                instance_ttl: Duration::from_millis(10),
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.tick().await;

        assert!(registry.instances_of(Capability::Vector).await.is_empty());
        assert!(breaker.state("10.0.0.9:7514").is_none());
    }

    #[tokio::test]
    async fn test_probe_against_live_endpoint() {
        use axum::routing::get;

        let app = axum::Router::new().route("/health", get(|| async { "{\"status\":\"healthy\"}" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let instance = ServiceInstance::new(Capability::Chat, "127.0.0.1", addr.port());
        assert!(HealthMonitor::probe_instance(&instance, Duration::from_secs(2)).await);
    }
}
