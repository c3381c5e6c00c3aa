//! In-memory service registry.
//!
//! Holds the mapping from each capability to its live backend instances.
//! All operations are local and synchronous apart from taking the table
//! lock; discovery never blocks on I/O, so the dispatch hot path stays
//! fast.
//!
//! Instances are keyed by `(capability, host:port)`. Registration is an
//! idempotent upsert, and instances whose heartbeat goes stale are evicted
//! by the health monitor's background loop, independently of request
//! handling.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::capability::Capability;
use crate::instance::{HealthStatus, ServiceInstance};

/// Outcome of applying a health probe result to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTransition {
    /// Status unchanged
    Unchanged,
    /// Instance crossed the failure threshold and is now unhealthy
    BecameUnhealthy,
    /// Previously unhealthy (or unknown) instance recovered
    BecameHealthy,
}

/// Thread-safe registry of backend instances per capability.
pub struct ServiceRegistry {
    inner: RwLock<HashMap<Capability, HashMap<String, ServiceInstance>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an instance; idempotent upsert on `(capability, host, port)`.
    ///
    /// Re-registering an existing instance refreshes its heartbeat and keeps
    /// its health state; it never creates a duplicate and never fails.
    pub async fn register(&self, capability: Capability, host: &str, port: u16) {
        let mut inner = self.inner.write().await;
        let instances = inner.entry(capability).or_default();
        let addr = format!("{}:{}", host, port);

        match instances.get_mut(&addr) {
            Some(existing) => {
                existing.last_heartbeat = Instant::now();
                debug!("Re-registration refreshed heartbeat for {} ({})", addr, capability);
            }
            None => {
                instances.insert(addr.clone(), ServiceInstance::new(capability, host, port));
                info!("Registered instance {} for capability '{}'", addr, capability);
            }
        }
    }

    /// Removes one instance. No-op (returns false) if absent.
    pub async fn deregister(&self, capability: Capability, addr: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner
            .get_mut(&capability)
            .map(|instances| instances.remove(addr).is_some())
            .unwrap_or(false);
        if removed {
            info!("Deregistered instance {} from capability '{}'", addr, capability);
        }
        removed
    }

    /// Removes every instance of a capability; returns how many were removed.
    pub async fn deregister_all(&self, capability: Capability) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.remove(&capability).map(|m| m.len()).unwrap_or(0);
        if count > 0 {
            info!("Deregistered {} instance(s) of capability '{}'", count, capability);
        }
        count
    }

    /// Refreshes an instance's heartbeat. Returns false if unknown.
    pub async fn heartbeat(&self, capability: Capability, addr: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(&capability).and_then(|m| m.get_mut(addr)) {
            Some(instance) => {
                instance.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Returns the dispatchable (healthy-or-unknown) instances of a
    /// capability, sorted by address for a stable rotation order.
    ///
    /// An empty vec (unknown capability, or zero live instances) is a
    /// normal outcome, not an error.
    pub async fn discover(&self, capability: Capability) -> Vec<ServiceInstance> {
        let inner = self.inner.read().await;
        let mut instances: Vec<ServiceInstance> = inner
            .get(&capability)
            .map(|m| m.values().filter(|i| i.is_available()).cloned().collect())
            .unwrap_or_default();
        instances.sort_by(|a, b| a.addr().cmp(&b.addr()));
        instances
    }

    /// Every registered instance regardless of health; for the monitor and
    /// the listing endpoints.
    pub async fn all_instances(&self) -> Vec<ServiceInstance> {
        let inner = self.inner.read().await;
        let mut instances: Vec<ServiceInstance> = inner
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();
        instances.sort_by(|a, b| a.addr().cmp(&b.addr()));
        instances
    }

    /// Instances of one capability regardless of health.
    pub async fn instances_of(&self, capability: Capability) -> Vec<ServiceInstance> {
        let inner = self.inner.read().await;
        let mut instances: Vec<ServiceInstance> = inner
            .get(&capability)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        instances.sort_by(|a, b| a.addr().cmp(&b.addr()));
        instances
    }

    /// `(total, healthy, unknown)` instance counts for a capability.
    pub async fn counts(&self, capability: Capability) -> (usize, usize, usize) {
        let inner = self.inner.read().await;
        match inner.get(&capability) {
            Some(instances) => {
                let total = instances.len();
                let healthy = instances
                    .values()
                    .filter(|i| i.status == HealthStatus::Healthy)
                    .count();
                let unknown = instances
                    .values()
                    .filter(|i| i.status == HealthStatus::Unknown)
                    .count();
                (total, healthy, unknown)
            }
            None => (0, 0, 0),
        }
    }

    /// Evicts instances whose heartbeat age exceeds `ttl`.
    ///
    /// Returns the evicted `(capability, addr)` pairs so the caller can
    /// clean up dependent state (circuit-breaker records).
    pub async fn evict_expired(&self, ttl: Duration) -> Vec<(Capability, String)> {
        let mut inner = self.inner.write().await;
        let mut evicted = Vec::new();

        for (capability, instances) in inner.iter_mut() {
            instances.retain(|addr, instance| {
                if instance.heartbeat_age() > ttl {
                    evicted.push((*capability, addr.clone()));
                    false
                } else {
                    true
                }
            });
        }

        for (capability, addr) in &evicted {
            info!(
                "Evicted instance {} of capability '{}': heartbeat older than {:?}",
                addr, capability, ttl
            );
        }
        evicted
    }

    /// Applies one health probe result, marking the instance unhealthy after
    /// `failure_threshold` consecutive failures and restoring it on success.
    pub async fn record_probe(
        &self,
        capability: Capability,
        addr: &str,
        probe_ok: bool,
        failure_threshold: u32,
    ) -> ProbeTransition {
        let mut inner = self.inner.write().await;
        let Some(instance) = inner.get_mut(&capability).and_then(|m| m.get_mut(addr)) else {
            return ProbeTransition::Unchanged;
        };

        if probe_ok {
            instance.probe_failures = 0;
            if instance.status != HealthStatus::Healthy {
                instance.status = HealthStatus::Healthy;
                return ProbeTransition::BecameHealthy;
            }
            ProbeTransition::Unchanged
        } else {
            instance.probe_failures += 1;
            if instance.probe_failures >= failure_threshold
                && instance.status != HealthStatus::Unhealthy
            {
                instance.status = HealthStatus::Unhealthy;
                return ProbeTransition::BecameUnhealthy;
            }
            ProbeTransition::Unchanged
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
