use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::capability::Capability;

/// Liveness of a backend instance as the health monitor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Registered but not yet probed; still eligible for dispatch
    Unknown,
}

/// One running backend process implementing a capability.
///
/// Cloning is cheap: the inflight counter is shared, so a snapshot handed to
/// the load balancer observes (and the dispatcher updates) the same counter
/// as the registry's copy.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub capability: Capability,
    pub host: String,
    pub port: u16,
    pub registered_at: SystemTime,
    pub last_heartbeat: Instant,
    pub status: HealthStatus,
    /// Consecutive failed health probes
    pub probe_failures: u32,
    /// Requests currently being forwarded to this instance
    pub inflight: Arc<AtomicUsize>,
}

impl ServiceInstance {
    pub fn new(capability: Capability, host: impl Into<String>, port: u16) -> Self {
        Self {
            capability,
            host: host.into(),
            port,
            registered_at: SystemTime::now(),
            last_heartbeat: Instant::now(),
            status: HealthStatus::Unknown,
            probe_failures: 0,
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registry key: `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn heartbeat_age(&self) -> std::time::Duration {
        self.last_heartbeat.elapsed()
    }

    /// Eligible for dispatch: anything the health monitor has not marked
    /// unhealthy.
    pub fn is_available(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_new_instance_defaults() {
        let instance = ServiceInstance::new(Capability::Resume, "10.0.0.3", 7511);
        assert_eq!(instance.addr(), "10.0.0.3:7511");
        assert_eq!(instance.base_url(), "http://10.0.0.3:7511");
        assert_eq!(instance.status, HealthStatus::Unknown);
        assert_eq!(instance.probe_failures, 0);
        assert!(instance.is_available());
    }

    #[test]
    fn test_unhealthy_is_not_available() {
        let mut instance = ServiceInstance::new(Capability::Chat, "10.0.0.3", 7513);
        instance.status = HealthStatus::Unhealthy;
        assert!(!instance.is_available());
        instance.status = HealthStatus::Healthy;
        assert!(instance.is_available());
    }

    #[test]
    fn test_clones_share_inflight_counter() {
        let instance = ServiceInstance::new(Capability::Vector, "10.0.0.3", 7514);
        let snapshot = instance.clone();
        instance.inflight.fetch_add(3, Ordering::SeqCst);
        assert_eq!(snapshot.inflight.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }
}
