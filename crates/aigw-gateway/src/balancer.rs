//! Instance selection.
//!
//! Given a capability's discovered instance set, picks exactly one instance
//! per request. Round-robin is the default: each capability keeps its own
//! rotation cursor that persists across calls, so N consecutive selections
//! over N instances visit each exactly once.
//!
//! An empty instance list is a caller bug (the dispatcher short-circuits on
//! empty discovery before selection), so the balancer fails loudly instead
//! of returning a silent fallback.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use tracing::error;

use aigw_common::protocol::{GatewayError, Result};

use crate::capability::Capability;
use crate::instance::ServiceInstance;

/// Selection policy, chosen by configuration at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancePolicy {
    #[default]
    RoundRobin,
    LeastConnections,
}

impl FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(BalancePolicy::RoundRobin),
            "least_connections" => Ok(BalancePolicy::LeastConnections),
            other => Err(format!(
                "unknown balance policy '{}', expected 'round_robin' or 'least_connections'",
                other
            )),
        }
    }
}

/// Per-capability instance selector.
pub struct LoadBalancer {
    policy: BalancePolicy,
    /// Rotation cursors, one per capability; write lock only on first use
    cursors: RwLock<HashMap<Capability, AtomicUsize>>,
}

impl LoadBalancer {
    pub fn new(policy: BalancePolicy) -> Self {
        Self {
            policy,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// Picks one instance from a non-empty, stably-ordered list.
    pub fn select(
        &self,
        capability: Capability,
        instances: &[ServiceInstance],
    ) -> Result<ServiceInstance> {
        if instances.is_empty() {
            error!(
                "Load balancer invoked with an empty instance set for capability '{}'",
                capability
            );
            return Err(GatewayError::Internal(format!(
                "load balancer given an empty instance set for capability '{}'",
                capability
            )));
        }

        let instance = match self.policy {
            BalancePolicy::RoundRobin => {
                let position = self.advance_cursor(capability);
                &instances[position % instances.len()]
            }
            BalancePolicy::LeastConnections => instances
                .iter()
                .min_by_key(|i| i.inflight.load(Ordering::Relaxed))
                .expect("non-empty instance list"),
        };

        Ok(instance.clone())
    }

    fn advance_cursor(&self, capability: Capability) -> usize {
        {
            let cursors = match self.cursors.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(cursor) = cursors.get(&capability) {
                return cursor.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut cursors = match self.cursors.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cursors
            .entry(capability)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_instances(capability: Capability, count: usize) -> Vec<ServiceInstance> {
        (0..count)
            .map(|i| ServiceInstance::new(capability, format!("10.0.0.{}", i + 1), 7500))
            .collect()
    }

    #[test]
    fn test_round_robin_visits_each_instance_once_per_cycle() {
        let balancer = LoadBalancer::new(BalancePolicy::RoundRobin);
        let instances = make_instances(Capability::Resume, 3);

        let first_cycle: Vec<String> = (0..3)
            .map(|_| {
                balancer
                    .select(Capability::Resume, &instances)
                    .unwrap()
                    .addr()
            })
            .collect();

        assert_eq!(
            first_cycle,
            vec!["10.0.0.1:7500", "10.0.0.2:7500", "10.0.0.3:7500"]
        );

        // Second cycle repeats the same stable order
        let second_cycle: Vec<String> = (0..3)
            .map(|_| {
                balancer
                    .select(Capability::Resume, &instances)
                    .unwrap()
                    .addr()
            })
            .collect();
        assert_eq!(first_cycle, second_cycle);
    }

    #[test]
    fn test_cursor_persists_across_calls() {
        let balancer = LoadBalancer::new(BalancePolicy::RoundRobin);
        let instances = make_instances(Capability::Chat, 2);

        let a = balancer.select(Capability::Chat, &instances).unwrap().addr();
        let b = balancer.select(Capability::Chat, &instances).unwrap().addr();
        let c = balancer.select(Capability::Chat, &instances).unwrap().addr();

        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_cursors_are_per_capability() {
        let balancer = LoadBalancer::new(BalancePolicy::RoundRobin);
        let resume = make_instances(Capability::Resume, 2);
        let chat = make_instances(Capability::Chat, 2);

        // Advancing resume's cursor must not skew chat's rotation
        balancer.select(Capability::Resume, &resume).unwrap();
        balancer.select(Capability::Resume, &resume).unwrap();
        balancer.select(Capability::Resume, &resume).unwrap();

        let first = balancer.select(Capability::Chat, &chat).unwrap().addr();
        assert_eq!(first, "10.0.0.1:7500");
    }

    #[test]
    fn test_empty_instance_set_fails_loudly() {
        let balancer = LoadBalancer::new(BalancePolicy::RoundRobin);
        let err = balancer.select(Capability::Vector, &[]).unwrap_err();
        assert_eq!(err.class(), aigw_common::ErrorClass::Internal);
    }

    #[test]
    fn test_least_connections_picks_least_loaded() {
        let balancer = LoadBalancer::new(BalancePolicy::LeastConnections);
        let instances = make_instances(Capability::Matching, 3);
        instances[0].inflight.store(5, Ordering::SeqCst);
        instances[1].inflight.store(1, Ordering::SeqCst);
        instances[2].inflight.store(3, Ordering::SeqCst);

        let selected = balancer.select(Capability::Matching, &instances).unwrap();
        assert_eq!(selected.addr(), "10.0.0.2:7500");
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "round_robin".parse::<BalancePolicy>().unwrap(),
            BalancePolicy::RoundRobin
        );
        assert_eq!(
            "least_connections".parse::<BalancePolicy>().unwrap(),
            BalancePolicy::LeastConnections
        );
        assert!("fastest".parse::<BalancePolicy>().is_err());
    }
}
