//! Request dispatch.
//!
//! The dispatcher owns the full pipeline for a single request:
//!
//! 1. validate capability, action and payload
//! 2. admission check against the rate limiter
//! 3. discover instances for the capability
//! 4. select one via the load balancer
//! 5. circuit check, reselecting a different instance if the chosen one is
//!    open (bounded by the discovery set size)
//! 6. forward over HTTP with the gateway context attached and a bounded
//!    timeout
//! 7. record the outcome on the circuit breaker (timeouts, transport errors
//!    and 5xx count as failures; 2xx/4xx are backend-reachable outcomes)
//! 8. record metrics and envelope the response
//!
//! Batch dispatch replays this pipeline once per sub-request over a bounded
//! worker pool, racing a shared absolute deadline, and returns outcomes in
//! submission order.
//!
//! All collaborators are injected at construction so tests can assemble
//! isolated gateways.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use aigw_common::protocol::{
    generate_request_id, BatchItem, BatchOutcome, GatewayContext, GatewayError, GatewayResponse,
    RequestId, Result, ServiceRegistration,
};
use aigw_common::rate_limit::{RateLimitResult, RateLimiter};
use aigw_common::HttpClient;
use aigw_metrics::{GatewayMetricsCollector, MetricsSnapshot};

use crate::balancer::LoadBalancer;
use crate::breaker::{CircuitBreaker, CircuitSnapshot};
use crate::capability::{Capability, CapabilityTable};
use crate::health::HealthMonitor;
use crate::instance::{HealthStatus, ServiceInstance};
use crate::registry::ServiceRegistry;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Identity stamped into every forwarded gateway context
    pub gateway_name: String,
    /// Timeout for one forwarded backend call
    pub forward_timeout: Duration,
    /// Timeout for live probes on the per-service health endpoint
    pub probe_timeout: Duration,
    /// Concurrent sub-requests per batch
    pub batch_concurrency: usize,
    /// Overall deadline for a batch
    pub batch_deadline: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            gateway_name: "ai-gateway".to_string(),
            forward_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            batch_concurrency: 8,
            batch_deadline: Duration::from_secs(60),
        }
    }
}

/// One validated inbound unit of work.
#[derive(Debug)]
struct GatewayRequest {
    request_id: RequestId,
    capability: Capability,
    action: String,
    caller: String,
    payload: Value,
    received_at: Instant,
}

/// A forwarded backend reply: upstream HTTP status plus parsed body.
struct ForwardReply {
    status: u16,
    body: Value,
}

/// Result of one dispatch: the envelope plus the HTTP status the gateway
/// should respond with (the upstream status for forwarded calls, the error
/// classification's status otherwise).
#[derive(Debug)]
pub struct Dispatched {
    pub http_status: u16,
    pub envelope: GatewayResponse,
}

/// Decrements an instance's inflight counter when the forward completes.
struct InflightGuard {
    counter: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Aggregate view of one capability for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub capability: Capability,
    pub service_name: &'static str,
    pub actions: Vec<&'static str>,
    pub instances: usize,
    pub healthy_instances: usize,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServicesOverview {
    pub services: Vec<ServiceSummary>,
    pub total: usize,
}

/// Live health breakdown for one capability's instances.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealthCheck {
    pub addr: String,
    pub reachable: bool,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthReport {
    pub service: &'static str,
    pub capability: Capability,
    pub status: &'static str,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub checks: Vec<InstanceHealthCheck>,
}

/// The gateway's orchestrator.
pub struct Dispatcher {
    table: CapabilityTable,
    registry: Arc<ServiceRegistry>,
    balancer: LoadBalancer,
    breaker: Arc<CircuitBreaker>,
    limiter: RateLimiter,
    metrics: Arc<GatewayMetricsCollector>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breaker: Arc<CircuitBreaker>,
        balancer: LoadBalancer,
        limiter: RateLimiter,
        metrics: Arc<GatewayMetricsCollector>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            table: CapabilityTable::new(),
            registry,
            balancer,
            breaker,
            limiter,
            metrics,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs the full pipeline for one request and envelopes the outcome.
    ///
    /// Never panics and never returns a raw error: every failure mode
    /// becomes a classified envelope.
    pub async fn dispatch(
        &self,
        capability: &str,
        action: &str,
        payload: Value,
        caller: &str,
    ) -> Dispatched {
        let start = Instant::now();
        let request_id = generate_request_id();

        let outcome = self
            .dispatch_inner(request_id, start, capability, action, payload, caller)
            .await;

        match outcome {
            Ok(reply) => {
                self.metrics.record_dispatch(capability, action, start, true);
                Dispatched {
                    http_status: reply.status,
                    envelope: GatewayResponse::success(request_id, reply.body),
                }
            }
            Err(err) => {
                self.metrics.record_dispatch(capability, action, start, false);
                warn!(
                    "Dispatch {}/{} from {} failed ({:?}): {}",
                    capability,
                    action,
                    caller,
                    err.class(),
                    err
                );
                Dispatched {
                    http_status: err.http_status().as_u16(),
                    envelope: GatewayResponse::failure(request_id, &err),
                }
            }
        }
    }

    async fn dispatch_inner(
        &self,
        request_id: RequestId,
        received_at: Instant,
        capability: &str,
        action: &str,
        payload: Value,
        caller: &str,
    ) -> Result<ForwardReply> {
        // 1. Validation: closed capability set, declared action, usable payload
        let cap: Capability = capability
            .parse()
            .map_err(|_| GatewayError::UnknownCapability(capability.to_string()))?;
        if !self.table.supports_action(cap, action) {
            return Err(GatewayError::UnknownAction {
                capability: capability.to_string(),
                action: action.to_string(),
            });
        }
        let payload_ok = payload.as_object().map(|o| !o.is_empty()).unwrap_or(false);
        if !payload_ok {
            return Err(GatewayError::InvalidPayload(
                "request payload must be a non-empty JSON object".to_string(),
            ));
        }

        let request = GatewayRequest {
            request_id,
            capability: cap,
            action: action.to_string(),
            caller: caller.to_string(),
            payload,
            received_at,
        };

        // 2. Admission: rejected requests never reach the registry
        if let RateLimitResult::Limited { retry_after } =
            self.limiter.check(&request.caller, cap.as_str()).await
        {
            return Err(GatewayError::RateLimited {
                key: format!("{}/{}", request.caller, cap),
                retry_after,
            });
        }

        // 3. Discovery: an empty set is a normal degraded-state outcome
        let mut candidates = self.registry.discover(cap).await;
        if candidates.is_empty() {
            return Err(GatewayError::NoInstances(cap.to_string()));
        }

        // 4 + 5. Selection with bounded reselection over open circuits
        let instance = loop {
            let candidate = self.balancer.select(cap, &candidates)?;
            let addr = candidate.addr();
            if self.breaker.check(&addr) {
                break candidate;
            }
            debug!("Circuit open for {}, reselecting", addr);
            candidates.retain(|i| i.addr() != addr);
            if candidates.is_empty() {
                return Err(GatewayError::AllInstancesUnavailable(cap.to_string()));
            }
        };

        // 6 + 7. Forward and record the outcome
        self.forward(request, instance).await
    }

    async fn forward(
        &self,
        mut request: GatewayRequest,
        instance: ServiceInstance,
    ) -> Result<ForwardReply> {
        let addr = instance.addr();

        let context = GatewayContext::new(
            request.request_id,
            &self.config.gateway_name,
            &request.caller,
        );
        context.attach(&mut request.payload)?;

        let url = format!("{}/{}", instance.base_url(), request.action);
        self.metrics.record_instance_request(&addr);

        let _inflight = InflightGuard::new(Arc::clone(&instance.inflight));
        let result =
            HttpClient::post_json(&url, &request.payload, self.config.forward_timeout).await;

        debug!(
            "Forwarded {}/{} to {} in {:?}",
            request.capability,
            request.action,
            addr,
            request.received_at.elapsed()
        );

        match result {
            // A reachable backend is a healthy backend for circuit purposes,
            // even when it answers 4xx
            Ok((status, body)) if status < 500 => {
                self.breaker.record_outcome(&addr, true);
                Ok(ForwardReply { status, body })
            }
            Ok((status, _body)) => {
                self.breaker.record_outcome(&addr, false);
                Err(GatewayError::UpstreamStatus { addr, status })
            }
            Err(err) => {
                self.breaker.record_outcome(&addr, false);
                Err(err)
            }
        }
    }

    /// Fan-out/fan-in over a batch of sub-requests.
    ///
    /// Each sub-request runs the full pipeline independently on a bounded
    /// worker pool; one failure never aborts or delays the others. All
    /// sub-requests race one absolute deadline; whatever has not completed
    /// by then is reported as a timeout while finished results are kept.
    /// Outcomes are returned in submission order.
    pub async fn dispatch_batch(&self, items: Vec<BatchItem>, caller: &str) -> Vec<BatchOutcome> {
        let deadline = tokio::time::Instant::now() + self.config.batch_deadline;
        let concurrency = self.config.batch_concurrency.max(1);

        let tasks = items.into_iter().enumerate().map(|(index, item)| {
            let BatchItem {
                capability,
                action,
                data,
            } = item;
            async move {
                let dispatched = tokio::time::timeout_at(
                    deadline,
                    self.dispatch(&capability, &action, data, caller),
                )
                .await;

                let response = match dispatched {
                    Ok(dispatched) => dispatched.envelope,
                    Err(_) => {
                        let err = GatewayError::Timeout {
                            addr: format!("{}/{}", capability, action),
                            timeout_ms: self.config.batch_deadline.as_millis() as u64,
                        };
                        GatewayResponse::failure(generate_request_id(), &err)
                    }
                };

                (index, BatchOutcome {
                    capability,
                    action,
                    response,
                })
            }
        });

        let mut outcomes: Vec<(usize, BatchOutcome)> = stream::iter(tasks)
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    // ========================================================================
    // Administrative operations (not on the dispatch hot path)
    // ========================================================================

    /// Registers a backend instance. Idempotent.
    pub async fn register_service(&self, registration: &ServiceRegistration) -> Result<Capability> {
        let cap: Capability = registration
            .capability
            .parse()
            .map_err(|_| GatewayError::UnknownCapability(registration.capability.clone()))?;
        if registration.host.is_empty() {
            return Err(GatewayError::InvalidPayload("host is required".to_string()));
        }
        if registration.port == 0 {
            return Err(GatewayError::InvalidPayload("port is required".to_string()));
        }

        self.registry
            .register(cap, &registration.host, registration.port)
            .await;
        Ok(cap)
    }

    /// Removes every instance of a capability (by id or service name);
    /// returns how many were removed.
    pub async fn unregister_service(&self, name: &str) -> Result<usize> {
        let cap = self
            .table
            .resolve(name)
            .ok_or_else(|| GatewayError::UnknownCapability(name.to_string()))?;

        let instances = self.registry.instances_of(cap).await;
        let removed = self.registry.deregister_all(cap).await;
        for instance in &instances {
            self.breaker.remove(&instance.addr());
        }
        Ok(removed)
    }

    /// Capability listing with instance counts and aggregate health.
    pub async fn services_overview(&self) -> ServicesOverview {
        let mut services = Vec::with_capacity(Capability::ALL.len());

        for capability in Capability::ALL {
            let descriptor = self.table.get(capability);
            let (total, healthy, unknown) = self.registry.counts(capability).await;

            let status = if healthy > 0 {
                "healthy"
            } else if unknown > 0 {
                "unknown"
            } else {
                "unhealthy"
            };

            services.push(ServiceSummary {
                capability,
                service_name: descriptor.service_name,
                actions: descriptor.actions.to_vec(),
                instances: total,
                healthy_instances: healthy,
                status,
            });
        }

        ServicesOverview {
            total: services.len(),
            services,
        }
    }

    /// Live per-instance health breakdown for one capability.
    ///
    /// Probes every registered instance now, regardless of the monitor's
    /// cached view, and includes each instance's circuit record.
    pub async fn service_health(&self, name: &str) -> Result<ServiceHealthReport> {
        let cap = self
            .table
            .resolve(name)
            .ok_or_else(|| GatewayError::UnknownCapability(name.to_string()))?;

        let instances = self.registry.instances_of(cap).await;

        let probes: Vec<_> = instances
            .iter()
            .map(|instance| {
                let timeout = self.config.probe_timeout;
                async move {
                    let reachable = HealthMonitor::probe_instance(instance, timeout).await;
                    InstanceHealthCheck {
                        addr: instance.addr(),
                        reachable,
                        status: instance.status,
                        circuit: self.breaker.snapshot(&instance.addr()),
                    }
                }
            })
            .collect();

        let checks = join_all(probes).await;
        let healthy_instances = checks.iter().filter(|c| c.reachable).count();
        let status = if healthy_instances > 0 {
            "healthy"
        } else {
            "unhealthy"
        };

        Ok(ServiceHealthReport {
            service: self.table.service_name(cap),
            capability: cap,
            status,
            total_instances: checks.len(),
            healthy_instances,
            checks,
        })
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn info(&self) -> aigw_metrics::GatewayInfo {
        self.metrics.info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::BalancePolicy;
    use crate::breaker::BreakerConfig;
    use aigw_common::protocol::ErrorClass;
    use aigw_common::rate_limit::RateLimitConfig;
    use serde_json::json;

    fn test_dispatcher(limiter: RateLimiter) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ServiceRegistry::new()),
            Arc::new(CircuitBreaker::new(BreakerConfig::default())),
            LoadBalancer::new(BalancePolicy::RoundRobin),
            limiter,
            Arc::new(GatewayMetricsCollector::new()),
            DispatchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_unknown_capability_is_client_error() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());
        let result = dispatcher
            .dispatch("nonexistent", "parse", json!({"a": 1}), "test")
            .await;

        assert_eq!(result.http_status, 400);
        let error = result.envelope.error.unwrap();
        assert_eq!(error.class, ErrorClass::ClientError);
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_unknown_action_is_client_error() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());
        let result = dispatcher
            .dispatch("resume", "find_jobs", json!({"a": 1}), "test")
            .await;

        assert_eq!(result.http_status, 400);
        assert_eq!(
            result.envelope.error.unwrap().class,
            ErrorClass::ClientError
        );
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());

        for payload in [json!({}), json!(null), json!([1, 2]), json!("text")] {
            let result = dispatcher.dispatch("chat", "chat", payload, "test").await;
            assert_eq!(result.http_status, 400);
            assert_eq!(
                result.envelope.error.unwrap().class,
                ErrorClass::ClientError
            );
        }
    }

    #[tokio::test]
    async fn test_unregistered_capability_is_service_unavailable() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());
        let result = dispatcher
            .dispatch("vector", "search", json!({"q": "x"}), "test")
            .await;

        assert_eq!(result.http_status, 503);
        let error = result.envelope.error.unwrap();
        assert_eq!(error.class, ErrorClass::ServiceUnavailable);
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_carries_hint() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(60)));
        let dispatcher = test_dispatcher(limiter);
        dispatcher
            .registry()
            .register(Capability::Chat, "127.0.0.1", 1)
            .await;

        // First request is admitted (and fails on transport, which is fine here)
        dispatcher
            .dispatch("chat", "chat", json!({"q": "x"}), "9.9.9.9")
            .await;

        let result = dispatcher
            .dispatch("chat", "chat", json!({"q": "x"}), "9.9.9.9")
            .await;
        assert_eq!(result.http_status, 429);
        let error = result.envelope.error.unwrap();
        assert_eq!(error.class, ErrorClass::RateLimited);
        assert!(error.retry_after_ms.is_some());
    }

    #[tokio::test]
    async fn test_validation_rejections_precede_admission() {
        // An invalid request must not consume the caller's admission quota
        let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::from_secs(60)));
        let dispatcher = test_dispatcher(limiter.clone());

        for _ in 0..5 {
            dispatcher
                .dispatch("chat", "bogus_action", json!({"a": 1}), "7.7.7.7")
                .await;
        }
        assert_eq!(limiter.tracked_key_count().await, 0);
    }

    #[tokio::test]
    async fn test_all_circuits_open_fails_fast() {
        let dispatcher = Dispatcher::new(
            Arc::new(ServiceRegistry::new()),
            Arc::new(CircuitBreaker::new(BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            })),
            LoadBalancer::new(BalancePolicy::RoundRobin),
            RateLimiter::disabled(),
            Arc::new(GatewayMetricsCollector::new()),
            DispatchConfig::default(),
        );
        dispatcher
            .registry()
            .register(Capability::Matching, "10.0.0.1", 7512)
            .await;
        dispatcher.breaker().record_outcome("10.0.0.1:7512", false);

        let result = dispatcher
            .dispatch("matching", "match", json!({"job": 1}), "test")
            .await;
        assert_eq!(result.http_status, 503);
        assert_eq!(
            result.envelope.error.unwrap().class,
            ErrorClass::ServiceUnavailable
        );
    }

    #[tokio::test]
    async fn test_register_service_validates() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());

        let bad_capability = ServiceRegistration {
            capability: "nonexistent".into(),
            host: "10.0.0.1".into(),
            port: 7500,
        };
        assert!(dispatcher.register_service(&bad_capability).await.is_err());

        let bad_port = ServiceRegistration {
            capability: "resume".into(),
            host: "10.0.0.1".into(),
            port: 0,
        };
        assert!(dispatcher.register_service(&bad_port).await.is_err());

        let good = ServiceRegistration {
            capability: "resume".into(),
            host: "10.0.0.1".into(),
            port: 7511,
        };
        assert_eq!(
            dispatcher.register_service(&good).await.unwrap(),
            Capability::Resume
        );
        assert_eq!(
            dispatcher.registry().discover(Capability::Resume).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unregister_cleans_circuit_records() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());
        dispatcher
            .registry()
            .register(Capability::Auth, "10.0.0.1", 7515)
            .await;
        dispatcher.breaker().record_outcome("10.0.0.1:7515", false);

        let removed = dispatcher.unregister_service("auth-service").await.unwrap();
        assert_eq!(removed, 1);
        assert!(dispatcher.breaker().state("10.0.0.1:7515").is_none());
        assert!(dispatcher.unregister_service("bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_services_overview_counts() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());
        dispatcher
            .registry()
            .register(Capability::Chat, "10.0.0.1", 7513)
            .await;
        dispatcher
            .registry()
            .register(Capability::Chat, "10.0.0.2", 7513)
            .await;

        let overview = dispatcher.services_overview().await;
        assert_eq!(overview.total, Capability::ALL.len());

        let chat = overview
            .services
            .iter()
            .find(|s| s.capability == Capability::Chat)
            .unwrap();
        assert_eq!(chat.instances, 2);
        assert_eq!(chat.status, "unknown"); // registered, not yet probed

        let vector = overview
            .services
            .iter()
            .find(|s| s.capability == Capability::Vector)
            .unwrap();
        assert_eq!(vector.instances, 0);
        assert_eq!(vector.status, "unhealthy");
    }

    #[tokio::test]
    async fn test_batch_outcomes_keep_submission_order() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());

        let items = vec![
            BatchItem {
                capability: "nonexistent".into(),
                action: "x".into(),
                data: json!({"a": 1}),
            },
            BatchItem {
                capability: "resume".into(),
                action: "parse".into(),
                data: json!({"a": 1}),
            },
            BatchItem {
                capability: "chat".into(),
                action: "bogus".into(),
                data: json!({"a": 1}),
            },
        ];

        let outcomes = dispatcher.dispatch_batch(items, "test").await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].capability, "nonexistent");
        assert_eq!(outcomes[1].capability, "resume");
        assert_eq!(outcomes[2].capability, "chat");

        // Each failed independently with its own classification
        assert_eq!(
            outcomes[0].response.error.as_ref().unwrap().class,
            ErrorClass::ClientError
        );
        assert_eq!(
            outcomes[1].response.error.as_ref().unwrap().class,
            ErrorClass::ServiceUnavailable
        );
        assert_eq!(
            outcomes[2].response.error.as_ref().unwrap().class,
            ErrorClass::ClientError
        );
    }

    #[tokio::test]
    async fn test_dispatch_failures_recorded_in_metrics() {
        let dispatcher = test_dispatcher(RateLimiter::disabled());
        dispatcher
            .dispatch("resume", "parse", json!({"a": 1}), "test")
            .await;

        let snapshot = dispatcher.metrics_snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.routes.get("resume/parse").unwrap().failure_count, 1);
    }
}
