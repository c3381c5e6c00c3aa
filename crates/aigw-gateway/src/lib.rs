//! # AI request gateway
//!
//! A single ingress point for a family of backend AI capabilities
//! (resume analysis, matching, chat, vectorization, auth, monitoring,
//! configuration). For each request the gateway resolves the target
//! capability, discovers a healthy backend instance, applies admission
//! control and circuit breaking, forwards the request with correlation
//! metadata, and returns a normalized response envelope. Partial backend
//! failure is the normal operating condition, not the exception.
//!
//! ## Components
//!
//! - [`CapabilityTable`]: the closed routing table, built once at startup
//! - [`ServiceRegistry`]: capability → live instances, with TTL eviction
//! - [`HealthMonitor`]: background liveness probing
//! - [`LoadBalancer`]: round-robin (default) or least-connections selection
//! - [`CircuitBreaker`]: per-instance fault memory
//! - [`Dispatcher`]: the pipeline orchestrator, including batch fan-out
//! - [`HttpServer`]: the axum surface
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aigw_gateway::{
//!     BalancePolicy, BreakerConfig, CircuitBreaker, DispatchConfig, Dispatcher,
//!     HealthCheckConfig, HealthMonitor, HttpServer, LoadBalancer, ServiceRegistry,
//! };
//! use aigw_common::rate_limit::RateLimiter;
//! use aigw_metrics::GatewayMetricsCollector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ServiceRegistry::new());
//!     let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
//!
//!     let monitor = HealthMonitor::new(
//!         Arc::clone(&registry),
//!         Arc::clone(&breaker),
//!         HealthCheckConfig::default(),
//!     );
//!     let _monitor_handle = monitor.spawn();
//!
//!     let dispatcher = Arc::new(Dispatcher::new(
//!         registry,
//!         breaker,
//!         LoadBalancer::new(BalancePolicy::RoundRobin),
//!         RateLimiter::disabled(),
//!         Arc::new(GatewayMetricsCollector::new()),
//!         DispatchConfig::default(),
//!     ));
//!
//!     HttpServer::new(dispatcher)
//!         .run("0.0.0.0:7510".parse()?)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod balancer;
pub mod breaker;
pub mod capability;
pub mod dispatcher;
pub mod health;
pub mod http_server;
pub mod instance;
pub mod registry;

pub use balancer::{BalancePolicy, LoadBalancer};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use capability::{Capability, CapabilityDescriptor, CapabilityTable};
pub use dispatcher::{DispatchConfig, Dispatched, Dispatcher, ServiceHealthReport, ServicesOverview};
pub use health::{HealthCheckConfig, HealthMonitor};
pub use http_server::HttpServer;
pub use instance::{HealthStatus, ServiceInstance};
pub use registry::{ProbeTransition, ServiceRegistry};
