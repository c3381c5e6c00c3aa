//! Shared types and infrastructure for the AI gateway.
//!
//! This crate holds everything the gateway's components and tooling have in
//! common:
//!
//! - **Protocol layer**: response envelope, error taxonomy, forwarding
//!   context, batch and registration wire types ([`protocol`])
//! - **Transport layer**: bounded-timeout JSON-over-HTTP client helpers
//!   ([`transport`])
//! - **Auth**: optional API-key guard for administrative endpoints ([`auth`])
//! - **Rate limiting**: fixed-window admission control per
//!   `(caller, capability)` ([`rate_limit`])
//!
//! # Example
//!
//! ```
//! use aigw_common::protocol::{generate_request_id, GatewayContext, GatewayResponse};
//! use serde_json::json;
//!
//! let request_id = generate_request_id();
//! let ctx = GatewayContext::new(request_id, "ai-gateway", "10.0.0.9:55123");
//!
//! let mut payload = json!({"text": "..."});
//! ctx.attach(&mut payload).unwrap();
//!
//! let response = GatewayResponse::success(request_id, json!({"status": "ok"}));
//! assert!(response.success);
//! ```

pub mod auth;
pub mod protocol;
pub mod rate_limit;
pub mod transport;

pub use protocol::{ErrorClass, GatewayError, GatewayResponse, RequestId, Result};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use transport::HttpClient;
