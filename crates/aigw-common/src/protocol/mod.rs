//! Gateway wire protocol.
//!
//! Everything that crosses the gateway's HTTP boundary lives here: the
//! response envelope, the forwarding context injected into backend payloads,
//! batch and registration bodies, and request-id generation.

pub mod error;

pub use error::{ErrorClass, GatewayError, Result};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type RequestId = u64;

/// Payload key under which the gateway context is injected into every
/// forwarded request body.
pub const GATEWAY_CONTEXT_KEY: &str = "gateway_context";

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a request id unique within this process.
///
/// Upper 32 bits come from the wall clock, lower 32 bits from a monotonic
/// counter, so ids stay unique even when many requests arrive within the
/// same nanosecond.
pub fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}

/// Epoch milliseconds, 0 if the clock is set before the epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Correlation metadata attached to every forwarded backend call.
///
/// Backends and tracing systems use this to correlate a gateway-side request
/// with the backend-side handling across hops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayContext {
    /// Gateway-generated request id
    pub request_id: RequestId,
    /// Identity of the forwarding gateway
    pub gateway: String,
    /// Epoch milliseconds at forward time
    pub forwarded_at_ms: u64,
    /// Address of the originating caller
    pub caller_addr: String,
}

impl GatewayContext {
    pub fn new(request_id: RequestId, gateway: impl Into<String>, caller_addr: impl Into<String>) -> Self {
        Self {
            request_id,
            gateway: gateway.into(),
            forwarded_at_ms: epoch_millis(),
            caller_addr: caller_addr.into(),
        }
    }

    /// Injects this context into a payload object under
    /// [`GATEWAY_CONTEXT_KEY`].
    ///
    /// The payload must be a JSON object. A pre-existing key (e.g. a client
    /// trying to spoof the context) is overwritten, so the forwarded payload
    /// always carries exactly one gateway-authored context.
    pub fn attach(&self, payload: &mut Value) -> Result<()> {
        let obj = payload.as_object_mut().ok_or_else(|| {
            GatewayError::InvalidPayload("payload must be a JSON object".to_string())
        })?;
        obj.insert(GATEWAY_CONTEXT_KEY.to_string(), serde_json::to_value(self)?);
        Ok(())
    }
}

/// Structured error body carried inside a failure envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub class: ErrorClass,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorBody {
    pub fn from_error(err: &GatewayError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
            retryable: err.retryable(),
            retry_after_ms: err.retry_after().map(|d| d.as_millis() as u64),
        }
    }
}

/// The gateway's response envelope.
///
/// Exactly one of `result` / `error` is present. Batch outcomes reuse the
/// same envelope per sub-request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl GatewayResponse {
    pub fn success(request_id: RequestId, result: Value) -> Self {
        Self {
            request_id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(request_id: RequestId, err: &GatewayError) -> Self {
        Self {
            request_id,
            success: false,
            result: None,
            error: Some(ErrorBody::from_error(err)),
        }
    }
}

/// One sub-request of a batch dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub capability: String,
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// Body of `POST /api/ai/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<BatchItem>,
}

/// Per-sub-request outcome, returned in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub capability: String,
    pub action: String,
    pub response: GatewayResponse,
}

/// Body of `POST /api/ai/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub capability: String,
    pub host: String,
    pub port: u16,
}
