use std::time::Duration;

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced anywhere in the gateway pipeline.
///
/// Every variant maps onto exactly one [`ErrorClass`], which is what callers
/// and the batch aggregator branch on; the variants themselves carry the
/// detail needed for logging and the HTTP status mapping.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("unsupported action '{action}' for capability '{capability}'")]
    UnknownAction { capability: String, action: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limit exceeded for '{key}'")]
    RateLimited { key: String, retry_after: Duration },

    #[error("no available instances for capability '{0}'")]
    NoInstances(String),

    #[error("all instances unavailable for capability '{0}'")]
    AllInstancesUnavailable(String),

    #[error("request to {addr} timed out after {timeout_ms}ms")]
    Timeout { addr: String, timeout_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream {addr} returned status {status}")]
    UpstreamStatus { addr: String, status: u16 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Machine-readable error classification carried in every error envelope.
///
/// Distinguishes "your request is wrong" from "the system is degraded"
/// without the caller having to string-match messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ClientError,
    RateLimited,
    ServiceUnavailable,
    BackendFailure,
    Internal,
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::UnknownCapability(_)
            | GatewayError::UnknownAction { .. }
            | GatewayError::InvalidPayload(_)
            | GatewayError::Unauthorized => ErrorClass::ClientError,
            GatewayError::RateLimited { .. } => ErrorClass::RateLimited,
            GatewayError::NoInstances(_) | GatewayError::AllInstancesUnavailable(_) => {
                ErrorClass::ServiceUnavailable
            }
            GatewayError::Timeout { .. }
            | GatewayError::Transport(_)
            | GatewayError::UpstreamStatus { .. } => ErrorClass::BackendFailure,
            GatewayError::Serialization(_) | GatewayError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::RateLimited | ErrorClass::ServiceUnavailable | ErrorClass::BackendFailure
        )
    }

    /// Retry hint, currently only populated for admission rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// HTTP status the gateway responds with for this error.
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::UnknownCapability(_)
            | GatewayError::UnknownAction { .. }
            | GatewayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NoInstances(_) | GatewayError::AllInstancesUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Transport(_) | GatewayError::UpstreamStatus { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Serialization(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_classify_as_client_error() {
        assert_eq!(
            GatewayError::UnknownCapability("bogus".into()).class(),
            ErrorClass::ClientError
        );
        assert_eq!(
            GatewayError::UnknownAction {
                capability: "resume".into(),
                action: "bogus".into(),
            }
            .class(),
            ErrorClass::ClientError
        );
        assert_eq!(
            GatewayError::InvalidPayload("empty".into()).class(),
            ErrorClass::ClientError
        );
    }

    #[test]
    fn test_backend_errors_classify_as_backend_failure() {
        assert_eq!(
            GatewayError::Timeout {
                addr: "127.0.0.1:7511".into(),
                timeout_ms: 5000,
            }
            .class(),
            ErrorClass::BackendFailure
        );
        assert_eq!(
            GatewayError::Transport("connection refused".into()).class(),
            ErrorClass::BackendFailure
        );
        assert_eq!(
            GatewayError::UpstreamStatus {
                addr: "127.0.0.1:7511".into(),
                status: 500,
            }
            .class(),
            ErrorClass::BackendFailure
        );
    }

    #[test]
    fn test_unavailable_distinct_from_client_error() {
        let unavailable = GatewayError::NoInstances("resume".into());
        assert_eq!(unavailable.class(), ErrorClass::ServiceUnavailable);
        assert_ne!(unavailable.class(), ErrorClass::ClientError);
    }

    #[test]
    fn test_retryable_classes() {
        assert!(GatewayError::NoInstances("chat".into()).retryable());
        assert!(GatewayError::Transport("reset".into()).retryable());
        assert!(GatewayError::RateLimited {
            key: "k".into(),
            retry_after: Duration::from_secs(1),
        }
        .retryable());
        assert!(!GatewayError::UnknownCapability("x".into()).retryable());
        assert!(!GatewayError::Internal("bug".into()).retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            GatewayError::InvalidPayload("".into()).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::RateLimited {
                key: "k".into(),
                retry_after: Duration::ZERO,
            }
            .http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::NoInstances("vector".into()).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Timeout {
                addr: "a".into(),
                timeout_ms: 1,
            }
            .http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::UpstreamStatus {
                addr: "a".into(),
                status: 502,
            }
            .http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Internal("bug".into()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retry_after_only_on_rate_limited() {
        let limited = GatewayError::RateLimited {
            key: "1.2.3.4/chat".into(),
            retry_after: Duration::from_millis(250),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(GatewayError::NoInstances("chat".into()).retry_after(), None);
    }

    #[test]
    fn test_error_class_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorClass::ServiceUnavailable).unwrap(),
            "\"service_unavailable\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorClass::ClientError).unwrap(),
            "\"client_error\""
        );
    }
}
