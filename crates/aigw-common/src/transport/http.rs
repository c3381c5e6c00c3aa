//! JSON-over-HTTP client helpers.
//!
//! All outbound calls the gateway makes (forwarding a request to a backend
//! instance, probing `GET /health`, CLI queries against a running gateway)
//! go through these two functions so timeout handling and error
//! classification live in one place.
//!
//! Each call builds its own hyper client. Requests never share connection
//! state, so concurrent calls to the same instance proceed independently.

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;

use crate::protocol::{GatewayError, Result};

/// Stateless JSON HTTP client.
pub struct HttpClient;

impl HttpClient {
    /// POSTs a JSON body and returns `(status, parsed body)`.
    ///
    /// An empty response body parses as `Value::Null`. Elapsing `timeout`
    /// yields [`GatewayError::Timeout`]; connection-level failures yield
    /// [`GatewayError::Transport`]. Non-2xx statuses are returned to the
    /// caller for classification, not turned into errors here.
    pub async fn post_json(url: &str, body: &Value, timeout: Duration) -> Result<(u16, Value)> {
        let bytes = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method("POST")
            .uri(url)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .map_err(|e| GatewayError::Transport(format!("failed to build request: {}", e)))?;

        Self::execute(url, request, timeout).await
    }

    /// GETs a URL and returns `(status, parsed body)`.
    pub async fn get_json(url: &str, timeout: Duration) -> Result<(u16, Value)> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| GatewayError::Transport(format!("failed to build request: {}", e)))?;

        Self::execute(url, request, timeout).await
    }

    async fn execute(
        url: &str,
        request: Request<Full<Bytes>>,
        timeout: Duration,
    ) -> Result<(u16, Value)> {
        let client = Client::builder(TokioExecutor::new()).build_http();

        let call = async {
            let response = client
                .request(request)
                .await
                .map_err(|e| GatewayError::Transport(format!("request to {} failed: {}", url, e)))?;

            let status = response.status().as_u16();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| GatewayError::Transport(format!("failed to read response: {}", e)))?
                .to_bytes();

            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    GatewayError::Transport(format!("invalid JSON from {}: {}", url, e))
                })?
            };

            Ok((status, value))
        };

        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout {
                addr: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }
}
