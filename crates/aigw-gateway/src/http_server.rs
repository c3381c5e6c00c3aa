//! HTTP surface of the gateway.
//!
//! Axum server exposing the dispatch route, monitoring endpoints and the
//! API-key-guarded administrative registry mutations. Every response body is
//! the gateway envelope; no raw error ever crosses this boundary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Json;
use hyper::body::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use aigw_common::auth::AuthConfig;
use aigw_common::protocol::{
    generate_request_id, BatchRequest, GatewayError, GatewayResponse, ServiceRegistration,
};

use crate::dispatcher::{Dispatched, Dispatcher};

const API_KEY_HEADER: &str = "x-api-key";

struct AppState {
    dispatcher: Arc<Dispatcher>,
    auth: AuthConfig,
}

/// The gateway's HTTP server.
pub struct HttpServer {
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            state: Arc::new(AppState {
                dispatcher,
                auth: AuthConfig::disabled(),
            }),
        }
    }

    /// Guards the administrative endpoints with an API key.
    pub fn with_auth(self, auth: AuthConfig) -> Self {
        let dispatcher = Arc::clone(&self.state.dispatcher);
        Self {
            state: Arc::new(AppState { dispatcher, auth }),
        }
    }

    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route("/api/ai/services", get(list_services))
            .route("/api/ai/services/:name/health", get(service_health))
            .route("/api/ai/register", post(register_service))
            .route("/api/ai/unregister/:name", delete(unregister_service))
            .route("/api/ai/batch", post(dispatch_batch))
            .route("/api/ai/metrics", get(gateway_metrics))
            .route("/api/ai/:capability/:action", post(dispatch))
            .route("/__health", get(gateway_health))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }

    /// Binds and serves until shutdown.
    pub async fn run(self, addr: SocketAddr) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener (tests bind to port 0 first).
    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Transport(format!("failed to get local addr: {}", e)))?;
        info!("AI gateway listening on {}", local_addr);

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| GatewayError::Transport(format!("server error: {}", e)))
    }
}

/// Builds the HTTP response for a dispatch outcome: envelope body, mapped
/// status, and a `Retry-After` header on admission rejections.
fn respond(dispatched: Dispatched) -> Response {
    let status =
        StatusCode::from_u16(dispatched.http_status).unwrap_or(StatusCode::BAD_GATEWAY);
    let retry_after_secs = dispatched
        .envelope
        .error
        .as_ref()
        .and_then(|e| e.retry_after_ms)
        .map(|ms| ms.div_ceil(1000).max(1));

    let mut response = (status, Json(dispatched.envelope)).into_response();
    if let Some(secs) = retry_after_secs {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

fn error_response(err: &GatewayError) -> Response {
    let envelope = GatewayResponse::failure(generate_request_id(), err);
    (err.http_status(), Json(envelope)).into_response()
}

fn check_admin_auth(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    if !state.auth.requires_auth() {
        return Ok(());
    }
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if state.auth.validate_api_key(provided) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// `POST /api/ai/{capability}/{action}`
async fn dispatch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((capability, action)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_response(&GatewayError::InvalidPayload(format!("invalid JSON: {}", e)))
        }
    };

    let caller = peer.ip().to_string();
    let dispatched = state
        .dispatcher
        .dispatch(&capability, &action, payload, &caller)
        .await;
    respond(dispatched)
}

/// `POST /api/ai/batch`
async fn dispatch_batch(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let batch: BatchRequest = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            return error_response(&GatewayError::InvalidPayload(format!(
                "invalid batch body: {}",
                e
            )))
        }
    };
    if batch.requests.is_empty() {
        return error_response(&GatewayError::InvalidPayload(
            "batch contains no requests".to_string(),
        ));
    }

    let caller = peer.ip().to_string();
    let results = state
        .dispatcher
        .dispatch_batch(batch.requests, &caller)
        .await;

    let total = results.len();
    Json(json!({ "results": results, "total": total })).into_response()
}

/// `GET /api/ai/services`
async fn list_services(State(state): State<Arc<AppState>>) -> Response {
    Json(state.dispatcher.services_overview().await).into_response()
}

/// `GET /api/ai/services/{name}/health`
async fn service_health(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.dispatcher.service_health(&name).await {
        Ok(report) => {
            let status = if report.healthy_instances > 0 {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(report)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// `POST /api/ai/register`
async fn register_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = check_admin_auth(&state, &headers) {
        return error_response(&err);
    }

    let registration: ServiceRegistration = match serde_json::from_slice(&body) {
        Ok(registration) => registration,
        Err(e) => {
            return error_response(&GatewayError::InvalidPayload(format!(
                "invalid registration: {}",
                e
            )))
        }
    };

    match state.dispatcher.register_service(&registration).await {
        Ok(capability) => Json(json!({
            "message": "service registered",
            "capability": capability,
            "addr": format!("{}:{}", registration.host, registration.port),
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// `DELETE /api/ai/unregister/{name}`
async fn unregister_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Err(err) = check_admin_auth(&state, &headers) {
        return error_response(&err);
    }

    match state.dispatcher.unregister_service(&name).await {
        Ok(removed) => Json(json!({
            "message": "service unregistered",
            "service": name,
            "removed_instances": removed,
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// `GET /api/ai/metrics`
async fn gateway_metrics(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "info": state.dispatcher.info(),
        "metrics": state.dispatcher.metrics_snapshot(),
    }))
    .into_response()
}

/// `GET /__health`
async fn gateway_health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{BalancePolicy, LoadBalancer};
    use crate::breaker::CircuitBreaker;
    use crate::dispatcher::DispatchConfig;
    use crate::registry::ServiceRegistry;
    use aigw_common::rate_limit::RateLimiter;
    use aigw_metrics::GatewayMetricsCollector;

    fn test_server() -> HttpServer {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(ServiceRegistry::new()),
            Arc::new(CircuitBreaker::default()),
            LoadBalancer::new(BalancePolicy::RoundRobin),
            RateLimiter::disabled(),
            Arc::new(GatewayMetricsCollector::new()),
            DispatchConfig::default(),
        ));
        HttpServer::new(dispatcher)
    }

    #[tokio::test]
    async fn test_router_builds() {
        // Route table construction panics on conflicting patterns; building
        // the router at all is the assertion.
        let _router = test_server().router();
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = gateway_health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_retry_after_header_on_admission_rejection() {
        let err = GatewayError::RateLimited {
            key: "k".into(),
            retry_after: std::time::Duration::from_millis(2500),
        };
        let dispatched = Dispatched {
            http_status: 429,
            envelope: GatewayResponse::failure(1, &err),
        };
        let response = respond(dispatched);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "3");
    }
}
