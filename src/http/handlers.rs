//! HTTP handlers: health, ready signal, the gate middleware, and upstream
//! forwarding.

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{GateError, Result};
use crate::gate::{resolve_identity, DenyReason, GatePipeline, SignalOutcome, Verdict};

/// Largest request or response body the proxy will buffer.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for the HTTP surface.
pub struct AppState {
    /// The gate pipeline; exclusive owner of all gate state
    pub pipeline: GatePipeline,
    /// Client used to forward allowed requests upstream
    pub client: reqwest::Client,
    /// Base URL of the protected upstream
    pub upstream_url: String,
}

/// Gate middleware applied to every route. Bypass paths pass straight
/// through; everything else gets the full pipeline evaluation.
pub async fn gatekeeper(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let identity = resolve_identity(req.headers(), req.uri().query());

    match state.pipeline.evaluate(&path, identity.as_deref()).await {
        Verdict::Forward => next.run(req).await,
        Verdict::Deny(reason) => deny_response(reason),
    }
}

fn deny_response(reason: DenyReason) -> Response {
    match reason {
        DenyReason::MissingIdentity => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing_identity", "detail": "user_id required"})),
        )
            .into_response(),
        DenyReason::RateLimited { retry_after } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.as_secs().to_string())],
            Json(json!({
                "error": "rate_limited",
                "detail": "too many requests, retry later",
                "retry_after_sec": retry_after.as_secs(),
            })),
        )
            .into_response(),
        DenyReason::GateClosed => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "gate_closed", "detail": "service not ready for this user"})),
        )
            .into_response(),
        DenyReason::StoreUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "store_unavailable", "detail": "gate store unreachable"})),
        )
            .into_response(),
    }
}

/// Health endpoint. Always 200; `ok` reflects store reachability so
/// operators can tell a down store from normal gate denials.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ok = state.pipeline.store().ping().await;
    Json(json!({
        "ok": ok,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SignalParams {
    #[serde(default)]
    x_key: String,
    #[serde(default)]
    user_id: String,
}

/// Ready signal: the only operation that opens an entitlement. Lives under
/// the bypass prefix so a caller can open its own gate.
pub async fn signal_ready(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SignalParams>,
) -> Response {
    match state.pipeline.signal_ready(&params.x_key, &params.user_id).await {
        SignalOutcome::Accepted { ttl_sec } => {
            info!(user_id = %params.user_id.trim(), ttl_sec = ttl_sec, "Ready signal accepted");
            Json(json!({
                "ok": true,
                "user_id": params.user_id.trim(),
                "ttl_sec": ttl_sec,
            }))
            .into_response()
        }
        SignalOutcome::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response(),
        SignalOutcome::InvalidRequest => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_request", "detail": "user_id required"})),
        )
            .into_response(),
        SignalOutcome::StoreUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "store_unavailable", "detail": "gate store unreachable"})),
        )
            .into_response(),
    }
}

/// Fallback handler: forward an allowed request to the protected upstream
/// unchanged. Runs only after the gate middleware has let the request
/// through.
pub async fn forward(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    match proxy(&state, req).await {
        Ok(response) => response,
        Err(e) => {
            error!(path = %path, error = %e, "Upstream forward failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "upstream_unreachable"})),
            )
                .into_response()
        }
    }
}

async fn proxy(state: &AppState, req: Request) -> Result<Response> {
    let (parts, body) = req.into_parts();
    let bytes: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GateError::Upstream(e.to_string()))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream_url.trim_end_matches('/'), path_and_query);
    debug!(method = %parts.method, url = %url, "Forwarding request upstream");

    let mut headers = parts.headers;
    strip_connection_headers(&mut headers);
    headers.remove(header::HOST);

    let upstream = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(bytes)
        .send()
        .await
        .map_err(|e| GateError::Upstream(e.to_string()))?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_connection_headers(&mut response_headers);
    let body = upstream
        .bytes()
        .await
        .map_err(|e| GateError::Upstream(e.to_string()))?;

    Ok((status, response_headers, body).into_response())
}

/// Drop hop-by-hop headers that must not be relayed between connections.
fn strip_connection_headers(headers: &mut HeaderMap) {
    for name in [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "content-length",
    ] {
        headers.remove(name);
    }
}
