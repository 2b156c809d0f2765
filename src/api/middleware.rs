use crate::api::capture;
use crate::api::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::any::Any;
use subtle::ConstantTimeEq;

const API_KEY_HEADER: &str = "x-api-key";

/// API-route authentication. Reads `X-API-Key` and rejects mismatches with
/// 401. Applied only to API routes; the capture surface stays open to the
/// whole internet.
pub(super) async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next<Body>,
) -> Response {
    if !authorized(&req, &state) {
        tracing::debug!(path = %req.uri().path(), "rejected api request");
        return unauthorized();
    }
    next.run(req).await
}

/// Guard for the poll subtree. Only `/poll` and `/poll/{id}` with one
/// non-empty id segment match a route; every other shape under `/poll/`
/// would otherwise miss the router and land in the capture fallback as an
/// unauthenticated 200. Those shapes are API traffic and get the API
/// contract instead: the same key check as the routed endpoints, then 400.
pub(super) async fn poll_path_guard(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next<Body>,
) -> Response {
    if !malformed_poll_path(req.uri().path()) {
        return next.run(req).await;
    }
    if !authorized(&req, &state) {
        tracing::debug!(path = %req.uri().path(), "rejected api request");
        return unauthorized();
    }
    tracing::debug!(path = %req.uri().path(), "rejected malformed poll path");
    let body = Json(json!({"error": "Invalid path format"}));
    (StatusCode::BAD_REQUEST, body).into_response()
}

/// Anything under `/poll/` that is not exactly one non-empty id segment.
/// `/poll` itself is the batch endpoint and paths outside the subtree are
/// none of our business.
fn malformed_poll_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix("/poll") else {
        return false;
    };
    let Some(id) = rest.strip_prefix('/') else {
        return false;
    };
    id.is_empty() || id.contains('/')
}

fn authorized<B>(req: &Request<B>, state: &AppState) -> bool {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    token_matches(presented, &state.config.server.api.auth_token)
}

fn unauthorized() -> Response {
    let body = Json(json!({"error": "Invalid or missing API key"}));
    (StatusCode::UNAUTHORIZED, body).into_response()
}

/// Comparison time depends on key length only, not on content.
fn token_matches(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    presented.len() == expected.len() && bool::from(presented.ct_eq(expected))
}

pub(super) async fn log_request(req: Request<Body>, next: Next<Body>) -> Response {
    tracing::debug!(
        method = %req.method(),
        path = %req.uri().path(),
        client = %capture::client_ip(&req),
        user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default(),
        "http request"
    );
    next.run(req).await
}

/// Host-first dispatch: a request whose Host carries a hook label is capture,
/// whatever its path, and short-circuits before routing. Everything else is
/// routed by path.
pub(super) async fn host_dispatch(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next<Body>,
) -> Response {
    let host = capture::request_host(&req);
    if let Some(label) = state.config.hook_label(&host) {
        let hook_id = label.to_string();
        return capture::capture_interaction(&state, hook_id, req).await;
    }
    next.run(req).await
}

/// Terminal backstop for handler panics: log, answer 500 JSON.
pub(super) fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(error = %detail, "panic recovered in http handler");
    let body = Json(json!({"error": "Internal server error"}));
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}
