//! Wildcard interaction capture.
//!
//! Any request reaching a `<label>.<domain>` vhost is swallowed whole
//! (method, path, headers, body) and stored under the hook named by the
//! label. The response is always an empty 200 so probes learn nothing from
//! it, and no authentication ever applies here.

use crate::api::server::AppState;
use crate::store::model::Interaction;
use crate::store::Store;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::HttpBody;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Bodies are captured up to this many bytes; the rest is dropped silently
/// apart from the `truncated` marker on the stored interaction.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Router fallback: requests on the base domain (or any non-hook host) whose
/// path matched no API route. Hook-label hosts normally arrive through the
/// dispatch middleware instead, which forwards here before routing.
pub(super) async fn capture(State(state): State<AppState>, req: Request<Body>) -> Response {
    let host = request_host(&req);
    match state.config.hook_label(&host) {
        Some(label) => {
            let hook_id = label.to_string();
            capture_interaction(&state, hook_id, req).await
        }
        None => StatusCode::OK.into_response(),
    }
}

/// Read the request into an HTTP interaction under the given hook. The store
/// drops interactions for hooks nobody registered.
pub(super) async fn capture_interaction(
    state: &AppState,
    hook_id: String,
    req: Request<Body>,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let source_ip = client_ip(&req);

    // First value per header name.
    let mut headers = HashMap::with_capacity(req.headers().keys_len());
    for name in req.headers().keys() {
        if let Some(value) = req.headers().get(name) {
            headers.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
    }

    let (body, truncated) = read_body_capped(req.into_body()).await;

    tracing::debug!(%hook_id, %method, %path, client = %source_ip, "http interaction captured");
    let interaction = Interaction::http(
        (state.generate_id)(),
        source_ip,
        method,
        path,
        headers,
        body,
        truncated,
    );
    state
        .store
        .write()
        .await
        .add_interaction(&hook_id, interaction)
        .await;

    StatusCode::OK.into_response()
}

/// Stream the body up to the cap. Read failures keep whatever arrived.
async fn read_body_capped(mut body: Body) -> (String, bool) {
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = body.data().await {
        let Ok(chunk) = chunk else { break };
        let room = MAX_BODY_BYTES - buf.len();
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

/// The request's host, lowercased, with any port and trailing dot stripped.
pub(super) fn request_host<B>(req: &Request<B>) -> String {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().host());
    normalize_host(raw.unwrap_or_default())
}

fn normalize_host(raw: &str) -> String {
    let without_port = if let Some(bracketed) = raw.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// Peer address as injected by the listener; "unknown" when serving without
/// connection info (tests driving the router directly).
pub(super) fn client_ip<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}
