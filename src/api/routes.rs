use crate::api::api_error::APIError;
use crate::api::capture;
use crate::api::middleware;
use crate::api::model::{
    BatchPollResponse, MetricsResponse, PollResponse, RegisterRequest, RegisterResponse,
};
use crate::api::server::AppState;
use crate::error::Error;
use crate::store;
use crate::store::Store;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) fn new(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/register", post(register))
        .route("/poll/:id", get(poll_hook))
        .route("/poll", post(poll_many))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));
    if state.config.observability.metrics_enabled {
        router = router.route("/metrics", get(metrics));
    }
    router
        .fallback(capture::capture)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::poll_path_guard,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::host_dispatch,
        ))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .with_state(state)
}

/// `POST /register`. The body is an optional `{"count": N}`; anything absent,
/// unparseable or below one registers a single hook. A count of one answers
/// the bare hook object, more answer `{"hooks": [...]}`.
async fn register(State(state): State<AppState>, body: Bytes) -> Json<RegisterResponse> {
    let count = serde_json::from_slice::<RegisterRequest>(&body)
        .ok()
        .and_then(|request| request.count)
        .unwrap_or(1)
        .max(1);

    let domain = state.config.server.domain.as_str();
    if count == 1 {
        let hook = state.store.write().await.create_hook(domain).await;
        tracing::info!(id = %hook.id, "hook created");
        return Json(RegisterResponse::Single(Box::new(hook)));
    }

    let mut hooks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        hooks.push(state.store.write().await.create_hook(domain).await);
    }
    tracing::info!(count, "hooks created");
    Json(RegisterResponse::Many { hooks })
}

/// `GET /poll/{id}`: atomic read-and-clear for one hook.
async fn poll_hook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PollResponse>, APIError> {
    let mut guard = state.store.write().await;
    if guard.get_hook(&id).await.is_none() {
        return Err(Error::HookNotFound.into());
    }
    let interactions = guard.poll(&id).await;
    drop(guard);

    tracing::info!(hook_id = %id, count = interactions.len(), "interactions polled");
    Ok(Json(PollResponse { interactions }))
}

/// `POST /poll`: read-and-clear for a list of hook ids, one outcome per id.
async fn poll_many(
    State(state): State<AppState>,
    WithRejection(Json(ids), _): WithRejection<Json<Vec<String>>, APIError>,
) -> Result<Json<BatchPollResponse>, APIError> {
    if ids.is_empty() {
        return Err(Error::EmptyBatch.into());
    }
    let results = store::poll_batch(&state.store, &ids).await;
    tracing::info!(hook_count = ids.len(), "batch interactions polled");
    Ok(Json(BatchPollResponse { results }))
}

/// `GET /metrics`: storage, eviction and memory counters. Unauthenticated.
async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let stats = state.store.read().await.stats().await;
    let evictions = state.eviction.snapshot();
    Json(MetricsResponse::compose(&stats, &evictions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::eviction::EvictionMetrics;
    use crate::store::{random_id_generator, DynStore, InMemoryStore};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    const DOMAIN: &str = "hookd.test.local";
    const TOKEN: &str = "T";

    fn test_state() -> AppState {
        let mut config = Config::default();
        config.server.domain = DOMAIN.to_string();
        config.server.api.auth_token = TOKEN.to_string();
        let store: DynStore = Arc::new(RwLock::new(InMemoryStore::new(random_id_generator())));
        AppState {
            config: Arc::new(config),
            store,
            eviction: Arc::new(EvictionMetrics::default()),
            generate_id: random_id_generator(),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    fn api_request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", TOKEN)
            .header(header::HOST, DOMAIN)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    async fn register_one(app: &Router) -> String {
        let (status, value) = send_json(app, api_request("POST", "/register", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        value["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn register_requires_api_key() {
        let app = new(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header(header::HOST, DOMAIN)
            .body(Body::empty())
            .unwrap();
        let (status, value) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["error"], "Invalid or missing API key");

        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header("x-api-key", "wrong")
            .header(header::HOST, DOMAIN)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_single_returns_bare_hook() {
        let app = new(test_state());
        let (status, value) = send_json(&app, api_request("POST", "/register", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        let id = value["id"].as_str().unwrap();
        assert_eq!(value["dns"], format!("{id}.{DOMAIN}"));
        assert_eq!(value["http"], format!("http://{id}.{DOMAIN}"));
        assert_eq!(value["https"], format!("https://{id}.{DOMAIN}"));
        assert!(value["created_at"].is_string());
        assert!(value.get("hooks").is_none());
    }

    #[tokio::test]
    async fn register_multi_wraps_hooks() {
        let app = new(test_state());
        let (status, value) = send_json(
            &app,
            api_request("POST", "/register", Body::from(r#"{"count":3}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["hooks"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn register_tolerates_garbage_and_low_counts() {
        let app = new(test_state());
        let (status, value) =
            send_json(&app, api_request("POST", "/register", Body::from("not json"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["id"].is_string());

        let (status, value) = send_json(
            &app,
            api_request("POST", "/register", Body::from(r#"{"count":-2}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["id"].is_string());
    }

    #[tokio::test]
    async fn poll_unknown_hook_is_404() {
        let app = new(test_state());
        let (status, value) = send_json(&app, api_request("GET", "/poll/nope", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["error"], "Hook not found");
    }

    #[tokio::test]
    async fn malformed_poll_paths_are_400() {
        let app = new(test_state());
        for path in ["/poll/", "/poll/a/b", "/poll//x", "/poll/abc/"] {
            let (status, value) =
                send_json(&app, api_request("GET", path, Body::empty())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "path {path}");
            assert_eq!(value["error"], "Invalid path format", "path {path}");
        }
    }

    #[tokio::test]
    async fn malformed_poll_paths_still_require_the_key() {
        let app = new(test_state());
        let request = Request::builder()
            .method("GET")
            .uri("/poll/a/b")
            .header(header::HOST, DOMAIN)
            .body(Body::empty())
            .unwrap();
        let (status, value) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn capture_then_poll_and_clear() {
        let app = new(test_state());
        let id = register_one(&app).await;

        let request = Request::builder()
            .method("POST")
            .uri("/x?y=1")
            .header(header::HOST, format!("{id}.{DOMAIN}"))
            .body(Body::from("hello"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (status, value) =
            send_json(&app, api_request("GET", &format!("/poll/{id}"), Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        let interactions = value["interactions"].as_array().unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0]["type"], "http");
        assert_eq!(interactions[0]["data"]["method"], "POST");
        assert_eq!(interactions[0]["data"]["path"], "/x");
        assert_eq!(interactions[0]["data"]["body"], "hello");

        // Poll is read-and-clear: nothing left the second time around.
        let (status, value) =
            send_json(&app, api_request("GET", &format!("/poll/{id}"), Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["interactions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_wins_over_api_paths_on_hook_hosts() {
        let app = new(test_state());
        let id = register_one(&app).await;

        // A request for an API path on a hook vhost is captured, not routed.
        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header("x-api-key", TOKEN)
            .header(header::HOST, format!("{id}.{DOMAIN}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (_, value) =
            send_json(&app, api_request("GET", &format!("/poll/{id}"), Body::empty())).await;
        let interactions = value["interactions"].as_array().unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0]["data"]["path"], "/register");
    }

    #[tokio::test]
    async fn capture_ignores_unknown_hosts_and_unregistered_labels() {
        let state = test_state();
        let app = new(state.clone());

        let request = Request::builder()
            .method("GET")
            .uri("/whatever")
            .header(header::HOST, "unrelated.example.com")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        // A hook-shaped host nobody registered is answered but not stored.
        let request = Request::builder()
            .method("GET")
            .uri("/probe")
            .header(header::HOST, format!("ghost.{DOMAIN}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(state.store.read().await.stats().await.interactions_total, 0);
    }

    #[tokio::test]
    async fn capture_truncates_oversized_bodies() {
        let state = test_state();
        let app = new(state.clone());
        let id = register_one(&app).await;

        let oversized = vec![b'z'; 10 * 1024 * 1024 + 16];
        let request = Request::builder()
            .method("PUT")
            .uri("/big")
            .header(header::HOST, format!("{id}.{DOMAIN}"))
            .body(Body::from(oversized))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        let (_, value) =
            send_json(&app, api_request("GET", &format!("/poll/{id}"), Body::empty())).await;
        let data = &value["interactions"][0]["data"];
        assert_eq!(data["body"].as_str().unwrap().len(), 10 * 1024 * 1024);
        assert_eq!(data["truncated"], true);
    }

    #[tokio::test]
    async fn batch_poll_partitions_outcomes() {
        let app = new(test_state());
        let (_, value) = send_json(
            &app,
            api_request("POST", "/register", Body::from(r#"{"count":3}"#)),
        )
        .await;
        let hooks: Vec<String> = value["hooks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["id"].as_str().unwrap().to_string())
            .collect();

        // Two captures for the first hook, one for the second, none for the
        // third.
        for (host, count) in [(&hooks[0], 2), (&hooks[1], 1)] {
            for _ in 0..count {
                let request = Request::builder()
                    .method("GET")
                    .uri("/ping")
                    .header(header::HOST, format!("{host}.{DOMAIN}"))
                    .body(Body::empty())
                    .unwrap();
                send(&app, request).await;
            }
        }

        let ids = serde_json::json!([hooks[0], hooks[1], hooks[2], "nope"]);
        let (status, value) = send_json(
            &app,
            api_request("POST", "/poll", Body::from(ids.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let results = &value["results"];
        assert_eq!(results[&hooks[0]]["interactions"].as_array().unwrap().len(), 2);
        assert_eq!(results[&hooks[1]]["interactions"].as_array().unwrap().len(), 1);
        assert!(results[&hooks[2]]["interactions"].as_array().unwrap().is_empty());
        assert_eq!(results["nope"]["error"], "Hook not found");
    }

    #[tokio::test]
    async fn batch_poll_rejects_empty_and_malformed_bodies() {
        let app = new(test_state());
        let (status, value) =
            send_json(&app, api_request("POST", "/poll", Body::from("[]"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"], "hook_ids cannot be empty");

        let (status, value) =
            send_json(&app, api_request("POST", "/poll", Body::from("{\"not\":1}"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"], "Invalid request body");
    }

    #[tokio::test]
    async fn metrics_is_open_and_shaped() {
        let app = new(test_state());
        let request = Request::builder()
            .method("GET")
            .uri("/metrics")
            .header(header::HOST, DOMAIN)
            .body(Body::empty())
            .unwrap();
        let (status, value) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["hooks"]["active"].is_number());
        assert!(value["interactions"]["by_type"]["dns"].is_number());
        assert!(value["interactions"]["by_type"]["http"].is_number());
        for strategy in ["expired", "overflow", "memory_pressure", "hook_expired"] {
            assert!(value["evictions"]["by_strategy"][strategy].is_number());
        }
        for key in ["alloc_mb", "heap_inuse_mb", "sys_mb", "gc_runs"] {
            assert!(value["memory"][key].is_number());
        }
    }

    #[tokio::test]
    async fn metrics_wrong_method_is_405() {
        let app = new(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/metrics")
            .header(header::HOST, DOMAIN)
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let mut state = test_state();
        let mut config = (*state.config).clone();
        config.observability.metrics_enabled = false;
        state.config = Arc::new(config);
        let app = new(state);

        let request = Request::builder()
            .method("GET")
            .uri("/metrics")
            .header(header::HOST, DOMAIN)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        // The path falls through to the capture fallback: 200, empty.
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }
}
