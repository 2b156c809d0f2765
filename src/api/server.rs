use crate::acme::lifecycle::SharedTlsConfig;
use crate::api::routes;
use crate::config::SharedConfig;
use crate::error::Error;
use crate::eviction::EvictionMetrics;
use crate::store::{DynStore, IdGenerator};
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: SharedConfig,
    pub store: DynStore,
    pub eviction: Arc<EvictionMetrics>,
    pub generate_id: IdGenerator,
}

/// The plain HTTP listener: API, metrics and wildcard capture on one port.
pub fn serve_http(
    config: SharedConfig,
    store: DynStore,
    eviction: Arc<EvictionMetrics>,
    generate_id: IdGenerator,
    mut shutdown: watch::Receiver<bool>,
) -> impl Future<Output = hyper::Result<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http.port));
    let state = AppState {
        config,
        store,
        eviction,
        generate_id,
    };
    axum::Server::bind(&addr)
        .serve(routes::new(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
}

/// The HTTPS listener. Serves the same router as the HTTP side behind a
/// rustls handshake, reading the server configuration afresh for each
/// connection so certificate renewals take effect without a restart.
pub async fn serve_https(
    config: SharedConfig,
    store: DynStore,
    eviction: Arc<EvictionMetrics>,
    generate_id: IdGenerator,
    tls: SharedTlsConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.https.port));
    let state = AppState {
        config,
        store,
        eviction,
        generate_id,
    };
    let router = routes::new(state);
    let listener = TcpListener::bind(addr).await?;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "https accept error");
                continue;
            }
        };
        let acceptor = TlsAcceptor::from(tls.read().await.clone());
        let router = router.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let service = service_fn(move |mut req: Request<Body>| {
                        req.extensions_mut().insert(ConnectInfo(peer));
                        router.clone().oneshot(req)
                    });
                    if let Err(err) = Http::new().serve_connection(tls_stream, service).await {
                        tracing::debug!(error = %err, client = %peer, "https connection error");
                    }
                }
                Err(err) => log_tls_error(&err, peer),
            }
        });
    }
    Ok(())
}

/// Failed handshakes are endless bot and scanner noise; keep them out of the
/// logs unless someone opts into debug. Anything else at accept time is worth
/// a warning.
fn log_tls_error(err: &std::io::Error, peer: SocketAddr) {
    let msg = err.to_string();
    if msg.contains("handshake") || msg.contains("certificate") {
        tracing::debug!(error = %msg, client = %peer, "tls handshake error");
    } else {
        tracing::warn!(error = %msg, client = %peer, "tls accept error");
    }
}
