use anyhow::Result;
use hookd::acme::{AcmeRecordStore, CertManager, SharedRecordStore};
use hookd::config::{Config, ObservabilityConfig, SharedConfig};
use hookd::eviction::Evictor;
use hookd::store::{random_id_generator, DynStore, InMemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long in-flight handlers get to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let mut first_args = std::env::args().take(2);
    let (_program_name, config_file) = (
        first_args.next().unwrap_or_else(|| "hookd".to_string()),
        first_args.next(),
    );

    let mut config = match &config_file {
        Some(path) => Config::try_from_file(path)?,
        None => Config::default(),
    };
    let (token, generated) = config.ensure_auth_token();

    tracing_init(&config.observability);
    if let Some(path) = &config_file {
        tracing::debug!(%path, "loaded config");
    }
    if generated {
        tracing::info!(%token, "generated api auth token");
    } else {
        tracing::info!("using configured api auth token");
    }

    let config: SharedConfig = Arc::new(config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        domain = %config.server.domain,
        dns_enabled = config.server.dns.enabled,
        https_enabled = config.server.https.enabled,
        "hookd starting"
    );

    let generate_id = random_id_generator();
    let store: DynStore = Arc::new(RwLock::new(InMemoryStore::new(generate_id.clone())));
    let acme_records: SharedRecordStore = Arc::new(RwLock::new(AcmeRecordStore::default()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let evictor = Evictor::new(store.clone(), config.eviction.clone());
    let eviction_metrics = evictor.metrics();
    {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { evictor.run(shutdown).await });
    }

    if config.server.dns.enabled {
        let dns_server = hookd::dns::new(
            config.clone(),
            store.clone(),
            acme_records.clone(),
            generate_id.clone(),
        )
        .await?;
        tracing::info!(port = config.server.dns.port, "dns listening on udp/tcp");
        let quit = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = dns_server.block_until_done().await {
                tracing::error!(error = %err, "dns server error");
                let _ = quit.send(true);
            }
        });
    }

    tracing::info!(port = config.server.http.port, "http server starting");
    let http_server = hookd::api::serve_http(
        config.clone(),
        store.clone(),
        eviction_metrics.clone(),
        generate_id.clone(),
        shutdown_rx.clone(),
    );
    let http_handle = {
        let quit = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = http_server.await {
                tracing::error!(error = %err, "http server error");
                let _ = quit.send(true);
            }
        })
    };

    if config.server.https.enabled {
        if config.server.https.autocert {
            let manager = CertManager::new(&config, acme_records.clone());
            // Obtained synchronously: the HTTPS listener never starts
            // without a certificate, and failure here is fatal.
            let tls = manager.tls_config().await?;
            {
                let tls = tls.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { manager.renew_loop(tls, shutdown).await });
            }
            tracing::info!(port = config.server.https.port, "https server starting");
            let https_server = hookd::api::serve_https(
                config.clone(),
                store.clone(),
                eviction_metrics.clone(),
                generate_id.clone(),
                tls,
                shutdown_rx.clone(),
            );
            let quit = shutdown_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = https_server.await {
                    tracing::error!(error = %err, "https server error");
                    let _ = quit.send(true);
                }
            });
        } else {
            tracing::warn!("https enabled but autocert is false - manual tls is not supported");
        }
    }

    let mut failure_watch = shutdown_rx.clone();
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        }
        _ = failure_watch.changed() => {
            tracing::info!("quitting after task failure");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, http_handle).await;
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hookd={}", observability.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if observability.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
