//! Wildcard certificate acquisition and renewal over DNS-01.
//!
//! The manager orders a certificate covering the base domain and its
//! wildcard, solving challenges by writing the TXT values into the local
//! [record store][crate::acme::store] that our own authoritative DNS serves.
//! No propagation wait is needed: the record is live the moment it lands in
//! the store, and the CA's resolvers query this server directly.
//!
//! Certificates and the ACME account are cached under the configured
//! directory; a cached certificate younger than the renewal threshold is
//! reused instead of re-ordered.

use crate::acme::store::{SharedRecordStore, TxtRecord};
use crate::config::Config;
use crate::error::Error;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, OrderStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{watch, RwLock};

/// TLS configuration shared between the HTTPS accept loop and the renewal
/// task, swapped in place when a renewal lands.
pub type SharedTlsConfig = Arc<RwLock<Arc<rustls::ServerConfig>>>;

const DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Challenge record TTL. Only the CA reads these and they live for seconds.
const CHALLENGE_TTL: u32 = 60;

/// Renew once a certificate is 60 days old (Let's Encrypt issues for 90).
const RENEW_AFTER: Duration = Duration::from_secs(60 * 24 * 60 * 60);
const RENEW_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

const ORDER_POLL_DELAY: Duration = Duration::from_secs(5);
const ORDER_MAX_POLLS: usize = 10;

pub struct CertManager {
    domain: String,
    cache_dir: PathBuf,
    records: SharedRecordStore,
}

impl CertManager {
    pub fn new(config: &Config, records: SharedRecordStore) -> Self {
        CertManager {
            domain: config.server.domain.clone(),
            cache_dir: config.server.https.cache_dir.clone(),
            records,
        }
    }

    /// Produce a TLS server configuration backed by a valid certificate for
    /// `<domain>` and `*.<domain>`, obtaining one first if the cache holds
    /// none worth reusing. Called synchronously before the HTTPS listener
    /// starts; an error here is fatal to startup.
    pub async fn tls_config(&self) -> Result<SharedTlsConfig, Error> {
        let (cert_pem, key_pem) = self.ensure_certificate().await?;
        let config = build_server_config(&cert_pem, &key_pem)?;
        Ok(Arc::new(RwLock::new(config)))
    }

    /// Re-check the cached certificate periodically, re-ordering and swapping
    /// the served configuration when it ages past the renewal threshold.
    /// Renewal failures are logged and retried at the next tick.
    pub async fn renew_loop(self, tls: SharedTlsConfig, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(RENEW_CHECK_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("certificate renewal stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            match self.needs_renewal().await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "certificate cache check failed");
                    continue;
                }
            }
            tracing::info!(domain = %self.domain, "renewing wildcard certificate");
            match self.obtain().await {
                Ok((cert_pem, key_pem)) => match build_server_config(&cert_pem, &key_pem) {
                    Ok(config) => {
                        *tls.write().await = config;
                        tracing::info!(domain = %self.domain, "certificate renewed");
                    }
                    Err(err) => tracing::warn!(error = %err, "renewed certificate unusable"),
                },
                Err(err) => tracing::warn!(error = %err, "certificate renewal failed"),
            }
        }
    }

    async fn ensure_certificate(&self) -> Result<(String, String), Error> {
        if !self.needs_renewal().await? {
            tracing::info!(domain = %self.domain, "reusing cached certificate");
            let cert_pem = fs::read_to_string(self.cert_path()).await?;
            let key_pem = fs::read_to_string(self.key_path()).await?;
            return Ok((cert_pem, key_pem));
        }
        self.obtain().await
    }

    async fn needs_renewal(&self) -> Result<bool, Error> {
        let cert_path = self.cert_path();
        if !cert_path.exists() || !self.key_path().exists() {
            return Ok(true);
        }
        let modified = fs::metadata(&cert_path).await?.modified()?;
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        Ok(age > RENEW_AFTER)
    }

    /// Run a full ACME order for the domain and its wildcard.
    async fn obtain(&self) -> Result<(String, String), Error> {
        fs::create_dir_all(&self.cache_dir).await?;
        let account = self.load_or_create_account().await?;

        let identifiers = vec![
            Identifier::Dns(self.domain.clone()),
            Identifier::Dns(format!("*.{}", self.domain)),
        ];
        tracing::info!(domain = %self.domain, "ordering wildcard certificate via DNS-01");
        let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

        let zone = format!("{}.", self.domain);
        let mut provisioned = Vec::new();
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authorization = result?;
            match authorization.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(Error::AcmeOrder(format!(
                        "unexpected authorization status: {status:?}"
                    )));
                }
            }
            let mut challenge = authorization
                .challenge(ChallengeType::Dns01)
                .ok_or(Error::MissingDnsChallenge)?;
            let value = challenge.key_authorization().dns_value();
            let record = TxtRecord::new("_acme-challenge", value, CHALLENGE_TTL);
            self.records.write().await.append(&zone, vec![record.clone()]);
            provisioned.push(record);
            challenge.set_ready().await?;
        }
        drop(authorizations);

        let finalized = self.finalize(&mut order).await;

        // The challenge records have served their purpose either way.
        let mut records = self.records.write().await;
        records.delete(&zone, &provisioned);
        drop(records);

        let (cert_pem, key_pem) = finalized?;
        self.persist(&cert_pem, &key_pem).await?;
        tracing::info!(domain = %self.domain, "wildcard certificate obtained");
        Ok((cert_pem, key_pem))
    }

    async fn finalize(&self, order: &mut instant_acme::Order) -> Result<(String, String), Error> {
        let mut polls = 0;
        loop {
            tokio::time::sleep(ORDER_POLL_DELAY).await;
            let state = order.refresh().await?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(Error::AcmeOrder("order became invalid".to_string()));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    polls += 1;
                    if polls >= ORDER_MAX_POLLS {
                        return Err(Error::AcmeOrder(format!(
                            "order not ready after {polls} polls"
                        )));
                    }
                    tracing::debug!(status = ?state.status, "order not ready yet");
                }
            }
        }

        let key_pem = order.finalize().await?;

        let mut polls = 0;
        let cert_pem = loop {
            tokio::time::sleep(ORDER_POLL_DELAY).await;
            match order.certificate().await? {
                Some(cert) => break cert,
                None => {
                    polls += 1;
                    if polls >= ORDER_MAX_POLLS {
                        return Err(Error::AcmeOrder(format!(
                            "certificate not issued after {polls} polls"
                        )));
                    }
                    tracing::debug!("certificate not issued yet");
                }
            }
        };
        Ok((cert_pem, key_pem))
    }

    async fn load_or_create_account(&self) -> Result<Account, Error> {
        let account_path = self.cache_dir.join("account.json");
        if account_path.exists() {
            let raw = fs::read_to_string(&account_path).await?;
            let credentials: AccountCredentials = serde_json::from_str(&raw)?;
            let account = Account::builder()?.from_credentials(credentials).await?;
            tracing::debug!(path = %account_path.display(), "loaded acme account");
            return Ok(account);
        }

        let (account, credentials) = Account::builder()?
            .create(
                &NewAccount {
                    contact: &[],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                DIRECTORY_URL.to_string(),
                None,
            )
            .await?;
        let raw = serde_json::to_string_pretty(&credentials)?;
        fs::write(&account_path, &raw).await?;
        restrict_permissions(&account_path).await?;
        tracing::info!(path = %account_path.display(), "created acme account");
        Ok(account)
    }

    async fn persist(&self, cert_pem: &str, key_pem: &str) -> Result<(), Error> {
        fs::write(self.cert_path(), cert_pem).await?;
        let key_path = self.key_path();
        fs::write(&key_path, key_pem).await?;
        restrict_permissions(&key_path).await?;
        Ok(())
    }

    fn cert_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.crt", self.domain))
    }

    fn key_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.key", self.domain))
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &std::path::Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &std::path::Path) -> Result<(), Error> {
    Ok(())
}

fn build_server_config(cert_pem: &str, key_pem: &str) -> Result<Arc<rustls::ServerConfig>, Error> {
    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())?
        .ok_or(Error::MissingPrivateKey)?;
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
