use crate::error::Error;
use rand::RngCore;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub eviction: EvictionConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub domain: String,
    pub dns: DnsConfig,
    pub http: HttpConfig,
    pub https: HttpsConfig,
    pub api: ApiConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DnsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HttpsConfig {
    pub enabled: bool,
    pub port: u16,
    pub autocert: bool,
    pub cache_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub auth_token: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EvictionConfig {
    #[serde(with = "humantime_serde")]
    pub interaction_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub hook_ttl: Duration,
    pub max_per_hook: usize,
    pub max_memory_mb: u64,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            eviction: EvictionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            domain: "hookd.example.com".to_string(),
            dns: DnsConfig::default(),
            http: HttpConfig::default(),
            https: HttpsConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        DnsConfig {
            enabled: true,
            port: 53,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig { port: 80 }
    }
}

impl Default for HttpsConfig {
    fn default() -> Self {
        HttpsConfig {
            enabled: false,
            port: 443,
            autocert: false,
            cache_dir: PathBuf::from("/var/lib/hookd/certs"),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            auth_token: String::new(),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        EvictionConfig {
            interaction_ttl: Duration::from_secs(60 * 60),
            hook_ttl: Duration::from_secs(24 * 60 * 60),
            max_per_hook: 1000,
            max_memory_mb: 1800,
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        ObservabilityConfig {
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            metrics_enabled: true,
        }
    }
}

const VALID_LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: &[&str] = &["json", "text"];

impl Config {
    /// Load a `Config` from the YAML file at the given path, or return an
    /// Error. The loaded configuration is normalized and validated.
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let mut conf: Config = serde_yaml::from_reader(reader)?;
        conf.normalize();
        conf.validate()?;
        Ok(conf)
    }

    /// Lowercase the domain and strip a trailing dot so host and qname
    /// comparisons can assume a canonical form.
    fn normalize(&mut self) {
        self.server.domain = self
            .server
            .domain
            .trim_end_matches('.')
            .to_ascii_lowercase();
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.server.domain.is_empty() {
            return Err(Error::InvalidConfig("server.domain is required".into()));
        }
        if self.server.dns.enabled && self.server.dns.port == 0 {
            return Err(Error::InvalidConfig(
                "server.dns.port must be between 1 and 65535".into(),
            ));
        }
        if self.server.http.port == 0 {
            return Err(Error::InvalidConfig(
                "server.http.port must be between 1 and 65535".into(),
            ));
        }
        if self.server.https.enabled && self.server.https.port == 0 {
            return Err(Error::InvalidConfig(
                "server.https.port must be between 1 and 65535".into(),
            ));
        }
        if self.server.https.enabled
            && self.server.https.autocert
            && self.server.https.cache_dir.as_os_str().is_empty()
        {
            return Err(Error::InvalidConfig(
                "server.https.cache_dir is required when autocert is enabled".into(),
            ));
        }
        if self.eviction.interaction_ttl.is_zero() {
            return Err(Error::InvalidConfig(
                "eviction.interaction_ttl must be positive".into(),
            ));
        }
        if self.eviction.hook_ttl.is_zero() {
            return Err(Error::InvalidConfig(
                "eviction.hook_ttl must be positive".into(),
            ));
        }
        if self.eviction.max_per_hook == 0 {
            return Err(Error::InvalidConfig(
                "eviction.max_per_hook must be positive".into(),
            ));
        }
        if self.eviction.max_memory_mb == 0 {
            return Err(Error::InvalidConfig(
                "eviction.max_memory_mb must be positive".into(),
            ));
        }
        if self.eviction.cleanup_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "eviction.cleanup_interval must be positive".into(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(Error::InvalidConfig(
                "observability.log_level must be one of: debug, info, warn, error".into(),
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.observability.log_format.as_str()) {
            return Err(Error::InvalidConfig(
                "observability.log_format must be one of: json, text".into(),
            ));
        }
        Ok(())
    }

    /// Ensure an API auth token exists, synthesizing one when the config left
    /// it empty. Returns the token and whether it was generated; the caller is
    /// expected to log a generated token exactly once.
    pub fn ensure_auth_token(&mut self) -> (String, bool) {
        if !self.server.api.auth_token.is_empty() {
            return (self.server.api.auth_token.clone(), false);
        }
        let token = random_token();
        self.server.api.auth_token = token.clone();
        (token, true)
    }

    /// Extract the hook label from a host or query name: the label
    /// immediately left of the base domain. Expects `name` lowercase with no
    /// trailing dot or port. Returns `None` for the bare domain and for names
    /// outside the zone.
    pub fn hook_label<'a>(&self, name: &'a str) -> Option<&'a str> {
        let prefix = name
            .strip_suffix(self.server.domain.as_str())?
            .strip_suffix('.')?;
        prefix.rsplit('.').find(|label| !label.is_empty())
    }

    /// Whether the name is the base domain or one of its subdomains.
    pub fn in_zone(&self, name: &str) -> bool {
        name == self.server.domain
            || name
                .strip_suffix(self.server.domain.as_str())
                .map_or(false, |prefix| prefix.ends_with('.'))
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
