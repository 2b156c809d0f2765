//! Error types.

use trust_dns_server::proto::error::ProtoError;

/// Error enumerates the possible hookd error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a poll names a hook id that was never registered, or that
    /// has since been evicted. Surfaced as HTTP 404 on `GET /poll/{id}` and as
    /// an inline `error` entry in batch poll results.
    #[error("Hook not found")]
    HookNotFound,

    /// Returned when clients `POST /poll` with an empty id list.
    #[error("hook_ids cannot be empty")]
    EmptyBatch,

    /// Returned when a loaded configuration fails validation. The message
    /// names the offending key.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned at startup when the outbound-interface probe yields no IPv4
    /// address to advertise in A answers.
    #[error("no outbound IPv4 address detected")]
    NoOutboundIpv4,

    /// Returned when an ACME authorization offers no DNS-01 challenge. The
    /// certificate lifecycle can only solve challenges it can serve from its
    /// own authoritative zone.
    #[error("authorization offers no DNS-01 challenge")]
    MissingDnsChallenge,

    /// Returned when a certificate order ends in a state it cannot proceed
    /// from, or exceeds its polling budget.
    #[error("certificate order failed: {0}")]
    AcmeOrder(String),

    /// Returned when a cached certificate PEM contains no private key.
    #[error("certificate cache holds no private key")]
    MissingPrivateKey,

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when the configuration file is not valid YAML.
    #[error("invalid YAML")]
    InvalidYaml(#[from] serde_yaml::Error),

    /// Returned when JSON serialization fails.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when the DNS server encounters a generic DNS protocol error.
    #[error("DNS error")]
    DNSError(#[from] ProtoError),

    /// Returned when building a TLS server configuration fails.
    #[error("TLS error")]
    Tls(#[from] rustls::Error),

    /// Returned when the ACME client fails to progress an order.
    #[error(transparent)]
    Acme(#[from] instant_acme::Error),
}
