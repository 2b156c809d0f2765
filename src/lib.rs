//! Hookd
//!
//! An out-of-band interaction capture server. Clients register ephemeral
//! *hooks* and receive a unique subdomain under the configured base domain;
//! any DNS query or HTTP(S) request that touches the subdomain is recorded
//! and handed back on the next poll.
//!
//! The server is authoritative DNS for its own zone, which also lets it
//! solve [RFC-8555][RFC-8555] [DNS-01] challenges for its wildcard TLS
//! certificate without any external DNS provider: the [certificate
//! lifecycle][acme::CertManager] provisions challenge TXT records into an
//! in-process [record store][acme::AcmeRecordStore] that the [DNS
//! responder][dns] serves back to the CA.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
#![warn(clippy::pedantic)]

pub mod acme;
pub mod api;
pub mod config;
pub mod dns;
pub mod error;
pub mod eviction;
pub mod store;

pub use config::{Config, SharedConfig};
pub use store::{DynStore, InMemoryStore};
