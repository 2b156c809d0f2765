//! Authoritative DNS for the capture zone.
//!
//! # Capture
//!
//! Every query for a subdomain of the configured
//! [`Config::server.domain`][crate::config::ServerConfig] is recorded as a
//! DNS interaction under the hook named by the label next to the zone apex,
//! whatever the query type. A query for a label that no registered hook owns
//! is still answered, but nothing is recorded.
//!
//! E.g. after `POST /register` returned hook id `abc123`:
//!
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 abc123.hookd.example.com +short A
//! 93.184.216.34
//! ```
//!
//! leaves one interaction behind for `GET /poll/abc123` to drain.
//!
//! # Answers
//!
//! All answers are authoritative with a 60 second TTL. `A` queries return
//! the server's own outbound IPv4 address (discovered at startup), `TXT`
//! queries a fixed banner, `NS` and `MX` point back at the zone apex, and
//! `AAAA` or anything else gets an empty answer. Queries for names outside
//! the zone get an empty response; non-queries get NOTIMP.
//!
//! # Dynamic challenge records
//!
//! `TXT` queries for `_acme-challenge.*` names are answered from the
//! [ACME record store][crate::acme] that the certificate lifecycle
//! provisions, matching the name against each candidate suffix zone. These
//! bypass the zone check so delegated challenge names resolve too, and an
//! unmatched challenge name yields an empty authoritative answer rather
//! than NXDOMAIN.

pub mod handlers;
pub mod server;

pub use server::new;
