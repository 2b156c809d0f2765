//! HTTP API and wildcard capture surface.
//!
//! # API Endpoints
//!
//! API endpoints answer only on hosts without a hook label and require an
//! `X-API-Key` header matching the configured token (except `/metrics`).
//!
//! ## `/register` (POST)
//!
//!   Body is an optional JSON `{"count": N}`. A missing, unparseable or
//!   below-one count registers a single hook and returns it at the top
//!   level:
//!
//!   ```json
//!   {"id":"6c6f6f6b75703131","dns":"6c6f6f6b75703131.hookd.example.com",
//!    "http":"http://6c6f6f6b75703131.hookd.example.com",
//!    "https":"https://6c6f6f6b75703131.hookd.example.com",
//!    "created_at":"2025-03-01T12:00:00Z"}
//!   ```
//!
//!   Counts above one return `{"hooks":[...]}` with that many entries.
//!
//! ## `/poll/{id}` (GET)
//!
//!   Atomically returns and clears the hook's captured interactions as
//!   `{"interactions":[...]}`, or HTTP 404 `{"error":"Hook not found"}`.
//!   Paths under `/poll/` with anything but exactly one non-empty id
//!   segment are HTTP 400 `{"error":"Invalid path format"}`.
//!
//! ## `/poll` (POST)
//!
//!   Body is a JSON array of hook ids. Returns `{"results":{...}}` with one
//!   entry per requested id: either `{"interactions":[...]}` (drained as by
//!   `/poll/{id}`) or `{"error":"Hook not found"}`. Each id is drained
//!   atomically but the batch as a whole is not a snapshot.
//!
//! ## `/metrics` (GET)
//!
//!   Unauthenticated counters: active hooks, interactions by type, eviction
//!   totals by strategy, and process memory.
//!
//! # Wildcard capture
//!
//! Any request whose Host is `<label>.<domain>` is captured as an HTTP
//! interaction under hook `<label>`, whatever the method, path or body (up
//! to 10 MiB), and answered with an empty 200. The capture surface is never
//! authenticated.

mod api_error;
mod capture;
mod middleware;
mod model;
mod routes;
pub mod server;

pub use server::{serve_http, serve_https};
