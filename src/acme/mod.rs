//! ACME DNS-01 challenge plumbing.
//!
//! Two halves share one record store. The [certificate
//! lifecycle][lifecycle::CertManager] writes `_acme-challenge` TXT records
//! into the [store][store::AcmeRecordStore] before telling the CA to
//! validate, and deletes them afterwards; the [DNS
//! handler][crate::dns] reads the store when answering challenge queries.
//! The store is passed into both sides explicitly so integration tests can
//! drive challenge resolution without a CA.

pub mod lifecycle;
pub mod store;

pub use lifecycle::CertManager;
pub use store::{AcmeRecordStore, SharedRecordStore, TxtRecord};
