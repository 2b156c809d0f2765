//! Dynamic TXT record storage for DNS-01 challenges.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// `SharedRecordStore` is a type alias for an [`AcmeRecordStore`] shared
/// between the DNS handler (read) and the certificate lifecycle (write)
/// through an [`Arc`] and a [`RwLock`].
pub type SharedRecordStore = Arc<RwLock<AcmeRecordStore>>;

/// A provisioned challenge record. Records are matched for deletion by value
/// equality on all four fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub rtype: String,
    pub name: String,
    pub data: String,
    pub ttl: u32,
}

impl TxtRecord {
    pub fn new(name: impl Into<String>, data: impl Into<String>, ttl: u32) -> Self {
        TxtRecord {
            rtype: "TXT".to_string(),
            name: name.into(),
            data: data.into(),
            ttl,
        }
    }
}

/// Per-zone ordered lists of challenge TXT records, keyed by zone name as the
/// writer presents it (conventionally fully qualified, e.g.
/// `hookd.example.com.`).
#[derive(Default, Debug, Clone)]
pub struct AcmeRecordStore {
    zones: HashMap<String, Vec<TxtRecord>>,
}

impl AcmeRecordStore {
    /// Append records to a zone, creating the zone on first use.
    pub fn append(&mut self, zone: &str, records: Vec<TxtRecord>) {
        tracing::info!(zone = %normalized(zone), count = records.len(), "acme: appending records");
        self.zones.entry(zone.to_string()).or_default().extend(records);
    }

    /// Delete records from a zone by value equality on type, name, data and
    /// TTL. Unknown zones and unmatched records are ignored.
    pub fn delete(&mut self, zone: &str, records: &[TxtRecord]) {
        let Some(entries) = self.zones.get_mut(zone) else {
            return;
        };
        tracing::info!(zone = %normalized(zone), count = records.len(), "acme: deleting records");
        entries.retain(|entry| !records.contains(entry));
    }

    /// The zone's records, in insertion order. Unknown zones yield an empty
    /// list.
    pub fn get(&self, zone: &str) -> Vec<TxtRecord> {
        self.zones.get(zone).map_or_else(Vec::new, Clone::clone)
    }

    /// Replace all records in a zone.
    pub fn set(&mut self, zone: &str, records: Vec<TxtRecord>) {
        tracing::info!(zone = %normalized(zone), count = records.len(), "acme: setting records");
        self.zones.insert(zone.to_string(), records);
    }
}

fn normalized(zone: &str) -> String {
    zone.trim_end_matches('.').to_ascii_lowercase()
}
