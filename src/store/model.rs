//! Wire types for hooks and captured interactions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// A registered capture endpoint. The derived `dns`/`http`/`https` fields are
/// pure functions of `(id, domain)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub id: String,
    pub dns: String,
    pub http: String,
    pub https: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Hook {
    pub fn new(id: String, domain: &str) -> Self {
        Hook {
            dns: format!("{id}.{domain}"),
            http: format!("http://{id}.{domain}"),
            https: format!("https://{id}.{domain}"),
            created_at: OffsetDateTime::now_utc(),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionType {
    Dns,
    Http,
}

/// A captured DNS query or HTTP request attributed to a hook.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Interaction {
    pub id: String,
    #[serde(flatten)]
    pub payload: InteractionPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub source_ip: String,
}

/// Type-tagged interaction payload; serializes as sibling `type` and `data`
/// fields.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum InteractionPayload {
    Dns(DnsData),
    Http(HttpData),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DnsData {
    pub qname: String,
    pub qtype: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpData {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Set when the 10 MiB body cap clipped the captured body, so downstream
    /// analysis does not misread a partial payload as complete.
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl Interaction {
    pub fn dns(id: String, source_ip: String, qname: String, qtype: String) -> Self {
        Interaction {
            id,
            payload: InteractionPayload::Dns(DnsData { qname, qtype }),
            timestamp: OffsetDateTime::now_utc(),
            source_ip,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn http(
        id: String,
        source_ip: String,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
        truncated: bool,
    ) -> Self {
        Interaction {
            id,
            payload: InteractionPayload::Http(HttpData {
                method,
                path,
                headers,
                body,
                truncated,
            }),
            timestamp: OffsetDateTime::now_utc(),
            source_ip,
        }
    }

    pub fn kind(&self) -> InteractionType {
        match self.payload {
            InteractionPayload::Dns(_) => InteractionType::Dns,
            InteractionPayload::Http(_) => InteractionType::Http,
        }
    }
}

/// Point-in-time storage statistics.
#[derive(Debug, Clone)]
pub struct Stats {
    pub hooks_active: usize,
    pub interactions_total: usize,
    pub interactions_dns: usize,
    pub interactions_http: usize,
    pub memory: MemoryStats,
}

/// Process memory measurements in MiB, plus the count of completed forced
/// re-measurements (the GC-cycle analog for a runtime without one).
#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub alloc_mb: u64,
    pub heap_inuse_mb: u64,
    pub sys_mb: u64,
    pub gc_runs: u64,
}

/// Per-hook outcome of a batch poll: the drained interactions, or an error for
/// ids that name no live hook.
#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum PollOutcome {
    Interactions { interactions: Vec<Interaction> },
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_endpoints_derive_from_id_and_domain() {
        let hook = Hook::new("abc123".to_string(), "hookd.test.local");
        assert_eq!(hook.dns, "abc123.hookd.test.local");
        assert_eq!(hook.http, "http://abc123.hookd.test.local");
        assert_eq!(hook.https, "https://abc123.hookd.test.local");
    }

    #[test]
    fn hook_serializes_created_at_rfc3339() {
        let hook = Hook::new("abc".to_string(), "hookd.test.local");
        let value = serde_json::to_value(&hook).unwrap();
        let created_at = value["created_at"].as_str().unwrap();
        assert!(created_at.contains('T'));
        assert!(created_at.ends_with('Z') || created_at.contains('+'));
    }

    #[test]
    fn dns_interaction_wire_shape() {
        let interaction = Interaction::dns(
            "i1".to_string(),
            "198.51.100.7".to_string(),
            "abc.hookd.test.local".to_string(),
            "A".to_string(),
        );
        let value = serde_json::to_value(&interaction).unwrap();
        assert_eq!(value["type"], "dns");
        assert_eq!(value["data"]["qname"], "abc.hookd.test.local");
        assert_eq!(value["data"]["qtype"], "A");
        assert_eq!(value["source_ip"], "198.51.100.7");
        assert!(value["data"].get("truncated").is_none());
    }

    #[test]
    fn http_interaction_wire_shape() {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), "curl/8".to_string());
        let interaction = Interaction::http(
            "i2".to_string(),
            "198.51.100.7".to_string(),
            "POST".to_string(),
            "/x".to_string(),
            headers,
            "hello".to_string(),
            false,
        );
        let value = serde_json::to_value(&interaction).unwrap();
        assert_eq!(value["type"], "http");
        assert_eq!(value["data"]["method"], "POST");
        assert_eq!(value["data"]["path"], "/x");
        assert_eq!(value["data"]["body"], "hello");
        // The truncation flag only appears when the cap clipped the body.
        assert!(value["data"].get("truncated").is_none());
    }

    #[test]
    fn truncated_flag_surfaces_when_set() {
        let interaction = Interaction::http(
            "i3".to_string(),
            "203.0.113.1".to_string(),
            "PUT".to_string(),
            "/big".to_string(),
            HashMap::new(),
            "clipped".to_string(),
            true,
        );
        let value = serde_json::to_value(&interaction).unwrap();
        assert_eq!(value["data"]["truncated"], true);
    }

    #[test]
    fn poll_outcome_shapes() {
        let ok = PollOutcome::Interactions {
            interactions: vec![],
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"interactions": []})
        );
        let err = PollOutcome::Error {
            error: "Hook not found".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"error": "Hook not found"})
        );
    }
}
