use crate::eviction::EvictionSnapshot;
use crate::store::model::{Hook, Interaction, MemoryStats, PollOutcome, Stats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize, Debug, Clone, Default)]
pub(super) struct RegisterRequest {
    #[serde(default)]
    pub count: Option<i64>,
}

/// A single registration returns the hook at the top level; multi-count
/// registrations wrap them in `hooks`. Clients tell the shapes apart by the
/// presence of `id`.
#[derive(Serialize, Debug)]
#[serde(untagged)]
pub(super) enum RegisterResponse {
    Single(Box<Hook>),
    Many { hooks: Vec<Hook> },
}

#[derive(Serialize, Debug)]
pub(super) struct PollResponse {
    pub interactions: Vec<Interaction>,
}

#[derive(Serialize, Debug)]
pub(super) struct BatchPollResponse {
    pub results: HashMap<String, PollOutcome>,
}

#[derive(Serialize, Debug)]
pub(super) struct MetricsResponse {
    pub hooks: HookMetrics,
    pub interactions: InteractionMetrics,
    pub evictions: EvictionMetricsBody,
    pub memory: MemoryStats,
}

#[derive(Serialize, Debug)]
pub(super) struct HookMetrics {
    pub active: usize,
}

#[derive(Serialize, Debug)]
pub(super) struct InteractionMetrics {
    pub total: usize,
    pub by_type: InteractionsByType,
}

#[derive(Serialize, Debug)]
pub(super) struct InteractionsByType {
    pub dns: usize,
    pub http: usize,
}

#[derive(Serialize, Debug)]
pub(super) struct EvictionMetricsBody {
    pub total: u64,
    pub by_strategy: EvictionsByStrategy,
}

#[derive(Serialize, Debug)]
pub(super) struct EvictionsByStrategy {
    pub expired: u64,
    pub overflow: u64,
    pub memory_pressure: u64,
    pub hook_expired: u64,
}

impl MetricsResponse {
    pub(super) fn compose(stats: &Stats, evictions: &EvictionSnapshot) -> Self {
        MetricsResponse {
            hooks: HookMetrics {
                active: stats.hooks_active,
            },
            interactions: InteractionMetrics {
                total: stats.interactions_total,
                by_type: InteractionsByType {
                    dns: stats.interactions_dns,
                    http: stats.interactions_http,
                },
            },
            evictions: EvictionMetricsBody {
                total: evictions.total(),
                by_strategy: EvictionsByStrategy {
                    expired: evictions.expired,
                    overflow: evictions.overflow,
                    memory_pressure: evictions.memory_pressure,
                    hook_expired: evictions.hook_expired,
                },
            },
            memory: stats.memory,
        }
    }
}
