//! Periodic reclaim of stale hooks and interactions.
//!
//! One timer drives four passes in order: interaction TTL, hook TTL,
//! per-hook FIFO cap, and memory pressure. The evictor never fails; every
//! pass logs what it did and moves on.

use crate::config::EvictionConfig;
use crate::store::{DynStore, Store};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;

/// Per-strategy eviction counters. Strictly monotone: the counters only grow.
/// `expired`, `overflow` and `memory_pressure` count interactions;
/// `hook_expired` counts hooks.
#[derive(Default, Debug)]
pub struct EvictionMetrics {
    expired: AtomicU64,
    hook_expired: AtomicU64,
    overflow: AtomicU64,
    memory_pressure: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionSnapshot {
    pub expired: u64,
    pub hook_expired: u64,
    pub overflow: u64,
    pub memory_pressure: u64,
}

impl EvictionMetrics {
    pub fn snapshot(&self) -> EvictionSnapshot {
        EvictionSnapshot {
            expired: self.expired.load(Ordering::Relaxed),
            hook_expired: self.hook_expired.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
            memory_pressure: self.memory_pressure.load(Ordering::Relaxed),
        }
    }
}

impl EvictionSnapshot {
    pub fn total(&self) -> u64 {
        self.expired + self.hook_expired + self.overflow + self.memory_pressure
    }
}

pub struct Evictor {
    store: DynStore,
    config: EvictionConfig,
    metrics: Arc<EvictionMetrics>,
}

impl Evictor {
    pub fn new(store: DynStore, config: EvictionConfig) -> Self {
        Evictor {
            store,
            config,
            metrics: Arc::new(EvictionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<EvictionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run passes on the configured interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.tick().await;
        tracing::info!(
            interval = ?self.config.cleanup_interval,
            interaction_ttl = ?self.config.interaction_ttl,
            hook_ttl = ?self.config.hook_ttl,
            max_per_hook = self.config.max_per_hook,
            max_memory_mb = self.config.max_memory_mb,
            "eviction system started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("eviction system stopped");
                    return;
                }
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }

    /// One full eviction cycle. Public so tests can drive it without the
    /// timer.
    pub async fn run_once(&self) {
        self.evict_expired().await;
        self.evict_expired_hooks().await;
        self.evict_overflow().await;
        self.evict_memory_pressure().await;
    }

    /// Pass 1: drop interactions older than the interaction TTL.
    async fn evict_expired(&self) {
        let cutoff = OffsetDateTime::now_utc() - self.config.interaction_ttl;
        let all = self.store.read().await.all_interactions().await;
        let mut evicted = 0;

        for (hook_id, interactions) in all {
            let stale: Vec<String> = interactions
                .iter()
                .filter(|interaction| interaction.timestamp < cutoff)
                .map(|interaction| interaction.id.clone())
                .collect();
            if !stale.is_empty() {
                evicted += stale.len();
                self.store
                    .write()
                    .await
                    .delete_interactions(&hook_id, &stale)
                    .await;
            }
        }

        if evicted > 0 {
            self.metrics.expired.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, "ttl eviction completed");
        }
    }

    /// Pass 2: drop hooks older than the hook TTL, interactions and all.
    async fn evict_expired_hooks(&self) {
        let cutoff = OffsetDateTime::now_utc() - self.config.hook_ttl;
        let hooks = self.store.read().await.all_hooks().await;
        let mut evicted = 0;

        for hook in hooks {
            if hook.created_at < cutoff {
                self.store.write().await.delete_hook(&hook.id).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.metrics
                .hook_expired
                .fetch_add(evicted, Ordering::Relaxed);
            tracing::info!(evicted_hooks = evicted, "hook ttl eviction completed");
        }
    }

    /// Pass 3: trim each hook back to the per-hook cap, oldest first.
    async fn evict_overflow(&self) {
        let all = self.store.read().await.all_interactions().await;
        let mut evicted = 0;

        for (hook_id, interactions) in all {
            if interactions.len() <= self.config.max_per_hook {
                continue;
            }
            let excess = interactions.len() - self.config.max_per_hook;
            // Insertion order is arrival order, so the front is the oldest.
            let doomed: Vec<String> = interactions
                .iter()
                .take(excess)
                .map(|interaction| interaction.id.clone())
                .collect();
            evicted += doomed.len();
            self.store
                .write()
                .await
                .delete_interactions(&hook_id, &doomed)
                .await;
        }

        if evicted > 0 {
            self.metrics.overflow.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, "limit eviction completed");
        }
    }

    /// Pass 4: under memory pressure, drop whole hooks oldest-first until
    /// usage falls below the low watermark, re-measuring every ten deletions.
    async fn evict_memory_pressure(&self) {
        // stats() forces a fresh memory measurement.
        let stats = self.store.read().await.stats().await;
        let threshold = self.config.max_memory_mb * 9 / 10;
        if stats.memory.heap_inuse_mb < threshold {
            return;
        }

        tracing::warn!(
            heap_inuse_mb = stats.memory.heap_inuse_mb,
            alloc_mb = stats.memory.alloc_mb,
            sys_mb = stats.memory.sys_mb,
            threshold_mb = threshold,
            max_mb = self.config.max_memory_mb,
            "memory pressure detected"
        );

        let target = self.config.max_memory_mb * 8 / 10;
        let mut hooks = self.store.read().await.all_hooks().await;
        if hooks.is_empty() {
            return;
        }
        hooks.sort_unstable_by_key(|hook| hook.created_at);
        let sizes = self.store.read().await.all_interactions().await;

        let mut heap_inuse_mb = stats.memory.heap_inuse_mb;
        let mut evicted_interactions = 0;
        let mut evicted_hooks: u64 = 0;

        for hook in hooks {
            if heap_inuse_mb < target {
                break;
            }
            evicted_interactions += sizes.get(&hook.id).map_or(0, Vec::len);
            self.store.write().await.delete_hook(&hook.id).await;
            evicted_hooks += 1;
            if evicted_hooks % 10 == 0 {
                heap_inuse_mb = self.store.read().await.stats().await.memory.heap_inuse_mb;
            }
        }

        let stats = self.store.read().await.stats().await;
        if evicted_interactions > 0 {
            self.metrics
                .memory_pressure
                .fetch_add(evicted_interactions as u64, Ordering::Relaxed);
            tracing::warn!(
                evicted_interactions,
                evicted_hooks,
                new_heap_inuse_mb = stats.memory.heap_inuse_mb,
                gc_runs = stats.memory.gc_runs,
                "memory eviction completed"
            );
        }
    }
}
