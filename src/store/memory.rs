//! An in-memory implementation of the [`Store`][super::Store] trait.
//!
//! Makes no effort to persist hooks or interactions between restarts.

use crate::store::mem::MemoryMonitor;
use crate::store::model::{Hook, Interaction, InteractionType, Stats};
use crate::store::{IdGenerator, Store};
use std::collections::{HashMap, HashSet};

/// In-memory hook storage. Hooks live in a [`HashMap`] keyed by id with a
/// parallel map of per-hook interaction lists kept in arrival order, which is
/// the FIFO the evictor trims from.
pub struct InMemoryStore {
    hooks: HashMap<String, Hook>,
    interactions: HashMap<String, Vec<Interaction>>,
    generate_id: IdGenerator,
    memory: MemoryMonitor,
}

impl InMemoryStore {
    pub fn new(generate_id: IdGenerator) -> Self {
        InMemoryStore {
            hooks: HashMap::new(),
            interactions: HashMap::new(),
            generate_id,
            memory: MemoryMonitor::default(),
        }
    }

    /// Insert a pre-built hook, bypassing id minting. Lets tests stage hooks
    /// with chosen ids or creation times.
    #[cfg(test)]
    pub(crate) fn insert_hook(&mut self, hook: Hook) {
        self.interactions.entry(hook.id.clone()).or_default();
        self.hooks.insert(hook.id.clone(), hook);
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn create_hook(&mut self, domain: &str) -> Hook {
        let id = (self.generate_id)();
        let hook = Hook::new(id.clone(), domain);
        self.hooks.insert(id.clone(), hook.clone());
        self.interactions.insert(id, Vec::new());
        hook
    }

    async fn get_hook(&self, id: &str) -> Option<Hook> {
        self.hooks.get(id).cloned()
    }

    async fn add_interaction(&mut self, hook_id: &str, interaction: Interaction) {
        // Interactions for unknown hooks are dropped, never auto-registered.
        if !self.hooks.contains_key(hook_id) {
            return;
        }
        self.interactions
            .entry(hook_id.to_string())
            .or_default()
            .push(interaction);
    }

    async fn poll(&mut self, hook_id: &str) -> Vec<Interaction> {
        self.interactions
            .get_mut(hook_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    async fn delete_interactions(&mut self, hook_id: &str, interaction_ids: &[String]) {
        let Some(interactions) = self.interactions.get_mut(hook_id) else {
            return;
        };
        let doomed: HashSet<&str> = interaction_ids.iter().map(String::as_str).collect();
        interactions.retain(|interaction| !doomed.contains(interaction.id.as_str()));
    }

    async fn delete_hook(&mut self, id: &str) {
        self.hooks.remove(id);
        self.interactions.remove(id);
    }

    async fn all_hooks(&self) -> Vec<Hook> {
        self.hooks.values().cloned().collect()
    }

    async fn all_interactions(&self) -> HashMap<String, Vec<Interaction>> {
        self.interactions.clone()
    }

    async fn stats(&self) -> Stats {
        let mut stats = Stats {
            hooks_active: self.hooks.len(),
            interactions_total: 0,
            interactions_dns: 0,
            interactions_http: 0,
            memory: self.memory.snapshot(),
        };
        for interactions in self.interactions.values() {
            stats.interactions_total += interactions.len();
            for interaction in interactions {
                match interaction.kind() {
                    InteractionType::Dns => stats.interactions_dns += 1,
                    InteractionType::Http => stats.interactions_http += 1,
                }
            }
        }
        stats
    }
}
