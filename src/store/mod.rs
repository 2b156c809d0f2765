//! Hook and interaction storage.
//!
//! The store owns two maps guarded together by one reader/writer lock: hook
//! id to [`Hook`], and hook id to the hook's captured [`Interaction`]s in
//! arrival order. An interaction exists only under a live hook; deleting a
//! hook removes its interactions with it, and writes naming an unknown hook
//! are dropped without creating one.
//!
//! Polling is an atomic read-and-clear: the interaction list is swapped for
//! an empty one under the exclusive lock, so no caller can observe a torn
//! read where drained interactions reappear.

use crate::error::Error;
use crate::store::model::{Hook, Interaction, PollOutcome, Stats};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod mem;
pub mod memory;
pub mod model;

#[allow(clippy::module_name_repetitions)]
pub use memory::InMemoryStore;
pub use model::{DnsData, HttpData, InteractionPayload, InteractionType, MemoryStats};

/// Mints opaque ids for hooks and interactions. Ids land in DNS labels, so
/// implementations must produce case-insensitive alphanumeric tokens of at
/// most 32 characters, collision-free for the process lifetime.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// The default generator: 8 random bytes rendered lowercase hex.
pub fn random_id_generator() -> IdGenerator {
    Arc::new(|| {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    })
}

/// `DynStore` is a type alias for a [`Store`] shared between the capture
/// surfaces, the API, and the evictor, coordinating through an [`Arc`] and a
/// [`RwLock`]: reads take shared access, writes exclusive access.
#[allow(clippy::module_name_repetitions)]
pub type DynStore = Arc<RwLock<dyn Store + Send + Sync>>;

/// An async trait describing hook and interaction storage.
#[async_trait::async_trait]
pub trait Store {
    /// Mint a new hook under the given base domain and return it.
    async fn create_hook(&mut self, domain: &str) -> Hook;

    /// Look up a hook by id.
    async fn get_hook(&self, id: &str) -> Option<Hook>;

    /// Append an interaction to a hook. Unknown hook ids are silently
    /// ignored; the hook is never created as a side effect.
    async fn add_interaction(&mut self, hook_id: &str, interaction: Interaction);

    /// Atomically drain and return a hook's interactions. Unknown hook ids
    /// yield an empty list.
    async fn poll(&mut self, hook_id: &str) -> Vec<Interaction>;

    /// Remove the named interactions from a hook, preserving the order of
    /// survivors.
    async fn delete_interactions(&mut self, hook_id: &str, interaction_ids: &[String]);

    /// Remove a hook and, with it, all of its interactions.
    async fn delete_hook(&mut self, id: &str);

    /// Snapshot of all hooks, for the evictor.
    async fn all_hooks(&self) -> Vec<Hook>;

    /// Snapshot of all interactions keyed by hook id, for the evictor.
    async fn all_interactions(&self) -> HashMap<String, Vec<Interaction>>;

    /// Counts plus a fresh memory measurement.
    async fn stats(&self) -> Stats;
}

/// Drain interactions for each id in turn. Each id's read-and-clear is atomic
/// but the batch as a whole is not: the write lock is taken per id, never
/// across the batch, so captures interleave freely with a long id list.
pub async fn poll_batch(store: &DynStore, ids: &[String]) -> HashMap<String, PollOutcome> {
    let mut results = HashMap::with_capacity(ids.len());
    for id in ids {
        let mut guard = store.write().await;
        let outcome = if guard.get_hook(id).await.is_some() {
            PollOutcome::Interactions {
                interactions: guard.poll(id).await,
            }
        } else {
            PollOutcome::Error {
                error: Error::HookNotFound.to_string(),
            }
        };
        drop(guard);
        results.insert(id.clone(), outcome);
    }
    results
}
