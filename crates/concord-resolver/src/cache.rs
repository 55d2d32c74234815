//! Per-run resolution cache.
//!
//! Keys are canonical pointer strings. A pointer that is being fetched has a
//! single shared in-flight future; later callers await that future instead of
//! starting a second fetch. Failures are not cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use concord_spec_parser::SchemaNode;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::ResolveError;

/// Result of one fetch, shared between every waiter.
pub type FetchFuture = BoxFuture<'static, Result<SchemaNode, ResolveError>>;

type SharedFetch = Shared<FetchFuture>;

enum Slot {
    Ready(SchemaNode),
    InFlight { generation: u64, fetch: SharedFetch },
}

/// Snapshot of cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of resolved entries.
    pub resolved: usize,
    /// Number of fetches currently in flight.
    pub in_flight: usize,
    /// Total fetches started since the last reset.
    pub fetches_started: usize,
    /// Resolved keys, sorted.
    pub keys: Vec<String>,
}

/// Mapping from canonical pointer to resolved schema body.
#[derive(Default)]
pub struct ResolutionCache {
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
    fetches_started: AtomicUsize,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached body for `key`, if already resolved.
    pub fn get(&self, key: &str) -> Option<SchemaNode> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(node)) => Some(node.clone()),
            _ => None,
        }
    }

    /// Return the cached body for `key`, joining an in-flight fetch if one
    /// exists, or starting `fetch` otherwise.
    pub async fn get_or_fetch<F>(&self, key: &str, fetch: F) -> Result<SchemaNode, ResolveError>
    where
        F: FnOnce() -> FetchFuture,
    {
        let (generation, shared) = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(Slot::Ready(node)) => return Ok(node.clone()),
                Some(Slot::InFlight { generation, fetch }) => (*generation, fetch.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let shared = fetch().shared();
                    slots.insert(
                        key.to_string(),
                        Slot::InFlight {
                            generation,
                            fetch: shared.clone(),
                        },
                    );
                    self.fetches_started.fetch_add(1, Ordering::Relaxed);
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut slots = self.slots.lock();
        let owns_slot = matches!(
            slots.get(key),
            Some(Slot::InFlight { generation: g, .. }) if *g == generation
        );
        if owns_slot {
            match &result {
                Ok(node) => {
                    slots.insert(key.to_string(), Slot::Ready(node.clone()));
                }
                Err(_) => {
                    slots.remove(key);
                }
            }
        }
        result
    }

    /// Drop every entry. Must be called between independent runs that share
    /// a cache.
    pub fn clear(&self) {
        self.slots.lock().clear();
        self.fetches_started.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.lock();
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        CacheStats {
            resolved: keys.len(),
            in_flight: slots.len() - keys.len(),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            keys,
        }
    }
}
