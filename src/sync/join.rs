//! Live enrichment joins.
//!
//! A [`Joiner`] resolves foreign ids referenced by visible rows to values
//! stored elsewhere, keeping one live value listener per referenced id.
//! Reconciliation diffs the desired id set against the tracked one, so the
//! open listeners always match the ids handed in last.

use crate::error::{Result, SyncError};
use crate::remote::{DropReason, FeedEvent, SharedStore};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::feed::Feed;

/// Cached state for one foreign id.
struct JoinEntry<V> {
    feed: Feed,
    value: Option<V>,
    loading: bool,
}

/// Ids opened and closed by one reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl JoinDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Maps a foreign id to the store path holding its value.
pub type PathFn = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Live id → value join with per-id loading flags.
pub struct Joiner<V> {
    store: SharedStore,
    path_for: PathFn,
    entries: HashMap<String, JoinEntry<V>>,
    torn_down: bool,
}

impl<V: DeserializeOwned> Joiner<V> {
    /// `path_for` is fixed for the joiner's lifetime.
    pub fn new(store: SharedStore, path_for: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            store,
            path_for: Box::new(path_for),
            entries: HashMap::new(),
            torn_down: false,
        }
    }

    /// Make the tracked id set equal to `ids`.
    ///
    /// Nothing is opened or closed when the set is unchanged.
    pub fn reconcile<I, K>(&mut self, ids: I) -> Result<JoinDiff>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        if self.torn_down {
            return Err(SyncError::TornDown);
        }

        let desired: BTreeSet<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        let mut diff = JoinDiff::default();

        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !desired.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(mut entry) = self.entries.remove(&id) {
                entry.feed.close();
            }
            diff.removed.push(id);
        }

        for id in desired {
            if self.entries.contains_key(&id) {
                continue;
            }
            let path = (self.path_for)(&id);
            let feed = Feed::value(self.store.clone(), &path);
            self.entries.insert(
                id.clone(),
                JoinEntry {
                    feed,
                    value: None,
                    loading: true,
                },
            );
            diff.added.push(id);
        }

        if !diff.is_empty() {
            diff.removed.sort();
            debug!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                tracked = self.entries.len(),
                "join reconciled"
            );
        }
        Ok(diff)
    }

    /// Apply pushed values. Returns how many entries were updated.
    pub fn pump(&mut self) -> usize {
        let mut updated = 0;
        for (id, entry) in self.entries.iter_mut() {
            for event in entry.feed.poll() {
                let FeedEvent::Value(value) = event else {
                    continue;
                };
                entry.value = match value.map(serde_json::from_value::<V>).transpose() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(id = %id, path = entry.feed.target(), error = %e, "undecodable join value");
                        None
                    }
                };
                entry.loading = false;
                updated += 1;
            }
            // A failed listener will never deliver; stop waiting on it.
            if entry.loading && entry.feed.failure().is_some() {
                entry.loading = false;
            }
        }
        updated
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries.get(id).and_then(|entry| entry.value.as_ref())
    }

    /// Resolved values by id.
    pub fn data(&self) -> HashMap<String, &V> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| entry.value.as_ref().map(|v| (id.clone(), v)))
            .collect()
    }

    /// True while any tracked id is waiting for its first value.
    pub fn loading(&self) -> bool {
        self.entries.values().any(|entry| entry.loading)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.entries.get(id).map_or(false, |entry| entry.loading)
    }

    pub fn tracked_ids(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Ids whose listener is still open.
    pub fn subscribed_ids(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.feed.is_open())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<(String, DropReason)> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| entry.feed.failure().map(|r| (id.clone(), r.clone())))
            .collect()
    }

    /// Close every listener and forget all values. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for (_, mut entry) in self.entries.drain() {
            entry.feed.close();
        }
    }
}
