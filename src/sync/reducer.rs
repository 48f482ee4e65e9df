//! Keyed merge of change notifications into a collection state.
//!
//! The reducer does not care which feed an event came from, so any number
//! of overlapping windows can share one instance. Convergence is per id:
//! adds and changes always overwrite, and a removal only applies while the
//! stored version is the one the removal was issued for.

use crate::types::{ChangeEvent, ChangeKind, Versioned};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

/// Outcome of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Removed,
    /// Removal for an older version than the one held; ignored.
    StaleRemoval,
    /// Removal for an id that is not held; ignored.
    Missing,
}

impl Applied {
    /// Whether the state changed.
    pub fn is_effective(self) -> bool {
        matches!(self, Applied::Inserted | Applied::Replaced | Applied::Removed)
    }
}

/// Newest first, ties by id.
pub fn by_recency<T: Versioned>(a: &T, b: &T) -> Ordering {
    b.updated_at()
        .cmp(&a.updated_at())
        .then_with(|| a.id().cmp(b.id()))
}

/// A map from id to latest accepted item, with a memoized sorted view.
#[derive(Debug)]
pub struct KeyedReducer<T> {
    items: HashMap<String, T>,
    /// Bumped on every effective change; the sorted view's cache key.
    revision: u64,
    sorted: Vec<T>,
    sorted_revision: Option<u64>,
}

impl<T> Default for KeyedReducer<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            revision: 0,
            sorted: Vec::new(),
            sorted_revision: None,
        }
    }
}

impl<T: Versioned + Clone> KeyedReducer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: ChangeEvent<T>) -> Applied {
        let item = event.item;
        let outcome = match event.kind {
            ChangeKind::Added | ChangeKind::Changed => {
                match self.items.insert(item.id().to_string(), item) {
                    Some(_) => Applied::Replaced,
                    None => Applied::Inserted,
                }
            }
            ChangeKind::Removed => {
                let held = self.items.get(item.id()).map(Versioned::updated_at);
                match held {
                    Some(version) if version == item.updated_at() => {
                        self.items.remove(item.id());
                        Applied::Removed
                    }
                    Some(version) => {
                        trace!(
                            id = item.id(),
                            held = version.0,
                            removed = item.updated_at().0,
                            "stale removal ignored"
                        );
                        Applied::StaleRemoval
                    }
                    None => Applied::Missing,
                }
            }
        };

        if outcome.is_effective() {
            self.revision += 1;
        }
        outcome
    }

    /// Apply a batch and return how many events changed the state.
    pub fn apply_all(&mut self, events: impl IntoIterator<Item = ChangeEvent<T>>) -> usize {
        events
            .into_iter()
            .map(|event| self.apply(event))
            .filter(|outcome| outcome.is_effective())
            .count()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Unordered values.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// The item that orders first by `(updatedAt, id)`, i.e. the cursor a
    /// backward page continues from.
    pub fn oldest(&self) -> Option<&T> {
        self.items.values().min_by(|a, b| {
            a.updated_at()
                .cmp(&b.updated_at())
                .then_with(|| a.id().cmp(b.id()))
        })
    }

    /// Values ordered newest first. Recomputed only after a change.
    pub fn sorted(&mut self) -> &[T] {
        if self.sorted_revision != Some(self.revision) {
            let mut sorted: Vec<T> = self.items.values().cloned().collect();
            sorted.sort_by(by_recency);
            self.sorted = sorted;
            self.sorted_revision = Some(self.revision);
        }
        &self.sorted
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.revision += 1;
        }
    }
}
