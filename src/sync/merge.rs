//! Pinned + windowed feed merge.
//!
//! Outstanding borrows must stay visible however old they are, while the
//! windowed feed browses every borrow by recency. Both feeds can report the
//! same id; the pinned copy wins and the id is listed once.

use crate::error::{Result, SyncError};
use crate::remote::{DropReason, Query, SharedStore};
use crate::types::{Borrow, Clock, Versioned};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::feed::Feed;
use super::reducer::KeyedReducer;
use super::window::{drain_into, QueryWindow, WindowManager};

/// Pinned values first, then windowed values whose id is not pinned.
pub fn merge_pinned<T: Versioned + Clone>(pinned: &[T], windowed: &[T]) -> Vec<T> {
    let pinned_ids: HashSet<&str> = pinned.iter().map(Versioned::id).collect();
    pinned
        .iter()
        .chain(windowed.iter().filter(|item| !pinned_ids.contains(item.id())))
        .cloned()
        .collect()
}

/// One unconditional live query merged with a paginated one.
pub struct PinnedMerge<T> {
    store: SharedStore,
    pinned_query: Query,
    pinned_feed: Option<Feed>,
    pinned: KeyedReducer<T>,
    windowed: WindowManager<T>,
    torn_down: bool,
}

impl PinnedMerge<Borrow> {
    /// Outstanding borrows pinned over the full borrow history.
    pub fn borrows(store: SharedStore, clock: Arc<dyn Clock>, path: &str) -> Self {
        let pinned = Query::new(path).equal_to("returnTime", Value::Null);
        Self::new(store, clock, pinned, Query::new(path))
    }
}

impl<T> PinnedMerge<T>
where
    T: Versioned + Clone + DeserializeOwned,
{
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, pinned_query: Query, windowed_base: Query) -> Self {
        let windowed = WindowManager::new(store.clone(), clock, windowed_base);
        Self {
            store,
            pinned_query,
            pinned_feed: None,
            pinned: KeyedReducer::new(),
            windowed,
            torn_down: false,
        }
    }

    /// Subscribe the pinned query and the forward window.
    pub fn open(&mut self) -> Result<()> {
        if self.torn_down {
            return Err(SyncError::TornDown);
        }
        if self.pinned_feed.is_none() {
            self.pinned_feed = Some(Feed::query(self.store.clone(), self.pinned_query.clone()));
            debug!(path = %self.pinned_query.path, "pinned feed opened");
        }
        self.windowed.open_initial_window()
    }

    /// Paginate the windowed feed only.
    pub fn load_more(&mut self, count: usize) -> Result<QueryWindow> {
        self.windowed.load_more(count)
    }

    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        if let Some(feed) = self.pinned_feed.as_mut() {
            applied += drain_into(feed, &mut self.pinned);
        }
        applied + self.windowed.pump()
    }

    /// The display list.
    pub fn merged(&mut self) -> Vec<T> {
        let pinned = self.pinned.sorted().to_vec();
        merge_pinned(&pinned, self.windowed.sorted_view())
    }

    pub fn pinned(&self) -> &KeyedReducer<T> {
        &self.pinned
    }

    pub fn windowed(&self) -> &WindowManager<T> {
        &self.windowed
    }

    pub fn windowed_mut(&mut self) -> &mut WindowManager<T> {
        &mut self.windowed
    }

    pub fn has_more(&self) -> bool {
        self.windowed.has_more()
    }

    pub fn failures(&self) -> Vec<DropReason> {
        let mut failures: Vec<DropReason> = self
            .pinned_feed
            .iter()
            .filter_map(|feed| feed.failure().cloned())
            .collect();
        failures.extend(self.windowed.failures());
        failures
    }

    /// Close the pinned feed and every window. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(feed) = self.pinned_feed.as_mut() {
            feed.close();
        }
        self.windowed.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryStore, RemoteStore};
    use crate::types::{ManualClock, Timestamp};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq)]
    struct Item(&'static str, i64);

    impl Versioned for Item {
        fn id(&self) -> &str {
            self.0
        }

        fn updated_at(&self) -> Timestamp {
            Timestamp(self.1)
        }
    }

    #[test]
    fn test_merge_dedups_with_pinned_priority() {
        let pinned = vec![Item("A", 1), Item("B", 2)];
        let windowed = vec![Item("B", 9), Item("C", 3)];

        let merged = merge_pinned(&pinned, &windowed);
        assert_eq!(merged, vec![Item("A", 1), Item("B", 2), Item("C", 3)]);
    }

    #[test]
    fn test_merge_empty_sides() {
        let items = vec![Item("A", 1)];
        assert_eq!(merge_pinned(&[], &items), items);
        assert_eq!(merge_pinned(&items, &[]), items);
    }

    fn borrow(store: &MemoryStore, id: &str, updated: i64, returned: Option<i64>) {
        let mut doc = json!({
            "sid": "m1",
            "bookId": "k1",
            "seriesId": "s1",
            "borrowTime": 1,
            "updatedAt": updated
        });
        if let Some(t) = returned {
            doc["returnTime"] = json!(t);
        }
        let mut updates = BTreeMap::new();
        updates.insert(format!("borrows/{}", id), doc);
        store.update(updates).unwrap();
    }

    #[test]
    fn test_old_outstanding_borrow_pinned_ahead_of_window() {
        let store = Arc::new(MemoryStore::new());
        borrow(&store, "old", 1, None);
        for i in 2..10 {
            borrow(&store, &format!("r{}", i), i, Some(i));
        }

        let mut merge = PinnedMerge::borrows(store.clone(), Arc::new(ManualClock::new(100)), "borrows");
        merge.open().unwrap();
        merge.load_more(3).unwrap();
        merge.pump();

        let ids: Vec<String> = merge.merged().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["old", "r9", "r8", "r7"]);
    }

    #[test]
    fn test_return_moves_borrow_out_of_pinned_set() {
        let store = Arc::new(MemoryStore::new());
        borrow(&store, "b1", 5, None);

        let mut merge = PinnedMerge::borrows(store.clone(), Arc::new(ManualClock::new(100)), "borrows");
        merge.open().unwrap();
        merge.load_more(10).unwrap();
        merge.pump();
        assert_eq!(merge.merged().len(), 1);
        assert_eq!(merge.pinned().len(), 1);

        borrow(&store, "b1", 150, Some(150));
        merge.pump();
        let merged = merge.merged();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].return_time, Some(Timestamp(150)));
        assert!(merge.pinned().is_empty());
    }

    #[test]
    fn test_teardown_closes_pinned_and_windows() {
        let store = Arc::new(MemoryStore::new());
        let mut merge = PinnedMerge::borrows(store.clone(), Arc::new(ManualClock::new(100)), "borrows");
        merge.open().unwrap();
        merge.load_more(5).unwrap();
        assert_eq!(store.listener_count(), 3);

        merge.teardown();
        merge.teardown();
        assert_eq!(store.listener_count(), 0);
        assert!(matches!(merge.open(), Err(SyncError::TornDown)));
    }
}
