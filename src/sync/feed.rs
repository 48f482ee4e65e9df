//! A single live subscription owned by a view.

use crate::remote::{DropReason, FeedEvent, FeedHandle, Query, SharedStore};
use crate::types::{ChangeEvent, Record};
use crossbeam_channel::TryRecvError;
use tracing::{debug, warn};

/// One live query or value listener.
///
/// Closing is idempotent and also happens on drop, so a feed can never
/// outlive its owner. Once closed, polling yields nothing.
pub struct Feed {
    store: SharedStore,
    handle: Option<FeedHandle>,
    target: String,
    failure: Option<DropReason>,
}

impl Feed {
    /// Open a live query.
    pub fn query(store: SharedStore, query: Query) -> Self {
        let target = query.path.clone();
        let handle = store.listen(query);
        debug!(listener = handle.id.0, path = %target, "feed opened");
        Self {
            store,
            handle: Some(handle),
            target,
            failure: None,
        }
    }

    /// Open a live value listener.
    pub fn value(store: SharedStore, path: &str) -> Self {
        let handle = store.listen_value(path);
        Self {
            store,
            handle: Some(handle),
            target: path.to_string(),
            failure: None,
        }
    }

    /// Drain buffered notifications.
    ///
    /// A failure is recorded once, logged, and closes the feed; it is not
    /// retried.
    pub fn poll(&mut self) -> Vec<FeedEvent> {
        let Some(handle) = &self.handle else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut failed = None;
        loop {
            match handle.try_recv() {
                Ok(FeedEvent::Failed { reason }) => {
                    failed = Some(reason);
                    break;
                }
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    failed = Some(DropReason::Disconnected);
                    break;
                }
            }
        }

        if let Some(reason) = failed {
            warn!(path = %self.target, reason = %reason, "feed failed");
            self.failure = Some(reason);
            self.close();
        }
        events
    }

    /// Drain buffered child changes, ignoring anything else.
    pub fn poll_changes(&mut self) -> Vec<ChangeEvent<Record>> {
        self.poll()
            .into_iter()
            .filter_map(|event| match event {
                FeedEvent::Change(change) => Some(change),
                _ => None,
            })
            .collect()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn failure(&self) -> Option<&DropReason> {
        self.failure.as_ref()
    }

    /// Stop listening. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.store.unlisten(handle.id);
            debug!(listener = handle.id.0, path = %self.target, "feed closed");
        }
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryStore, RemoteStore};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn test_close_is_idempotent_and_silences_feed() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = Feed::query(store.clone(), Query::new("books"));
        assert_eq!(store.listener_count(), 1);

        feed.close();
        feed.close();
        assert_eq!(store.listener_count(), 0);

        let mut updates = BTreeMap::new();
        updates.insert("books/a".to_string(), json!({"updatedAt": 1}));
        store.update(updates).unwrap();
        assert!(feed.poll().is_empty());
    }

    #[test]
    fn test_drop_unlistens() {
        let store = Arc::new(MemoryStore::new());
        {
            let _feed = Feed::value(store.clone(), "users/m1");
            assert_eq!(store.listener_count(), 1);
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_failure_reported_once() {
        let store = Arc::new(MemoryStore::new());
        store.deny("users");
        let mut feed = Feed::value(store.clone(), "users/m1");

        assert!(feed.poll().is_empty());
        assert!(matches!(feed.failure(), Some(DropReason::PermissionDenied(_))));
        assert!(!feed.is_open());
        assert!(feed.poll().is_empty());
    }
}
