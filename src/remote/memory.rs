//! In-memory remote store that broadcasts changes to live listeners.

use crate::error::{Result, SyncError};
use crate::types::{ChangeEvent, Record};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use super::path;
use super::{increment_delta, DropReason, FeedEvent, FeedHandle, ListenerId, Query, RemoteStore};

/// Default number of buffered events before a listener is dropped.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// What a listener watches, plus what it last reported.
enum Target {
    Query {
        query: Query,
        segs: Vec<String>,
        view: BTreeMap<String, Value>,
    },
    Value {
        path: String,
        segs: Vec<String>,
        /// `None` until the first value has been sent.
        last: Option<Option<Value>>,
    },
}

impl Target {
    fn path(&self) -> &str {
        match self {
            Target::Query { query, .. } => &query.path,
            Target::Value { path, .. } => path,
        }
    }
}

/// Internal listener state.
struct Listener {
    target: Target,
    sender: Sender<FeedEvent>,
}

impl Listener {
    /// Re-evaluate against `root` and send what changed.
    /// Returns false if the buffer is full (listener will be dropped).
    fn refresh(&mut self, root: &Value) -> bool {
        let Listener { target, sender } = self;
        match target {
            Target::Query { query, segs, view } => {
                let next = query.evaluate(path::lookup(root, segs));
                let changes = diff(view, &next);
                *view = next;
                changes
                    .into_iter()
                    .all(|change| sender.try_send(FeedEvent::Change(change)).is_ok())
            }
            Target::Value { segs, last, .. } => {
                let next = path::lookup(root, segs).cloned();
                if last.as_ref() == Some(&next) {
                    return true;
                }
                *last = Some(next.clone());
                sender.try_send(FeedEvent::Value(next)).is_ok()
            }
        }
    }

    fn fail(&self, reason: DropReason) {
        // Best effort; the buffer may be the reason we are failing.
        let _ = self.sender.try_send(FeedEvent::Failed { reason });
    }
}

/// Child-level difference between two query results.
fn diff(prev: &BTreeMap<String, Value>, next: &BTreeMap<String, Value>) -> Vec<ChangeEvent<Record>> {
    let mut changes = Vec::new();
    for (id, old) in prev {
        if !next.contains_key(id) {
            changes.push(ChangeEvent::removed(Record::new(id.clone(), old.clone())));
        }
    }
    for (id, value) in next {
        match prev.get(id) {
            None => changes.push(ChangeEvent::added(Record::new(id.clone(), value.clone()))),
            Some(old) if old != value => {
                changes.push(ChangeEvent::changed(Record::new(id.clone(), value.clone())))
            }
            Some(_) => {}
        }
    }
    changes
}

/// A JSON tree with live queries, value listeners and access rules.
///
/// Lock order is always tree before listeners.
pub struct MemoryStore {
    root: RwLock<Value>,
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    /// Path prefixes that reject reads, writes and listens.
    denied: RwLock<Vec<String>>,
    offline: AtomicBool,
    next_id: AtomicU64,
    next_key: AtomicU64,
    buffer_size: usize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create an empty store with a custom per-listener buffer.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
            listeners: RwLock::new(HashMap::new()),
            denied: RwLock::new(Vec::new()),
            offline: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            next_key: AtomicU64::new(1),
            buffer_size,
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Paths of all live listeners, sorted.
    pub fn listened_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .listeners
            .read()
            .values()
            .map(|l| l.target.path().to_string())
            .collect();
        paths.sort();
        paths
    }

    /// Reject everything under `prefix` from now on, failing live listeners.
    pub fn deny(&self, prefix: &str) {
        let prefix = prefix.trim_matches('/').to_string();
        let mut listeners = self.listeners.write();
        let revoked: Vec<ListenerId> = listeners
            .iter()
            .filter(|(_, l)| covers(&prefix, l.target.path()))
            .map(|(id, _)| *id)
            .collect();
        for id in revoked {
            if let Some(listener) = listeners.remove(&id) {
                warn!(listener = id.0, path = listener.target.path(), "listener revoked");
                listener.fail(DropReason::PermissionDenied(listener.target.path().to_string()));
            }
        }
        self.denied.write().push(prefix);
    }

    /// Lift every access rule.
    pub fn allow_all(&self) {
        self.denied.write().clear();
    }

    /// While offline, fetches and writes fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_access(&self, path: &str) -> Result<()> {
        let path = path.trim_matches('/');
        if self.denied.read().iter().any(|prefix| covers(prefix, path)) {
            return Err(SyncError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    /// Register a listener and send its initial result.
    fn register(&self, target: Result<Target>) -> FeedHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        let handle = FeedHandle { id, receiver };

        let target = match target.and_then(|t| self.check_access(t.path()).map(|_| t)) {
            Ok(target) => target,
            Err(e) => {
                warn!(listener = id.0, error = %e, "listen rejected");
                let reason = match e {
                    SyncError::PermissionDenied(path) => DropReason::PermissionDenied(path),
                    other => DropReason::Error(other.to_string()),
                };
                let _ = sender.try_send(FeedEvent::Failed { reason });
                return handle;
            }
        };

        let root = self.root.read();
        let mut listener = Listener { target, sender };
        if listener.refresh(&root) {
            debug!(listener = id.0, path = listener.target.path(), "listening");
            self.listeners.write().insert(id, listener);
        } else {
            warn!(listener = id.0, "initial result exceeded buffer");
            listener.fail(DropReason::BufferOverflow);
        }
        handle
    }

    /// Re-evaluate every listener. Drops listeners that fail to receive.
    fn broadcast(&self, root: &Value) {
        let mut listeners = self.listeners.write();
        let mut to_remove = Vec::new();

        for (id, listener) in listeners.iter_mut() {
            if !listener.refresh(root) {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            if let Some(listener) = listeners.remove(&id) {
                warn!(listener = id.0, path = listener.target.path(), "dropping slow listener");
                listener.fail(DropReason::BufferOverflow);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn covers(prefix: &str, path: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

impl RemoteStore for MemoryStore {
    fn listen(&self, query: Query) -> FeedHandle {
        let target = path::segments(&query.path).map(|segs| Target::Query {
            query,
            segs,
            view: BTreeMap::new(),
        });
        self.register(target)
    }

    fn listen_value(&self, path: &str) -> FeedHandle {
        let target = path::segments(path).map(|segs| Target::Value {
            path: path.trim_matches('/').to_string(),
            segs,
            last: None,
        });
        self.register(target)
    }

    fn unlisten(&self, id: ListenerId) {
        if self.listeners.write().remove(&id).is_some() {
            debug!(listener = id.0, "unlistened");
        }
    }

    fn fetch(&self, path: &str) -> Result<Option<Value>> {
        self.check_online()?;
        self.check_access(path)?;
        let segs = path::segments(path)?;
        Ok(path::lookup(&self.root.read(), &segs).cloned())
    }

    fn update(&self, updates: BTreeMap<String, Value>) -> Result<()> {
        self.check_online()?;

        // Validate everything before touching the tree.
        let mut parsed = Vec::with_capacity(updates.len());
        for (path, value) in updates {
            self.check_access(&path)?;
            parsed.push((path::segments(&path)?, value));
        }

        let mut root = self.root.write();
        for (segs, value) in parsed {
            let value = match increment_delta(&value) {
                Some(delta) => {
                    let current = path::lookup(&root, &segs)
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    Value::from(current + delta)
                }
                None => value,
            };
            path::set(&mut root, &segs, value);
        }
        if !root.is_object() {
            *root = Value::Object(Map::new());
        }

        let root = RwLockWriteGuard::downgrade(root);
        self.broadcast(&root);
        Ok(())
    }

    fn push_key(&self) -> String {
        format!("k{:012}", self.next_key.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::increment;
    use crate::types::{ChangeKind, Timestamp};
    use serde_json::json;

    fn write(store: &MemoryStore, path: &str, value: Value) {
        let mut updates = BTreeMap::new();
        updates.insert(path.to_string(), value);
        store.update(updates).unwrap();
    }

    fn changes(handle: &FeedHandle) -> Vec<(ChangeKind, String, Timestamp)> {
        use crate::types::Versioned;
        handle
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                FeedEvent::Change(c) => Some((c.kind, c.item.id.clone(), c.item.updated_at())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_listen_unlisten() {
        let store = MemoryStore::new();
        let handle = store.listen(Query::new("books"));
        assert_eq!(store.listener_count(), 1);

        store.unlisten(handle.id);
        assert_eq!(store.listener_count(), 0);
        // Second unlisten is a no-op.
        store.unlisten(handle.id);
    }

    #[test]
    fn test_initial_result_then_live_changes() {
        let store = MemoryStore::new();
        write(&store, "books/a", json!({"updatedAt": 1}));

        let handle = store.listen(Query::new("books"));
        assert_eq!(changes(&handle), vec![(ChangeKind::Added, "a".into(), Timestamp(1))]);

        write(&store, "books/a/updatedAt", json!(2));
        assert_eq!(changes(&handle), vec![(ChangeKind::Changed, "a".into(), Timestamp(2))]);

        write(&store, "books/a", Value::Null);
        assert_eq!(changes(&handle), vec![(ChangeKind::Removed, "a".into(), Timestamp(2))]);
    }

    #[test]
    fn test_item_leaving_range_carries_old_version() {
        let store = MemoryStore::new();
        write(&store, "books/a", json!({"updatedAt": 5}));

        let old = store.listen(Query::new("books").end_before(Timestamp(10)));
        let new = store.listen(Query::new("books").start_after(Timestamp(10)));
        old.drain();

        write(&store, "books/a/updatedAt", json!(20));
        assert_eq!(changes(&old), vec![(ChangeKind::Removed, "a".into(), Timestamp(5))]);
        assert_eq!(changes(&new), vec![(ChangeKind::Added, "a".into(), Timestamp(20))]);
    }

    #[test]
    fn test_value_listener_sends_initial_and_changes_only() {
        let store = MemoryStore::new();
        let handle = store.listen_value("users/m1/displayName");
        assert_eq!(handle.drain(), vec![FeedEvent::Value(None)]);

        write(&store, "users/m1/displayName", json!("Ann"));
        write(&store, "books/x", json!({"updatedAt": 1}));
        assert_eq!(handle.drain(), vec![FeedEvent::Value(Some(json!("Ann")))]);
    }

    #[test]
    fn test_multi_path_update_is_atomic() {
        let store = MemoryStore::new();
        store.deny("secret");

        let mut updates = BTreeMap::new();
        updates.insert("books/a".to_string(), json!({"updatedAt": 1}));
        updates.insert("secret/x".to_string(), json!(1));
        assert!(matches!(store.update(updates), Err(SyncError::PermissionDenied(_))));
        assert_eq!(store.fetch("books/a").unwrap(), None);

        let mut updates = BTreeMap::new();
        updates.insert("books/a".to_string(), json!({"updatedAt": 1}));
        updates.insert("bad/pa.th".to_string(), json!(1));
        assert!(matches!(store.update(updates), Err(SyncError::InvalidPath(_))));
        assert_eq!(store.fetch("books/a").unwrap(), None);
    }

    #[test]
    fn test_deny_fails_live_listener_once() {
        let store = MemoryStore::new();
        let handle = store.listen(Query::new("users"));
        handle.drain();

        store.deny("users");
        assert_eq!(store.listener_count(), 0);
        assert!(matches!(
            handle.try_recv(),
            Ok(FeedEvent::Failed { reason: DropReason::PermissionDenied(_) })
        ));

        let later = store.listen_value("users/m1");
        assert!(matches!(later.drain().as_slice(), [FeedEvent::Failed { .. }]));
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_deny_prefix_matches_whole_segments() {
        let store = MemoryStore::new();
        store.deny("user");
        assert!(store.fetch("users/m1").is_ok());
        assert!(store.fetch("user/m1").is_err());
    }

    #[test]
    fn test_drop_slow_listener() {
        let store = MemoryStore::with_buffer_size(2);
        let _handle = store.listen(Query::new("books"));

        for i in 0..10 {
            write(&store, &format!("books/b{}", i), json!({"updatedAt": i}));
        }

        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_offline_rejects_reads_and_writes() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(store.fetch("books"), Err(SyncError::Unavailable(_))));
        assert!(matches!(store.update(BTreeMap::new()), Err(SyncError::Unavailable(_))));
        store.set_offline(false);
        assert!(store.fetch("books").unwrap().is_none());
    }

    #[test]
    fn test_push_keys_are_ordered() {
        let store = MemoryStore::new();
        let a = store.push_key();
        let b = store.push_key();
        assert!(a < b);
    }

    #[test]
    fn test_increment_resolves_under_write_lock() {
        let store = MemoryStore::new();
        let handle = store.listen_value("counters/books");
        handle.drain();

        let mut updates = BTreeMap::new();
        updates.insert("counters/books".to_string(), increment(1));
        updates.insert("books/a".to_string(), json!({"updatedAt": 1}));
        store.update(updates).unwrap();
        assert_eq!(store.fetch("counters/books").unwrap(), Some(json!(1)));
        assert_eq!(handle.drain(), vec![FeedEvent::Value(Some(json!(1)))]);

        write(&store, "counters/books", increment(-3));
        assert_eq!(store.fetch("counters/books").unwrap(), Some(json!(-2)));

        // A non-numeric node restarts from zero.
        write(&store, "counters/books", json!("junk"));
        write(&store, "counters/books", increment(2));
        assert_eq!(store.fetch("counters/books").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        write(&store, "counters/series", increment(1));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.fetch("counters/series").unwrap(), Some(json!(1_600)));
    }
}
