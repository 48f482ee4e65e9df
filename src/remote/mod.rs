//! The remote store contract.
//!
//! The remote store is an ordered key-value tree that supports:
//! - Live range queries over the children of a path, emitting
//!   added/changed/removed notifications
//! - Live value listeners on a single path
//! - One-shot fetches
//! - Atomic multi-path updates
//!
//! Notifications are delivered through bounded channels; a consumer that
//! falls too far behind is dropped with [`DropReason::BufferOverflow`].
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let handle = store.listen(Query::new("books").start_after(Timestamp(100)));
//!
//! for event in handle.drain() {
//!     match event {
//!         FeedEvent::Change(change) => println!("{:?} {}", change.kind, change.item.id),
//!         FeedEvent::Failed { reason } => break,
//!         FeedEvent::Value(_) => {}
//!     }
//! }
//! ```

mod memory;
mod path;
mod query;

pub use memory::MemoryStore;
pub use query::Query;

use crate::error::Result;
use crate::types::{ChangeEvent, Record};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Why a listener stopped delivering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Access rules reject the path.
    PermissionDenied(String),
    /// The store went away without saying why.
    Disconnected,
    /// Anything else, e.g. an invalid path.
    Error(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::BufferOverflow => write!(f, "buffer overflow"),
            DropReason::PermissionDenied(path) => write!(f, "permission denied: {}", path),
            DropReason::Disconnected => write!(f, "disconnected"),
            DropReason::Error(msg) => write!(f, "{}", msg),
        }
    }
}

/// Notifications delivered to a listener.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    /// A child of a query entered, changed in, or left the result.
    Change(ChangeEvent<Record>),
    /// Current value of a value listener's path (`None` when absent).
    Value(Option<Value>),
    /// The listener failed and will deliver nothing further.
    Failed { reason: DropReason },
}

/// Receiving end of a listener.
pub struct FeedHandle {
    pub id: ListenerId,
    pub receiver: Receiver<FeedEvent>,
}

impl FeedHandle {
    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<FeedEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<FeedEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now.
    pub fn drain(&self) -> Vec<FeedEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Contract the synchronizer needs from the backing store.
pub trait RemoteStore: Send + Sync {
    /// Start a live query. Current matches arrive immediately as `Added`.
    fn listen(&self, query: Query) -> FeedHandle;

    /// Start a live value listener. The current value arrives immediately.
    fn listen_value(&self, path: &str) -> FeedHandle;

    /// Stop a listener. Unknown ids are ignored.
    fn unlisten(&self, id: ListenerId);

    /// One-shot read.
    fn fetch(&self, path: &str) -> Result<Option<Value>>;

    /// Apply all updates atomically. A `null` value deletes the path and an
    /// [`increment`] value adds to the number stored there, both resolved
    /// inside the same atomic step.
    fn update(&self, updates: BTreeMap<String, Value>) -> Result<()>;

    /// A fresh, chronologically ordered child key.
    fn push_key(&self) -> String;
}

/// Update value that adds `delta` to the number at its path when the store
/// applies the update. A missing or non-integer node counts as zero.
pub fn increment(delta: i64) -> Value {
    serde_json::json!({ ".sv": { "increment": delta } })
}

/// The delta of an [`increment`] value, if `value` is one.
pub(crate) fn increment_delta(value: &Value) -> Option<i64> {
    let sentinel = value.as_object()?;
    if sentinel.len() != 1 {
        return None;
    }
    sentinel.get(".sv")?.get("increment")?.as_i64()
}

/// Store handle shared by every feed of a view.
pub type SharedStore = Arc<dyn RemoteStore>;
