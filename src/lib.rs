//! # Shelfsync
//!
//! Incremental real-time list synchronization over a live remote store,
//! with the write path of a small lending library on top.
//!
//! ## Core Concepts
//!
//! - **Remote store**: An ordered JSON tree with live queries, value
//!   listeners and atomic multi-path updates
//! - **Windows**: A forward window for new items plus immutable backward
//!   pages fetched on demand
//! - **Reducer**: Last-writer-wins state keyed by id, guarded against
//!   stale removals
//! - **Pinned merge**: Items that must always show, ahead of the pages
//! - **Joins**: One live lookup per foreign id currently on screen
//!
//! ## Example
//!
//! ```ignore
//! use shelfsync::{BorrowListView, Library, MemoryStore, Session, SyncConfig, SystemClock};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let config = SyncConfig::default();
//!
//! let library = Library::new(store.clone(), clock.clone(), config.clone());
//! let admin = Session::admin("root");
//! let series = library.add_series(&admin, "Dune", Some("Herbert"))?;
//! let book = library.add_book(&admin, &series, Some(1), Some("0-441-17271-7"))?;
//!
//! let mut view = BorrowListView::open(store, clock, &config)?;
//! library.borrow_book(&admin, &book, "m1")?;
//! view.refresh()?;
//! for row in view.rows() {
//!     println!("{} {:?}", row.borrow.id, row.member_name);
//! }
//! view.teardown();
//! ```

pub mod error;
pub mod isbn;
pub mod library;
pub mod remote;
pub mod session;
pub mod sync;
pub mod types;
pub mod views;

// Re-exports
pub use error::{Result, SyncError};
pub use library::{BookEdit, Library};
pub use remote::{
    increment, DropReason, FeedEvent, FeedHandle, ListenerId, MemoryStore, Query, RemoteStore,
    SharedStore,
};
pub use session::{ClipCounter, ClipGuard, Session};
pub use sync::{
    by_recency, merge_pinned, Applied, Feed, JoinDiff, Joiner, KeyedReducer, PinnedMerge,
    QueryWindow, SyncConfig, WindowManager,
};
pub use types::*;
pub use views::{BookListView, BookRow, BorrowListView, BorrowRow};
