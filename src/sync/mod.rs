//! Incremental real-time list synchronization.
//!
//! Components, leaves first:
//! - [`Feed`]: one live subscription, closed on drop
//! - [`KeyedReducer`]: folds change events into an id-keyed state
//! - [`WindowManager`]: forward window plus immutable backward pages
//! - [`PinnedMerge`]: a pinned feed merged over a paginated one
//! - [`Joiner`]: one live value listener per visible foreign id
//!
//! Nothing here blocks or locks. Stores buffer notifications and a view
//! applies them when it pumps, so any notification that arrives after
//! teardown is never observed.

mod feed;
mod join;
mod merge;
mod reducer;
mod window;

pub use feed::Feed;
pub use join::{JoinDiff, Joiner, PathFn};
pub use merge::{merge_pinned, PinnedMerge};
pub use reducer::{by_recency, Applied, KeyedReducer};
pub use window::{QueryWindow, WindowManager};

/// Paths and paging used by the list views.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Items requested per `load_more`.
    pub page_size: usize,
    pub series_path: String,
    pub books_path: String,
    pub borrows_path: String,
    pub users_path: String,
    /// Holds one counter per collection name.
    pub counters_path: String,
}

impl SyncConfig {
    /// Counter path for a collection path, e.g. `counters/books`.
    pub fn counter_for(&self, collection: &str) -> String {
        format!("{}/{}", self.counters_path, collection)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            series_path: "series".to_string(),
            books_path: "books".to_string(),
            borrows_path: "borrows".to_string(),
            users_path: "users".to_string(),
            counters_path: "counters".to_string(),
        }
    }
}
