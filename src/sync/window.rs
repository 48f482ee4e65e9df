//! Paginated, live projection of a remote collection.
//!
//! A [`WindowManager`] owns:
//! - one forward window (`updatedAt > open time`, unbounded) that picks up
//!   everything written after the view opened
//! - any number of backward windows, one per `load_more` call, each an
//!   immutable `end_before(boundary, id) + limit_to_last(count)` query
//! - optionally a value listener on the collection counter, so `has_more`
//!   follows the live total
//!
//! Every window stays live until teardown so edits to loaded items keep
//! arriving, and all of them feed the same [`KeyedReducer`]. Dropping the
//! manager closes every window.

use crate::error::{Result, SyncError};
use crate::remote::{DropReason, FeedEvent, Query, SharedStore};
use crate::types::{Clock, Record, Timestamp, Versioned};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::feed::Feed;
use super::reducer::KeyedReducer;

/// One page of the backward feed. Never changes once opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryWindow {
    pub order_field: String,
    /// Exclusive upper bound, snapshotted when the window was opened.
    pub boundary: Timestamp,
    /// Id of the item the boundary was taken from. Children sharing the
    /// boundary version page by id below it.
    pub boundary_id: Option<String>,
    pub limit: usize,
}

impl QueryWindow {
    fn to_query(&self, base: &Query) -> Query {
        let query = base.clone().order_by(self.order_field.clone());
        let query = match &self.boundary_id {
            Some(id) => query.end_before_key(self.boundary, id.clone()),
            None => query.end_before(self.boundary),
        };
        query.limit_to_last(self.limit)
    }
}

/// Parse a collection counter. A missing counter means zero.
fn parse_total(path: &str, value: Option<Value>) -> Result<usize> {
    match value {
        None => Ok(0),
        Some(Value::Number(n)) => Ok(n.as_u64().unwrap_or(0) as usize),
        Some(other) => Err(SyncError::Deserialization(format!(
            "counter at {} is not a number: {}",
            path, other
        ))),
    }
}

/// Decode raw change events and fold them into `reducer`.
pub(crate) fn drain_into<T>(feed: &mut Feed, reducer: &mut KeyedReducer<T>) -> usize
where
    T: Versioned + Clone + DeserializeOwned,
{
    let mut applied = 0;
    for change in feed.poll_changes() {
        match change.try_map(|record: Record| record.decode::<T>()) {
            Ok(event) => {
                if reducer.apply(event).is_effective() {
                    applied += 1;
                }
            }
            Err(e) => warn!(path = feed.target(), error = %e, "undecodable change skipped"),
        }
    }
    applied
}

/// Paginated live view over one collection.
pub struct WindowManager<T> {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    base: Query,
    reducer: KeyedReducer<T>,
    initial: Option<Feed>,
    opened_at: Option<Timestamp>,
    windows: Vec<(QueryWindow, Feed)>,
    known_total: Option<usize>,
    total_feed: Option<Feed>,
    torn_down: bool,
}

impl<T> WindowManager<T>
where
    T: Versioned + Clone + DeserializeOwned,
{
    /// `base` supplies the path and any equality filter; windows add the
    /// ordering and range.
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, base: Query) -> Self {
        Self {
            store,
            clock,
            base,
            reducer: KeyedReducer::new(),
            initial: None,
            opened_at: None,
            windows: Vec::new(),
            known_total: None,
            total_feed: None,
            torn_down: false,
        }
    }

    /// Open the forward window. Later calls are no-ops.
    pub fn open_initial_window(&mut self) -> Result<()> {
        if self.torn_down {
            return Err(SyncError::TornDown);
        }
        if self.initial.is_some() {
            return Ok(());
        }

        let now = self.clock.now();
        let query = self.base.clone().start_after(now);
        self.initial = Some(Feed::query(self.store.clone(), query));
        self.opened_at = Some(now);
        debug!(path = %self.base.path, now = now.0, "initial window opened");
        Ok(())
    }

    /// Open one more backward window of `count` items.
    ///
    /// Pending notifications are applied first so the boundary reflects
    /// everything already delivered.
    pub fn load_more(&mut self, count: usize) -> Result<QueryWindow> {
        if self.torn_down {
            return Err(SyncError::TornDown);
        }
        if count == 0 {
            return Err(SyncError::InvalidArgument("load_more count must be positive".to_string()));
        }

        self.pump();
        let open = self.opened_at.unwrap_or_else(|| self.clock.now());
        let (boundary, boundary_id) = match self.reducer.oldest() {
            Some(item) if item.updated_at() <= open => {
                (item.updated_at(), Some(item.id().to_string()))
            }
            // Nothing at or before the open time is loaded yet. The forward
            // window excludes the open millisecond, so this page includes it.
            _ => (Timestamp(open.0 + 1), None),
        };

        let window = QueryWindow {
            order_field: self.base.order_by.clone(),
            boundary,
            boundary_id,
            limit: count,
        };
        let feed = Feed::query(self.store.clone(), window.to_query(&self.base));
        debug!(
            path = %self.base.path,
            boundary = boundary.0,
            boundary_id = window.boundary_id.as_deref().unwrap_or(""),
            limit = count,
            windows = self.windows.len() + 1,
            "window opened"
        );
        self.windows.push((window.clone(), feed));
        Ok(window)
    }

    /// Apply everything buffered on every window.
    /// Returns the number of effective changes.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        if let Some(feed) = self.initial.as_mut() {
            applied += drain_into(feed, &mut self.reducer);
        }
        for (_, feed) in self.windows.iter_mut() {
            applied += drain_into(feed, &mut self.reducer);
        }
        self.pump_total();
        applied
    }

    fn pump_total(&mut self) {
        let Some(feed) = self.total_feed.as_mut() else {
            return;
        };
        for event in feed.poll() {
            let FeedEvent::Value(value) = event else {
                continue;
            };
            match parse_total(feed.target(), value) {
                Ok(total) => self.known_total = Some(total),
                Err(e) => warn!(path = feed.target(), error = %e, "counter ignored"),
            }
        }
    }

    /// Items newest first.
    pub fn sorted_view(&mut self) -> &[T] {
        self.reducer.sorted()
    }

    pub fn reducer(&self) -> &KeyedReducer<T> {
        &self.reducer
    }

    pub fn windows(&self) -> impl Iterator<Item = &QueryWindow> {
        self.windows.iter().map(|(window, _)| window)
    }

    /// Time the forward window was opened at.
    pub fn opened_at(&self) -> Option<Timestamp> {
        self.opened_at
    }

    pub fn set_known_total(&mut self, total: Option<usize>) {
        self.known_total = total;
    }

    pub fn known_total(&self) -> Option<usize> {
        self.known_total
    }

    /// Fetch the collection counter at `path` once. A missing counter means
    /// zero.
    pub fn refresh_total(&mut self, path: &str) -> Result<usize> {
        let total = parse_total(path, self.store.fetch(path)?)?;
        self.known_total = Some(total);
        Ok(total)
    }

    /// Keep the known total in step with the live counter at `path`.
    /// Updates land on `pump`. Watching a new path replaces the old listener.
    pub fn watch_total(&mut self, path: &str) -> Result<()> {
        if self.torn_down {
            return Err(SyncError::TornDown);
        }
        if self.total_feed.as_ref().map_or(false, |feed| feed.target() == path) {
            return Ok(());
        }
        self.total_feed = Some(Feed::value(self.store.clone(), path));
        debug!(path, "watching total");
        Ok(())
    }

    /// Whether another `load_more` could find anything.
    pub fn has_more(&self) -> bool {
        self.known_total
            .map_or(true, |total| self.reducer.len() < total)
    }

    /// Number of feeds still subscribed, forward window and counter included.
    pub fn open_feed_count(&self) -> usize {
        self.feeds().filter(|feed| feed.is_open()).count()
    }

    /// Failures reported by any window or the counter.
    pub fn failures(&self) -> Vec<DropReason> {
        self.feeds().filter_map(|feed| feed.failure().cloned()).collect()
    }

    fn feeds(&self) -> impl Iterator<Item = &Feed> {
        self.initial
            .iter()
            .chain(self.windows.iter().map(|(_, feed)| feed))
            .chain(self.total_feed.iter())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Close every window. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(feed) = self.initial.as_mut() {
            feed.close();
        }
        for (_, feed) in self.windows.iter_mut() {
            feed.close();
        }
        if let Some(feed) = self.total_feed.as_mut() {
            feed.close();
        }
        debug!(path = %self.base.path, windows = self.windows.len(), "windows torn down");
    }
}
