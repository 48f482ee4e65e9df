//! Enriched list views built from the sync components.

use crate::error::Result;
use crate::remote::{DropReason, Query, SharedStore};
use crate::sync::{Joiner, PinnedMerge, SyncConfig, WindowManager};
use crate::types::{Book, BookInfo, Borrow, Clock};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// A borrow with its joined display fields.
#[derive(Clone, Debug, PartialEq)]
pub struct BorrowRow {
    pub borrow: Borrow,
    pub member_name: Option<String>,
    pub series_title: Option<String>,
    pub book: Option<BookInfo>,
}

/// A book with its series title.
#[derive(Clone, Debug, PartialEq)]
pub struct BookRow {
    pub book: Book,
    pub series_title: Option<String>,
}

fn series_titles(store: &SharedStore, config: &SyncConfig) -> Joiner<String> {
    let root = config.series_path.clone();
    Joiner::new(store.clone(), move |id| format!("{}/{}/title", root, id))
}

fn join_failures<V: DeserializeOwned>(joiner: &Joiner<V>) -> impl Iterator<Item = DropReason> {
    joiner.failures().into_iter().map(|(_, reason)| reason)
}

/// Outstanding borrows pinned over the paginated borrow history, joined to
/// member names, series titles and book details.
pub struct BorrowListView {
    feed: PinnedMerge<Borrow>,
    members: Joiner<String>,
    series: Joiner<String>,
    books: Joiner<BookInfo>,
}

impl BorrowListView {
    /// Subscribe and load the first page.
    pub fn open(store: SharedStore, clock: Arc<dyn Clock>, config: &SyncConfig) -> Result<Self> {
        let mut feed = PinnedMerge::borrows(store.clone(), clock, &config.borrows_path);
        feed.open()?;
        feed.load_more(config.page_size)?;
        feed.windowed_mut()
            .watch_total(&config.counter_for(&config.borrows_path))?;

        let users = config.users_path.clone();
        let books = config.books_path.clone();
        let mut view = Self {
            feed,
            members: Joiner::new(store.clone(), move |sid| format!("{}/{}/displayName", users, sid)),
            series: series_titles(&store, config),
            books: Joiner::new(store, move |id| format!("{}/{}", books, id)),
        };
        view.refresh()?;
        Ok(view)
    }

    /// Apply pending notifications and bring the joins in line.
    pub fn refresh(&mut self) -> Result<()> {
        self.feed.pump();
        let list = self.feed.merged();
        self.members.reconcile(list.iter().map(|b| b.sid.as_str()))?;
        self.series.reconcile(list.iter().map(|b| b.series_id.as_str()))?;
        self.books.reconcile(list.iter().map(|b| b.book_id.as_str()))?;
        self.members.pump();
        self.series.pump();
        self.books.pump();
        Ok(())
    }

    pub fn load_more(&mut self, count: usize) -> Result<()> {
        self.feed.load_more(count)?;
        self.refresh()
    }

    pub fn rows(&mut self) -> Vec<BorrowRow> {
        self.feed
            .merged()
            .into_iter()
            .map(|borrow| BorrowRow {
                member_name: self.members.get(&borrow.sid).cloned(),
                series_title: self.series.get(&borrow.series_id).cloned(),
                book: self.books.get(&borrow.book_id).cloned(),
                borrow,
            })
            .collect()
    }

    pub fn has_more(&self) -> bool {
        self.feed.has_more()
    }

    /// True while any joined value is still on its way.
    pub fn loading(&self) -> bool {
        self.members.loading() || self.series.loading() || self.books.loading()
    }

    /// Subscription failures to surface to the user.
    pub fn failures(&self) -> Vec<DropReason> {
        let mut failures = self.feed.failures();
        failures.extend(join_failures(&self.members));
        failures.extend(join_failures(&self.series));
        failures.extend(join_failures(&self.books));
        failures
    }

    pub fn members(&self) -> &Joiner<String> {
        &self.members
    }

    pub fn series(&self) -> &Joiner<String> {
        &self.series
    }

    pub fn books(&self) -> &Joiner<BookInfo> {
        &self.books
    }

    /// Close every subscription the view holds. Idempotent.
    pub fn teardown(&mut self) {
        self.feed.teardown();
        self.members.teardown();
        self.series.teardown();
        self.books.teardown();
    }
}

/// Books by recency, joined to series titles.
pub struct BookListView {
    feed: WindowManager<Book>,
    series: Joiner<String>,
}

impl BookListView {
    /// Subscribe and load the first page.
    pub fn open(store: SharedStore, clock: Arc<dyn Clock>, config: &SyncConfig) -> Result<Self> {
        let mut feed = WindowManager::new(store.clone(), clock, Query::new(config.books_path.clone()));
        feed.open_initial_window()?;
        feed.load_more(config.page_size)?;
        feed.watch_total(&config.counter_for(&config.books_path))?;

        let mut view = Self {
            feed,
            series: series_titles(&store, config),
        };
        view.refresh()?;
        Ok(view)
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.feed.pump();
        let ids: Vec<String> = self
            .feed
            .sorted_view()
            .iter()
            .map(|book| book.series_id.clone())
            .collect();
        self.series.reconcile(ids)?;
        self.series.pump();
        Ok(())
    }

    pub fn load_more(&mut self, count: usize) -> Result<()> {
        self.feed.load_more(count)?;
        self.refresh()
    }

    pub fn rows(&mut self) -> Vec<BookRow> {
        let series = &self.series;
        self.feed
            .sorted_view()
            .iter()
            .map(|book| BookRow {
                book: book.clone(),
                series_title: series.get(&book.series_id).cloned(),
            })
            .collect()
    }

    pub fn has_more(&self) -> bool {
        self.feed.has_more()
    }

    pub fn loading(&self) -> bool {
        self.series.loading()
    }

    pub fn failures(&self) -> Vec<DropReason> {
        let mut failures = self.feed.failures();
        failures.extend(join_failures(&self.series));
        failures
    }

    pub fn teardown(&mut self) {
        self.feed.teardown();
        self.series.teardown();
    }
}
