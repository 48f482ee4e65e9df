//! Administrative write operations.
//!
//! Every operation checks its preconditions with one-shot fetches and then
//! commits a single atomic multi-path update. State held by views changes
//! only when the store echoes the write back, so there is nothing to roll
//! back on failure. Failures are logged and returned; nothing is retried.

use crate::error::{Result, SyncError};
use crate::isbn;
use crate::remote::{self, SharedStore};
use crate::sync::SyncConfig;
use crate::session::Session;
use crate::types::{Book, Borrow, Clock, Member, Record, Series};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fields of a book that can be edited. `None` leaves a field alone.
#[derive(Clone, Debug, Default)]
pub struct BookEdit {
    pub volume: Option<u32>,
    /// Raw user input; normalized before it is stored.
    pub isbn: Option<String>,
}

impl BookEdit {
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.isbn.is_none()
    }
}

/// Write path for series, books, members and borrows.
pub struct Library {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl Library {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    // --- Catalog ---

    /// Create a series and return its id.
    pub fn add_series(&self, session: &Session, title: &str, author: Option<&str>) -> Result<String> {
        require_admin(session, "add_series")?;
        let now = self.clock.now();
        let id = self.store.push_key();

        let series = Series {
            id: String::new(),
            title: title.to_string(),
            author: author.map(str::to_string),
            updated_at: now,
        };

        let mut updates = BTreeMap::new();
        updates.insert(self.doc_path(&self.config.series_path, &id), to_value(&series)?);
        self.bump_counter(&mut updates, &self.config.series_path);
        self.commit("add_series", updates)?;
        Ok(id)
    }

    /// Create a book in an existing series and return its id.
    pub fn add_book(
        &self,
        session: &Session,
        series_id: &str,
        volume: Option<u32>,
        raw_isbn: Option<&str>,
    ) -> Result<String> {
        require_admin(session, "add_book")?;
        let isbn = raw_isbn.map(normalize_isbn).transpose()?;
        let _series: Series = self.fetch_doc(&self.config.series_path, series_id)?;

        let now = self.clock.now();
        let id = self.store.push_key();
        let book = Book {
            id: String::new(),
            series_id: series_id.to_string(),
            volume,
            isbn,
            borrow_id: None,
            updated_at: now,
        };

        let mut updates = BTreeMap::new();
        updates.insert(self.doc_path(&self.config.books_path, &id), to_value(&book)?);
        updates.insert(
            self.field_path(&self.config.series_path, series_id, "updatedAt"),
            json!(now),
        );
        self.bump_counter(&mut updates, &self.config.books_path);
        self.commit("add_book", updates)?;
        Ok(id)
    }

    pub fn edit_book(&self, session: &Session, book_id: &str, edit: BookEdit) -> Result<()> {
        require_admin(session, "edit_book")?;
        if edit.is_empty() {
            return Ok(());
        }
        let isbn = edit.isbn.as_deref().map(normalize_isbn).transpose()?;
        let _book: Book = self.fetch_doc(&self.config.books_path, book_id)?;

        let books = &self.config.books_path;
        let mut updates = BTreeMap::new();
        if let Some(volume) = edit.volume {
            updates.insert(self.field_path(books, book_id, "volume"), json!(volume));
        }
        if let Some(isbn) = isbn {
            updates.insert(self.field_path(books, book_id, "isbn"), json!(isbn));
        }
        updates.insert(self.field_path(books, book_id, "updatedAt"), json!(self.clock.now()));
        self.commit("edit_book", updates)
    }

    // --- Members ---

    /// Approve a member. Approving twice is a no-op.
    pub fn approve_member(&self, session: &Session, sid: &str) -> Result<()> {
        require_admin(session, "approve_member")?;
        let member: Member = self.fetch_doc(&self.config.users_path, sid)?;
        if member.approved {
            debug!(sid, "member already approved");
            return Ok(());
        }

        let users = &self.config.users_path;
        let mut updates = BTreeMap::new();
        updates.insert(self.field_path(users, sid, "approved"), json!(true));
        updates.insert(self.field_path(users, sid, "updatedAt"), json!(self.clock.now()));
        self.commit("approve_member", updates)
    }

    // --- Circulation ---

    /// Lend a book to an approved member and return the borrow id.
    pub fn borrow_book(&self, session: &Session, book_id: &str, sid: &str) -> Result<String> {
        require_admin(session, "borrow_book")?;
        let book: Book = self.fetch_doc(&self.config.books_path, book_id)?;
        if let Some(current) = &book.borrow_id {
            return Err(SyncError::Conflict(format!(
                "book {} is already on loan ({})",
                book_id, current
            )));
        }
        let member: Member = self.fetch_doc(&self.config.users_path, sid)?;
        if !member.approved {
            return Err(SyncError::Conflict(format!("member {} is not approved", sid)));
        }

        let now = self.clock.now();
        let id = self.store.push_key();
        let borrow = Borrow {
            id: String::new(),
            sid: sid.to_string(),
            book_id: book_id.to_string(),
            series_id: book.series_id.clone(),
            borrow_time: now,
            return_time: None,
            updated_at: now,
        };

        let books = &self.config.books_path;
        let mut updates = BTreeMap::new();
        updates.insert(self.doc_path(&self.config.borrows_path, &id), to_value(&borrow)?);
        updates.insert(self.field_path(books, book_id, "borrowId"), json!(id));
        updates.insert(self.field_path(books, book_id, "updatedAt"), json!(now));
        self.bump_counter(&mut updates, &self.config.borrows_path);
        self.commit("borrow_book", updates)?;
        Ok(id)
    }

    /// Close an outstanding borrow and free its book.
    pub fn return_book(&self, session: &Session, borrow_id: &str) -> Result<()> {
        require_admin(session, "return_book")?;
        let borrow: Borrow = self.fetch_doc(&self.config.borrows_path, borrow_id)?;
        if let Some(returned) = borrow.return_time {
            return Err(SyncError::Conflict(format!(
                "borrow {} was already returned at {}",
                borrow_id, returned
            )));
        }

        let now = self.clock.now();
        let borrows = &self.config.borrows_path;
        let mut updates = BTreeMap::new();
        updates.insert(self.field_path(borrows, borrow_id, "returnTime"), json!(now));
        updates.insert(self.field_path(borrows, borrow_id, "updatedAt"), json!(now));

        // The book may have been deleted since; don't resurrect a stub.
        let books = &self.config.books_path;
        let book_path = self.doc_path(books, &borrow.book_id);
        if self.store.fetch(&book_path)?.is_some() {
            updates.insert(self.field_path(books, &borrow.book_id, "borrowId"), Value::Null);
            updates.insert(self.field_path(books, &borrow.book_id, "updatedAt"), json!(now));
        }
        self.commit("return_book", updates)
    }

    // --- Helpers ---

    fn doc_path(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", collection, id)
    }

    fn field_path(&self, collection: &str, id: &str, field: &str) -> String {
        format!("{}/{}/{}", collection, id, field)
    }

    fn fetch_doc<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<T> {
        let path = self.doc_path(collection, id);
        match self.store.fetch(&path)? {
            Some(value) => Record::new(id, value).decode(),
            None => Err(SyncError::NotFound(path)),
        }
    }

    /// Add a store-side `+1` on `counters/<collection>` to `updates`.
    fn bump_counter(&self, updates: &mut BTreeMap<String, Value>, collection: &str) {
        updates.insert(self.config.counter_for(collection), remote::increment(1));
    }

    fn commit(&self, op: &str, updates: BTreeMap<String, Value>) -> Result<()> {
        let paths = updates.len();
        match self.store.update(updates) {
            Ok(()) => {
                debug!(op, paths, "write committed");
                Ok(())
            }
            Err(e) => {
                warn!(op, error = %e, "write failed");
                Err(e)
            }
        }
    }
}

fn require_admin(session: &Session, op: &str) -> Result<()> {
    if session.admin {
        Ok(())
    } else {
        warn!(op, uid = %session.uid, "write refused for non-admin");
        Err(SyncError::PermissionDenied(format!("{} requires an admin session", op)))
    }
}

fn normalize_isbn(raw: &str) -> Result<String> {
    isbn::parse(raw).ok_or_else(|| SyncError::InvalidIdentifier(raw.to_string()))
}

fn to_value<T: Serialize>(item: &T) -> Result<Value> {
    Ok(serde_json::to_value(item)?)
}
