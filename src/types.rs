//! Core types for the list synchronizer.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Field every synced document stores its version in.
pub const VERSION_FIELD: &str = "updatedAt";

/// Milliseconds since Unix epoch.
///
/// Used both as the sort key of a collection and as the per-document
/// version that guards against stale removals.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Timestamp(millis)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of "now" for window boundaries and write stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn new(millis: i64) -> Self {
        Self(Arc::new(AtomicI64::new(millis)))
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }

    /// Move forward and return the new time.
    pub fn advance(&self, millis: i64) -> Timestamp {
        Timestamp(self.0.fetch_add(millis, Ordering::SeqCst) + millis)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.0.load(Ordering::SeqCst))
    }
}

/// An item that can be merged by id and ordered by version.
pub trait Versioned {
    fn id(&self) -> &str;
    fn updated_at(&self) -> Timestamp;
}

/// A raw child of a remote collection: its key plus its JSON value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub value: Value,
}

impl Record {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }

    /// Decode into a typed item. The key is injected as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut value = self.value.clone();
        if let Value::Object(map) = &mut value {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl Versioned for Record {
    fn id(&self) -> &str {
        &self.id
    }

    /// Missing or non-integer versions read as zero, which sorts the record
    /// last; that is logged.
    fn updated_at(&self) -> Timestamp {
        match self.value.get(VERSION_FIELD).and_then(Value::as_i64) {
            Some(version) => Timestamp(version),
            None => {
                warn!(id = %self.id, field = VERSION_FIELD, "record without integer version");
                Timestamp::default()
            }
        }
    }
}

/// Kind of change a live query reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// A single notification from a live query.
///
/// For `Removed`, `item` is the last value the query held, so its version
/// is the one the removal applies to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub item: T,
}

impl<T> ChangeEvent<T> {
    pub fn added(item: T) -> Self {
        Self {
            kind: ChangeKind::Added,
            item,
        }
    }

    pub fn changed(item: T) -> Self {
        Self {
            kind: ChangeKind::Changed,
            item,
        }
    }

    pub fn removed(item: T) -> Self {
        Self {
            kind: ChangeKind::Removed,
            item,
        }
    }

    /// Convert the carried item, keeping the kind.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> std::result::Result<U, E>) -> std::result::Result<ChangeEvent<U>, E> {
        Ok(ChangeEvent {
            kind: self.kind,
            item: f(self.item)?,
        })
    }
}

// --- Domain records ---

/// A book series (the catalog unit members browse).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub updated_at: Timestamp,
}

/// A physical volume belonging to a series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub series_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    /// Outstanding borrow, if the book is on loan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borrow_id: Option<String>,
    pub updated_at: Timestamp,
}

/// One loan of a book to a member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Borrow {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Member id.
    pub sid: String,
    pub book_id: String,
    pub series_id: String,
    pub borrow_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_time: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Borrow {
    pub fn is_outstanding(&self) -> bool {
        self.return_time.is_none()
    }
}

/// A library member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub approved: bool,
    pub updated_at: Timestamp,
}

/// The denormalized part of a book shown next to a borrow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
}

macro_rules! impl_versioned {
    ($($ty:ty),*) => {
        $(
            impl Versioned for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn updated_at(&self) -> Timestamp {
                    self.updated_at
                }
            }
        )*
    };
}

impl_versioned!(Series, Book, Borrow, Member);
