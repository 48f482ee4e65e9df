//! Live query description and evaluation.

use crate::types::{Timestamp, VERSION_FIELD};
use serde_json::Value;
use std::collections::BTreeMap;

/// A range query over the children of `path`.
///
/// Children are ordered ascending by the integer field `order_by` (ties by
/// key). `start_after`/`end_before` are exclusive bounds on that field and
/// `limit_to_last` keeps only the newest `n` matches. An `end_before` bound
/// may carry a key, in which case it is exclusive on `(field, key)` so
/// children sharing the bound's field value are split by key.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub path: String,
    pub order_by: String,
    /// Field equality filter; a `null` expectation matches an absent field.
    pub equal_to: Option<(String, Value)>,
    pub start_after: Option<Timestamp>,
    pub end_before: Option<Timestamp>,
    /// Key tiebreak for `end_before`.
    pub end_before_key: Option<String>,
    pub limit_to_last: Option<usize>,
}

impl Query {
    /// All children of `path`, ordered by version.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            order_by: VERSION_FIELD.to_string(),
            equal_to: None,
            start_after: None,
            end_before: None,
            end_before_key: None,
            limit_to_last: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = field.into();
        self
    }

    pub fn equal_to(mut self, field: impl Into<String>, value: Value) -> Self {
        self.equal_to = Some((field.into(), value));
        self
    }

    pub fn start_after(mut self, bound: Timestamp) -> Self {
        self.start_after = Some(bound);
        self
    }

    pub fn end_before(mut self, bound: Timestamp) -> Self {
        self.end_before = Some(bound);
        self.end_before_key = None;
        self
    }

    /// Children ordered before `(bound, key)`.
    pub fn end_before_key(mut self, bound: Timestamp, key: impl Into<String>) -> Self {
        self.end_before = Some(bound);
        self.end_before_key = Some(key.into());
        self
    }

    pub fn limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = Some(limit);
        self
    }

    fn is_bounded(&self) -> bool {
        self.start_after.is_some() || self.end_before.is_some()
    }

    fn order_key(&self, doc: &Value) -> Option<i64> {
        doc.get(&self.order_by).and_then(Value::as_i64)
    }

    fn passes_filter(&self, doc: &Value) -> bool {
        match &self.equal_to {
            Some((field, expected)) => doc.get(field).unwrap_or(&Value::Null) == expected,
            None => true,
        }
    }

    fn in_range(&self, key: i64, id: &str) -> bool {
        let below = match (self.end_before, self.end_before_key.as_deref()) {
            (None, _) => true,
            (Some(b), None) => key < b.0,
            (Some(b), Some(bound_id)) => key < b.0 || (key == b.0 && id < bound_id),
        };
        below && self.start_after.map_or(true, |b| key > b.0)
    }

    /// Current result for the node at `path`.
    pub(crate) fn evaluate(&self, node: Option<&Value>) -> BTreeMap<String, Value> {
        let Some(children) = node.and_then(Value::as_object) else {
            return BTreeMap::new();
        };

        let mut matches: Vec<(i64, &String, &Value)> = children
            .iter()
            .filter(|(_, doc)| self.passes_filter(doc))
            .filter_map(|(id, doc)| match self.order_key(doc) {
                Some(key) if self.in_range(key, id) => Some((key, id, doc)),
                Some(_) => None,
                // Unordered children sort first and never satisfy a range.
                None if !self.is_bounded() => Some((i64::MIN, id, doc)),
                None => None,
            })
            .collect();

        matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        let skip = self
            .limit_to_last
            .map_or(0, |limit| matches.len().saturating_sub(limit));

        matches
            .into_iter()
            .skip(skip)
            .map(|(_, id, doc)| (id.clone(), doc.clone()))
            .collect()
    }
}
