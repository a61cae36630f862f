//! Field projection, sort ordering, and pagination windows.
//!
//! This module turns the wire-level `fields`, `order`, `limit`, and `offset`
//! options into forms the store clients and the response envelope consume:
//! an inclusion list, a list of [`SortKey`]s, and a [`PageWindow`] with the
//! server-imposed limit applied.

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::ID_FIELD;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order, smallest first.
    Asc,
    /// Descending order, largest first.
    Desc,
}

/// The `order` option as it arrives at the request boundary: either the
/// comma form (`"name asc, age desc"`) or a list of single-key items.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OrderInput {
    /// Comma-separated sort text.
    Text(String),
    /// One `"field direction"` item per entry.
    List(Vec<String>),
}

impl OrderInput {
    /// Parses the sort keys, whichever form this is.
    pub fn sort_keys(&self) -> Vec<SortKey> {
        match self {
            OrderInput::Text(text) => RecordProjector::sort_keys(text),
            OrderInput::List(items) => RecordProjector::sort_keys_from_list(items),
        }
    }
}

impl From<&str> for OrderInput {
    fn from(text: &str) -> Self {
        OrderInput::Text(text.to_string())
    }
}

impl From<String> for OrderInput {
    fn from(text: String) -> Self {
        OrderInput::Text(text)
    }
}

/// One key of a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// The field to sort by.
    pub field: String,
    /// The direction to sort in.
    pub direction: SortDirection,
}

/// The resolved pagination window for a set read.
///
/// `limit` is the effective page size after the server-side cap: a requested
/// limit that is missing, zero, negative, or above the cap is replaced by the
/// cap itself.
///
/// # Example
///
/// ```ignore
/// use docbridge_core::projector::RecordProjector;
///
/// // 65 matching records, no client limit, offset 10, cap 50.
/// let window = RecordProjector::window(65, 0, 10, 50);
/// assert_eq!(window.limit, 50);
/// assert!(window.more);
/// assert_eq!(window.next, Some(61));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// Effective page size.
    pub limit: u64,
    /// Records skipped before the page.
    pub offset: u64,
    /// Whether matching records exist beyond this page.
    pub more: bool,
    /// One-based position of the first record of the next page, when `more`.
    pub next: Option<u64>,
}

impl PageWindow {
    /// Builds the pagination metadata block for a response, or `None` when
    /// the client did not ask for a count and no further pages exist.
    pub fn meta(&self, count: u64, include_count: bool) -> Option<Meta> {
        if self.more || include_count {
            Some(Meta {
                count: Some(count),
                next: self.next,
            })
        } else {
            None
        }
    }
}

/// Pagination metadata attached to set responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Total number of matching records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// One-based position of the first record of the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,
}

/// Shapes result records: field inclusion lists, sort keys, and pagination.
pub struct RecordProjector;

impl RecordProjector {
    /// Parses the `fields` option into an inclusion list.
    ///
    /// Returns `None` for "all fields": an absent option, a blank string, or
    /// the single wildcard `*`. Otherwise the comma-separated names are
    /// trimmed and the reserved identifier field is forced into the list so
    /// every shaped record stays addressable.
    pub fn field_list(fields: Option<&str>) -> Option<Vec<String>> {
        let raw = fields?.trim();
        if raw.is_empty() {
            return None;
        }
        let mut list: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if list.is_empty() || list.iter().any(|f| f == "*") {
            return None;
        }
        if !list.iter().any(|f| f == ID_FIELD) {
            list.insert(0, ID_FIELD.to_string());
        }
        Some(list)
    }

    /// Parses the comma-form `order` option: `"name asc, age desc"`.
    ///
    /// Each item is a field name with an optional direction word; anything
    /// but `desc` (case-insensitive) sorts ascending.
    pub fn sort_keys(order: &str) -> Vec<SortKey> {
        order
            .split(',')
            .filter_map(|item| Self::sort_key(item))
            .collect()
    }

    /// Parses the list-form `order` option, one `"field direction"` item per
    /// entry.
    pub fn sort_keys_from_list(items: &[String]) -> Vec<SortKey> {
        items
            .iter()
            .filter_map(|item| Self::sort_key(item))
            .collect()
    }

    fn sort_key(item: &str) -> Option<SortKey> {
        let mut words = item.split_whitespace();
        let field = words.next()?.to_string();
        let direction = match words.next() {
            Some(word) if word.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        Some(SortKey { field, direction })
    }

    /// Resolves the pagination window for a set read.
    ///
    /// `requested` is the client's limit, where zero or negative means "no
    /// preference"; `max_allowed` is the server-side cap on page size. The
    /// `more` flag reports whether records remain past the largest page the
    /// server would serve from `offset`, and `next` points at the first
    /// record of the following page, counted from one.
    pub fn window(count: u64, requested: i64, offset: u64, max_allowed: u64) -> PageWindow {
        let limit = if requested <= 0 || requested as u64 > max_allowed {
            max_allowed
        } else {
            requested as u64
        };
        let more = count.saturating_sub(offset) > max_allowed;
        let next = if more { Some(offset + limit + 1) } else { None };
        PageWindow {
            limit,
            offset,
            more,
            next,
        }
    }

    /// Applies an inclusion list to a record. `None` keeps every field.
    ///
    /// Fields appear in the order the list names them; names the record does
    /// not carry are skipped.
    pub fn apply_fields(doc: &Document, fields: Option<&[String]>) -> Document {
        let Some(fields) = fields else {
            return doc.clone();
        };
        let mut shaped = Document::new();
        for field in fields {
            if let Some(value) = doc.get(field) {
                shaped.insert(field.clone(), value.clone());
            }
        }
        shaped
    }
}
