//! The request boundary: verbs, targets, options, and payload intake.
//!
//! A [`RecordRequest`] is the already-routed form of one client call against
//! one table: the verb, the path target (nothing, a single identifier, or the
//! literal `by-ids` selector), the parsed request options, and the raw JSON
//! payload. Everything request-scoped that the engine needs beyond that, such
//! as the acting user for audit stamping, travels in a [`RequestContext`]
//! passed alongside; nothing is read from ambient state.

use bson::{Document, doc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::client::UpdateSpec;
use crate::error::{RecordError, RecordResult};
use crate::filter::{FilterInput, ParamMap};
use crate::projector::OrderInput;

/// Request verbs understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read records.
    Get,
    /// Create records.
    Post,
    /// Replace records wholesale.
    Put,
    /// Merge fields into records.
    Patch,
    /// Delete records.
    Delete,
}

impl Verb {
    /// Maps an HTTP method name onto a verb. `MERGE` is accepted as an alias
    /// for `PATCH`.
    pub fn from_method(method: &str) -> Option<Verb> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Verb::Get),
            "POST" => Some(Verb::Post),
            "PUT" => Some(Verb::Put),
            "PATCH" | "MERGE" => Some(Verb::Patch),
            "DELETE" => Some(Verb::Delete),
            _ => None,
        }
    }
}

/// What the request path addressed within the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The table as a whole; targeting comes from options and payload.
    Whole,
    /// A single record by wire identifier.
    Id(String),
    /// The literal `by-ids` selector; identifiers come from the `ids` option.
    ByIds,
}

impl Target {
    /// Reads the path segment after the table name, if any.
    pub fn from_segment(segment: Option<&str>) -> Target {
        match segment {
            None => Target::Whole,
            Some("by-ids") => Target::ByIds,
            Some(id) => Target::Id(id.to_string()),
        }
    }
}

/// Parsed request options, as they arrive on the query string or in the
/// payload envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Comma-separated field inclusion list, `*` for all.
    pub fields: Option<String>,
    /// Comma-separated wire identifiers to address.
    pub ids: Option<String>,
    /// Client filter, textual or structured.
    pub filter: Option<FilterInput>,
    /// Named `:parameter` values for the filter.
    pub params: ParamMap,
    /// Requested page size; missing, zero, or negative means no preference.
    pub limit: Option<i64>,
    /// Records to skip before the page.
    pub offset: Option<u64>,
    /// Sort order, comma form or a list of items.
    pub order: Option<OrderInput>,
    /// Keep going after individual batch item failures and report them all.
    #[serde(rename = "continue")]
    pub continue_on_error: bool,
    /// Undo completed batch items when a later one fails.
    #[serde(rename = "rollback")]
    pub rollback_on_error: bool,
    /// Force the total match count into response metadata.
    pub include_count: bool,
}

/// One routed client call against one table.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    /// The verb.
    pub verb: Verb,
    /// The addressed table (collection) name.
    pub table: String,
    /// The path target within the table.
    pub target: Target,
    /// Parsed request options.
    pub options: RequestOptions,
    /// Raw JSON payload, absent for most reads and deletes.
    pub payload: Option<JsonValue>,
}

impl RecordRequest {
    /// Creates a request addressing a table as a whole, with default options
    /// and no payload.
    pub fn new(verb: Verb, table: impl Into<String>) -> Self {
        RecordRequest {
            verb,
            table: table.into(),
            target: Target::Whole,
            options: RequestOptions::default(),
            payload: None,
        }
    }

    /// Addresses a single record by wire identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.target = Target::Id(id.into());
        self
    }

    /// Sets the path target.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Replaces the request options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Attaches a JSON payload.
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Request-scoped context the engine cannot derive from the request itself.
///
/// Audit stamping reads the acting user and the request timestamp from here,
/// so replaying a request with the same context writes the same audit trail.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Acting user, stamped into audit fields when configured.
    pub user_id: Option<String>,
    /// When the request happened; `None` means "now" at stamping time.
    pub requested_at: Option<bson::DateTime>,
}

impl RequestContext {
    /// Context acting as `user_id` at the current time.
    pub fn acting_as(user_id: impl Into<String>) -> Self {
        RequestContext {
            user_id: Some(user_id.into()),
            requested_at: None,
        }
    }

    /// The effective timestamp for audit stamping.
    pub fn timestamp(&self) -> bson::DateTime {
        self.requested_at.unwrap_or_else(bson::DateTime::now)
    }
}

/// The records carried by one payload, plus whether the client sent a bare
/// single record (which shapes the response as a single object rather than a
/// wrapped set).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    /// The wire records, in payload order.
    pub records: Vec<JsonValue>,
    /// True when the payload was one bare record object.
    pub single: bool,
}

/// Unwraps a payload into its records.
///
/// Three shapes are accepted: an object nesting an array (or one object)
/// under the wrapper key, a bare array of records, and a bare single record.
///
/// # Errors
///
/// Returns [`RecordError::Validation`] when the payload is none of those, or
/// when the wrapper key holds something other than records.
pub fn unwrap_records(payload: &JsonValue, wrapper: &str) -> RecordResult<RecordSet> {
    match payload {
        JsonValue::Array(items) => Ok(RecordSet {
            records: items.clone(),
            single: false,
        }),
        JsonValue::Object(map) => match map.get(wrapper) {
            Some(JsonValue::Array(items)) => Ok(RecordSet {
                records: items.clone(),
                single: false,
            }),
            Some(inner @ JsonValue::Object(_)) => Ok(RecordSet {
                records: vec![inner.clone()],
                single: false,
            }),
            Some(_) => Err(RecordError::Validation(format!(
                "'{wrapper}' must hold a JSON array of records"
            ))),
            None => Ok(RecordSet {
                records: vec![payload.clone()],
                single: true,
            }),
        },
        _ => Err(RecordError::Validation(
            "no records found in request payload".to_string(),
        )),
    }
}

/// An update payload, classified exactly once at intake.
///
/// A payload whose top level carries any `$`-prefixed key is a native
/// operator document and passes through untouched; anything else is a plain
/// field map. Nothing downstream re-inspects payloads to guess intent.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    /// Plain field values to write.
    Fields(Document),
    /// A native operator document (`$set`, `$inc`, ...).
    Native(Document),
}

impl UpdatePayload {
    /// Classifies a native-converted payload document.
    pub fn classify(doc: Document) -> UpdatePayload {
        if doc.keys().any(|key| key.starts_with('$')) {
            UpdatePayload::Native(doc)
        } else {
            UpdatePayload::Fields(doc)
        }
    }

    /// Lowers the payload onto the client-facing [`UpdateSpec`]. `replace`
    /// selects wholesale replacement for plain field maps; native operator
    /// documents always apply as-is.
    pub fn into_spec(self, replace: bool) -> UpdateSpec {
        match self {
            UpdatePayload::Native(doc) => UpdateSpec::Apply(doc),
            UpdatePayload::Fields(doc) if replace => UpdateSpec::Replace(doc),
            UpdatePayload::Fields(doc) => UpdateSpec::Apply(doc! { "$set": doc }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_all_three_payload_shapes() {
        let wrapped = json!({"resource": [{"a": 1}, {"a": 2}]});
        let set = unwrap_records(&wrapped, "resource").unwrap();
        assert_eq!(set.records.len(), 2);
        assert!(!set.single);

        let bare_list = json!([{"a": 1}]);
        let set = unwrap_records(&bare_list, "resource").unwrap();
        assert_eq!(set.records.len(), 1);
        assert!(!set.single);

        let bare_record = json!({"a": 1});
        let set = unwrap_records(&bare_record, "resource").unwrap();
        assert_eq!(set.records.len(), 1);
        assert!(set.single);
    }

    #[test]
    fn rejects_scalar_payloads() {
        let err = unwrap_records(&json!(42), "resource").unwrap_err();
        assert!(matches!(err, RecordError::Validation(_)));

        let err = unwrap_records(&json!({"resource": "nope"}), "resource").unwrap_err();
        assert!(matches!(err, RecordError::Validation(_)));
    }

    #[test]
    fn classifies_update_payloads_once() {
        let native = UpdatePayload::classify(doc! { "$inc": { "n": 1 } });
        assert!(matches!(native, UpdatePayload::Native(_)));

        let fields = UpdatePayload::classify(doc! { "name": "x" });
        assert!(matches!(fields, UpdatePayload::Fields(_)));

        // Plain fields merge through $set unless replacing.
        let spec = UpdatePayload::classify(doc! { "name": "x" }).into_spec(false);
        assert_eq!(spec, UpdateSpec::Apply(doc! { "$set": { "name": "x" } }));

        let spec = UpdatePayload::classify(doc! { "name": "x" }).into_spec(true);
        assert_eq!(spec, UpdateSpec::Replace(doc! { "name": "x" }));
    }

    #[test]
    fn merge_method_aliases_patch() {
        assert_eq!(Verb::from_method("MERGE"), Some(Verb::Patch));
        assert_eq!(Verb::from_method("patch"), Some(Verb::Patch));
        assert_eq!(Verb::from_method("TRACE"), None);
    }

    #[test]
    fn path_segments_route_to_targets() {
        assert_eq!(Target::from_segment(None), Target::Whole);
        assert_eq!(Target::from_segment(Some("by-ids")), Target::ByIds);
        assert_eq!(
            Target::from_segment(Some("alpha-1")),
            Target::Id("alpha-1".to_string())
        );
    }
}
