//! Response shapes: single records, wrapped sets, and error envelopes.
//!
//! Responses take one of three JSON shapes. A single-target operation answers
//! with the bare record object. A set operation answers with the records
//! nested under the configured wrapper key, plus an optional `meta` block of
//! pagination data. Failures answer with an `error` envelope carrying the
//! message and code, and for batch failures a `context` block with the
//! failing indices and the per-item outcomes.

use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::RecordError;
use crate::projector::Meta;

/// Key of the pagination metadata block in set responses.
const META_KEY: &str = "meta";

/// A successful response, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordResponse {
    /// One bare record object.
    Single(JsonValue),
    /// A set of records, wrapped on render.
    Set {
        /// The result records, in result order.
        records: Vec<JsonValue>,
        /// Pagination metadata, when applicable.
        meta: Option<Meta>,
    },
}

impl RecordResponse {
    /// A set response without metadata.
    pub fn set(records: Vec<JsonValue>) -> Self {
        RecordResponse::Set {
            records,
            meta: None,
        }
    }

    /// Renders the response to its wire JSON shape.
    pub fn to_json(&self, wrapper: &str) -> JsonValue {
        match self {
            RecordResponse::Single(record) => record.clone(),
            RecordResponse::Set { records, meta } => {
                let mut map = serde_json::Map::new();
                map.insert(wrapper.to_string(), JsonValue::Array(records.clone()));
                if let Some(meta) = meta {
                    map.insert(
                        META_KEY.to_string(),
                        serde_json::to_value(meta).unwrap_or(JsonValue::Null),
                    );
                }
                JsonValue::Object(map)
            }
        }
    }
}

/// Renders an error to its wire envelope.
///
/// Batch failures additionally carry a `context` block: the failing indices
/// under `error`, and the per-item outcomes under the wrapper key.
pub fn error_envelope(error: &RecordError, wrapper: &str) -> JsonValue {
    let mut body = serde_json::Map::new();
    body.insert("message".to_string(), json!(error.to_string()));
    body.insert("code".to_string(), json!(error.code()));
    if let RecordError::Batch(failure) = error {
        let mut context = serde_json::Map::new();
        context.insert("error".to_string(), json!(failure.error_indices));
        context.insert(
            wrapper.to_string(),
            JsonValue::Array(failure.outcomes.clone()),
        );
        body.insert("context".to_string(), JsonValue::Object(context));
    }
    json!({ "error": body })
}
