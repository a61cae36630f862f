//! Conversion between wire values (JSON) and native store values (BSON).
//!
//! The wire protocol is plain JSON plus two tagged forms for types JSON cannot
//! express directly:
//!
//! - `{"$date": <value>}` becomes a native datetime. The payload may be an
//!   RFC 3339 string, a `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` string (read as
//!   UTC), an integer epoch-milliseconds value, or empty/null for "now".
//! - `{"$id": "<string>"}` becomes a native identifier via
//!   [`IdentifierNormalizer`].
//!
//! On the way out, native-only types are rendered to client-friendly strings:
//! ObjectIds as 24-hex, datetimes as RFC 3339, binary as base64, and anything
//! more exotic through its display form. Conversion failures on the way in are
//! [`RecordError::Validation`] errors naming the offending field by its dotted
//! path.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bson::{Bson, Document};
use chrono::{NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::error::{RecordError, RecordResult};
use crate::ident::IdentifierNormalizer;

/// Tag key for wire datetime values.
pub(crate) const DATE_TAG: &str = "$date";
/// Tag key for wire identifier values.
pub(crate) const ID_TAG: &str = "$id";

/// Converts values between their wire (JSON) and native (BSON) forms.
pub struct ValueCodec;

impl ValueCodec {
    /// Converts a wire value to its native form.
    ///
    /// `path` is the dotted location of `value` within the enclosing record
    /// and is used to name the field in validation errors; pass `""` at the
    /// root.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Validation`] when a tagged form carries an
    /// unusable payload, such as an unparseable date string.
    pub fn to_native(value: &JsonValue, path: &str) -> RecordResult<Bson> {
        match value {
            JsonValue::Null => Ok(Bson::Null),
            JsonValue::Bool(b) => Ok(Bson::Boolean(*b)),
            JsonValue::Number(n) => Ok(Self::number_to_native(n)),
            JsonValue::String(s) => Ok(Bson::String(s.clone())),
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(Self::to_native(item, &join_path(path, &i.to_string()))?);
                }
                Ok(Bson::Array(out))
            }
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    if let Some(payload) = map.get(DATE_TAG) {
                        return Ok(Bson::DateTime(Self::wire_date(payload, path)?));
                    }
                    if let Some(payload) = map.get(ID_TAG) {
                        return Self::wire_id(payload, path);
                    }
                }
                let mut doc = Document::new();
                for (key, item) in map {
                    doc.insert(key.clone(), Self::to_native(item, &join_path(path, key))?);
                }
                Ok(Bson::Document(doc))
            }
        }
    }

    /// Converts a wire record to a native document.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Validation`] when the value is not a JSON
    /// object, or when any nested tagged form is invalid.
    pub fn record_to_native(value: &JsonValue) -> RecordResult<Document> {
        match Self::to_native(value, "")? {
            Bson::Document(doc) => Ok(doc),
            _ => Err(RecordError::Validation(
                "record payload must be a JSON object".to_string(),
            )),
        }
    }

    /// Renders a native value to its wire form. Total: every BSON type has a
    /// wire rendering, falling back to the display form for exotic types.
    pub fn from_native(value: &Bson) -> JsonValue {
        match value {
            Bson::Null => JsonValue::Null,
            Bson::Boolean(b) => json!(b),
            Bson::Int32(n) => json!(n),
            Bson::Int64(n) => json!(n),
            Bson::Double(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Bson::String(s) => json!(s),
            Bson::ObjectId(oid) => json!(oid.to_hex()),
            Bson::DateTime(dt) => json!(
                dt.to_chrono()
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            Bson::Binary(bin) => json!(BASE64.encode(&bin.bytes)),
            Bson::Array(items) => JsonValue::Array(items.iter().map(Self::from_native).collect()),
            Bson::Document(doc) => Self::record_from_native(doc),
            other => json!(other.to_string()),
        }
    }

    /// Renders a native document to a wire record, preserving field order.
    pub fn record_from_native(doc: &Document) -> JsonValue {
        let mut map = serde_json::Map::with_capacity(doc.len());
        for (key, value) in doc {
            map.insert(key.clone(), Self::from_native(value));
        }
        JsonValue::Object(map)
    }

    /// Reads a `$date` payload into a native datetime.
    fn wire_date(payload: &JsonValue, path: &str) -> RecordResult<bson::DateTime> {
        match payload {
            JsonValue::Null => Ok(bson::DateTime::now()),
            JsonValue::String(s) if s.is_empty() => Ok(bson::DateTime::now()),
            JsonValue::String(s) => Self::parse_date_string(s).ok_or_else(|| {
                RecordError::Validation(format!(
                    "invalid date value '{s}' for field '{}'",
                    display_path(path)
                ))
            }),
            JsonValue::Number(n) => n
                .as_i64()
                .map(bson::DateTime::from_millis)
                .ok_or_else(|| {
                    RecordError::Validation(format!(
                        "invalid epoch date value for field '{}'",
                        display_path(path)
                    ))
                }),
            _ => Err(RecordError::Validation(format!(
                "invalid date value for field '{}'",
                display_path(path)
            ))),
        }
    }

    /// Reads a `$id` payload into a native identifier.
    fn wire_id(payload: &JsonValue, path: &str) -> RecordResult<Bson> {
        match payload {
            JsonValue::String(s) => Ok(IdentifierNormalizer::to_native(s)),
            _ => Err(RecordError::Validation(format!(
                "invalid identifier value for field '{}'",
                display_path(path)
            ))),
        }
    }

    /// Tries the accepted date string layouts in order: RFC 3339, then
    /// `YYYY-MM-DD HH:MM:SS`, then bare `YYYY-MM-DD`, the latter two read as
    /// UTC.
    fn parse_date_string(s: &str) -> Option<bson::DateTime> {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return Some(bson::DateTime::from_chrono(dt.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Some(bson::DateTime::from_chrono(Utc.from_utc_datetime(&naive)));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(bson::DateTime::from_chrono(Utc.from_utc_datetime(&midnight)));
        }
        None
    }

    fn number_to_native(n: &serde_json::Number) -> Bson {
        match n.as_i64() {
            Some(i) => Bson::Int64(i),
            // u64 beyond i64::MAX and true floats both land here.
            None => Bson::Double(n.as_f64().unwrap_or_default()),
        }
    }
}

fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "(root)" } else { path }
}
