//! Identifier normalization between wire strings and native identifiers.
//!
//! Clients address records with string identifiers. Natively, identifiers that
//! look like canonical MongoDB ObjectIds (exactly 24 lowercase hexadecimal
//! characters) are stored as [`bson::oid::ObjectId`]; anything else is stored
//! as the plain string the client sent. Conversion in both directions is
//! total: a value that cannot be promoted stays a string, it is never rejected
//! here. Uppercase hex is not promoted, because ObjectIds render back as
//! lowercase and the wire form must survive a round trip byte for byte.

use bson::Bson;
use bson::oid::ObjectId;

/// Converts identifiers between their wire (string) and native (BSON) forms.
///
/// Both directions round-trip: `from_native(to_native(s)) == s` for any wire
/// string, whether or not it was promoted to an ObjectId.
pub struct IdentifierNormalizer;

impl IdentifierNormalizer {
    /// Promotes a wire identifier to its native form.
    ///
    /// A string of exactly 24 lowercase hex digits becomes [`Bson::ObjectId`];
    /// every other string is passed through unchanged as [`Bson::String`].
    pub fn to_native(raw: &str) -> Bson {
        if Self::is_canonical(raw) {
            if let Ok(oid) = ObjectId::parse_str(raw) {
                return Bson::ObjectId(oid);
            }
        }
        Bson::String(raw.to_string())
    }

    /// Renders a native identifier back to its wire form.
    ///
    /// ObjectIds become their 24-hex representation, strings are returned
    /// as-is, and any other BSON type falls back to its display rendering.
    pub fn from_native(id: &Bson) -> String {
        match id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Whether a wire identifier has the canonical 24-hex ObjectId shape.
    pub fn is_canonical(raw: &str) -> bool {
        raw.len() == 24
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}
