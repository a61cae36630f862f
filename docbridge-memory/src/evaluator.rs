//! Criteria evaluation for in-memory record filtering.
//!
//! A [`RecordEvaluator`] walks a criteria tree against one BSON record and
//! answers whether the record matches.

use std::cmp::Ordering;
use std::collections::HashMap;

use bson::oid::ObjectId;
use bson::{Bson, Document, datetime::DateTime};

use docbridge_core::criteria::{CompareOp, Criteria, CriteriaVisitor, LogicalOp};
use docbridge_core::error::RecordError;

/// A view of a BSON value that carries the comparison semantics criteria
/// evaluation needs. Numeric types normalize to f64 so mixed integer and
/// double comparisons behave the way a native store would.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value, integers widened to f64
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// Object identifier
    ObjectId(&'a ObjectId),
    /// String value
    String(&'a str),
    /// Binary payload
    Binary(&'a [u8]),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(value),
            Bson::String(value) => Comparable::String(value),
            Bson::Binary(value) => Comparable::Binary(&value.bytes),
            Bson::Array(arr) => {
                Comparable::Array(arr.iter().map(Comparable::from).collect::<Vec<_>>())
            }
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            // Remaining types take no part in comparisons.
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => {
                a.bytes().partial_cmp(&b.bytes())
            }
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a possibly dotted field path inside a record.
pub(crate) fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => lookup_path(doc.get(head)?.as_document()?, rest),
    }
}

/// Evaluates a criteria tree against one record.
pub(crate) struct RecordEvaluator<'a> {
    record: &'a Document,
}

impl<'a> RecordEvaluator<'a> {
    pub fn new(record: &'a Document) -> Self {
        Self { record }
    }

    /// Whether `record` satisfies `criteria`. Evaluation failures count as
    /// non-matches, mirroring how a native store skips malformed candidates.
    pub fn matches(record: &Document, criteria: &Criteria) -> bool {
        RecordEvaluator::new(record)
            .visit_criteria(criteria)
            .unwrap_or(false)
    }
}

impl CriteriaVisitor for RecordEvaluator<'_> {
    type Output = bool;
    type Error = RecordError;

    fn visit_logical(
        &mut self,
        op: LogicalOp,
        children: &[Criteria],
    ) -> Result<Self::Output, Self::Error> {
        match op {
            LogicalOp::And => {
                for child in children {
                    if !self.visit_criteria(child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalOp::Or => {
                for child in children {
                    if self.visit_criteria(child)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            LogicalOp::Nor => {
                for child in children {
                    if self.visit_criteria(child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn visit_not(&mut self, child: &Criteria) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_criteria(child)?)
    }

    fn visit_compare(
        &mut self,
        field: &str,
        op: &CompareOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = lookup_path(self.record, field) else {
            // Absent fields satisfy only the negative comparisons.
            return Ok(matches!(op, CompareOp::Ne | CompareOp::Nin));
        };
        match op {
            CompareOp::Eq => Ok(Comparable::from(field_value) == Comparable::from(value)),
            CompareOp::Ne => Ok(Comparable::from(field_value) != Comparable::from(value)),
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
                match Comparable::from(field_value).partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => Ok(match op {
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::Gte => ordering != Ordering::Less,
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::Lte => ordering != Ordering::Greater,
                        _ => unreachable!(),
                    }),
                    None => Ok(false),
                }
            }
            CompareOp::In => Ok(membership(field_value, value)),
            CompareOp::Nin => Ok(!membership(field_value, value)),
            CompareOp::All => {
                let Bson::Array(wanted) = value else {
                    return Ok(false);
                };
                match field_value {
                    Bson::Array(actual) => {
                        let actual: Vec<Comparable> =
                            actual.iter().map(Comparable::from).collect();
                        Ok(wanted
                            .iter()
                            .all(|want| actual.iter().any(|item| *item == Comparable::from(want))))
                    }
                    single => Ok(wanted
                        .iter()
                        .all(|want| Comparable::from(single) == Comparable::from(want))),
                }
            }
            CompareOp::Contains => match Comparable::from(field_value) {
                Comparable::Array(array) => {
                    Ok(array.iter().any(|item| item == &Comparable::from(value)))
                }
                Comparable::String(left) => match Comparable::from(value) {
                    Comparable::String(right) => Ok(left.contains(right)),
                    _ => Ok(false),
                },
                _ => Ok(false),
            },
            CompareOp::StartsWith => {
                match (Comparable::from(field_value), Comparable::from(value)) {
                    (Comparable::String(left), Comparable::String(right)) => {
                        Ok(left.starts_with(right))
                    }
                    _ => Ok(false),
                }
            }
            CompareOp::EndsWith => {
                match (Comparable::from(field_value), Comparable::from(value)) {
                    (Comparable::String(left), Comparable::String(right)) => {
                        Ok(left.ends_with(right))
                    }
                    _ => Ok(false),
                }
            }
        }
    }
}

/// `In` semantics: the field equals one of the candidates, or the field is
/// an array holding one of the candidates.
fn membership(field_value: &Bson, candidates: &Bson) -> bool {
    let Bson::Array(candidates) = candidates else {
        return Comparable::from(field_value) == Comparable::from(candidates);
    };
    for candidate in candidates {
        let candidate = Comparable::from(candidate);
        if Comparable::from(field_value) == candidate {
            return true;
        }
        if let Bson::Array(items) = field_value {
            if items.iter().any(|item| Comparable::from(item) == candidate) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_missing_field_satisfies_negative_ops() {
        let record = doc! {"name": "zoe"};
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::ne("age", 30_i64)
        ));
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::not_in("age", vec![Bson::Int64(30)])
        ));
        assert!(!RecordEvaluator::matches(
            &record,
            &Criteria::eq("age", 30_i64)
        ));
        assert!(!RecordEvaluator::matches(
            &record,
            &Criteria::gt("age", 1_i64)
        ));
    }

    #[test]
    fn test_mixed_numeric_widths_compare() {
        let record = doc! {"age": 30_i32};
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::eq("age", 30_i64)
        ));
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::gte("age", 29.5_f64)
        ));
    }

    #[test]
    fn test_object_ids_compare_by_value() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        let record = doc! {"_id": oid};
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::eq("_id", Bson::ObjectId(oid))
        ));
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::is_in("_id", vec![Bson::ObjectId(oid)])
        ));
    }

    #[test]
    fn test_dotted_paths_reach_nested_fields() {
        let record = doc! {"name": {"first": "zoe", "last": "park"}};
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::eq("name.first", "zoe")
        ));
        assert!(!RecordEvaluator::matches(
            &record,
            &Criteria::eq("name.middle", "q")
        ));
    }

    #[test]
    fn test_string_ops_are_case_sensitive() {
        let record = doc! {"name": "Zoe Park"};
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::contains("name", "Park")
        ));
        assert!(!RecordEvaluator::matches(
            &record,
            &Criteria::contains("name", "park")
        ));
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::starts_with("name", "Zoe")
        ));
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::ends_with("name", "Park")
        ));
    }

    #[test]
    fn test_array_membership_and_all() {
        let record = doc! {"tags": ["a", "b", "c"]};
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::is_in("tags", vec![Bson::String("b".into())])
        ));
        assert!(RecordEvaluator::matches(
            &record,
            &Criteria::has_all(
                "tags",
                vec![Bson::String("a".into()), Bson::String("c".into())]
            )
        ));
        assert!(!RecordEvaluator::matches(
            &record,
            &Criteria::has_all(
                "tags",
                vec![Bson::String("a".into()), Bson::String("z".into())]
            )
        ));
    }

    #[test]
    fn test_nor_rejects_any_match() {
        let record = doc! {"age": 30_i64};
        let criteria = Criteria::join(
            LogicalOp::Nor,
            vec![Criteria::eq("age", 30_i64), Criteria::eq("age", 31_i64)],
        )
        .unwrap();
        assert!(!RecordEvaluator::matches(&record, &criteria));
        let record = doc! {"age": 32_i64};
        assert!(RecordEvaluator::matches(&record, &criteria));
    }
}
