//! Criteria translation from the docbridge tree to MongoDB query syntax.
//!
//! This module translates abstract criteria trees into MongoDB BSON filter
//! documents for execution by the MongoDB query engine.

use bson::{Bson, Document, doc};

use docbridge_core::criteria::{CompareOp, Criteria, CriteriaVisitor, LogicalOp};
use docbridge_core::error::RecordError;

/// Translates criteria trees into MongoDB filter documents.
///
/// This struct implements the [`CriteriaVisitor`] trait to convert abstract
/// criteria into MongoDB's native BSON filter syntax. String matching
/// operators compile to anchored, escaped regular expressions and stay
/// case-sensitive, matching the in-memory evaluator.
pub(crate) struct CriteriaTranslator;

impl CriteriaVisitor for CriteriaTranslator {
    type Output = Document;
    type Error = RecordError;

    fn visit_logical(
        &mut self,
        op: LogicalOp,
        children: &[Criteria],
    ) -> Result<Self::Output, Self::Error> {
        let translated = children
            .iter()
            .map(|child| self.visit_criteria(child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match op {
            LogicalOp::And => doc! { "$and": translated },
            LogicalOp::Or => doc! { "$or": translated },
            LogicalOp::Nor => doc! { "$nor": translated },
        })
    }

    fn visit_not(&mut self, child: &Criteria) -> Result<Self::Output, Self::Error> {
        // `$not` is not valid at the top level of a filter document; a
        // single-branch `$nor` negates any sub-filter.
        Ok(doc! {
            "$nor": [self.visit_criteria(child)?],
        })
    }

    fn visit_compare(
        &mut self,
        field: &str,
        op: &CompareOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                CompareOp::Eq => doc! { "$eq": value },
                CompareOp::Ne => doc! { "$ne": value },
                CompareOp::Gt => doc! { "$gt": value },
                CompareOp::Gte => doc! { "$gte": value },
                CompareOp::Lt => doc! { "$lt": value },
                CompareOp::Lte => doc! { "$lte": value },
                CompareOp::In => doc! { "$in": value },
                CompareOp::Nin => doc! { "$nin": value },
                CompareOp::All => doc! { "$all": value },
                CompareOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    _ => return Err(RecordError::Validation(
                        "'contains' requires a string value".to_string(),
                    )),
                },
                CompareOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(RecordError::Validation(
                        "'starts with' requires a string value".to_string(),
                    )),
                },
                CompareOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(RecordError::Validation(
                        "'ends with' requires a string value".to_string(),
                    )),
                },
            }
        })
    }
}

/// Escapes regex metacharacters so match text is taken literally.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(
            ch,
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(criteria: &Criteria) -> Document {
        CriteriaTranslator.visit_criteria(criteria).unwrap()
    }

    #[test]
    fn test_compare_ops_translate_to_native_operators() {
        let criteria = Criteria::eq("age", 30_i64);
        assert_eq!(translate(&criteria), doc! { "age": { "$eq": 30_i64 } });

        let criteria = Criteria::is_in("age", vec![Bson::Int64(1), Bson::Int64(2)]);
        assert_eq!(translate(&criteria), doc! { "age": { "$in": [1_i64, 2_i64] } });
    }

    #[test]
    fn test_not_becomes_single_branch_nor() {
        let criteria = Criteria::eq("age", 30_i64).not();
        assert_eq!(
            translate(&criteria),
            doc! { "$nor": [ { "age": { "$eq": 30_i64 } } ] }
        );
    }

    #[test]
    fn test_string_matching_escapes_regex_metacharacters() {
        let criteria = Criteria::contains("email", "a.b+c");
        assert_eq!(
            translate(&criteria),
            doc! { "email": { "$regex": "a\\.b\\+c" } }
        );

        let criteria = Criteria::starts_with("email", "zoe");
        assert_eq!(translate(&criteria), doc! { "email": { "$regex": "^zoe" } });

        let criteria = Criteria::ends_with("email", ".org");
        assert_eq!(
            translate(&criteria),
            doc! { "email": { "$regex": "\\.org$" } }
        );
    }

    #[test]
    fn test_logical_trees_nest() {
        let criteria = Criteria::eq("a", 1_i64).and(Criteria::eq("b", 2_i64));
        assert_eq!(
            translate(&criteria),
            doc! { "$and": [ { "a": { "$eq": 1_i64 } }, { "b": { "$eq": 2_i64 } } ] }
        );
    }
}
