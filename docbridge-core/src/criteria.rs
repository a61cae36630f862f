//! The criteria tree: the native-agnostic form every filter compiles to.
//!
//! A [`Criteria`] value is a tree of field comparisons joined by logical
//! operators. Store clients never see filter text or structured filter JSON;
//! they receive this tree and translate it with a [`CriteriaVisitor`] into
//! whatever their native query form is (a BSON filter document, an in-memory
//! predicate, and so on).
//!
//! # Construction
//!
//! Trees are usually produced by the filter compiler, but can be built
//! directly:
//!
//! ```ignore
//! use docbridge_core::criteria::Criteria;
//!
//! let criteria = Criteria::eq("status", "active")
//!     .and(Criteria::gte("age", 21))
//!     .or(Criteria::eq("role", "admin"));
//! ```

use bson::Bson;

use crate::error::RecordError;

/// Comparison operators usable against a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal to.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Value is one of the listed values.
    In,
    /// Value is none of the listed values.
    Nin,
    /// Array field contains every listed value.
    All,
    /// String field contains the value as a substring.
    Contains,
    /// String field starts with the value.
    StartsWith,
    /// String field ends with the value.
    EndsWith,
}

/// Connectives joining multiple criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// Every child must match.
    And,
    /// At least one child must match.
    Or,
    /// No child may match.
    Nor,
}

/// A filter criteria tree.
///
/// Leaves compare one field against one value; interior nodes join children
/// with a logical connective or negate a single child.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Single-field comparison.
    Compare {
        /// The field path to compare, dotted for nested fields.
        field: String,
        /// The comparison operator.
        op: CompareOp,
        /// The native value to compare against.
        value: Bson,
    },
    /// Children joined by a logical connective.
    Logical {
        /// The connective.
        op: LogicalOp,
        /// The joined children, two or more in well-formed trees.
        children: Vec<Criteria>,
    },
    /// Negation of a single child.
    Not(Box<Criteria>),
}

impl Criteria {
    /// Creates a field comparison criterion.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Bson>) -> Self {
        Criteria::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Equal-to criterion.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// Not-equal criterion.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// Greater-than criterion.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// Greater-than-or-equal criterion.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    /// Less-than criterion.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// Less-than-or-equal criterion.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    /// Membership criterion: the field's value is one of `values`.
    pub fn is_in(field: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Self {
        Self::compare(field, CompareOp::In, Bson::Array(values.into_iter().collect()))
    }

    /// Exclusion criterion: the field's value is none of `values`.
    pub fn not_in(field: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Self {
        Self::compare(field, CompareOp::Nin, Bson::Array(values.into_iter().collect()))
    }

    /// Array criterion: the field contains every one of `values`.
    pub fn has_all(field: impl Into<String>, values: impl IntoIterator<Item = Bson>) -> Self {
        Self::compare(field, CompareOp::All, Bson::Array(values.into_iter().collect()))
    }

    /// Substring criterion.
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::Contains, Bson::String(value.into()))
    }

    /// Prefix criterion.
    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::StartsWith, Bson::String(value.into()))
    }

    /// Suffix criterion.
    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, CompareOp::EndsWith, Bson::String(value.into()))
    }

    /// Combines this criterion with another using AND.
    ///
    /// If this criterion is already an AND, the other is appended to its
    /// children rather than nesting a second level.
    pub fn and(self, other: Criteria) -> Self {
        match self {
            Criteria::Logical {
                op: LogicalOp::And,
                mut children,
            } => {
                children.push(other);
                Criteria::Logical {
                    op: LogicalOp::And,
                    children,
                }
            }
            _ => Criteria::Logical {
                op: LogicalOp::And,
                children: vec![self, other],
            },
        }
    }

    /// Combines this criterion with another using OR, flattening as
    /// [`Criteria::and`] does.
    pub fn or(self, other: Criteria) -> Self {
        match self {
            Criteria::Logical {
                op: LogicalOp::Or,
                mut children,
            } => {
                children.push(other);
                Criteria::Logical {
                    op: LogicalOp::Or,
                    children,
                }
            }
            _ => Criteria::Logical {
                op: LogicalOp::Or,
                children: vec![self, other],
            },
        }
    }

    /// Negates this criterion.
    pub fn not(self) -> Self {
        Criteria::Not(Box::new(self))
    }

    /// Joins criteria under one connective.
    ///
    /// Returns `None` for an empty list and the sole element unchanged for a
    /// single-element list, so callers can combine optional fragments without
    /// producing degenerate one-child nodes.
    pub fn join(op: LogicalOp, parts: Vec<Criteria>) -> Option<Criteria> {
        let mut parts = parts;
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Criteria::Logical { op, children: parts }),
        }
    }
}

/// Visitor over a criteria tree.
///
/// Implementors translate the tree into a native query form. The provided
/// [`visit_criteria`](CriteriaVisitor::visit_criteria) method dispatches on
/// the node kind; implementors supply the three node handlers.
pub trait CriteriaVisitor {
    type Output;
    type Error: Into<RecordError>;

    fn visit_logical(
        &mut self,
        op: LogicalOp,
        children: &[Criteria],
    ) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, child: &Criteria) -> Result<Self::Output, Self::Error>;
    fn visit_compare(
        &mut self,
        field: &str,
        op: &CompareOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_criteria(&mut self, criteria: &Criteria) -> Result<Self::Output, Self::Error> {
        match criteria {
            Criteria::Logical { op, children } => self.visit_logical(*op, children),
            Criteria::Not(child) => self.visit_not(child),
            Criteria::Compare { field, op, value } => self.visit_compare(field, op, value),
        }
    }
}
