//! Error types and result types for record access operations.
//!
//! Every fallible operation in this crate returns [`RecordResult<T>`]. The
//! error taxonomy is deliberately small: a request is either rejected before
//! any store call ([`RecordError::Validation`]), a single addressed record is
//! missing ([`RecordError::NotFound`]), the native store misbehaved
//! ([`RecordError::Store`]), or a multi-record batch partially failed
//! ([`RecordError::Batch`]).

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Represents all possible errors that can occur while servicing a record request.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The request payload, filter, or options were rejected before any store
    /// call was made. Maps to a client error (400).
    #[error("Validation error: {0}")]
    Validation(String),
    /// A single-target lookup (by identifier) matched nothing. Maps to 404.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// The native store call failed, or a bulk call reported an inconsistent
    /// result. Maps to a server error (500).
    #[error("Store error on table '{table}': {message}")]
    Store {
        /// Table (collection) the failing call addressed.
        table: String,
        /// Native error text plus the attempted operation and criteria.
        message: String,
    },
    /// Aggregate outcome of a multi-record batch in which one or more items
    /// failed. Carries per-index outcomes for the response envelope.
    #[error("{0}")]
    Batch(BatchFailure),
}

/// A specialized `Result` type for record access operations.
pub type RecordResult<T> = Result<T, RecordError>;

impl RecordError {
    /// HTTP-style status code for this error.
    pub fn code(&self) -> u16 {
        match self {
            RecordError::Validation(_) => 400,
            RecordError::NotFound(_) => 404,
            RecordError::Store { .. } => 500,
            RecordError::Batch(failure) => failure.code,
        }
    }

    /// Shorthand for a [`RecordError::Store`] wrapping a native store error
    /// with the table and operation that produced it.
    pub fn store(table: impl Into<String>, message: impl Into<String>) -> Self {
        RecordError::Store {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a batch in which some items failed.
///
/// `error_indices` holds the zero-based positions of the failing items in the
/// submitted batch. `outcomes` is parallel to the submitted batch: successful
/// positions hold the item's result record, failing positions hold an error
/// object with `message` and `code`, and positions never attempted hold null.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    /// Summary message for the whole batch.
    pub message: String,
    /// Status code for the aggregate response.
    pub code: u16,
    /// Zero-based indices of the failing items.
    pub error_indices: Vec<usize>,
    /// Per-item outcomes, parallel to the submitted batch.
    pub outcomes: Vec<JsonValue>,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Batch error: {}", self.message)
    }
}

impl From<BsonError> for RecordError {
    fn from(err: BsonError) -> Self {
        RecordError::Validation(format!("malformed record payload: {err}"))
    }
}

impl From<SerdeJsonError> for RecordError {
    fn from(err: SerdeJsonError) -> Self {
        RecordError::Validation(format!("malformed JSON payload: {err}"))
    }
}
