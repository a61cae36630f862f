//! Store client abstraction: the native side of the record access layer.
//!
//! A [`StoreClient`] is the narrow waist between the protocol machinery and a
//! concrete document store. The batch engine compiles requests down to
//! [`Criteria`] trees, [`UpdateSpec`]s, and [`ReadQuery`]s, and a client
//! executes them natively. Implementations must be thread-safe and support
//! concurrent access from multiple async tasks.
//!
//! Clients are constructed through a [`StoreClientBuilder`], which owns the
//! connection bootstrap (DSN parsing, handshakes) so the client itself can
//! stay cheap to clone and share.

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::criteria::Criteria;
use crate::error::RecordResult;
use crate::projector::SortKey;

/// A fully resolved set read: criteria plus shaping.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    /// Criteria to match, or `None` for every record in the table.
    pub criteria: Option<Criteria>,
    /// Inclusion list for returned fields, or `None` for all fields.
    pub projection: Option<Vec<String>>,
    /// Sort keys, applied in order.
    pub sort: Vec<SortKey>,
    /// Maximum number of records to return.
    pub limit: Option<u64>,
    /// Number of matching records to skip.
    pub offset: Option<u64>,
}

/// A fully resolved mutation payload.
///
/// The request boundary classifies each update payload exactly once; store
/// clients never inspect payloads to guess intent.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Replace the matched record wholesale, keeping its identifier.
    Replace(Document),
    /// Apply a native operator document (`$set`, `$unset`, `$inc`, ...) to
    /// the matched record.
    Apply(Document),
}

/// Options for [`StoreClient::find_one_and_update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifyOptions {
    /// Return the record as it is after the mutation instead of before.
    pub return_new: bool,
    /// Delete the matched record instead of updating it. The update is
    /// ignored and the deleted record is returned.
    pub remove: bool,
}

/// Description of one index on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// First (usually only) indexed field, when the native form exposes one.
    pub field: Option<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// Async interface to a concrete document store.
///
/// All operations address one table (collection) by name and return
/// [`RecordResult`]; implementations wrap native errors with the table and
/// operation context so failures surface as
/// [`RecordError::Store`](crate::error::RecordError::Store).
#[async_trait]
pub trait StoreClient: Send + Sync + Debug {
    /// Finds every record matching a read query, shaped and windowed.
    async fn find(&self, table: &str, query: ReadQuery) -> RecordResult<Vec<Document>>;

    /// Finds the first record matching `criteria`, or `None`.
    async fn find_one(
        &self,
        table: &str,
        criteria: &Criteria,
        projection: Option<&[String]>,
    ) -> RecordResult<Option<Document>>;

    /// Inserts one record and returns its native identifier.
    ///
    /// The record may carry its own identifier; otherwise the store assigns
    /// one.
    async fn insert(&self, table: &str, record: Document) -> RecordResult<Bson>;

    /// Inserts several records in one native call and returns their native
    /// identifiers in input order.
    async fn insert_many(&self, table: &str, records: Vec<Document>) -> RecordResult<Vec<Bson>>;

    /// Applies one update to every record matching `criteria` (or only the
    /// first when `multi` is false) and returns the number of matched
    /// records.
    async fn update_matching(
        &self,
        table: &str,
        criteria: &Criteria,
        update: &UpdateSpec,
        multi: bool,
    ) -> RecordResult<u64>;

    /// Atomically mutates (or removes, per [`ModifyOptions`]) the first
    /// record matching `criteria` and returns it, `None` when nothing
    /// matched.
    ///
    /// With `return_new` unset the record is returned as it was before the
    /// mutation, which is what batch rollback snapshots.
    async fn find_one_and_update(
        &self,
        table: &str,
        criteria: &Criteria,
        update: Option<&UpdateSpec>,
        projection: Option<&[String]>,
        options: ModifyOptions,
    ) -> RecordResult<Option<Document>>;

    /// Deletes every record matching `criteria` and returns how many went
    /// away.
    async fn delete_matching(&self, table: &str, criteria: &Criteria) -> RecordResult<u64>;

    /// Counts records matching `criteria`, or all records when `None`.
    async fn count_matching(&self, table: &str, criteria: Option<&Criteria>) -> RecordResult<u64>;

    /// Lists the indexes defined on a table.
    async fn list_indexes(&self, table: &str) -> RecordResult<Vec<IndexInfo>>;

    /// Creates a single-field index, optionally unique.
    async fn create_index(&self, table: &str, field: &str, unique: bool) -> RecordResult<()>;

    /// Creates an empty table.
    async fn create_table(&self, name: &str) -> RecordResult<()>;

    /// Drops a table and everything in it. Irreversible.
    async fn drop_table(&self, name: &str) -> RecordResult<()>;
}

/// Factory for store clients.
#[async_trait]
pub trait StoreClientBuilder {
    type Client: StoreClient;

    /// Consumes the builder, performs any connection bootstrap, and returns
    /// a ready client.
    async fn build(self) -> RecordResult<Self::Client>;
}
