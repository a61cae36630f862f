//! In-memory storage implementation for the record layer.
//!
//! This module provides a simple but complete in-memory client that stores
//! records as BSON documents in ordered maps behind an async-aware
//! read-write lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use mea::rwlock::RwLock;

use docbridge_core::ID_FIELD;
use docbridge_core::client::{
    IndexInfo, ModifyOptions, ReadQuery, StoreClient, StoreClientBuilder, UpdateSpec,
};
use docbridge_core::criteria::Criteria;
use docbridge_core::error::{RecordError, RecordResult};
use docbridge_core::ident::IdentifierNormalizer;
use docbridge_core::projector::{RecordProjector, SortDirection, SortKey};

use crate::evaluator::{Comparable, RecordEvaluator, lookup_path};

/// One table: records keyed by their canonical wire identifier, plus the
/// indexes declared on it. The ordered map gives scans a stable order, so
/// unsorted pagination stays deterministic.
#[derive(Debug, Default, Clone)]
struct Table {
    records: BTreeMap<String, Document>,
    indexes: Vec<IndexInfo>,
}

type StoreMap = HashMap<String, Table>;

/// Thread-safe in-memory record store.
///
/// This struct implements the [`StoreClient`] trait to provide a fully
/// functional record store that operates entirely in memory behind an
/// async-aware read-write lock.
///
/// # Thread Safety
///
/// `MemoryStore` is cloneable and uses an `Arc`-wrapped internal state,
/// allowing it to be safely shared across async tasks. Multiple clones of
/// the same instance share the same underlying data.
///
/// # Performance
///
/// Queries scan all records in a table (declared indexes are enforced for
/// uniqueness, not used for lookup). For small to medium datasets this is
/// typically acceptable; for larger datasets use a persistent client.
///
/// # Example
///
/// ```ignore
/// use docbridge_memory::MemoryStore;
/// use docbridge::client::StoreClient;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///
///     let id = store.insert("users", doc! {"name": "Alice"}).await?;
///     let found = store
///         .find_one("users", &Criteria::eq("_id", id), None)
///         .await?;
///     assert!(found.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct MemoryStore {
    /// The main storage map: table name -> table contents
    store: Arc<RwLock<StoreMap>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory record store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing a `MemoryStore`.
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn find(&self, table: &str, query: ReadQuery) -> RecordResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(table) = store.get(table) else {
            return Ok(vec![]);
        };

        let mut matched: Vec<Document> = table
            .records
            .values()
            .filter(|record| match &query.criteria {
                Some(criteria) => RecordEvaluator::matches(record, criteria),
                None => true,
            })
            .cloned()
            .collect();

        if !query.sort.is_empty() {
            sort_records(&mut matched, &query.sort);
        }

        Ok(matched
            .into_iter()
            .skip(query.offset.unwrap_or(0) as usize)
            .take(query.limit.map_or(usize::MAX, |limit| limit as usize))
            .map(|record| RecordProjector::apply_fields(&record, query.projection.as_deref()))
            .collect())
    }

    async fn find_one(
        &self,
        table: &str,
        criteria: &Criteria,
        projection: Option<&[String]>,
    ) -> RecordResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(table) = store.get(table) else {
            return Ok(None);
        };
        Ok(table
            .records
            .values()
            .find(|record| RecordEvaluator::matches(record, criteria))
            .map(|record| RecordProjector::apply_fields(record, projection)))
    }

    async fn insert(&self, table: &str, record: Document) -> RecordResult<Bson> {
        let mut store = self.store.write().await;
        let table_map = store.entry(table.to_string()).or_default();
        insert_record(table_map, table, record)
    }

    async fn insert_many(&self, table: &str, records: Vec<Document>) -> RecordResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let table_map = store.entry(table.to_string()).or_default();

        // Sequential, like an ordered native bulk insert: the first failure
        // aborts and earlier records stay in place.
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(insert_record(table_map, table, record)?);
        }
        Ok(ids)
    }

    async fn update_matching(
        &self,
        table: &str,
        criteria: &Criteria,
        update: &UpdateSpec,
        multi: bool,
    ) -> RecordResult<u64> {
        let mut store = self.store.write().await;
        let Some(table_map) = store.get_mut(table) else {
            return Ok(0);
        };

        let mut keys: Vec<String> = table_map
            .records
            .iter()
            .filter(|(_, record)| RecordEvaluator::matches(record, criteria))
            .map(|(key, _)| key.clone())
            .collect();
        if !multi {
            keys.truncate(1);
        }

        for key in &keys {
            let existing = table_map.records.get(key).cloned().unwrap_or_default();
            let updated = apply_update(&existing, update)?;
            check_identifier_kept(table, &existing, &updated)?;
            check_unique(table_map, table, &updated, Some(key))?;
            table_map.records.insert(key.clone(), updated);
        }
        Ok(keys.len() as u64)
    }

    async fn find_one_and_update(
        &self,
        table: &str,
        criteria: &Criteria,
        update: Option<&UpdateSpec>,
        projection: Option<&[String]>,
        options: ModifyOptions,
    ) -> RecordResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(table_map) = store.get_mut(table) else {
            return Ok(None);
        };

        let Some(key) = table_map
            .records
            .iter()
            .find(|(_, record)| RecordEvaluator::matches(record, criteria))
            .map(|(key, _)| key.clone())
        else {
            return Ok(None);
        };

        if options.remove {
            let removed = table_map.records.remove(&key).unwrap_or_default();
            return Ok(Some(RecordProjector::apply_fields(&removed, projection)));
        }

        let update = update.ok_or_else(|| {
            RecordError::Validation("modify without remove requires an update".to_string())
        })?;
        let existing = table_map.records.get(&key).cloned().unwrap_or_default();
        let updated = apply_update(&existing, update)?;
        check_identifier_kept(table, &existing, &updated)?;
        check_unique(table_map, table, &updated, Some(&key))?;
        table_map.records.insert(key, updated.clone());

        let returned = if options.return_new { updated } else { existing };
        Ok(Some(RecordProjector::apply_fields(&returned, projection)))
    }

    async fn delete_matching(&self, table: &str, criteria: &Criteria) -> RecordResult<u64> {
        let mut store = self.store.write().await;
        let Some(table_map) = store.get_mut(table) else {
            return Ok(0);
        };
        let keys: Vec<String> = table_map
            .records
            .iter()
            .filter(|(_, record)| RecordEvaluator::matches(record, criteria))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            table_map.records.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn count_matching(&self, table: &str, criteria: Option<&Criteria>) -> RecordResult<u64> {
        let store = self.store.read().await;
        let Some(table) = store.get(table) else {
            return Ok(0);
        };
        match criteria {
            None => Ok(table.records.len() as u64),
            Some(criteria) => Ok(table
                .records
                .values()
                .filter(|record| RecordEvaluator::matches(record, criteria))
                .count() as u64),
        }
    }

    async fn list_indexes(&self, table: &str) -> RecordResult<Vec<IndexInfo>> {
        let store = self.store.read().await;
        Ok(store
            .get(table)
            .map(|table| table.indexes.clone())
            .unwrap_or_default())
    }

    async fn create_index(&self, table: &str, field: &str, unique: bool) -> RecordResult<()> {
        let mut store = self.store.write().await;
        let table_map = store.entry(table.to_string()).or_default();

        if unique {
            // A unique index over data that already violates it is refused.
            let mut seen: Vec<&Bson> = Vec::new();
            for record in table_map.records.values() {
                let Some(value) = lookup_path(record, field) else {
                    continue;
                };
                if seen
                    .iter()
                    .any(|prior| Comparable::from(*prior) == Comparable::from(value))
                {
                    return Err(RecordError::store(
                        table,
                        format!("existing records duplicate values for unique index on '{field}'"),
                    ));
                }
                seen.push(value);
            }
        }

        let index = IndexInfo {
            name: format!("{field}_1"),
            field: Some(field.to_string()),
            unique,
        };
        table_map.indexes.retain(|existing| existing.name != index.name);
        table_map.indexes.push(index);
        Ok(())
    }

    async fn create_table(&self, name: &str) -> RecordResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> RecordResult<()> {
        let mut store = self.store.write().await;
        if store.remove(name).is_none() {
            return Err(RecordError::NotFound(format!("table '{name}'")));
        }
        log::debug!("dropped table '{name}'");
        Ok(())
    }
}

/// Inserts one record into a locked table, minting an identifier when the
/// record carries none.
fn insert_record(table_map: &mut Table, table: &str, record: Document) -> RecordResult<Bson> {
    let id = match record.get(ID_FIELD) {
        Some(id) => id.clone(),
        None => Bson::ObjectId(ObjectId::new()),
    };
    let key = IdentifierNormalizer::from_native(&id);
    if table_map.records.contains_key(&key) {
        return Err(RecordError::store(
            table,
            format!("duplicate identifier '{key}'"),
        ));
    }

    // Normalize the identifier to the front of the record.
    let mut doc = Document::new();
    doc.insert(ID_FIELD, id.clone());
    for (field, value) in record {
        if field != ID_FIELD {
            doc.insert(field, value);
        }
    }

    check_unique(table_map, table, &doc, None)?;
    table_map.records.insert(key, doc);
    Ok(id)
}

/// Applies an update to a record, producing the new version.
fn apply_update(existing: &Document, update: &UpdateSpec) -> RecordResult<Document> {
    match update {
        UpdateSpec::Replace(body) => {
            let mut doc = Document::new();
            if let Some(id) = existing.get(ID_FIELD) {
                doc.insert(ID_FIELD, id.clone());
            }
            for (field, value) in body {
                if field != ID_FIELD {
                    doc.insert(field.clone(), value.clone());
                }
            }
            Ok(doc)
        }
        UpdateSpec::Apply(operators) => {
            let mut doc = existing.clone();
            for (operator, arguments) in operators {
                let arguments = arguments.as_document().ok_or_else(|| {
                    RecordError::Validation(format!(
                        "update operator '{operator}' takes a document"
                    ))
                })?;
                match operator.as_str() {
                    "$set" => {
                        for (path, value) in arguments {
                            set_path(&mut doc, path, value.clone());
                        }
                    }
                    "$unset" => {
                        for (path, _) in arguments {
                            unset_path(&mut doc, path);
                        }
                    }
                    "$inc" => {
                        for (path, delta) in arguments {
                            inc_path(&mut doc, path, delta)?;
                        }
                    }
                    other => {
                        return Err(RecordError::Validation(format!(
                            "unsupported update operator '{other}'"
                        )));
                    }
                }
            }
            Ok(doc)
        }
    }
}

/// Writes a value at a possibly dotted path, creating intermediate
/// documents along the way.
fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head.to_string(), Bson::Document(Document::new()));
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Removes the value at a possibly dotted path, if present.
fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Adds a numeric delta at a possibly dotted path. A missing field starts
/// from the delta itself.
fn inc_path(doc: &mut Document, path: &str, delta: &Bson) -> RecordResult<()> {
    let next = match lookup_path(doc, path) {
        None => delta.clone(),
        Some(current) => add_numeric(current, delta).ok_or_else(|| {
            RecordError::Validation(format!("cannot apply '$inc' to non-numeric field '{path}'"))
        })?,
    };
    set_path(doc, path, next);
    Ok(())
}

fn add_numeric(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(Bson::Int32(a.wrapping_add(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int64((*a as i64).wrapping_add(*b))),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a.wrapping_add(*b as i64))),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a.wrapping_add(*b))),
        (Bson::Double(a), other) => Some(Bson::Double(a + bson_f64(other)?)),
        (other, Bson::Double(b)) => Some(Bson::Double(bson_f64(other)? + b)),
        _ => None,
    }
}

fn bson_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// The record identifier never changes across an update.
fn check_identifier_kept(
    table: &str,
    existing: &Document,
    updated: &Document,
) -> RecordResult<()> {
    if existing.get(ID_FIELD) != updated.get(ID_FIELD) {
        return Err(RecordError::store(table, "the record identifier is immutable"));
    }
    Ok(())
}

/// Enforces every unique index declared on the table against a candidate
/// record version. `skip_key` excludes the record being rewritten.
fn check_unique(
    table_map: &Table,
    table: &str,
    candidate: &Document,
    skip_key: Option<&str>,
) -> RecordResult<()> {
    for index in table_map.indexes.iter().filter(|index| index.unique) {
        let Some(field) = &index.field else {
            continue;
        };
        let Some(value) = lookup_path(candidate, field) else {
            continue;
        };
        for (key, existing) in &table_map.records {
            if Some(key.as_str()) == skip_key {
                continue;
            }
            if let Some(existing_value) = lookup_path(existing, field) {
                if Comparable::from(existing_value) == Comparable::from(value) {
                    return Err(RecordError::store(
                        table,
                        format!("duplicate value for unique index '{}'", index.name),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Orders records by the sort keys, applied in order. Incomparable values
/// keep their relative positions.
fn sort_records(records: &mut [Document], sort: &[SortKey]) {
    records.sort_by(|a, b| {
        for key in sort {
            let left = lookup_path(a, &key.field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);
            let right = lookup_path(b, &key.field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);
            let ordering = match key.direction {
                SortDirection::Asc => left.partial_cmp(&right),
                SortDirection::Desc => right.partial_cmp(&left),
            }
            .unwrap_or(std::cmp::Ordering::Equal);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Builder for constructing [`MemoryStore`] instances.
///
/// Currently a no-op builder, but it keeps the in-memory client behind the
/// same construction seam as persistent clients.
#[derive(Default)]
pub struct MemoryStoreBuilder;

#[async_trait]
impl StoreClientBuilder for MemoryStoreBuilder {
    type Client = MemoryStore;

    /// Always succeeds with a fresh, empty store.
    async fn build(self) -> RecordResult<Self::Client> {
        Ok(MemoryStore::new())
    }
}
