use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    options::{
        ClientOptions, FindOneAndDeleteOptions, FindOneAndReplaceOptions,
        FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
        UpdateModifications,
    },
};

use docbridge_core::client::{
    IndexInfo, ModifyOptions, ReadQuery, StoreClient, StoreClientBuilder, UpdateSpec,
};
use docbridge_core::config::ServiceConfig;
use docbridge_core::criteria::{Criteria, CriteriaVisitor};
use docbridge_core::error::{RecordError, RecordResult};
use docbridge_core::projector::{SortDirection, SortKey};

use crate::query::CriteriaTranslator;

/// MongoDB-backed record store.
#[derive(Debug)]
pub struct MongoStore {
    client: Client,
    database: String,
}

impl MongoStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoStoreBuilder {
        MongoStoreBuilder::new(dsn, database)
    }

    fn collection(&self, table: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(table)
    }
}

/// Translates criteria into a native filter document; no criteria matches
/// everything.
fn filter_doc(criteria: Option<&Criteria>) -> RecordResult<Document> {
    Ok(match criteria {
        Some(criteria) => CriteriaTranslator.visit_criteria(criteria)?,
        None => doc! {},
    })
}

/// Inclusion-list projection in native form.
fn projection_doc(fields: &[String]) -> Document {
    fields
        .iter()
        .map(|field| (field.clone(), Bson::Int32(1)))
        .collect()
}

/// Sort keys in native form, applied in order.
fn sort_doc(sort: &[SortKey]) -> Document {
    sort.iter()
        .map(|key| {
            (
                key.field.clone(),
                Bson::Int32(match key.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                }),
            )
        })
        .collect()
}

/// A whole-record replace as a native update. `$replaceWith` keeps the
/// stored identifier by merging it back over the replacement body, which is
/// what lets one replace apply to many records.
fn replace_update(body: &Document) -> UpdateModifications {
    UpdateModifications::Pipeline(vec![doc! {
        "$replaceWith": { "$mergeObjects": [ { "_id": "$_id" }, body ] },
    }])
}

#[async_trait]
impl StoreClient for MongoStore {
    async fn find(&self, table: &str, query: ReadQuery) -> RecordResult<Vec<Document>> {
        let mut options = FindOptions::default();
        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip);
        }
        if !query.sort.is_empty() {
            options.sort = Some(sort_doc(&query.sort));
        }
        if let Some(fields) = &query.projection {
            options.projection = Some(projection_doc(fields));
        }
        let filter = filter_doc(query.criteria.as_ref())?;
        log::debug!("find on '{table}': {filter:?}");

        Ok(self
            .collection(table)
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?)
    }

    async fn find_one(
        &self,
        table: &str,
        criteria: &Criteria,
        projection: Option<&[String]>,
    ) -> RecordResult<Option<Document>> {
        let mut options = FindOneOptions::default();
        if let Some(fields) = projection {
            options.projection = Some(projection_doc(fields));
        }
        self.collection(table)
            .find_one(filter_doc(Some(criteria))?)
            .with_options(options)
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))
    }

    async fn insert(&self, table: &str, record: Document) -> RecordResult<Bson> {
        Ok(self
            .collection(table)
            .insert_one(record)
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?
            .inserted_id)
    }

    async fn insert_many(&self, table: &str, records: Vec<Document>) -> RecordResult<Vec<Bson>> {
        let count = records.len();
        let mut inserted = self
            .collection(table)
            .insert_many(records)
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?
            .inserted_ids;

        // The driver reports identifiers keyed by input position.
        (0..count)
            .map(|index| {
                inserted.remove(&index).ok_or_else(|| {
                    RecordError::store(
                        table,
                        format!("bulk insert reported no identifier for record {index}"),
                    )
                })
            })
            .collect()
    }

    async fn update_matching(
        &self,
        table: &str,
        criteria: &Criteria,
        update: &UpdateSpec,
        multi: bool,
    ) -> RecordResult<u64> {
        let filter = filter_doc(Some(criteria))?;
        let modifications = match update {
            UpdateSpec::Replace(body) => replace_update(body),
            UpdateSpec::Apply(operators) => UpdateModifications::Document(operators.clone()),
        };
        let result = if multi {
            self.collection(table).update_many(filter, modifications).await
        } else {
            self.collection(table).update_one(filter, modifications).await
        }
        .map_err(|e| RecordError::store(table, e.to_string()))?;
        Ok(result.matched_count)
    }

    async fn find_one_and_update(
        &self,
        table: &str,
        criteria: &Criteria,
        update: Option<&UpdateSpec>,
        projection: Option<&[String]>,
        options: ModifyOptions,
    ) -> RecordResult<Option<Document>> {
        let filter = filter_doc(Some(criteria))?;

        if options.remove {
            let mut delete_options = FindOneAndDeleteOptions::default();
            if let Some(fields) = projection {
                delete_options.projection = Some(projection_doc(fields));
            }
            return self
                .collection(table)
                .find_one_and_delete(filter)
                .with_options(delete_options)
                .await
                .map_err(|e| RecordError::store(table, e.to_string()));
        }

        let update = update.ok_or_else(|| {
            RecordError::Validation("modify without remove requires an update".to_string())
        })?;
        let return_document = if options.return_new {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        };

        match update {
            UpdateSpec::Replace(body) => {
                let mut replace_options = FindOneAndReplaceOptions::default();
                replace_options.return_document = Some(return_document);
                if let Some(fields) = projection {
                    replace_options.projection = Some(projection_doc(fields));
                }
                self.collection(table)
                    .find_one_and_replace(filter, body.clone())
                    .with_options(replace_options)
                    .await
                    .map_err(|e| RecordError::store(table, e.to_string()))
            }
            UpdateSpec::Apply(operators) => {
                let mut update_options = FindOneAndUpdateOptions::default();
                update_options.return_document = Some(return_document);
                if let Some(fields) = projection {
                    update_options.projection = Some(projection_doc(fields));
                }
                self.collection(table)
                    .find_one_and_update(filter, UpdateModifications::Document(operators.clone()))
                    .with_options(update_options)
                    .await
                    .map_err(|e| RecordError::store(table, e.to_string()))
            }
        }
    }

    async fn delete_matching(&self, table: &str, criteria: &Criteria) -> RecordResult<u64> {
        Ok(self
            .collection(table)
            .delete_many(filter_doc(Some(criteria))?)
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?
            .deleted_count)
    }

    async fn count_matching(&self, table: &str, criteria: Option<&Criteria>) -> RecordResult<u64> {
        self.collection(table)
            .count_documents(filter_doc(criteria)?)
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))
    }

    async fn list_indexes(&self, table: &str) -> RecordResult<Vec<IndexInfo>> {
        Ok(self
            .collection(table)
            .list_indexes()
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?
            .try_collect::<Vec<IndexModel>>()
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?
            .into_iter()
            .map(|model| {
                let name = model
                    .options
                    .as_ref()
                    .and_then(|options| options.name.clone())
                    .unwrap_or_else(|| {
                        model
                            .keys
                            .keys()
                            .map(|key| format!("{key}_1"))
                            .collect::<Vec<_>>()
                            .join("_")
                    });
                IndexInfo {
                    name,
                    field: model.keys.keys().next().cloned(),
                    unique: model
                        .options
                        .as_ref()
                        .and_then(|options| options.unique)
                        .unwrap_or(false),
                }
            })
            .collect())
    }

    async fn create_index(&self, table: &str, field: &str, unique: bool) -> RecordResult<()> {
        self.collection(table)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { field: 1 })
                    .options(IndexOptions::builder().unique(unique).build())
                    .build(),
            )
            .await
            .map_err(|e| RecordError::store(table, e.to_string()))?;

        Ok(())
    }

    async fn create_table(&self, name: &str) -> RecordResult<()> {
        self.client
            .database(&self.database)
            .create_collection(name)
            .await
            .map_err(|e| RecordError::store(name, e.to_string()))?;

        Ok(())
    }

    async fn drop_table(&self, name: &str) -> RecordResult<()> {
        self.collection(name)
            .drop()
            .await
            .map_err(|e| RecordError::store(name, e.to_string()))?;

        Ok(())
    }
}

/// Builder that connects a [`MongoStore`] from a connection string and
/// database name.
pub struct MongoStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }

    /// Builder pre-filled from a service configuration.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.dsn, &config.database)
    }
}

#[async_trait]
impl StoreClientBuilder for MongoStoreBuilder {
    type Client = MongoStore;

    async fn build(self) -> RecordResult<Self::Client> {
        Ok(MongoStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| RecordError::store(&self.database, e.to_string()))?,
            )
            .map_err(|e| RecordError::store(&self.database, e.to_string()))?,
            self.database,
        ))
    }
}
