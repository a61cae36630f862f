//! The batch transaction engine: one request in, one response or error out.
//!
//! [`BatchEngine::execute`] drives a [`RecordRequest`] end to end: it compiles
//! the filter, resolves what the request targets (a path identifier, an
//! identifier list, a filter, or per-record identifiers in the payload),
//! converts payloads to native form, runs the store calls, and shapes the
//! response.
//!
//! # Execution modes
//!
//! A multi-record request runs in one of two ways:
//!
//! - **Bulk**: one native call for the whole batch. Used when every item is
//!   uniform (a create of independent records, or one update applied to an
//!   identifier list) and no per-item failure policy was requested. A bulk
//!   call whose affected count does not match the batch size is a store
//!   error.
//! - **Per item**: one native call per record. Used whenever the client asked
//!   for `continue` or `rollback` semantics, when the request addresses a
//!   single record, or when items are inherently non-uniform (each payload
//!   record carrying its own identifier).
//!
//! Per-item failures follow the requested policy: by default the first
//! failure aborts the batch and surfaces as-is; with `continue` every item is
//! attempted and the failures are aggregated by index; with `rollback` the
//! completed items are compensated (created records deleted, mutated or
//! deleted records restored from their pre-image snapshot) before the batch
//! error surfaces. Compensation failures are logged and swallowed, never
//! masking the original error. Reads are never rolled back.
//!
//! All of the batch's bookkeeping lives in an explicit [`BatchContext`] value
//! threaded through the item calls.

use bson::{Bson, Document};
use serde_json::Value as JsonValue;
use serde_json::json;

use crate::ID_FIELD;
use crate::client::{ModifyOptions, ReadQuery, StoreClient, UpdateSpec};
use crate::config::ServiceConfig;
use crate::criteria::Criteria;
use crate::error::{BatchFailure, RecordError, RecordResult};
use crate::filter::{FilterCompiler, PolicyFilter};
use crate::ident::IdentifierNormalizer;
use crate::projector::{OrderInput, RecordProjector};
use crate::request::{
    RecordRequest, RequestContext, RequestOptions, Target, UpdatePayload, Verb, unwrap_records,
};
use crate::response::RecordResponse;
use crate::value::ValueCodec;

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    /// Intake: payloads converted, targets resolved, nothing written yet.
    Accumulating,
    /// Store calls in flight.
    Committing,
    /// Compensating completed items after a failure.
    RollingBack,
    /// Finished, successfully or not.
    Done,
}

/// Per-batch bookkeeping, threaded explicitly through the item calls.
#[derive(Debug)]
struct BatchContext {
    state: BatchState,
    /// Attempt every item and aggregate failures by index.
    continue_on_error: bool,
    /// Compensate completed items when a later one fails.
    rollback_on_error: bool,
    /// The request addresses exactly one record.
    single: bool,
    /// Rollback needs full pre-image snapshots (replace, merge, delete).
    require_full_record: bool,
    /// Compensation steps for completed items, in completion order.
    undo: Vec<Undo>,
}

impl BatchContext {
    fn new(options: &RequestOptions, single: bool) -> Self {
        BatchContext {
            state: BatchState::Accumulating,
            continue_on_error: options.continue_on_error,
            rollback_on_error: options.rollback_on_error,
            single,
            require_full_record: false,
            undo: Vec::new(),
        }
    }

    /// Whether a uniform batch must still run item by item.
    fn per_item(&self) -> bool {
        self.continue_on_error || self.rollback_on_error || self.single
    }

    /// What to do with one failed item.
    fn on_failure(&self) -> FailurePolicy {
        if self.continue_on_error {
            FailurePolicy::Collect
        } else if self.rollback_on_error {
            FailurePolicy::RollBack
        } else {
            FailurePolicy::Propagate
        }
    }

    fn begin_commit(&mut self) {
        debug_assert_eq!(self.state, BatchState::Accumulating);
        self.state = BatchState::Committing;
    }

    fn finish(&mut self) {
        self.state = BatchState::Done;
    }
}

/// The requested treatment of a failed batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    /// Surface the failure as-is, abandoning the rest of the batch.
    Propagate,
    /// Record the failure by index and keep going.
    Collect,
    /// Compensate completed items, then surface a batch error.
    RollBack,
}

/// One compensation step.
#[derive(Debug)]
enum Undo {
    /// The item created this record; compensation deletes it.
    Created(Bson),
    /// The item mutated or deleted this record; compensation restores the
    /// snapshot.
    Mutated(Document),
}

/// A prepared write item: a resolved identifier plus the update to apply.
/// Preparation failures keep their batch position so failure policies see
/// them like any other item failure.
enum WriteItem {
    Ready {
        wire_id: String,
        id: Bson,
        spec: UpdateSpec,
    },
    Invalid(RecordError),
}

/// Executes record requests against one store client.
///
/// The engine is stateless between requests; construct once per service and
/// share. Policy criteria attached via [`with_policy`](Self::with_policy) are
/// compiled into every store call the engine makes, so no client request can
/// reach records outside the policy's scope.
pub struct BatchEngine<'a, C: StoreClient> {
    client: &'a C,
    config: &'a ServiceConfig,
    policy: Option<PolicyFilter>,
}

impl<'a, C: StoreClient> BatchEngine<'a, C> {
    /// Creates an engine over a client and its service configuration.
    pub fn new(client: &'a C, config: &'a ServiceConfig) -> Self {
        BatchEngine {
            client,
            config,
            policy: None,
        }
    }

    /// Attaches server-side policy criteria.
    pub fn with_policy(mut self, policy: PolicyFilter) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Executes one request and produces its response.
    ///
    /// # Errors
    ///
    /// [`RecordError::Validation`] for malformed requests,
    /// [`RecordError::NotFound`] for single-target misses,
    /// [`RecordError::Store`] for native failures and bulk count mismatches,
    /// and [`RecordError::Batch`] for aggregated multi-record failures.
    pub async fn execute(
        &self,
        request: &RecordRequest,
        context: &RequestContext,
    ) -> RecordResult<RecordResponse> {
        log::debug!("{:?} on table '{}'", request.verb, request.table);
        match request.verb {
            Verb::Get => self.read(request).await,
            Verb::Post => self.create(request, context).await,
            Verb::Put => self.write(request, context, true).await,
            Verb::Patch => self.write(request, context, false).await,
            Verb::Delete => self.delete(request).await,
        }
    }

    // ---- reads ----------------------------------------------------------

    async fn read(&self, request: &RecordRequest) -> RecordResult<RecordResponse> {
        let options = &request.options;
        let fields = RecordProjector::field_list(options.fields.as_deref());
        match &request.target {
            Target::Id(raw) => self.read_single(request, raw, fields.as_deref()).await,
            Target::ByIds => {
                let raw = options.ids.as_deref().ok_or_else(|| {
                    RecordError::Validation(
                        "'by-ids' requires the 'ids' option".to_string(),
                    )
                })?;
                self.read_by_ids(request, raw, fields.as_deref()).await
            }
            Target::Whole => match options.ids.as_deref() {
                Some(raw) => self.read_by_ids(request, raw, fields.as_deref()).await,
                None => self.read_query(request, fields).await,
            },
        }
    }

    async fn read_single(
        &self,
        request: &RecordRequest,
        raw_id: &str,
        fields: Option<&[String]>,
    ) -> RecordResult<RecordResponse> {
        let criteria = self.scoped(
            Criteria::eq(ID_FIELD, IdentifierNormalizer::to_native(raw_id)),
            &request.options,
        )?;
        let found = self
            .client
            .find_one(&request.table, &criteria, fields)
            .await?;
        match found {
            Some(doc) => Ok(RecordResponse::Single(render(&doc, fields))),
            None => Err(not_found(&request.table, raw_id)),
        }
    }

    async fn read_by_ids(
        &self,
        request: &RecordRequest,
        raw_ids: &str,
        fields: Option<&[String]>,
    ) -> RecordResult<RecordResponse> {
        let ids = parse_id_list(raw_ids)?;
        let mut ctx = BatchContext::new(&request.options, false);
        ctx.begin_commit();
        if ctx.per_item() {
            let mut outcomes = vec![JsonValue::Null; ids.len()];
            let mut failed = Vec::new();
            for (idx, id) in ids.iter().enumerate() {
                let criteria = self.scoped(Criteria::eq(ID_FIELD, id.clone()), &request.options)?;
                let attempt = match self.client.find_one(&request.table, &criteria, fields).await {
                    Ok(Some(doc)) => Ok(render(&doc, fields)),
                    Ok(None) => Err(not_found(
                        &request.table,
                        &IdentifierNormalizer::from_native(id),
                    )),
                    Err(err) => Err(err),
                };
                match attempt {
                    Ok(rendered) => outcomes[idx] = rendered,
                    Err(err) => match ctx.on_failure() {
                        FailurePolicy::Collect => failed.push((idx, err)),
                        // Reads leave nothing to compensate.
                        _ => return Err(err),
                    },
                }
            }
            if !failed.is_empty() {
                return Err(batch_failure(
                    "Not all records could be retrieved.",
                    ids.len(),
                    failed,
                    Some(&outcomes),
                ));
            }
            ctx.finish();
            return Ok(RecordResponse::set(outcomes));
        }

        // Bulk fetch, results re-ordered to match the requested identifiers.
        let criteria = self.scoped(
            Criteria::is_in(ID_FIELD, ids.iter().cloned()),
            &request.options,
        )?;
        let docs = self
            .client
            .find(
                &request.table,
                ReadQuery {
                    criteria: Some(criteria),
                    projection: fields.map(<[String]>::to_vec),
                    ..ReadQuery::default()
                },
            )
            .await?;
        let mut by_id = std::collections::HashMap::with_capacity(docs.len());
        for doc in docs {
            if let Some(id) = doc.get(ID_FIELD) {
                by_id.insert(IdentifierNormalizer::from_native(id), doc.clone());
            }
        }
        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            let wire = IdentifierNormalizer::from_native(id);
            let doc = by_id
                .get(&wire)
                .ok_or_else(|| not_found(&request.table, &wire))?;
            records.push(render(doc, fields));
        }
        ctx.finish();
        Ok(RecordResponse::set(records))
    }

    async fn read_query(
        &self,
        request: &RecordRequest,
        fields: Option<Vec<String>>,
    ) -> RecordResult<RecordResponse> {
        let options = &request.options;
        let criteria = self.request_criteria(options)?;
        let count = self
            .client
            .count_matching(&request.table, criteria.as_ref())
            .await?;
        let window = RecordProjector::window(
            count,
            options.limit.unwrap_or(0),
            options.offset.unwrap_or(0),
            self.config.max_records,
        );
        let docs = self
            .client
            .find(
                &request.table,
                ReadQuery {
                    criteria,
                    projection: fields.clone(),
                    sort: options
                        .order
                        .as_ref()
                        .map(OrderInput::sort_keys)
                        .unwrap_or_default(),
                    limit: Some(window.limit),
                    offset: Some(window.offset),
                },
            )
            .await?;
        let records = docs
            .iter()
            .map(|doc| render(doc, fields.as_deref()))
            .collect();
        Ok(RecordResponse::Set {
            records,
            meta: window.meta(count, options.include_count),
        })
    }

    // ---- creates --------------------------------------------------------

    async fn create(
        &self,
        request: &RecordRequest,
        context: &RequestContext,
    ) -> RecordResult<RecordResponse> {
        let payload = request
            .payload
            .as_ref()
            .ok_or_else(|| RecordError::Validation("create requires a record payload".to_string()))?;
        let set = unwrap_records(payload, &self.config.wrapper)?;
        if set.records.is_empty() {
            return Err(RecordError::Validation(
                "no records found in request payload".to_string(),
            ));
        }
        let fields = RecordProjector::field_list(request.options.fields.as_deref());
        let mut ctx = BatchContext::new(&request.options, set.single);

        if !ctx.per_item() && set.records.len() > 1 {
            // Bulk insert; payload conversion failures abort up front, which
            // is the default policy anyway.
            let mut docs = Vec::with_capacity(set.records.len());
            for wire in &set.records {
                let mut doc = ValueCodec::record_to_native(wire)?;
                normalize_record_id(&mut doc);
                self.stamp_create(&mut doc, context);
                docs.push(doc);
            }
            ctx.begin_commit();
            let ids = self
                .client
                .insert_many(&request.table, docs.clone())
                .await?;
            if ids.len() != docs.len() {
                return Err(RecordError::store(
                    &request.table,
                    format!(
                        "bulk create returned {} identifiers for {} records",
                        ids.len(),
                        docs.len()
                    ),
                ));
            }
            let records = ids
                .iter()
                .zip(&mut docs)
                .map(|(id, doc)| {
                    doc.insert(ID_FIELD, id.clone());
                    render_created(id, doc, fields.as_deref())
                })
                .collect();
            ctx.finish();
            return Ok(RecordResponse::set(records));
        }

        ctx.begin_commit();
        let total = set.records.len();
        let mut outcomes = vec![JsonValue::Null; total];
        let mut failed = Vec::new();
        for (idx, wire) in set.records.iter().enumerate() {
            let attempt = self
                .create_one(&request.table, wire, context, &mut ctx, fields.as_deref())
                .await;
            match attempt {
                Ok(rendered) => outcomes[idx] = rendered,
                Err(err) => match ctx.on_failure() {
                    FailurePolicy::Collect => failed.push((idx, err)),
                    FailurePolicy::RollBack => {
                        self.roll_back(&request.table, &mut ctx).await;
                        ctx.finish();
                        return Err(batch_failure(
                            "Not all records could be created.",
                            total,
                            vec![(idx, err)],
                            None,
                        ));
                    }
                    FailurePolicy::Propagate => return Err(err),
                },
            }
        }
        if !failed.is_empty() {
            return Err(batch_failure(
                "Not all records could be created.",
                total,
                failed,
                Some(&outcomes),
            ));
        }
        ctx.finish();
        Ok(finish_set(outcomes, set.single))
    }

    async fn create_one(
        &self,
        table: &str,
        wire: &JsonValue,
        context: &RequestContext,
        ctx: &mut BatchContext,
        fields: Option<&[String]>,
    ) -> RecordResult<JsonValue> {
        let mut doc = ValueCodec::record_to_native(wire)?;
        normalize_record_id(&mut doc);
        self.stamp_create(&mut doc, context);
        let id = self.client.insert(table, doc.clone()).await?;
        if ctx.rollback_on_error {
            ctx.undo.push(Undo::Created(id.clone()));
        }
        doc.insert(ID_FIELD, id.clone());
        Ok(render_created(&id, &doc, fields))
    }

    // ---- replaces and merges --------------------------------------------

    async fn write(
        &self,
        request: &RecordRequest,
        context: &RequestContext,
        replace: bool,
    ) -> RecordResult<RecordResponse> {
        let options = &request.options;
        let payload = request
            .payload
            .as_ref()
            .ok_or_else(|| RecordError::Validation("update requires a record payload".to_string()))?;
        let set = unwrap_records(payload, &self.config.wrapper)?;
        if set.records.is_empty() {
            return Err(RecordError::Validation(
                "no records found in request payload".to_string(),
            ));
        }
        let fields = RecordProjector::field_list(options.fields.as_deref());
        let message = if replace {
            "Not all records could be replaced."
        } else {
            "Not all records could be updated."
        };

        if let Target::Id(raw) = &request.target {
            if set.records.len() != 1 {
                return Err(RecordError::Validation(
                    "a single-record target takes exactly one record payload".to_string(),
                ));
            }
            let mut ctx = BatchContext::new(options, true);
            let spec = self.prepare_update(&set.records[0], context, replace)?;
            let items = vec![WriteItem::Ready {
                wire_id: raw.clone(),
                id: IdentifierNormalizer::to_native(raw),
                spec,
            }];
            let outcomes = self
                .run_write_items(request, &mut ctx, items, fields.as_deref(), message)
                .await?;
            return Ok(finish_set(outcomes, true));
        }

        if let Some(ids) = self.explicit_ids(request)? {
            // One uniform update applied to every identifier.
            if set.records.len() != 1 {
                return Err(RecordError::Validation(
                    "updating an identifier list takes exactly one record payload".to_string(),
                ));
            }
            let spec = self.prepare_update(&set.records[0], context, replace)?;
            return self
                .write_uniform(request, ids, spec, fields, message)
                .await;
        }

        if options.filter.is_some() {
            if set.records.len() != 1 {
                return Err(RecordError::Validation(
                    "updating by filter takes exactly one record payload".to_string(),
                ));
            }
            let spec = self.prepare_update(&set.records[0], context, replace)?;
            let ids = self.resolve_filter_ids(request).await?;
            if ids.is_empty() {
                return Ok(RecordResponse::set(Vec::new()));
            }
            return self
                .write_uniform(request, ids, spec, fields, message)
                .await;
        }

        // Every payload record carries its own identifier; inherently
        // per-item.
        let mut ctx = BatchContext::new(options, set.single);
        let items = set
            .records
            .iter()
            .map(|wire| self.prepare_addressed_update(wire, context, replace))
            .collect();
        let outcomes = self
            .run_write_items(request, &mut ctx, items, fields.as_deref(), message)
            .await?;
        Ok(finish_set(outcomes, set.single))
    }

    /// Uniform update of an identifier list: one bulk call, or per-item when
    /// a failure policy asks for it.
    async fn write_uniform(
        &self,
        request: &RecordRequest,
        ids: Vec<Bson>,
        spec: UpdateSpec,
        fields: Option<Vec<String>>,
        message: &str,
    ) -> RecordResult<RecordResponse> {
        let mut ctx = BatchContext::new(&request.options, false);
        if ctx.per_item() {
            let items = ids
                .iter()
                .map(|id| WriteItem::Ready {
                    wire_id: IdentifierNormalizer::from_native(id),
                    id: id.clone(),
                    spec: spec.clone(),
                })
                .collect();
            let outcomes = self
                .run_write_items(request, &mut ctx, items, fields.as_deref(), message)
                .await?;
            return Ok(RecordResponse::set(outcomes));
        }

        ctx.begin_commit();
        let criteria = self.scoped(
            Criteria::is_in(ID_FIELD, ids.iter().cloned()),
            &request.options,
        )?;
        let affected = self
            .client
            .update_matching(&request.table, &criteria, &spec, true)
            .await?;
        if affected != ids.len() as u64 {
            return Err(RecordError::store(
                &request.table,
                format!("bulk update matched {affected} of {} records", ids.len()),
            ));
        }
        let records = if wants_more_than_id(fields.as_deref()) {
            self.fetch_in_order(&request.table, &ids, fields.as_deref())
                .await?
        } else {
            ids.iter().map(id_record).collect()
        };
        ctx.finish();
        Ok(RecordResponse::set(records))
    }

    /// Runs prepared write items one by one under the batch failure policy.
    async fn run_write_items(
        &self,
        request: &RecordRequest,
        ctx: &mut BatchContext,
        items: Vec<WriteItem>,
        fields: Option<&[String]>,
        message: &str,
    ) -> RecordResult<Vec<JsonValue>> {
        ctx.require_full_record = ctx.rollback_on_error;
        ctx.begin_commit();
        let total = items.len();
        let mut outcomes = vec![JsonValue::Null; total];
        let mut failed = Vec::new();
        for (idx, item) in items.into_iter().enumerate() {
            let attempt = match item {
                WriteItem::Invalid(err) => Err(err),
                WriteItem::Ready { wire_id, id, spec } => {
                    self.write_one(request, ctx, &wire_id, id, &spec, fields)
                        .await
                }
            };
            match attempt {
                Ok(rendered) => outcomes[idx] = rendered,
                Err(err) => match ctx.on_failure() {
                    FailurePolicy::Collect => failed.push((idx, err)),
                    FailurePolicy::RollBack => {
                        self.roll_back(&request.table, ctx).await;
                        ctx.finish();
                        return Err(batch_failure(message, total, vec![(idx, err)], None));
                    }
                    FailurePolicy::Propagate => return Err(err),
                },
            }
        }
        if !failed.is_empty() {
            return Err(batch_failure(message, total, failed, Some(&outcomes)));
        }
        ctx.finish();
        Ok(outcomes)
    }

    async fn write_one(
        &self,
        request: &RecordRequest,
        ctx: &mut BatchContext,
        wire_id: &str,
        id: Bson,
        spec: &UpdateSpec,
        fields: Option<&[String]>,
    ) -> RecordResult<JsonValue> {
        let criteria = self.scoped(Criteria::eq(ID_FIELD, id.clone()), &request.options)?;
        let return_new = !ctx.require_full_record;
        let found = self
            .client
            .find_one_and_update(
                &request.table,
                &criteria,
                Some(spec),
                if return_new { fields } else { None },
                ModifyOptions {
                    return_new,
                    remove: false,
                },
            )
            .await?;
        let Some(doc) = found else {
            return Err(not_found(&request.table, wire_id));
        };
        if ctx.rollback_on_error {
            // With return_new unset, `doc` is the pre-image.
            ctx.undo.push(Undo::Mutated(doc.clone()));
        }
        if return_new {
            Ok(render(&doc, fields))
        } else {
            Ok(render_mutation(&id, spec, fields))
        }
    }

    // ---- deletes --------------------------------------------------------

    async fn delete(&self, request: &RecordRequest) -> RecordResult<RecordResponse> {
        let options = &request.options;
        let fields = RecordProjector::field_list(options.fields.as_deref());

        if let Target::Id(raw) = &request.target {
            let mut ctx = BatchContext::new(options, true);
            let outcomes = self
                .run_delete_items(
                    request,
                    &mut ctx,
                    vec![IdentifierNormalizer::to_native(raw)],
                    fields.as_deref(),
                )
                .await?;
            return Ok(finish_set(outcomes, true));
        }

        let ids = if let Some(ids) = self.explicit_ids(request)? {
            ids
        } else if options.filter.is_some() {
            self.resolve_filter_ids(request).await?
        } else if let Some(payload) = &request.payload {
            let set = unwrap_records(payload, &self.config.wrapper)?;
            if set.records.is_empty() {
                return Err(RecordError::Validation(
                    "no records found in request payload".to_string(),
                ));
            }
            let mut ids = Vec::with_capacity(set.records.len());
            for wire in &set.records {
                ids.push(wire_record_id(wire)?);
            }
            ids
        } else {
            // An unconstrained delete would wipe the table; require intent.
            return Err(RecordError::Validation(
                "deleting requires identifiers, a filter, or records".to_string(),
            ));
        };
        if ids.is_empty() {
            return Ok(RecordResponse::set(Vec::new()));
        }

        let mut ctx = BatchContext::new(options, false);
        if ctx.per_item() {
            let outcomes = self
                .run_delete_items(request, &mut ctx, ids, fields.as_deref())
                .await?;
            return Ok(RecordResponse::set(outcomes));
        }

        ctx.begin_commit();
        // Capture response records before they go away.
        let records = if wants_more_than_id(fields.as_deref()) {
            self.fetch_in_order(&request.table, &ids, fields.as_deref())
                .await?
        } else {
            ids.iter().map(id_record).collect()
        };
        let criteria = self.scoped(Criteria::is_in(ID_FIELD, ids.iter().cloned()), options)?;
        let affected = self
            .client
            .delete_matching(&request.table, &criteria)
            .await?;
        if affected != ids.len() as u64 {
            return Err(RecordError::store(
                &request.table,
                format!("bulk delete removed {affected} of {} records", ids.len()),
            ));
        }
        ctx.finish();
        Ok(RecordResponse::set(records))
    }

    async fn run_delete_items(
        &self,
        request: &RecordRequest,
        ctx: &mut BatchContext,
        ids: Vec<Bson>,
        fields: Option<&[String]>,
    ) -> RecordResult<Vec<JsonValue>> {
        ctx.require_full_record = ctx.rollback_on_error;
        ctx.begin_commit();
        let total = ids.len();
        let mut outcomes = vec![JsonValue::Null; total];
        let mut failed = Vec::new();
        for (idx, id) in ids.into_iter().enumerate() {
            let attempt = self
                .delete_one(request, ctx, id, fields)
                .await;
            match attempt {
                Ok(rendered) => outcomes[idx] = rendered,
                Err(err) => match ctx.on_failure() {
                    FailurePolicy::Collect => failed.push((idx, err)),
                    FailurePolicy::RollBack => {
                        self.roll_back(&request.table, ctx).await;
                        ctx.finish();
                        return Err(batch_failure(
                            "Not all records could be deleted.",
                            total,
                            vec![(idx, err)],
                            None,
                        ));
                    }
                    FailurePolicy::Propagate => return Err(err),
                },
            }
        }
        if !failed.is_empty() {
            return Err(batch_failure(
                "Not all records could be deleted.",
                total,
                failed,
                Some(&outcomes),
            ));
        }
        ctx.finish();
        Ok(outcomes)
    }

    async fn delete_one(
        &self,
        request: &RecordRequest,
        ctx: &mut BatchContext,
        id: Bson,
        fields: Option<&[String]>,
    ) -> RecordResult<JsonValue> {
        let wire_id = IdentifierNormalizer::from_native(&id);
        let criteria = self.scoped(Criteria::eq(ID_FIELD, id), &request.options)?;
        let found = self
            .client
            .find_one_and_update(
                &request.table,
                &criteria,
                None,
                if ctx.require_full_record { None } else { fields },
                ModifyOptions {
                    return_new: false,
                    remove: true,
                },
            )
            .await?;
        let Some(doc) = found else {
            return Err(not_found(&request.table, &wire_id));
        };
        if ctx.rollback_on_error {
            ctx.undo.push(Undo::Mutated(doc.clone()));
        }
        Ok(render(&doc, fields))
    }

    // ---- shared machinery -----------------------------------------------

    /// Compensates every completed item, most recent first. Failures here
    /// are logged and swallowed so the original batch error stays visible.
    async fn roll_back(&self, table: &str, ctx: &mut BatchContext) {
        ctx.state = BatchState::RollingBack;
        let steps: Vec<Undo> = ctx.undo.drain(..).rev().collect();
        for step in steps {
            let outcome = match step {
                Undo::Created(id) => self
                    .client
                    .delete_matching(table, &Criteria::eq(ID_FIELD, id.clone()))
                    .await
                    .map(|_| ()),
                Undo::Mutated(snapshot) => self.restore_snapshot(table, snapshot).await,
            };
            if let Err(err) = outcome {
                log::warn!("rollback step failed on table '{table}': {err}");
            }
        }
    }

    /// Puts a pre-image back: replace when the record still exists, insert
    /// when the failed batch had deleted it.
    async fn restore_snapshot(&self, table: &str, snapshot: Document) -> RecordResult<()> {
        let Some(id) = snapshot.get(ID_FIELD).cloned() else {
            return Err(RecordError::store(
                table,
                "rollback snapshot carries no identifier",
            ));
        };
        let mut body = snapshot.clone();
        body.remove(ID_FIELD);
        let criteria = Criteria::eq(ID_FIELD, id);
        let replaced = self
            .client
            .find_one_and_update(
                table,
                &criteria,
                Some(&UpdateSpec::Replace(body)),
                None,
                ModifyOptions::default(),
            )
            .await?;
        if replaced.is_none() {
            self.client.insert(table, snapshot).await?;
        }
        Ok(())
    }

    /// The identifier list named by the request options, when present.
    fn explicit_ids(&self, request: &RecordRequest) -> RecordResult<Option<Vec<Bson>>> {
        match (&request.target, request.options.ids.as_deref()) {
            (Target::ByIds, None) => Err(RecordError::Validation(
                "'by-ids' requires the 'ids' option".to_string(),
            )),
            (_, Some(raw)) => Ok(Some(parse_id_list(raw)?)),
            (_, None) => Ok(None),
        }
    }

    /// Resolves a filter-addressed mutation to concrete identifiers, so the
    /// batch machinery (and its response) can work per record.
    async fn resolve_filter_ids(&self, request: &RecordRequest) -> RecordResult<Vec<Bson>> {
        let criteria = self.request_criteria(&request.options)?;
        let docs = self
            .client
            .find(
                &request.table,
                ReadQuery {
                    criteria,
                    projection: Some(vec![ID_FIELD.to_string()]),
                    ..ReadQuery::default()
                },
            )
            .await?;
        Ok(docs
            .iter()
            .filter_map(|doc| doc.get(ID_FIELD).cloned())
            .collect())
    }

    /// Fetches records for an identifier list in input order.
    async fn fetch_in_order(
        &self,
        table: &str,
        ids: &[Bson],
        fields: Option<&[String]>,
    ) -> RecordResult<Vec<JsonValue>> {
        let criteria = Criteria::is_in(ID_FIELD, ids.iter().cloned());
        let docs = self
            .client
            .find(
                table,
                ReadQuery {
                    criteria: Some(criteria),
                    projection: fields.map(<[String]>::to_vec),
                    ..ReadQuery::default()
                },
            )
            .await?;
        let mut by_id = std::collections::HashMap::with_capacity(docs.len());
        for doc in docs {
            if let Some(id) = doc.get(ID_FIELD) {
                by_id.insert(IdentifierNormalizer::from_native(id), doc.clone());
            }
        }
        Ok(ids
            .iter()
            .map(|id| {
                let wire = IdentifierNormalizer::from_native(id);
                match by_id.get(&wire) {
                    Some(doc) => render(doc, fields),
                    None => id_record(id),
                }
            })
            .collect())
    }

    /// Converts an update payload record into the update to apply. Any
    /// identifier inside the payload is dropped; targeting is explicit.
    fn prepare_update(
        &self,
        wire: &JsonValue,
        context: &RequestContext,
        replace: bool,
    ) -> RecordResult<UpdateSpec> {
        let mut doc = ValueCodec::record_to_native(wire)?;
        doc.remove(ID_FIELD);
        match UpdatePayload::classify(doc) {
            UpdatePayload::Fields(mut fields) => {
                self.stamp_update(&mut fields, context);
                Ok(UpdatePayload::Fields(fields).into_spec(replace))
            }
            native => Ok(native.into_spec(replace)),
        }
    }

    /// Converts one self-addressed payload record (it carries its own
    /// identifier) into a write item.
    fn prepare_addressed_update(
        &self,
        wire: &JsonValue,
        context: &RequestContext,
        replace: bool,
    ) -> WriteItem {
        let id = match wire_record_id(wire) {
            Ok(id) => id,
            Err(err) => return WriteItem::Invalid(err),
        };
        match self.prepare_update(wire, context, replace) {
            Ok(spec) => WriteItem::Ready {
                wire_id: IdentifierNormalizer::from_native(&id),
                id,
                spec,
            },
            Err(err) => WriteItem::Invalid(err),
        }
    }

    /// The criteria contributed by the request options and the table policy.
    fn request_criteria(&self, options: &RequestOptions) -> RecordResult<Option<Criteria>> {
        FilterCompiler::compile_request(
            options.filter.as_ref(),
            &options.params,
            self.policy.as_ref(),
        )
    }

    /// `base` (usually identifier targeting) plus the request and policy
    /// criteria.
    fn scoped(&self, base: Criteria, options: &RequestOptions) -> RecordResult<Criteria> {
        Ok(match self.request_criteria(options)? {
            Some(rest) => base.and(rest),
            None => base,
        })
    }

    fn stamp_create(&self, doc: &mut Document, context: &RequestContext) {
        let Some(audit) = &self.config.audit else {
            return;
        };
        let ts = context.timestamp();
        if let Some(field) = &audit.created_at {
            doc.insert(field.clone(), Bson::DateTime(ts));
        }
        if let Some(field) = &audit.updated_at {
            doc.insert(field.clone(), Bson::DateTime(ts));
        }
        if let Some(user) = &context.user_id {
            if let Some(field) = &audit.created_by {
                doc.insert(field.clone(), Bson::String(user.clone()));
            }
            if let Some(field) = &audit.updated_by {
                doc.insert(field.clone(), Bson::String(user.clone()));
            }
        }
    }

    fn stamp_update(&self, doc: &mut Document, context: &RequestContext) {
        let Some(audit) = &self.config.audit else {
            return;
        };
        if let Some(field) = &audit.updated_at {
            doc.insert(field.clone(), Bson::DateTime(context.timestamp()));
        }
        if let (Some(field), Some(user)) = (&audit.updated_by, &context.user_id) {
            doc.insert(field.clone(), Bson::String(user.clone()));
        }
    }
}

// ---- free helpers -------------------------------------------------------

/// Parses the comma-separated `ids` option into native identifiers.
fn parse_id_list(raw: &str) -> RecordResult<Vec<Bson>> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(RecordError::Validation(
                "malformed identifier list: empty identifier".to_string(),
            ));
        }
        ids.push(IdentifierNormalizer::to_native(part));
    }
    Ok(ids)
}

/// Payload identifiers arrive as wire strings; store them in their native
/// form so identifier targeting finds them again.
fn normalize_record_id(doc: &mut Document) {
    let Some(Bson::String(raw)) = doc.get(ID_FIELD) else {
        return;
    };
    let native = IdentifierNormalizer::to_native(raw);
    if !matches!(native, Bson::String(_)) {
        doc.insert(ID_FIELD, native);
    }
}

/// Reads the identifier a payload record carries.
fn wire_record_id(wire: &JsonValue) -> RecordResult<Bson> {
    let map = wire.as_object().ok_or_else(|| {
        RecordError::Validation("record payload must be a JSON object".to_string())
    })?;
    let id = map.get(ID_FIELD).ok_or_else(|| {
        RecordError::Validation(format!("record payload carries no '{ID_FIELD}' field"))
    })?;
    match id {
        JsonValue::String(s) => Ok(IdentifierNormalizer::to_native(s)),
        other => ValueCodec::to_native(other, ID_FIELD),
    }
}

fn not_found(table: &str, wire_id: &str) -> RecordError {
    RecordError::NotFound(format!("'{wire_id}' in table '{table}'"))
}

/// Builds the aggregate error for a partially failed batch.
fn batch_failure(
    message: &str,
    total: usize,
    failures: Vec<(usize, RecordError)>,
    successes: Option<&[JsonValue]>,
) -> RecordError {
    let mut outcomes = match successes {
        Some(done) => done.to_vec(),
        None => vec![JsonValue::Null; total],
    };
    let mut indices = Vec::with_capacity(failures.len());
    for (idx, err) in &failures {
        indices.push(*idx);
        outcomes[*idx] = json!({"message": err.to_string(), "code": err.code()});
    }
    RecordError::Batch(BatchFailure {
        message: message.to_string(),
        code: 400,
        error_indices: indices,
        outcomes,
    })
}

/// Renders a native record to its wire form under an inclusion list.
fn render(doc: &Document, fields: Option<&[String]>) -> JsonValue {
    ValueCodec::record_from_native(&RecordProjector::apply_fields(doc, fields))
}

/// The minimal record a mutation answers with: just the identifier.
fn id_record(id: &Bson) -> JsonValue {
    json!({ ID_FIELD: ValueCodec::from_native(id) })
}

/// Create responses carry the identifier, or the full shaped record when an
/// inclusion list asked for more.
fn render_created(id: &Bson, doc: &Document, fields: Option<&[String]>) -> JsonValue {
    if fields.is_none() {
        return id_record(id);
    }
    render(doc, fields)
}

/// Shapes a mutation result from what the batch already knows: the
/// identifier plus the written fields. Used when the store call returned the
/// pre-image (rollback mode) rather than the new record.
fn render_mutation(id: &Bson, spec: &UpdateSpec, fields: Option<&[String]>) -> JsonValue {
    if fields.is_none() {
        return id_record(id);
    }
    let mut doc = match spec {
        UpdateSpec::Replace(body) => body.clone(),
        UpdateSpec::Apply(body) => body
            .get_document("$set")
            .ok()
            .cloned()
            .unwrap_or_default(),
    };
    doc.insert(ID_FIELD, id.clone());
    render(&doc, fields)
}

/// Whether an inclusion list asks for anything beyond the identifier.
fn wants_more_than_id(fields: Option<&[String]>) -> bool {
    fields.is_some_and(|list| list.iter().any(|f| f != ID_FIELD))
}

/// A batch over a bare single record answers with the bare record.
fn finish_set(mut outcomes: Vec<JsonValue>, single: bool) -> RecordResponse {
    if single && outcomes.len() == 1 {
        RecordResponse::Single(outcomes.remove(0))
    } else {
        RecordResponse::set(outcomes)
    }
}
