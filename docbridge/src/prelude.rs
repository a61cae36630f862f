//! Convenient re-exports of the types most embedders touch.
//!
//! One import pulls in the engine, the client contract, and the
//! request/response boundary together:
//!
//! ```ignore
//! use docbridge::prelude::*;
//! ```
//!
//! This provides access to:
//! - The batch engine and the request/response boundary
//! - The store client contract and its builders
//! - Criteria construction and filter compilation
//! - Projection, pagination, and value marshalling helpers
//! - Error types and service configuration

pub use docbridge_core::{
    ID_FIELD,
    batch::BatchEngine,
    client::{StoreClient, StoreClientBuilder, ReadQuery, UpdateSpec, ModifyOptions, IndexInfo},
    config::{ServiceConfig, AuditConfig},
    criteria::{Criteria, CriteriaVisitor, CompareOp, LogicalOp},
    error::{RecordError, RecordResult, BatchFailure},
    filter::{FilterCompiler, FilterInput, PolicyFilter, ParamMap},
    ident::IdentifierNormalizer,
    projector::{RecordProjector, OrderInput, SortKey, SortDirection, PageWindow, Meta},
    request::{RecordRequest, RecordSet, RequestContext, RequestOptions, Target, UpdatePayload, Verb, unwrap_records},
    response::{RecordResponse, error_envelope},
    value::ValueCodec,
};
