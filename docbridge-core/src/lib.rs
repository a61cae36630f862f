//! A generic record access layer over schema-less document stores.
//!
//! This crate is the core of the docbridge project and provides:
//!
//! - **Filter compilation** ([`filter`]) - Text and structured filter syntax compiled to criteria trees
//! - **Criteria API** ([`criteria`]) - Store-neutral comparison trees and the visitor that walks them
//! - **Batch transactions** ([`batch`]) - Multi-record create/read/update/delete with continue and rollback semantics
//! - **Store client abstraction** ([`client`]) - Traits for implementing different storage backends
//! - **Value codec** ([`value`]) - Wire JSON to native value conversion, dates and identifiers included
//! - **Identifier handling** ([`ident`]) - Canonical identifier promotion and wire rendering
//! - **Projection and paging** ([`projector`]) - Field inclusion lists, sort keys, and page windows
//! - **Request and response shaping** ([`request`], [`response`]) - Wrapped payload parsing and envelope rendering
//! - **Error handling** ([`error`]) - Error taxonomy with HTTP-aligned status codes
//!
//! # Example
//!
//! ```ignore
//! use docbridge::{BatchEngine, RecordRequest, RequestContext, ServiceConfig, Verb};
//! use serde_json::json;
//!
//! let config = ServiceConfig::default();
//! let engine = BatchEngine::new(&client, &config);
//!
//! let request = RecordRequest::new(Verb::Post, "users")
//!     .with_payload(json!({"resource": [{"name": "zoe"}]}));
//! let response = engine.execute(&request, &RequestContext::default()).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbridge_core;

pub mod batch;
pub mod client;
pub mod config;
pub mod criteria;
pub mod error;
pub mod filter;
pub mod ident;
pub mod projector;
pub mod request;
pub mod response;
pub mod value;

/// The field every record is addressed by.
pub const ID_FIELD: &str = "_id";
