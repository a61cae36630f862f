//! Main docbridge crate providing a unified record access layer.
//!
//! This crate is the entry point for embedders. It re-exports the engine and
//! its supporting types from the sub-crates and puts each storage backend
//! behind its own module, the persistent one feature-gated.
//!
//! # Features
//!
//! - **Verb-driven record access** - One engine executes reads, creates,
//!   replaces, merges, and deletes against any backend
//! - **Batch transactions** - Multi-record requests with first-failure,
//!   continue, and rollback failure policies
//! - **Client filters** - An SQL-ish filter grammar and a structured JSON
//!   form, both compiled to one criteria tree
//! - **Multiple backends** - In-memory and MongoDB storage behind an
//!   extensible trait system
//!
//! # Quick Start
//!
//! ```ignore
//! use docbridge::{prelude::*, memory::MemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     // An in-memory store and the service configuration it runs under.
//!     let store = MemoryStore::new();
//!     let config = ServiceConfig {
//!         wrapper: "resource".to_string(),
//!         max_records: 100,
//!         ..ServiceConfig::default()
//!     };
//!     let engine = BatchEngine::new(&store, &config);
//!
//!     // Create two records.
//!     let request = RecordRequest::new(Verb::Post, "users").with_payload(json!({
//!         "resource": [
//!             {"name": "Alice", "age": 34},
//!             {"name": "Bob", "age": 27},
//!         ]
//!     }));
//!     let created = engine
//!         .execute(&request, &RequestContext::default())
//!         .await
//!         .unwrap();
//!     println!("created: {}", created.to_json(&config.wrapper));
//!
//!     // Query them back, filtered and sorted.
//!     let request = RecordRequest::new(Verb::Get, "users").with_options(RequestOptions {
//!         filter: Some(FilterInput::Text("age >= 30".to_string())),
//!         order: Some("age desc".into()),
//!         ..RequestOptions::default()
//!     });
//!     let found = engine
//!         .execute(&request, &RequestContext::default())
//!         .await
//!         .unwrap();
//!     println!("found: {}", found.to_json(&config.wrapper));
//! }
//! ```
//!
//! # Batch failure handling
//!
//! A multi-record request runs under one of three failure policies: by
//! default the first failing item aborts the batch, `continue` attempts every
//! item and aggregates the failures by index, and `rollback` compensates the
//! items that had already completed before the error surfaces.
//!
//! ```ignore
//! use docbridge::{prelude::*, memory::MemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let config = ServiceConfig::default();
//!     let engine = BatchEngine::new(&store, &config);
//!
//!     // Undo every record this request created if any one of them fails.
//!     let request = RecordRequest::new(Verb::Post, "users")
//!         .with_options(RequestOptions {
//!             rollback_on_error: true,
//!             ..RequestOptions::default()
//!         })
//!         .with_payload(json!({
//!             "resource": [
//!                 {"_id": "a", "name": "Alice"},
//!                 {"_id": "a", "name": "Duplicate"},
//!             ]
//!         }));
//!     match engine.execute(&request, &RequestContext::default()).await {
//!         Ok(response) => println!("{}", response.to_json(&config.wrapper)),
//!         // The envelope carries the failing indices and per-item outcomes.
//!         Err(err) => println!("{}", error_envelope(&err, &config.wrapper)),
//!     }
//! }
//! ```
//!
//! # Filtering
//!
//! Clients filter with either form; both compile to the same criteria tree
//! and can be combined with server-side [`PolicyFilter`] fragments that no
//! request can escape:
//!
//! ```ignore
//! use docbridge::prelude::*;
//! use serde_json::json;
//!
//! // The textual grammar.
//! let text = FilterInput::Text("age >= 21 and (status = active or vip = true)".to_string());
//!
//! // The structured JSON form, same meaning.
//! let structured = FilterInput::Structured(json!({
//!     "age": {"$gte": 21},
//!     "$or": [{"status": "active"}, {"vip": true}],
//! }));
//!
//! let criteria = FilterCompiler::compile(&text, &ParamMap::new()).unwrap();
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory tables for development and tests
//! - [`mongodb`] - Persistent MongoDB backend, behind the `mongodb` feature

pub mod prelude;

pub use docbridge_core::{
    batch, client, config, criteria, error, filter, ident, projector, request, response, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docbridge_memory::{MemoryStore, MemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// Only compiled when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docbridge_mongodb::{MongoStore, MongoStoreBuilder};
}
