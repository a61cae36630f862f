//! In-memory storage client for docbridge.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `StoreClient` trait. It uses async-aware read-write locks for concurrent
//! access and is ideal for development, testing, and small-scale
//! deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes behind an async-aware lock
//! - **Schema-less storage** - Stores records as BSON documents
//! - **Full criteria support** - Supports filtering, sorting, and pagination
//! - **Unique indexes** - Declared unique indexes are enforced on insert and update
//!
//! # Quick Start
//!
//! ```ignore
//! use docbridge::{BatchEngine, RecordRequest, RequestContext, ServiceConfig, Verb};
//! use docbridge_memory::MemoryStore;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     let config = ServiceConfig::default();
//!     let engine = BatchEngine::new(&store, &config);
//!
//!     let request = RecordRequest::new(Verb::Post, "users")
//!         .with_payload(json!({"resource": [{"name": "Alice"}]}));
//!     engine.execute(&request, &RequestContext::default()).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbridge_memory;

pub mod evaluator;
pub mod store;

pub use store::{MemoryStore, MemoryStoreBuilder};
