//! MongoDB client implementation for docbridge.
//!
//! This crate provides a MongoDB-based implementation of the `StoreClient`
//! trait, enabling persistent record storage with full criteria support
//! using MongoDB's query engine.
//!
//! To use this client, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docbridge = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Records are persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Full criteria support** - Criteria trees translate to native filter documents
//! - **Async/await** - Nonblocking end to end on the official async driver
//! - **Indexing** - Support for listing and creating MongoDB indexes
//!
//! # Connection
//!
//! To use this client, you need a MongoDB connection string. This can be
//! provided through the builder pattern, directly or from a
//! [`ServiceConfig`](docbridge_core::config::ServiceConfig).
//!
//! # Example
//!
//! ```ignore
//! use docbridge::{client::StoreClientBuilder, mongodb::MongoStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbridge_mongodb;

pub mod query;
pub mod store;

pub use store::{MongoStore, MongoStoreBuilder};
