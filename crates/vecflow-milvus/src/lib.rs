//! Milvus vector store for vecflow
//!
//! Talks to the Milvus REST v2 API (`/v2/vectordb/...`) with JSON bodies.
//! Every request carries the selected database as `dbName`.

#![warn(missing_docs)]

mod client;
pub use client::MilvusClient;
pub use client::DEFAULT_DATABASE;

mod config;
pub use config::MilvusConfig;

pub mod wire;
