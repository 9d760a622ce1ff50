//! Vecflow Core - Data model, collaborator traits and workflows
//!
//! This crate provides the building blocks shared by every vecflow backend:
//! - Collection schema, records, index and search descriptors
//! - The `VectorStore` and `EmbeddingClient` seams
//! - Error types, configuration loading and readiness polling
//! - The ingest and search workflows with guaranteed cleanup

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod error_handling;
pub mod memory;
pub mod schema;
pub mod storage;
pub mod workflow;

pub use error::Error;
pub use error::Result;
pub use storage::EmbeddingClient;
pub use storage::VectorStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ExistingCollectionPolicy;
    pub use crate::config::WorkflowConfig;
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::error_handling::RetryConfig;
    pub use crate::memory::MemoryStore;
    pub use crate::schema::CollectionSchema;
    pub use crate::schema::IndexDescriptor;
    pub use crate::schema::Record;
    pub use crate::schema::SearchHit;
    pub use crate::schema::SearchQuery;
    pub use crate::storage::EmbeddingClient;
    pub use crate::storage::VectorStore;
    pub use crate::workflow::run_ingest;
    pub use crate::workflow::run_search;
    pub use crate::workflow::IngestProgress;
    pub use crate::workflow::WorkflowOutcome;
}
