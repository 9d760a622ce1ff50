//! Collaborator traits for vector stores and embedding providers

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::CollectionSchema;
use crate::schema::IndexDescriptor;
use crate::schema::IndexState;
use crate::schema::LoadState;
use crate::schema::Record;
use crate::schema::SearchHit;
use crate::schema::SearchQuery;

/// A schema-defined vector store
///
/// Collection creation, index build and load may complete asynchronously on
/// the server after the call returns; [`VectorStore::index_state`] and
/// [`VectorStore::load_state`] report progress.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Select the database subsequent calls operate on
    async fn use_database(&self, name: &str) -> Result<()>;

    /// Check whether a collection exists
    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Fetch the schema of an existing collection
    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema>;

    /// Create a collection; fails with `CollectionExists` if present
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Drop a collection and its data
    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Start building a vector index
    async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> Result<()>;

    /// Build state of the index on `field`
    async fn index_state(&self, collection: &str, field: &str) -> Result<IndexState>;

    /// Start loading a collection into serving memory
    async fn load_collection(&self, name: &str) -> Result<()>;

    /// Load state of a collection
    async fn load_state(&self, name: &str) -> Result<LoadState>;

    /// Release a collection from serving memory
    async fn release_collection(&self, name: &str) -> Result<()>;

    /// Insert records, returning the inserted count
    async fn insert(&self, collection: &str, records: &[Record]) -> Result<u64>;

    /// Insert or replace records by primary key, returning the written count
    async fn upsert(&self, collection: &str, records: &[Record]) -> Result<u64>;

    /// Make inserted data durable and visible
    async fn flush(&self, collections: &[String]) -> Result<()>;

    /// Top-k similarity search
    async fn search(&self, collection: &str, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Close the connection; later calls fail with `ConnectionClosed`
    async fn close(&self) -> Result<()>;
}

/// Turns text into fixed-length vectors
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embeddings for a batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| {
            crate::Error::EmbeddingProvider("No embedding returned".to_string())
        })
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}
