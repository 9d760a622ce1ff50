//! Milvus REST v2 client

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::json;
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use vecflow_core::error::Error;
use vecflow_core::error::Result;
use vecflow_core::schema::CollectionSchema;
use vecflow_core::schema::IndexDescriptor;
use vecflow_core::schema::IndexState;
use vecflow_core::schema::LoadState;
use vecflow_core::schema::Record;
use vecflow_core::schema::SearchHit;
use vecflow_core::schema::SearchQuery;
use vecflow_core::storage::VectorStore;

use crate::config::MilvusConfig;
use crate::wire;
use crate::wire::codes;
use crate::wire::Envelope;

/// Database selected until `use_database` is called
pub const DEFAULT_DATABASE: &str = "default";

/// [`VectorStore`] backed by a Milvus server
pub struct MilvusClient {
    http: Client,
    endpoint: String,
    token: Option<String>,
    database: RwLock<String>,
    closed: AtomicBool,
}

impl MilvusClient {
    /// Create a client; no request is made until the first operation
    pub fn new(config: &MilvusConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!("Milvus client for {}", config.endpoint());
        Ok(Self {
            http,
            endpoint: config.endpoint(),
            token: config.token.clone(),
            database: RwLock::new(DEFAULT_DATABASE.to_string()),
            closed: AtomicBool::new(false),
        })
    }

    /// Currently selected database
    pub async fn database(&self) -> String {
        self.database.read().await.clone()
    }

    /// POST `body` to `/v2/vectordb/{path}` and unwrap the response envelope
    ///
    /// `dbName` is filled in from the selected database unless the body
    /// already carries one.
    async fn call(&self, path: &str, mut body: Value, subject: &str) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        if let Some(object) = body.as_object_mut() {
            if !object.contains_key("dbName") {
                let database = self.database.read().await.clone();
                object.insert("dbName".to_string(), json!(database));
            }
        }

        let url = format!("{}/v2/vectordb/{}", self.endpoint, path);
        debug!("POST {}", url);

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{}: {}", path, e))
            } else {
                Error::Connection(format!("{}: {}", path, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(Error::Connection(format!("{} returned {}: {}", path, status, text)));
            }
            return Err(Error::store(status.as_u16() as i64, text));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::store(-1, format!("Invalid response from {}: {}", path, e)))?;
        envelope.into_data(subject)
    }
}

#[async_trait]
impl VectorStore for MilvusClient {
    #[instrument(skip(self))]
    async fn use_database(&self, name: &str) -> Result<()> {
        self.call("databases/describe", json!({ "dbName": name }), name)
            .await?;
        *self.database.write().await = name.to_string();
        info!("Using database {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn has_collection(&self, name: &str) -> Result<bool> {
        let data = self
            .call("collections/has", json!({ "collectionName": name }), name)
            .await?;
        wire::parse_has(data)
    }

    #[instrument(skip(self))]
    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        let data = self
            .call("collections/describe", json!({ "collectionName": name }), name)
            .await?;
        wire::parse_describe(data)
    }

    #[instrument(skip(self, schema), fields(collection = %schema.name))]
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.call(
            "collections/create",
            wire::create_collection_body(schema),
            &schema.name,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.call("collections/drop", json!({ "collectionName": name }), name)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, index), fields(field = %index.field))]
    async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> Result<()> {
        self.call(
            "indexes/create",
            wire::create_index_body(collection, index),
            collection,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn index_state(&self, collection: &str, field: &str) -> Result<IndexState> {
        let data = self
            .call(
                "indexes/list",
                json!({ "collectionName": collection }),
                collection,
            )
            .await?;
        let mut names = wire::parse_index_names(data)?;
        // Indexes created without a name get a server-assigned one
        names.sort_by_key(|name| name != field);

        for name in names {
            let result = self
                .call(
                    "indexes/describe",
                    json!({ "collectionName": collection, "indexName": name }),
                    collection,
                )
                .await;
            let state = match result {
                Ok(data) => wire::parse_index_state(data, field)?,
                Err(Error::Store { code, .. }) if code == codes::INDEX_NOT_FOUND => continue,
                Err(e) => return Err(e),
            };
            if state != IndexState::None {
                return Ok(state);
            }
        }
        Ok(IndexState::None)
    }

    #[instrument(skip(self))]
    async fn load_collection(&self, name: &str) -> Result<()> {
        self.call("collections/load", json!({ "collectionName": name }), name)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_state(&self, name: &str) -> Result<LoadState> {
        let result = self
            .call(
                "collections/get_load_state",
                json!({ "collectionName": name }),
                name,
            )
            .await;
        match result {
            Ok(data) => wire::parse_load_state(data),
            Err(Error::CollectionNotFound(_)) => Ok(LoadState::NotExist),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn release_collection(&self, name: &str) -> Result<()> {
        self.call("collections/release", json!({ "collectionName": name }), name)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn insert(&self, collection: &str, records: &[Record]) -> Result<u64> {
        let data = self
            .call(
                "entities/insert",
                wire::records_body(collection, records),
                collection,
            )
            .await?;
        Ok(wire::parse_write_count(&data))
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert(&self, collection: &str, records: &[Record]) -> Result<u64> {
        let data = self
            .call(
                "entities/upsert",
                wire::records_body(collection, records),
                collection,
            )
            .await?;
        Ok(wire::parse_write_count(&data))
    }

    #[instrument(skip(self))]
    async fn flush(&self, collections: &[String]) -> Result<()> {
        for name in collections {
            self.call("collections/flush", json!({ "collectionName": name }), name)
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, query), fields(top_k = query.top_k))]
    async fn search(&self, collection: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let data = self
            .call(
                "entities/search",
                wire::search_body(collection, query),
                collection,
            )
            .await?;
        wire::parse_search(data)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Milvus client closed");
        }
        Ok(())
    }
}
