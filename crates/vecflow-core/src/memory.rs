//! In-process vector store
//!
//! Behaves like a remote store closely enough to drive the workflows offline:
//! index build and collection load only complete after a configurable number
//! of status polls, records are validated against the collection schema, and
//! every call after [`VectorStore::close`] fails.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::DashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;

use crate::error::Error;
use crate::error::Result;
use crate::schema::CollectionSchema;
use crate::schema::DataType;
use crate::schema::IndexDescriptor;
use crate::schema::IndexState;
use crate::schema::LoadState;
use crate::schema::MetricType;
use crate::schema::Record;
use crate::schema::SearchHit;
use crate::schema::SearchQuery;
use crate::schema::ID_FIELD;
use crate::schema::TEXT_FIELD;
use crate::storage::VectorStore;

/// Name of the database that always exists
pub const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, Clone)]
struct MemoryIndex {
    descriptor: IndexDescriptor,
    polls_remaining: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum Residency {
    Released,
    Loading { polls_remaining: u32, total: u32 },
    Loaded,
}

#[derive(Debug, Clone)]
struct MemoryCollection {
    schema: CollectionSchema,
    index: Option<MemoryIndex>,
    residency: Residency,
    records: Vec<Record>,
}

/// In-memory [`VectorStore`]
pub struct MemoryStore {
    databases: DashSet<String>,
    collections: DashMap<(String, String), MemoryCollection>,
    current_database: RwLock<String>,
    settle_polls: u32,
    closed: AtomicBool,
    flushes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store whose index builds and loads complete immediately
    pub fn new() -> Self {
        Self::with_settle_polls(0)
    }

    /// Store whose index builds and loads report in-progress for `polls`
    /// status checks before completing
    pub fn with_settle_polls(polls: u32) -> Self {
        let databases = DashSet::new();
        databases.insert(DEFAULT_DATABASE.to_string());
        Self {
            databases,
            collections: DashMap::new(),
            current_database: RwLock::new(DEFAULT_DATABASE.to_string()),
            settle_polls: polls,
            closed: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
        }
    }

    /// Register a database so it can be selected
    pub fn register_database(&self, name: &str) {
        self.databases.insert(name.to_string());
    }

    /// Builder form of [`MemoryStore::register_database`]
    pub fn with_database(self, name: &str) -> Self {
        self.register_database(name);
        self
    }

    /// Records of a collection in the current database
    pub async fn records(&self, collection: &str) -> Vec<Record> {
        let key = self.key(collection).await;
        self.collections
            .get(&key)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    /// Number of flush calls served
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn key(&self, collection: &str) -> (String, String) {
        let db = self.current_database.read().await.clone();
        (db, collection.to_string())
    }

    fn validate_records(schema: &CollectionSchema, records: &[Record]) -> Result<()> {
        let dimension = schema
            .vector_dimension()
            .ok_or_else(|| Error::validation("collection has no vector field"))?;
        let max_length = schema.text_max_length();

        for record in records {
            if record.vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
            if let Some(max) = max_length {
                if record.text.len() > max {
                    return Err(Error::validation(format!(
                        "text of record {} is {} bytes, exceeds max_length {}",
                        record.id,
                        record.text.len(),
                        max
                    )));
                }
            }
        }
        Ok(())
    }

    fn output_fields(record: &Record, requested: &[String]) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        for name in requested {
            match name.as_str() {
                ID_FIELD => {
                    fields.insert(name.clone(), serde_json::json!(record.id));
                }
                TEXT_FIELD => {
                    fields.insert(name.clone(), serde_json::json!(record.text));
                }
                _ => {}
            }
        }
        fields
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn use_database(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.databases.contains(name) {
            return Err(Error::DatabaseNotFound(name.to_string()));
        }
        *self.current_database.write().await = name.to_string();
        debug!("Selected database {}", name);
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let key = self.key(name).await;
        Ok(self.collections.contains_key(&key))
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        self.ensure_open()?;
        let key = self.key(name).await;
        self.collections
            .get(&key)
            .map(|c| c.schema.clone())
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.ensure_open()?;
        if !schema.fields.iter().any(|f| f.is_primary) {
            return Err(Error::validation("schema has no primary key"));
        }
        match schema.vector_dimension() {
            Some(dim) if dim > 0 => {}
            _ => return Err(Error::validation("schema needs a vector field with dim > 0")),
        }

        let key = self.key(&schema.name).await;
        match self.collections.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::CollectionExists(schema.name.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(MemoryCollection {
                    schema: schema.clone(),
                    index: None,
                    residency: Residency::Released,
                    records: Vec::new(),
                });
                info!("Created collection {}", schema.name);
                Ok(())
            }
        }
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let key = self.key(name).await;
        self.collections
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> Result<()> {
        self.ensure_open()?;
        let key = self.key(collection).await;
        let mut entry = self
            .collections
            .get_mut(&key)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let is_vector = entry
            .schema
            .field(&index.field)
            .map(|f| f.data_type == DataType::FloatVector)
            .unwrap_or(false);
        if !is_vector {
            return Err(Error::validation(format!(
                "field '{}' is not a vector field",
                index.field
            )));
        }

        if let Some(existing) = &entry.index {
            if existing.descriptor == *index {
                return Ok(());
            }
            return Err(Error::store(
                65535,
                "at most one distinct index is allowed per field",
            ));
        }

        entry.index = Some(MemoryIndex {
            descriptor: index.clone(),
            polls_remaining: self.settle_polls,
        });
        Ok(())
    }

    async fn index_state(&self, collection: &str, field: &str) -> Result<IndexState> {
        self.ensure_open()?;
        let key = self.key(collection).await;
        let mut entry = self
            .collections
            .get_mut(&key)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        match entry.index.as_mut() {
            Some(index) if index.descriptor.field == field => {
                if index.polls_remaining > 0 {
                    index.polls_remaining -= 1;
                    Ok(IndexState::InProgress)
                } else {
                    Ok(IndexState::Finished)
                }
            }
            _ => Ok(IndexState::None),
        }
    }

    async fn load_collection(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let key = self.key(name).await;
        let mut entry = self
            .collections
            .get_mut(&key)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;

        if entry.index.is_none() {
            return Err(Error::store(700, format!("index not found for collection {}", name)));
        }
        if entry.residency == Residency::Released {
            entry.residency = Residency::Loading {
                polls_remaining: self.settle_polls,
                total: self.settle_polls,
            };
        }
        Ok(())
    }

    async fn load_state(&self, name: &str) -> Result<LoadState> {
        self.ensure_open()?;
        let key = self.key(name).await;
        let mut entry = match self.collections.get_mut(&key) {
            Some(entry) => entry,
            None => return Ok(LoadState::NotExist),
        };

        let state = match &mut entry.residency {
            Residency::Released => LoadState::NotLoad,
            Residency::Loaded => LoadState::Loaded,
            Residency::Loading {
                polls_remaining,
                total,
            } => {
                if *polls_remaining == 0 {
                    LoadState::Loaded
                } else {
                    *polls_remaining -= 1;
                    let done = *total - *polls_remaining;
                    LoadState::Loading {
                        progress: ((done as f32 / *total as f32) * 100.0).min(99.0) as u8,
                    }
                }
            }
        };
        if state == LoadState::Loaded {
            entry.residency = Residency::Loaded;
        }
        Ok(state)
    }

    async fn release_collection(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let key = self.key(name).await;
        let mut entry = self
            .collections
            .get_mut(&key)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        entry.residency = Residency::Released;
        Ok(())
    }

    async fn insert(&self, collection: &str, records: &[Record]) -> Result<u64> {
        self.ensure_open()?;
        let key = self.key(collection).await;
        let mut entry = self
            .collections
            .get_mut(&key)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        Self::validate_records(&entry.schema, records)?;
        entry.records.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn upsert(&self, collection: &str, records: &[Record]) -> Result<u64> {
        self.ensure_open()?;
        let key = self.key(collection).await;
        let mut entry = self
            .collections
            .get_mut(&key)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        Self::validate_records(&entry.schema, records)?;
        for record in records {
            entry.records.retain(|r| r.id != record.id);
            entry.records.push(record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn flush(&self, collections: &[String]) -> Result<()> {
        self.ensure_open()?;
        for name in collections {
            let key = self.key(name).await;
            if !self.collections.contains_key(&key) {
                return Err(Error::CollectionNotFound(name.clone()));
            }
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn search(&self, collection: &str, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.ensure_open()?;
        let key = self.key(collection).await;
        let entry = self
            .collections
            .get(&key)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        if entry.residency != Residency::Loaded {
            return Err(Error::not_ready(format!(
                "collection {} is not loaded",
                collection
            )));
        }

        let dimension = entry
            .schema
            .field(&query.anns_field)
            .filter(|f| f.data_type == DataType::FloatVector)
            .and_then(|f| f.dim)
            .ok_or_else(|| {
                Error::validation(format!("'{}' is not a vector field", query.anns_field))
            })?;
        if query.vector.len() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: query.vector.len(),
            });
        }

        let mut hits: Vec<SearchHit> = entry
            .records
            .iter()
            .map(|record| SearchHit {
                id: record.id,
                score: score(query.metric_type, &query.vector, &record.vector),
                fields: Self::output_fields(record, &query.output_fields),
            })
            .collect();

        let ascending = query.metric_type == MetricType::L2;
        hits.sort_by(|a, b| {
            let ord = b
                .score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal);
            if ascending {
                ord.reverse()
            } else {
                ord
            }
        });
        hits.truncate(query.top_k);
        Ok(hits)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn score(metric: MetricType, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        MetricType::Cosine => cosine_similarity(a, b),
        MetricType::Ip => dot_product(a, b),
        MetricType::L2 => euclidean_distance(a, b),
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
