//! Collection schema, records, index descriptors and search types

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Name of the primary key field
pub const ID_FIELD: &str = "id";
/// Name of the text field
pub const TEXT_FIELD: &str = "text";
/// Name of the vector field
pub const VECTOR_FIELD: &str = "vector";

/// Field data types understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer
    Int64,
    /// Variable-length string with a maximum length
    VarChar,
    /// Dense float vector of fixed dimension
    FloatVector,
}

impl DataType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int64 => "Int64",
            Self::VarChar => "VarChar",
            Self::FloatVector => "FloatVector",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Int64" => Some(Self::Int64),
            "VarChar" => Some(Self::VarChar),
            "FloatVector" => Some(Self::FloatVector),
            _ => None,
        }
    }
}

/// One field of a collection schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name
    pub name: String,
    /// Field type
    pub data_type: DataType,
    /// Whether the field is the primary key
    #[serde(default)]
    pub is_primary: bool,
    /// Maximum length for `VarChar` fields
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Dimension for `FloatVector` fields
    #[serde(default)]
    pub dim: Option<usize>,
}

impl FieldSchema {
    /// Int64 primary key field
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Int64,
            is_primary: true,
            max_length: None,
            dim: None,
        }
    }

    /// Bounded string field
    pub fn varchar(name: impl Into<String>, max_length: usize) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::VarChar,
            is_primary: false,
            max_length: Some(max_length),
            dim: None,
        }
    }

    /// Float vector field
    pub fn float_vector(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::FloatVector,
            is_primary: false,
            max_length: None,
            dim: Some(dim),
        }
    }
}

/// Ordered field list of a collection, fixed at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// The `{id, text, vector}` schema used for text embeddings
    pub fn text_embeddings(name: impl Into<String>, dimension: usize, text_max_length: usize) -> Self {
        Self {
            name: name.into(),
            fields: vec![
                FieldSchema::primary_key(ID_FIELD),
                FieldSchema::varchar(TEXT_FIELD, text_max_length),
                FieldSchema::float_vector(VECTOR_FIELD, dimension),
            ],
        }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Dimension of the first vector field
    pub fn vector_dimension(&self) -> Option<usize> {
        self.fields
            .iter()
            .find(|f| f.data_type == DataType::FloatVector)
            .and_then(|f| f.dim)
    }

    /// Maximum length of the text field
    pub fn text_max_length(&self) -> Option<usize> {
        self.field(TEXT_FIELD).and_then(|f| f.max_length)
    }

    /// Whether `other` can hold records written for `self`
    pub fn is_compatible_with(&self, other: &CollectionSchema) -> bool {
        self.fields.iter().all(|f| {
            other
                .field(&f.name)
                .map(|o| o.data_type == f.data_type && o.dim == f.dim && o.is_primary == f.is_primary)
                .unwrap_or(false)
        })
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key
    pub id: i64,
    /// Source text
    pub text: String,
    /// Embedding of `text`
    pub vector: Vec<f32>,
}

/// Vector index algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    /// Exhaustive search
    Flat,
    /// Inverted file with flat residuals
    IvfFlat,
    /// Hierarchical navigable small world graph
    Hnsw,
    /// Let the server choose
    Autoindex,
}

impl IndexType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "FLAT",
            Self::IvfFlat => "IVF_FLAT",
            Self::Hnsw => "HNSW",
            Self::Autoindex => "AUTOINDEX",
        }
    }
}

/// Similarity metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    /// Cosine similarity, higher is closer
    Cosine,
    /// Inner product, higher is closer
    Ip,
    /// Euclidean distance, lower is closer
    L2,
}

impl MetricType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "COSINE",
            Self::Ip => "IP",
            Self::L2 => "L2",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vector index to build on a collection field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Indexed field
    pub field: String,
    /// Index algorithm
    pub index_type: IndexType,
    /// Similarity metric
    pub metric_type: MetricType,
    /// Build parameters, e.g. `{"nlist": 128}`
    pub params: serde_json::Value,
}

impl IndexDescriptor {
    /// IVF_FLAT / COSINE index on the vector field
    pub fn ivf_flat_cosine(nlist: u32) -> Self {
        Self {
            field: VECTOR_FIELD.to_string(),
            index_type: IndexType::IvfFlat,
            metric_type: MetricType::Cosine,
            params: serde_json::json!({ "nlist": nlist }),
        }
    }
}

/// A top-k similarity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Vector field to search
    pub anns_field: String,
    /// Query vector
    pub vector: Vec<f32>,
    /// Number of neighbours to return
    pub top_k: usize,
    /// Similarity metric
    pub metric_type: MetricType,
    /// Search parameters, e.g. `{"nprobe": 128}`
    pub params: serde_json::Value,
    /// Fields to return with each hit
    pub output_fields: Vec<String>,
}

impl SearchQuery {
    /// Cosine query over the vector field returning the text field
    pub fn cosine(vector: Vec<f32>, top_k: usize, nprobe: u32) -> Self {
        Self {
            anns_field: VECTOR_FIELD.to_string(),
            vector,
            top_k,
            metric_type: MetricType::Cosine,
            params: serde_json::json!({ "nprobe": nprobe }),
            output_fields: vec![TEXT_FIELD.to_string()],
        }
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Primary key of the matched record
    pub id: i64,
    /// Similarity score
    pub score: f32,
    /// Requested output fields
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl SearchHit {
    /// The `text` output field, if it was requested
    pub fn text(&self) -> Option<&str> {
        self.fields.get(TEXT_FIELD).and_then(|v| v.as_str())
    }
}

/// Build state of a vector index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    /// No index exists on the field
    None,
    /// Accepted but not started
    Pending,
    /// Build running
    InProgress,
    /// Build complete
    Finished,
    /// Build failed
    Failed(String),
}

/// Load state of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    /// Collection does not exist
    NotExist,
    /// Collection exists but is not loaded
    NotLoad,
    /// Load in progress
    Loading {
        /// Percentage complete
        progress: u8,
    },
    /// Collection is in serving memory
    Loaded,
}
