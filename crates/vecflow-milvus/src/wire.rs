//! Milvus REST v2 request bodies, response types and error codes

use serde::Deserialize;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use vecflow_core::error::Error;
use vecflow_core::error::Result;
use vecflow_core::schema::CollectionSchema;
use vecflow_core::schema::DataType;
use vecflow_core::schema::FieldSchema;
use vecflow_core::schema::IndexDescriptor;
use vecflow_core::schema::IndexState;
use vecflow_core::schema::LoadState;
use vecflow_core::schema::Record;
use vecflow_core::schema::SearchHit;
use vecflow_core::schema::SearchQuery;
use vecflow_core::schema::ID_FIELD;
use vecflow_core::schema::TEXT_FIELD;
use vecflow_core::schema::VECTOR_FIELD;

/// Server-side error codes the client distinguishes
pub mod codes {
    /// Request succeeded
    pub const SUCCESS: i64 = 0;
    /// Rate limit hit
    pub const RATE_LIMIT: i64 = 8;
    /// Collection does not exist
    pub const COLLECTION_NOT_FOUND: i64 = 100;
    /// Collection is not loaded
    pub const COLLECTION_NOT_LOADED: i64 = 101;
    /// No index on the requested field
    pub const INDEX_NOT_FOUND: i64 = 700;
    /// Database does not exist
    pub const DATABASE_NOT_FOUND: i64 = 800;
    /// Credentials rejected
    pub const AUTHENTICATION: i64 = 1800;
}

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Zero on success
    pub code: i64,
    /// Error description when `code != 0`
    #[serde(default)]
    pub message: String,
    /// Endpoint-specific payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Unwrap the payload, mapping a failure code onto [`Error`]
    ///
    /// `subject` names the database or collection the request was about.
    pub fn into_data(self, subject: &str) -> Result<Value> {
        if self.code == codes::SUCCESS {
            Ok(self.data)
        } else {
            Err(map_error(self.code, &self.message, subject))
        }
    }
}

/// Translate a Milvus error code and message into the error taxonomy
pub fn map_error(code: i64, message: &str, subject: &str) -> Error {
    let lower = message.to_lowercase();
    match code {
        codes::COLLECTION_NOT_FOUND => return Error::CollectionNotFound(subject.to_string()),
        codes::COLLECTION_NOT_LOADED => {
            return Error::not_ready(format!("collection {} not loaded", subject))
        }
        codes::DATABASE_NOT_FOUND => return Error::DatabaseNotFound(subject.to_string()),
        codes::RATE_LIMIT => return Error::RateLimit(message.to_string()),
        codes::AUTHENTICATION => return Error::Authentication(message.to_string()),
        _ => {}
    }

    if lower.contains("already exist") {
        return Error::CollectionExists(subject.to_string());
    }
    if lower.contains("dim") {
        if let Some((actual, expected)) = parse_dimension_mismatch(message) {
            return Error::DimensionMismatch { expected, actual };
        }
    }
    if lower.contains("not loaded") {
        return Error::not_ready(message.to_string());
    }
    Error::store(code, message)
}

/// Pull `(actual, expected)` out of messages like
/// `the dim (12) of field data(vector) is not equal to schema dim (1536)`
fn parse_dimension_mismatch(message: &str) -> Option<(usize, usize)> {
    let numbers: Vec<usize> = message
        .split('(')
        .skip(1)
        .filter_map(|s| s.split(')').next())
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    match numbers.as_slice() {
        [actual, expected] if actual != expected => Some((*actual, *expected)),
        _ => None,
    }
}

/// Body of `collections/create`
pub fn create_collection_body(schema: &CollectionSchema) -> Value {
    let fields: Vec<Value> = schema
        .fields
        .iter()
        .map(|field| {
            let mut params = Map::new();
            if let Some(max_length) = field.max_length {
                params.insert("max_length".to_string(), json!(max_length));
            }
            if let Some(dim) = field.dim {
                params.insert("dim".to_string(), json!(dim));
            }
            let mut value = json!({
                "fieldName": field.name,
                "dataType": field.data_type.as_str(),
                "isPrimary": field.is_primary,
            });
            if !params.is_empty() {
                value["elementTypeParams"] = Value::Object(params);
            }
            value
        })
        .collect();

    json!({
        "collectionName": schema.name,
        "schema": {
            "autoId": false,
            "enableDynamicField": false,
            "fields": fields,
        },
    })
}

/// Body of `indexes/create`; the index is named after its field
pub fn create_index_body(collection: &str, index: &IndexDescriptor) -> Value {
    json!({
        "collectionName": collection,
        "indexParams": [{
            "fieldName": index.field,
            "indexName": index.field,
            "metricType": index.metric_type.as_str(),
            "indexType": index.index_type.as_str(),
            "params": index.params,
        }],
    })
}

/// Body of `entities/insert` and `entities/upsert`
pub fn records_body(collection: &str, records: &[Record]) -> Value {
    let data: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                ID_FIELD: r.id,
                TEXT_FIELD: r.text,
                VECTOR_FIELD: r.vector,
            })
        })
        .collect();
    json!({ "collectionName": collection, "data": data })
}

/// Body of `entities/search`
pub fn search_body(collection: &str, query: &SearchQuery) -> Value {
    json!({
        "collectionName": collection,
        "data": [query.vector],
        "annsField": query.anns_field,
        "limit": query.top_k,
        "outputFields": query.output_fields,
        "searchParams": {
            "metricType": query.metric_type.as_str(),
            "params": query.params,
        },
    })
}

#[derive(Debug, Deserialize)]
struct HasData {
    has: bool,
}

/// Parse `collections/has`
pub fn parse_has(data: Value) -> Result<bool> {
    let data: HasData = serde_json::from_value(data)?;
    Ok(data.has)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeData {
    collection_name: String,
    #[serde(default)]
    fields: Vec<DescribeField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeField {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    params: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    value: Value,
}

impl KeyValue {
    fn as_usize(&self) -> Option<usize> {
        match &self.value {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Parse `collections/describe`
pub fn parse_describe(data: Value) -> Result<CollectionSchema> {
    let data: DescribeData = serde_json::from_value(data)?;
    let fields = data
        .fields
        .into_iter()
        .map(|f| {
            let data_type = DataType::parse(&f.data_type).ok_or_else(|| {
                Error::store(
                    -1,
                    format!("unsupported field type {} on {}", f.data_type, f.name),
                )
            })?;
            let param = |key: &str| {
                f.params
                    .iter()
                    .find(|p| p.key == key)
                    .and_then(KeyValue::as_usize)
            };
            Ok(FieldSchema {
                data_type,
                is_primary: f.primary_key,
                max_length: param("max_length"),
                dim: param("dim"),
                name: f.name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CollectionSchema {
        name: data.collection_name,
        fields,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDescription {
    #[serde(default)]
    field_name: String,
    #[serde(default)]
    index_state: String,
    #[serde(default)]
    fail_reason: String,
}

/// Parse `indexes/list` into index names
pub fn parse_index_names(data: Value) -> Result<Vec<String>> {
    match data {
        Value::Null => Ok(Vec::new()),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// Parse `indexes/describe` for the index on `field`
pub fn parse_index_state(data: Value, field: &str) -> Result<IndexState> {
    let indexes: Vec<IndexDescription> = match data {
        Value::Null => Vec::new(),
        Value::Array(_) => serde_json::from_value(data)?,
        other => vec![serde_json::from_value(other)?],
    };

    let Some(index) = indexes
        .into_iter()
        .find(|i| i.field_name.is_empty() || i.field_name == field)
    else {
        return Ok(IndexState::None);
    };

    Ok(match index.index_state.as_str() {
        "Finished" => IndexState::Finished,
        "InProgress" => IndexState::InProgress,
        "Pending" | "Unissued" => IndexState::Pending,
        "Failed" => IndexState::Failed(index.fail_reason),
        _ => IndexState::None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStateData {
    load_state: String,
    #[serde(default)]
    load_progress: Option<u64>,
}

/// Parse `collections/get_load_state`
pub fn parse_load_state(data: Value) -> Result<LoadState> {
    let data: LoadStateData = serde_json::from_value(data)?;
    Ok(match data.load_state.as_str() {
        "LoadStateLoaded" => LoadState::Loaded,
        "LoadStateLoading" => LoadState::Loading {
            progress: data.load_progress.unwrap_or(0).min(100) as u8,
        },
        "LoadStateNotExist" => LoadState::NotExist,
        _ => LoadState::NotLoad,
    })
}

/// Parse the written count of `entities/insert` or `entities/upsert`
pub fn parse_write_count(data: &Value) -> u64 {
    ["insertCount", "upsertCount"]
        .iter()
        .find_map(|key| data.get(key).and_then(Value::as_u64))
        .unwrap_or(0)
}

/// Parse `entities/search` hits, best first
pub fn parse_search(data: Value) -> Result<Vec<SearchHit>> {
    let rows: Vec<Map<String, Value>> = serde_json::from_value(data)?;
    rows.into_iter()
        .map(|mut row| {
            let id = row
                .remove(ID_FIELD)
                .and_then(|v| match v {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                })
                .ok_or_else(|| Error::store(-1, "search hit without an integer id"))?;
            let score = row
                .remove("distance")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| Error::store(-1, "search hit without a distance"))?
                as f32;
            Ok(SearchHit {
                id,
                score,
                fields: row,
            })
        })
        .collect()
}
