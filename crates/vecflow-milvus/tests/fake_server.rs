use async_trait::async_trait;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::json;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use vecflow_core::config::ExistingCollectionPolicy;
use vecflow_core::config::WorkflowConfig;
use vecflow_core::error::Error;
use vecflow_core::error::Result;
use vecflow_core::error_handling::RetryConfig;
use vecflow_core::storage::EmbeddingClient;
use vecflow_core::storage::VectorStore;
use vecflow_core::workflow::run_ingest;
use vecflow_core::workflow::run_search;
use vecflow_core::workflow::IngestProgress;
use vecflow_milvus::MilvusClient;
use vecflow_milvus::MilvusConfig;

#[derive(Default)]
struct FakeCollection {
    dim: usize,
    max_length: usize,
    index_name: String,
    index_polls: Option<u32>,
    load_polls: Option<u32>,
    records: Vec<Value>,
}

#[derive(Default)]
struct FakeMilvus {
    databases: HashSet<String>,
    collections: HashMap<(String, String), FakeCollection>,
    requests: Vec<(String, Value)>,
    token: Option<String>,
}

type Shared = Arc<Mutex<FakeMilvus>>;

fn ok(data: Value) -> Value {
    json!({ "code": 0, "data": data })
}

fn fail(code: i64, message: &str) -> Value {
    json!({ "code": code, "message": message })
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn floats(value: &Value) -> Vec<f64> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

async fn vectordb(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut fake = state.lock().unwrap();
    fake.requests.push((path.clone(), body.clone()));

    if let Some(token) = &fake.token {
        let expected = format!("Bearer {}", token);
        let given = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given != expected {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let db = body["dbName"].as_str().unwrap_or("default").to_string();
    let name = body["collectionName"].as_str().unwrap_or_default().to_string();
    let key = (db.clone(), name.clone());

    let reply = match path.as_str() {
        "databases/describe" => {
            if fake.databases.contains(&db) {
                ok(json!({ "dbName": db }))
            } else {
                fail(800, &format!("database not found[database={}]", db))
            }
        }
        "collections/has" => ok(json!({ "has": fake.collections.contains_key(&key) })),
        "collections/describe" => match fake.collections.get(&key) {
            Some(c) => ok(json!({
                "collectionName": name,
                "fields": [
                    { "name": "id", "type": "Int64", "primaryKey": true },
                    { "name": "text", "type": "VarChar", "params": [{ "key": "max_length", "value": c.max_length.to_string() }] },
                    { "name": "vector", "type": "FloatVector", "params": [{ "key": "dim", "value": c.dim.to_string() }] }
                ]
            })),
            None => fail(100, "collection not found"),
        },
        "collections/create" => {
            if fake.collections.contains_key(&key) {
                fail(65535, &format!("collection {} already exists", name))
            } else {
                let fields = body["schema"]["fields"].as_array().cloned().unwrap_or_default();
                let param = |key: &str| {
                    fields
                        .iter()
                        .find_map(|f| f["elementTypeParams"][key].as_u64())
                        .unwrap_or(0) as usize
                };
                let collection = FakeCollection {
                    dim: param("dim"),
                    max_length: param("max_length"),
                    ..Default::default()
                };
                fake.collections.insert(key, collection);
                ok(json!({}))
            }
        }
        "collections/drop" => {
            fake.collections.remove(&key);
            ok(json!({}))
        }
        "indexes/create" => match fake.collections.get_mut(&key) {
            Some(c) if c.index_polls.is_some() => {
                fail(65535, "at most one distinct index is allowed per field")
            }
            Some(c) => {
                c.index_name = body["indexParams"][0]["indexName"]
                    .as_str()
                    .unwrap_or("_default_idx_102")
                    .to_string();
                c.index_polls = Some(2);
                ok(json!({}))
            }
            None => fail(100, "collection not found"),
        },
        "indexes/list" => match fake.collections.get(&key) {
            Some(c) if c.index_polls.is_some() => ok(json!([c.index_name])),
            Some(_) => ok(json!([])),
            None => fail(100, "collection not found"),
        },
        "indexes/describe" => match fake.collections.get_mut(&key) {
            Some(c) if body["indexName"] == c.index_name.as_str() => {
                let index_name = c.index_name.clone();
                match c.index_polls.as_mut() {
                    Some(0) => ok(json!([{ "fieldName": "vector", "indexName": index_name, "indexState": "Finished" }])),
                    Some(n) => {
                        *n -= 1;
                        ok(json!([{ "fieldName": "vector", "indexName": index_name, "indexState": "InProgress" }]))
                    }
                    None => fail(700, "index not found"),
                }
            }
            Some(_) => fail(700, &format!("index not found[indexName={}]", body["indexName"])),
            None => fail(100, "collection not found"),
        },
        "collections/load" => match fake.collections.get_mut(&key) {
            Some(c) if c.index_polls.is_some() => {
                c.load_polls.get_or_insert(2);
                ok(json!({}))
            }
            Some(_) => fail(700, "index not found"),
            None => fail(100, "collection not found"),
        },
        "collections/get_load_state" => match fake.collections.get_mut(&key) {
            Some(c) => match c.load_polls.as_mut() {
                Some(0) => ok(json!({ "loadState": "LoadStateLoaded", "loadProgress": 100 })),
                Some(n) => {
                    *n -= 1;
                    ok(json!({ "loadState": "LoadStateLoading", "loadProgress": 50 }))
                }
                None => ok(json!({ "loadState": "LoadStateNotLoad" })),
            },
            None => ok(json!({ "loadState": "LoadStateNotExist" })),
        },
        "collections/release" => match fake.collections.get_mut(&key) {
            Some(c) => {
                c.load_polls = None;
                ok(json!({}))
            }
            None => fail(100, "collection not found"),
        },
        "entities/insert" | "entities/upsert" => match fake.collections.get_mut(&key) {
            Some(c) => {
                let rows = body["data"].as_array().cloned().unwrap_or_default();
                let bad = rows
                    .iter()
                    .map(|r| floats(&r["vector"]).len())
                    .find(|len| *len != c.dim);
                match bad {
                    Some(len) => fail(
                        1100,
                        &format!(
                            "the dim ({}) of field data(vector) is not equal to schema dim ({})",
                            len, c.dim
                        ),
                    ),
                    None => {
                        let upsert = path == "entities/upsert";
                        for row in &rows {
                            if upsert {
                                c.records.retain(|r| r["id"] != row["id"]);
                            }
                            c.records.push(row.clone());
                        }
                        if upsert {
                            ok(json!({ "upsertCount": rows.len() }))
                        } else {
                            ok(json!({ "insertCount": rows.len() }))
                        }
                    }
                }
            }
            None => fail(100, "collection not found"),
        },
        "collections/flush" => ok(json!({})),
        "entities/search" => match fake.collections.get(&key) {
            Some(c) if c.load_polls == Some(0) => {
                let query = floats(&body["data"][0]);
                let limit = body["limit"].as_u64().unwrap_or(10) as usize;
                let mut hits: Vec<Value> = c
                    .records
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r["id"],
                            "distance": cosine(&query, &floats(&r["vector"])),
                            "text": r["text"],
                        })
                    })
                    .collect();
                hits.sort_by(|a, b| {
                    b["distance"]
                        .as_f64()
                        .partial_cmp(&a["distance"].as_f64())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                hits.truncate(limit);
                ok(Value::Array(hits))
            }
            Some(_) => fail(101, "collection not loaded"),
            None => fail(100, "collection not found"),
        },
        _ => fail(404, "unknown endpoint"),
    };
    Json(reply).into_response()
}

async fn spawn(fake: FakeMilvus) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(fake));
    let app = Router::new()
        .route("/v2/vectordb/*path", post(vectordb))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn fake_with_database() -> FakeMilvus {
    let mut fake = FakeMilvus::default();
    fake.databases.insert("default".to_string());
    fake.databases.insert("my_database".to_string());
    fake
}

struct ByteEmbedder {
    dimension: usize,
}

#[async_trait]
impl EmbeddingClient for ByteEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0f32; self.dimension];
                for (i, b) in t.bytes().enumerate() {
                    v[(i * 7 + b as usize) % self.dimension] += 1.0;
                }
                v
            })
            .collect())
    }

    fn name(&self) -> &str {
        "bytes"
    }
}

fn workflow_config() -> WorkflowConfig {
    let mut config = WorkflowConfig::default();
    config.readiness = RetryConfig {
        max_attempts: 10,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    };
    config
}

fn client(base: &str) -> MilvusClient {
    MilvusClient::new(&MilvusConfig {
        address: base.to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn paths(state: &Shared) -> Vec<String> {
    state
        .lock()
        .unwrap()
        .requests
        .iter()
        .map(|(p, _)| p.clone())
        .collect()
}

fn body_of(state: &Shared, path: &str) -> Value {
    state
        .lock()
        .unwrap()
        .requests
        .iter()
        .find(|(p, _)| p == path)
        .map(|(_, b)| b.clone())
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_ingest_then_search_over_rest() {
    let (base, state) = spawn(fake_with_database()).await;
    let embedder = ByteEmbedder { dimension: 1536 };
    let config = workflow_config();

    let outcome = run_ingest(&client(&base), &embedder, &config, None::<fn(IngestProgress)>).await;
    let report = outcome.result.unwrap();
    assert!(report.created_collection);
    assert!(outcome.cleanup.released && outcome.cleanup.closed);

    let calls = paths(&state);
    assert_eq!(
        &calls[..3],
        &["databases/describe", "collections/has", "collections/create"]
    );
    assert!(calls.contains(&"indexes/create".to_string()));
    assert_eq!(calls.last().map(String::as_str), Some("collections/release"));

    let create = body_of(&state, "collections/create");
    assert_eq!(create["dbName"], "my_database");
    assert_eq!(create["collectionName"], "text_embeddings");
    let insert = body_of(&state, "entities/insert");
    assert_eq!(insert["data"][0]["id"], 7);
    assert_eq!(insert["data"][0]["vector"].as_array().unwrap().len(), 1536);

    let mut config = config;
    config.search.query = config.ingest.text.clone();
    let outcome = run_search(&client(&base), &embedder, &config).await;
    let report = outcome.result.unwrap();
    assert_eq!(report.hits.len(), 1);
    assert_eq!(report.hits[0].id, 7);
    assert!(report.hits[0].score > 0.99);
    assert_eq!(report.hits[0].text(), Some(config.ingest.text.as_str()));

    let search = body_of(&state, "entities/search");
    assert_eq!(search["limit"], 5);
    assert_eq!(search["searchParams"]["metricType"], "COSINE");
}

#[tokio::test]
async fn test_second_ingest_upserts_by_default_and_conflicts_with_fail() {
    let (base, state) = spawn(fake_with_database()).await;
    let embedder = ByteEmbedder { dimension: 1536 };
    let config = workflow_config();

    run_ingest(&client(&base), &embedder, &config, None::<fn(IngestProgress)>)
        .await
        .result
        .unwrap();
    let report = run_ingest(&client(&base), &embedder, &config, None::<fn(IngestProgress)>)
        .await
        .result
        .unwrap();
    assert!(report.upserted);
    {
        let fake = state.lock().unwrap();
        let key = ("my_database".to_string(), "text_embeddings".to_string());
        assert_eq!(fake.collections[&key].records.len(), 1);
    }

    let mut config = config;
    config.ingest.on_existing = ExistingCollectionPolicy::Fail;
    let outcome = run_ingest(&client(&base), &embedder, &config, None::<fn(IngestProgress)>).await;
    assert!(matches!(outcome.result, Err(Error::CollectionExists(_))));
    assert!(outcome.cleanup.closed);
}

#[tokio::test]
async fn test_wrong_dimension_maps_to_dimension_mismatch() {
    let (base, _state) = spawn(fake_with_database()).await;
    let outcome = run_ingest(
        &client(&base),
        &ByteEmbedder { dimension: 12 },
        &workflow_config(),
        None::<fn(IngestProgress)>,
    )
    .await;
    assert!(matches!(
        outcome.result,
        Err(Error::DimensionMismatch {
            expected: 1536,
            actual: 12
        })
    ));
}

#[tokio::test]
async fn test_unknown_database() {
    let mut fake = FakeMilvus::default();
    fake.databases.insert("default".to_string());
    let (base, state) = spawn(fake).await;

    let store = client(&base);
    let err = store.use_database("my_database").await.unwrap_err();
    assert!(matches!(err, Error::DatabaseNotFound(name) if name == "my_database"));
    assert_eq!(paths(&state), vec!["databases/describe".to_string()]);
}

#[tokio::test]
async fn test_bearer_token_and_rejection() {
    let mut fake = fake_with_database();
    fake.token = Some("root:Milvus".to_string());
    let (base, _state) = spawn(fake).await;

    let authed = MilvusClient::new(&MilvusConfig {
        address: base.clone(),
        token: Some("root:Milvus".to_string()),
        ..Default::default()
    })
    .unwrap();
    assert!(!authed.has_collection("text_embeddings").await.unwrap());

    let err = client(&base)
        .has_collection("text_embeddings")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
}

#[tokio::test]
async fn test_search_before_load_is_not_ready() {
    let (base, _state) = spawn(fake_with_database()).await;
    let store = client(&base);
    store.use_database("my_database").await.unwrap();
    let config = workflow_config();
    store
        .create_collection(&config.collection.schema())
        .await
        .unwrap();
    let query = vecflow_core::schema::SearchQuery::cosine(vec![0.0; 1536], 5, 128);
    let err = store.search("text_embeddings", &query).await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_existing_unnamed_index_is_not_recreated() {
    let mut fake = fake_with_database();
    fake.collections.insert(
        ("my_database".to_string(), "text_embeddings".to_string()),
        FakeCollection {
            dim: 1536,
            max_length: 1024,
            index_name: "_default_idx_101".to_string(),
            index_polls: Some(0),
            ..Default::default()
        },
    );
    let (base, state) = spawn(fake).await;

    let store = client(&base);
    store.use_database("my_database").await.unwrap();
    assert_eq!(
        store.index_state("text_embeddings", "vector").await.unwrap(),
        vecflow_core::schema::IndexState::Finished
    );

    let outcome = run_ingest(
        &store,
        &ByteEmbedder { dimension: 1536 },
        &workflow_config(),
        None::<fn(IngestProgress)>,
    )
    .await;
    assert!(outcome.result.unwrap().upserted);
    assert!(!paths(&state).contains(&"indexes/create".to_string()));
    assert_eq!(body_of(&state, "indexes/describe")["indexName"], "_default_idx_101");
}

#[tokio::test]
async fn test_index_state_without_any_index() {
    let (base, _state) = spawn(fake_with_database()).await;
    let store = client(&base);
    store.use_database("my_database").await.unwrap();
    store
        .create_collection(&workflow_config().collection.schema())
        .await
        .unwrap();
    assert_eq!(
        store.index_state("text_embeddings", "vector").await.unwrap(),
        vecflow_core::schema::IndexState::None
    );
}
