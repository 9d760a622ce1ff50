//! Search workflow: embed a query and run a top-k similarity search

use serde::Serialize;
use std::fmt::Write as _;
use tracing::error;
use tracing::info;
use tracing::instrument;

use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::schema::SearchHit;
use crate::schema::SearchQuery;
use crate::schema::TEXT_FIELD;
use crate::schema::VECTOR_FIELD;
use crate::storage::EmbeddingClient;
use crate::storage::VectorStore;
use crate::workflow::cleanup::release_and_close;
use crate::workflow::cleanup::WorkflowOutcome;
use crate::workflow::readiness::wait_for_load;

/// Hits of a search run, best first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    /// Collection searched
    pub collection: String,
    /// Query text
    pub query: String,
    /// Ranked hits
    pub hits: Vec<SearchHit>,
}

impl SearchReport {
    /// Human-readable listing of the hits
    pub fn render(&self) -> String {
        let mut out = String::from("Search results:\n");
        for (i, hit) in self.hits.iter().enumerate() {
            let _ = writeln!(out, "{}. Text: {}", i + 1, hit.text().unwrap_or(""));
            let _ = writeln!(out, "   Similarity: {}\n", hit.score);
        }
        out
    }
}

/// Run the search workflow against `store`
///
/// The collection must already exist and hold data. Cleanup runs on every
/// path.
#[instrument(skip_all, fields(database = %config.database, collection = %config.collection.name))]
pub async fn run_search<S, E>(
    store: &S,
    embedder: &E,
    config: &WorkflowConfig,
) -> WorkflowOutcome<SearchReport>
where
    S: VectorStore + ?Sized,
    E: EmbeddingClient + ?Sized,
{
    let result = search_steps(store, embedder, config).await;
    if let Err(e) = &result {
        error!("Error in search workflow: {}", e);
    }

    let cleanup = release_and_close(store, &config.collection.name).await;
    WorkflowOutcome { result, cleanup }
}

async fn search_steps<S, E>(
    store: &S,
    embedder: &E,
    config: &WorkflowConfig,
) -> Result<SearchReport>
where
    S: VectorStore + ?Sized,
    E: EmbeddingClient + ?Sized,
{
    let name = &config.collection.name;
    store.use_database(&config.database).await?;

    info!("Loading collection...");
    store.load_collection(name).await?;
    wait_for_load(store, name, &config.readiness).await?;

    let vector = embedder.embed(&config.search.query).await?;

    info!("Searching similar texts...");
    let query = SearchQuery {
        anns_field: VECTOR_FIELD.to_string(),
        vector,
        top_k: config.search.top_k,
        metric_type: config.collection.index.metric_type,
        params: serde_json::json!({ "nprobe": config.search.nprobe }),
        output_fields: vec![TEXT_FIELD.to_string()],
    };
    let hits = store.search(name, &query).await?;
    info!("Search returned {} hit(s)", hits.len());

    Ok(SearchReport {
        collection: name.clone(),
        query: config.search.query.clone(),
        hits,
    })
}
