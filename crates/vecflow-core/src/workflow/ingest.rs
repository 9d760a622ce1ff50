//! Ingest workflow: provision the collection and store one embedded record

use serde::Serialize;
use tracing::error;
use tracing::info;
use tracing::instrument;

use crate::config::ExistingCollectionPolicy;
use crate::config::WorkflowConfig;
use crate::error::Error;
use crate::error::Result;
use crate::schema::IndexState;
use crate::schema::Record;
use crate::storage::EmbeddingClient;
use crate::storage::VectorStore;
use crate::workflow::cleanup::release_and_close;
use crate::workflow::cleanup::WorkflowOutcome;
use crate::workflow::readiness::wait_for_index;
use crate::workflow::readiness::wait_for_load;

/// Phase of the ingest workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestPhase {
    /// Selecting the target database
    SelectingDatabase,
    /// Checking for and creating the collection
    PreparingCollection,
    /// Creating the vector index and waiting for it
    BuildingIndex,
    /// Loading the collection and waiting for it
    LoadingCollection,
    /// Computing the embedding
    Embedding,
    /// Inserting or upserting the record
    Writing,
    /// Flushing the collection
    Flushing,
    /// All steps done
    Completed,
}

/// Progress notification passed to the ingest callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestProgress {
    /// Current phase
    pub phase: IngestPhase,
    /// Overall completion, 0..=100
    pub percentage: u64,
}

/// Summary of a successful ingest run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Database the record was written to
    pub database: String,
    /// Collection the record was written to
    pub collection: String,
    /// Primary key of the record
    pub record_id: i64,
    /// Whether this run created the collection
    pub created_collection: bool,
    /// Whether the record was written with upsert semantics
    pub upserted: bool,
    /// Count reported by the store
    pub written: u64,
    /// Length of the stored vector
    pub dimension: usize,
}

/// Run the ingest workflow against `store`
///
/// Any step failure is logged and returned in the outcome; the collection is
/// released and the store closed on every path.
#[instrument(skip_all, fields(database = %config.database, collection = %config.collection.name))]
pub async fn run_ingest<S, E, F>(
    store: &S,
    embedder: &E,
    config: &WorkflowConfig,
    mut progress: Option<F>,
) -> WorkflowOutcome<IngestReport>
where
    S: VectorStore + ?Sized,
    E: EmbeddingClient + ?Sized,
    F: FnMut(IngestProgress),
{
    let result = ingest_steps(store, embedder, config, &mut progress).await;
    if let Err(e) = &result {
        error!("Error in ingest workflow: {}", e);
    }

    let cleanup = release_and_close(store, &config.collection.name).await;
    WorkflowOutcome { result, cleanup }
}

fn emit<F>(progress: &mut Option<F>, phase: IngestPhase, percentage: u64)
where
    F: FnMut(IngestProgress),
{
    if let Some(cb) = progress.as_mut() {
        cb(IngestProgress { phase, percentage });
    }
}

async fn ingest_steps<S, E, F>(
    store: &S,
    embedder: &E,
    config: &WorkflowConfig,
    progress: &mut Option<F>,
) -> Result<IngestReport>
where
    S: VectorStore + ?Sized,
    E: EmbeddingClient + ?Sized,
    F: FnMut(IngestProgress),
{
    let name = config.collection.name.clone();
    let schema = config.collection.schema();

    emit(progress, IngestPhase::SelectingDatabase, 0);
    store.use_database(&config.database).await?;

    emit(progress, IngestPhase::PreparingCollection, 10);
    let exists = store.has_collection(&name).await?;
    let policy = config.ingest.on_existing;
    let (created_collection, upserted) = match (exists, policy) {
        (true, ExistingCollectionPolicy::Upsert) => {
            let existing = store.describe_collection(&name).await?;
            if !schema.is_compatible_with(&existing) {
                return Err(Error::SchemaConflict(format!(
                    "collection {} has vector dimension {:?}, expected {:?}",
                    name,
                    existing.vector_dimension(),
                    schema.vector_dimension()
                )));
            }
            info!("Reusing existing collection {}", name);
            (false, true)
        }
        (true, ExistingCollectionPolicy::Recreate) => {
            info!("Dropping existing collection {}...", name);
            store.drop_collection(&name).await?;
            info!("Creating collection {}...", name);
            store.create_collection(&schema).await?;
            (true, false)
        }
        // Fail tries the create regardless and lets the store report the conflict
        _ => {
            info!("Creating collection {}...", name);
            store.create_collection(&schema).await?;
            (true, false)
        }
    };

    emit(progress, IngestPhase::BuildingIndex, 25);
    let index = config.collection.index_descriptor();
    let index_state = if created_collection {
        IndexState::None
    } else {
        store.index_state(&name, &index.field).await?
    };
    if index_state == IndexState::None {
        info!("Creating index...");
        store.create_index(&name, &index).await?;
    }
    wait_for_index(store, &name, &index.field, &config.readiness).await?;

    emit(progress, IngestPhase::LoadingCollection, 45);
    info!("Loading collection...");
    store.load_collection(&name).await?;
    wait_for_load(store, &name, &config.readiness).await?;

    emit(progress, IngestPhase::Embedding, 60);
    let vector = embedder.embed(&config.ingest.text).await?;
    let dimension = vector.len();

    emit(progress, IngestPhase::Writing, 75);
    let record = Record {
        id: config.ingest.record_id,
        text: config.ingest.text.clone(),
        vector,
    };
    info!("Inserting data...");
    let written = if upserted {
        store.upsert(&name, std::slice::from_ref(&record)).await?
    } else {
        store.insert(&name, std::slice::from_ref(&record)).await?
    };
    info!("Wrote {} record(s) to {}", written, name);

    emit(progress, IngestPhase::Flushing, 90);
    info!("Flushing data...");
    store.flush(std::slice::from_ref(&name)).await?;

    emit(progress, IngestPhase::Completed, 100);
    Ok(IngestReport {
        database: config.database.clone(),
        collection: name,
        record_id: record.id,
        created_collection,
        upserted,
        written,
        dimension,
    })
}
