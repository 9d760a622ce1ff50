use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vecflow_core::config::ConfigLoader;
use vecflow_core::config::ConfigValidation;
use vecflow_core::config::EnvResolver;
use vecflow_core::config::ExistingCollectionPolicy;
use vecflow_core::memory::MemoryStore;
use vecflow_core::storage::EmbeddingClient;
use vecflow_core::storage::VectorStore;
use vecflow_core::workflow::run_ingest;
use vecflow_core::workflow::run_search;
use vecflow_core::workflow::IngestPhase;
use vecflow_core::workflow::IngestProgress;
use vecflow_core::workflow::WorkflowOutcome;
use vecflow_embed::create_embedding_client;
use vecflow_milvus::MilvusClient;

mod settings;
use settings::Backend;
use settings::Settings;
use settings::SETTINGS_FILE;

#[derive(Parser, Debug)]
#[command(
    name = "vecflow",
    version,
    about = "Embed text into a vector store and search it",
    author
)]
struct Cli {
    /// Settings file (toml, json or yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend: milvus|memory
    #[arg(long, global = true, value_parser = ["milvus", "memory"])]
    backend: Option<String>,
    /// Milvus address (e.g. http://127.0.0.1:19530)
    #[arg(long, global = true)]
    milvus_address: Option<String>,
    /// Database to select
    #[arg(long, global = true)]
    database: Option<String>,
    /// Collection to operate on
    #[arg(long, global = true)]
    collection: Option<String>,
    /// Embedding provider: openai|ollama|hashing
    #[arg(long, global = true, value_parser = ["openai", "ollama", "hashing"])]
    embedder: Option<String>,
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Exit non-zero when the workflow fails
    #[arg(long, global = true)]
    fail_on_error: bool,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the collection if needed and store one embedded record
    Ingest {
        /// Text to embed and store
        #[arg(long)]
        text: Option<String>,
        /// Primary key of the record
        #[arg(long)]
        id: Option<i64>,
        /// Behaviour when the collection exists: fail|upsert|recreate
        #[arg(long, value_parser = ["fail", "upsert", "recreate"])]
        on_existing: Option<String>,
    },
    /// Embed a query and print its nearest records
    Search {
        /// Query text
        #[arg(short, long)]
        query: Option<String>,
        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Print resolved settings and probe the store
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let settings = load_settings(&cli)?;
    match &cli.cmd {
        Commands::Ingest { .. } => cmd_ingest(&cli, &settings).await,
        Commands::Search { .. } => cmd_search(&cli, &settings).await,
        Commands::Doctor => cmd_doctor(&cli, &settings).await,
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Settings from file, environment and flags, in increasing precedence
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut env = EnvResolver::new("VECFLOW");
    let flags = [
        ("BACKEND", &cli.backend),
        ("MILVUS_ADDRESS", &cli.milvus_address),
        ("DATABASE", &cli.database),
        ("COLLECTION", &cli.collection),
        ("EMBEDDING_PROVIDER", &cli.embedder),
    ];
    for (key, value) in flags {
        if let Some(value) = value {
            env = env.with_override(key, value);
        }
    }

    let loader = ConfigLoader::new("VECFLOW").with_env_resolver(env);
    let mut settings: Settings = match &cli.config {
        Some(path) => loader.load_from_path(path)?,
        None => loader.load_or_default(SETTINGS_FILE)?,
    };

    match &cli.cmd {
        Commands::Ingest {
            text,
            id,
            on_existing,
        } => {
            if let Some(text) = text {
                settings.workflow.ingest.text = text.clone();
            }
            if let Some(id) = id {
                settings.workflow.ingest.record_id = *id;
            }
            if let Some(policy) = on_existing {
                settings.workflow.ingest.on_existing = policy
                    .parse::<ExistingCollectionPolicy>()
                    .map_err(anyhow::Error::msg)?;
            }
        }
        Commands::Search { query, top_k } => {
            if let Some(query) = query {
                settings.workflow.search.query = query.clone();
            }
            if let Some(top_k) = top_k {
                settings.workflow.search.top_k = *top_k;
            }
        }
        Commands::Doctor => {}
    }

    settings.validate()?;
    match &cli.cmd {
        Commands::Ingest { .. } => settings.validate_ingest()?,
        Commands::Search { .. } => settings.validate_embedding()?,
        // Reports a missing credential instead of failing on it
        Commands::Doctor => {}
    }
    Ok(settings)
}

fn build_store(settings: &Settings) -> Result<Box<dyn VectorStore>> {
    match settings.store.backend {
        Backend::Milvus => Ok(Box::new(MilvusClient::new(&settings.store.milvus)?)),
        Backend::Memory => {
            warn!("Using the in-memory store; data is discarded when the process exits");
            Ok(Box::new(
                MemoryStore::new().with_database(&settings.workflow.database),
            ))
        }
    }
}

fn build_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingClient>> {
    Ok(create_embedding_client(&settings.embedding)?)
}

/// Map a finished workflow onto the process result
fn finish<T>(cli: &Cli, outcome: WorkflowOutcome<T>) -> Result<Option<T>> {
    if !outcome.cleanup.closed {
        warn!("Store connection was not closed cleanly");
    }
    match outcome.result {
        Ok(report) => Ok(Some(report)),
        Err(e) if cli.fail_on_error => Err(e.into()),
        // Already logged by the workflow
        Err(_) => Ok(None),
    }
}

async fn cmd_ingest(cli: &Cli, settings: &Settings) -> Result<()> {
    let store = build_store(settings)?;
    let embedder = build_embedder(settings)?;

    let pb = if cli.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}",
        )?
        .progress_chars("##-"),
    );

    let outcome = run_ingest(
        &*store,
        &*embedder,
        &settings.workflow,
        Some(|p: IngestProgress| {
            let msg = match p.phase {
                IngestPhase::SelectingDatabase => "Selecting database...",
                IngestPhase::PreparingCollection => "Preparing collection...",
                IngestPhase::BuildingIndex => "Building index...",
                IngestPhase::LoadingCollection => "Loading collection...",
                IngestPhase::Embedding => "Embedding text...",
                IngestPhase::Writing => "Inserting data...",
                IngestPhase::Flushing => "Flushing data...",
                IngestPhase::Completed => "Ingest completed",
            };
            pb.set_position(p.percentage);
            pb.set_message(msg);
        }),
    )
    .await;

    if outcome.is_ok() {
        pb.finish_with_message("Done");
    } else {
        pb.abandon_with_message("Failed");
    }

    let cleanup = outcome.cleanup;
    let Some(report) = finish(cli, outcome)? else {
        return Ok(());
    };
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "report": report, "cleanup": cleanup }))?
        );
    } else {
        let verb = if report.upserted { "Upserted" } else { "Inserted" };
        println!(
            "{} record {} into {}.{} ({} dimensions)",
            verb, report.record_id, report.database, report.collection, report.dimension
        );
    }
    Ok(())
}

async fn cmd_search(cli: &Cli, settings: &Settings) -> Result<()> {
    let store = build_store(settings)?;
    let embedder = build_embedder(settings)?;

    let outcome = run_search(&*store, &*embedder, &settings.workflow).await;
    let cleanup = outcome.cleanup;
    let Some(report) = finish(cli, outcome)? else {
        return Ok(());
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "report": report, "cleanup": cleanup }))?
        );
    } else if report.hits.is_empty() {
        println!("No results");
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

async fn cmd_doctor(cli: &Cli, settings: &Settings) -> Result<()> {
    println!("Settings:\n{}", serde_json::to_string_pretty(settings)?);
    println!(
        "Embedding credential: {}",
        if settings.has_api_key() { "present" } else { "missing" }
    );

    let store = build_store(settings)?;
    let database = &settings.workflow.database;
    let collection = &settings.workflow.collection.name;

    let probe = async {
        store.use_database(database).await?;
        store.has_collection(collection).await
    };
    let result = probe.await;
    match &result {
        Ok(exists) => {
            info!("Store reachable");
            println!("Database {}: ok", database);
            println!("Collection {}: {}", collection, if *exists { "exists" } else { "absent" });
        }
        Err(e) => {
            error!("Store probe failed: {}", e);
            println!("Store probe failed: {}", e);
        }
    }
    if let Err(e) = store.close().await {
        warn!("Failed to close store connection: {}", e);
    }

    match result {
        Err(e) if cli.fail_on_error => Err(e.into()),
        _ => Ok(()),
    }
}
