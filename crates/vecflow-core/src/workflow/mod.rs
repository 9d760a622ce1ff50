//! Ingest and search workflows over the collaborator traits

pub mod cleanup;
pub mod ingest;
pub mod readiness;
pub mod search;

pub use cleanup::release_and_close;
pub use cleanup::CleanupReport;
pub use cleanup::WorkflowOutcome;
pub use ingest::run_ingest;
pub use ingest::IngestPhase;
pub use ingest::IngestProgress;
pub use ingest::IngestReport;
pub use search::run_search;
pub use search::SearchReport;
