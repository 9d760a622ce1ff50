//! Embedding provider clients for vecflow

#![warn(missing_docs)]

use std::sync::Arc;
use tracing::info;
use vecflow_core::error::Result;
use vecflow_core::storage::EmbeddingClient;

mod config;
pub use config::EmbedderConfig;
pub use config::EmbeddingProvider;
pub use config::OPENAI_API_KEY_VAR;

mod embedder;
pub use embedder::EmbedderClient;

mod hashing;
pub use hashing::HashingEmbedder;

/// Build the embedding client selected by `config.provider`
pub fn create_embedding_client(config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingClient>> {
    info!(
        "Using {} embeddings (model {}, dimension {})",
        config.provider, config.model, config.dimension
    );
    match config.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        EmbeddingProvider::OpenAI | EmbeddingProvider::Ollama => {
            Ok(Arc::new(EmbedderClient::new(config.clone())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_selects_hashing() {
        let config = EmbedderConfig {
            provider: EmbeddingProvider::Hashing,
            dimension: 16,
            ..Default::default()
        };
        let client = create_embedding_client(&config).unwrap();
        assert_eq!(client.name(), "hashing-fallback");
        assert_eq!(client.embed("abc").await.unwrap().len(), 16);
    }

    #[test]
    fn test_factory_surfaces_missing_key() {
        assert!(create_embedding_client(&EmbedderConfig::default()).is_err());
    }
}
