//! HTTP embedding clients

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use reqwest::Response;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use tracing::instrument;
use vecflow_core::error::Error;
use vecflow_core::error::Result;
use vecflow_core::error_handling::RetryConfig;
use vecflow_core::error_handling::RetryExecutor;
use vecflow_core::storage::EmbeddingClient;

use crate::config::EmbedderConfig;
use crate::config::EmbeddingProvider;
use crate::config::OPENAI_API_KEY_VAR;

/// Embedder client for the HTTP providers
pub struct EmbedderClient {
    config: EmbedderConfig,
    client: Client,
    cache: Cache<String, Vec<f32>>,
    retry: RetryExecutor,
}

impl EmbedderClient {
    /// Create a new embedder client
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        match config.provider {
            EmbeddingProvider::Hashing => {
                return Err(Error::Configuration(
                    "Hashing provider is served by HashingEmbedder, not EmbedderClient"
                        .to_string(),
                ));
            }
            EmbeddingProvider::OpenAI if config.api_key.is_empty() => {
                return Err(Error::Configuration(format!(
                    "No OpenAI API key configured; set {}",
                    OPENAI_API_KEY_VAR
                )));
            }
            _ => {}
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        // Create cache with 4 hour TTL and 10000 max entries
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(14400))
            .max_capacity(10000)
            .build();

        let retry = RetryExecutor::new(RetryConfig::requests(config.max_retries));

        Ok(Self {
            config,
            client,
            cache,
            retry,
        })
    }

    /// Replace the request retry policy
    pub fn with_retry_policy(mut self, policy: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    /// The active configuration
    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    async fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.config.provider {
            EmbeddingProvider::OpenAI => self.retry.execute(|| self.embed_openai(chunk)).await,
            EmbeddingProvider::Ollama => {
                let mut out = Vec::with_capacity(chunk.len());
                for text in chunk {
                    out.push(self.retry.execute(|| self.embed_ollama(text)).await?);
                }
                Ok(out)
            }
            EmbeddingProvider::Hashing => Err(Error::Configuration(
                "Hashing provider is served by HashingEmbedder".to_string(),
            )),
        }
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url());

        let request = OpenAIEmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.requested_dimensions(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let mut data: OpenAIEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("Failed to parse response: {}", e)))?;

        data.data.sort_by_key(|e| e.index);
        Ok(data.data.into_iter().map(|e| e.embedding).collect())
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url());

        let request = OllamaEmbeddingRequest {
            model: &self.config.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let data: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("Failed to parse response: {}", e)))?;

        Ok(data.embedding)
    }
}

#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Embedding request timed out: {}", e))
    } else {
        Error::Connection(format!("Embedding request failed: {}", e))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Authentication(format!("{}: {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimit(body),
        s if s.is_server_error() => Error::Connection(format!("Server error {}: {}", s, body)),
        s => Error::EmbeddingProvider(format!("API error {}: {}", s, body)),
    })
}

#[async_trait]
impl EmbeddingClient for EmbedderClient {
    #[instrument(skip(self, texts), fields(provider = %self.config.provider, count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Check cache for all texts
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached_indices = Vec::new();
        let mut uncached_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(embedding) = self.cache.get(text).await {
                debug!("Cache hit for embedding");
                results[i] = Some(embedding);
            } else {
                uncached_indices.push(i);
                uncached_texts.push(text.clone());
            }
        }

        let mut uncached_embeddings = Vec::with_capacity(uncached_texts.len());
        for chunk in uncached_texts.chunks(self.config.batch_size.max(1)) {
            let embeddings = self.embed_chunk(chunk).await?;
            if embeddings.len() != chunk.len() {
                return Err(Error::EmbeddingProvider(format!(
                    "Expected {} embeddings, provider returned {}",
                    chunk.len(),
                    embeddings.len()
                )));
            }
            uncached_embeddings.extend(embeddings);
        }

        // Fill in results and update cache
        for ((original_idx, text), embedding) in uncached_indices
            .into_iter()
            .zip(uncached_texts)
            .zip(uncached_embeddings)
        {
            self.cache.insert(text, embedding.clone()).await;
            results[original_idx] = Some(embedding);
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::EmbeddingProvider("No embedding returned".to_string()))
    }

    fn name(&self) -> &str {
        self.config.provider.as_str()
    }
}
