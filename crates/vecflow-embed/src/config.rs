//! Embedding provider configuration

use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use vecflow_core::config::ConfigError;
use vecflow_core::config::ConfigValidation;
use vecflow_core::config::EnvOverride;
use vecflow_core::config::EnvResolver;

/// Environment variable holding the OpenAI credential
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Serde helpers for Duration
mod duration_serde {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serialize;
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Embedding provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint
    OpenAI,
    /// Local Ollama server
    Ollama,
    /// Deterministic byte hashing, no network
    Hashing,
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        Self::OpenAI
    }
}

impl EmbeddingProvider {
    /// Lowercase name as used in config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Ollama => "ollama",
            Self::Hashing => "hashing",
        }
    }

    /// Base URL used when none is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
            Self::Hashing => "",
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hashing" | "hash" => Ok(Self::Hashing),
            other => Err(format!(
                "unknown embedding provider '{}', expected openai, ollama or hashing",
                other
            )),
        }
    }
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Provider type
    pub provider: EmbeddingProvider,
    /// API key; never serialized back out
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Base URL, provider default when unset
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
    /// Embedding dimension
    pub dimension: usize,
    /// Batch size for embedding requests
    pub batch_size: usize,
    /// Request timeout
    #[serde(with = "duration_serde", rename = "timeout_secs")]
    pub timeout: Duration,
    /// Maximum retries of a failed request
    pub max_retries: u32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            // Do not read env in defaults to keep tests deterministic
            provider: EmbeddingProvider::OpenAI,
            api_key: String::new(),
            base_url: None,
            model: "text-embedding-ada-002".to_string(),
            dimension: 1536,
            batch_size: 32,
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

impl EmbedderConfig {
    /// Defaults with overrides from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(&EnvResolver::new("VECFLOW"))?;
        Ok(config)
    }

    /// Configured base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Native output size of a known OpenAI model
    pub fn native_dimension(&self) -> Option<usize> {
        match self.model.as_str() {
            "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            _ => None,
        }
    }

    /// Value for the `dimensions` request field
    ///
    /// Only `text-embedding-3*` models accept it, and only a size other than
    /// the native one needs it.
    pub fn requested_dimensions(&self) -> Option<usize> {
        if !self.model.starts_with("text-embedding-3") {
            return None;
        }
        match self.native_dimension() {
            Some(native) if native == self.dimension => None,
            _ => Some(self.dimension),
        }
    }
}

impl ConfigValidation for EmbedderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::Validation(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "embedding batch_size must be greater than 0".to_string(),
            ));
        }
        if self.provider != EmbeddingProvider::Hashing && self.model.is_empty() {
            return Err(ConfigError::MissingField("embedding.model".to_string()));
        }
        if self.provider == EmbeddingProvider::OpenAI && self.api_key.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "embedding.api_key (set {})",
                OPENAI_API_KEY_VAR
            )));
        }
        Ok(())
    }
}

impl EnvOverride for EmbedderConfig {
    fn apply_env(&mut self, env: &EnvResolver) -> Result<(), ConfigError> {
        if let Some(provider) = env.resolve_parse::<EmbeddingProvider>("EMBEDDING_PROVIDER")? {
            self.provider = provider;
        }
        if let Some(model) = env.resolve("EMBEDDING_MODEL") {
            self.model = model;
        }
        if let Some(base_url) = env.resolve("EMBEDDING_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(dimension) = env.resolve_parse::<usize>("DIMENSION")? {
            self.dimension = dimension;
        }
        if self.api_key.is_empty() {
            if let Some(key) = env.resolve_raw(OPENAI_API_KEY_VAR) {
                self.api_key = key;
            }
        }
        Ok(())
    }
}
