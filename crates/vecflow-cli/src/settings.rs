//! Process settings: store backend, embedding provider and workflow

use serde::Deserialize;
use serde::Serialize;
use vecflow_core::config::ConfigError;
use vecflow_core::config::ConfigValidation;
use vecflow_core::config::EnvOverride;
use vecflow_core::config::EnvResolver;
use vecflow_core::config::WorkflowConfig;
use vecflow_embed::EmbedderConfig;
use vecflow_embed::EmbeddingProvider;
use vecflow_milvus::MilvusConfig;

/// Default settings file name, looked up in the loader's search paths
pub const SETTINGS_FILE: &str = "vecflow.toml";

/// Vector store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Remote Milvus server
    #[default]
    Milvus,
    /// In-process store, lost when the process exits
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "milvus" => Ok(Self::Milvus),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend '{}', expected milvus or memory", other)),
        }
    }
}

/// Store section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Which store to talk to
    pub backend: Backend,
    /// Milvus connection, used by the milvus backend
    #[serde(flatten)]
    pub milvus: MilvusConfig,
}

/// Everything the CLI needs to run a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Vector store
    pub store: StoreSettings,
    /// Embedding provider
    pub embedding: EmbedderConfig,
    /// Workflow parameters
    pub workflow: WorkflowConfig,
}

/// Sections shared by every command: the store and the workflow
impl ConfigValidation for Settings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == Backend::Milvus {
            self.store.milvus.validate()?;
        }
        self.workflow.validate()
    }
}

impl Settings {
    /// Whether the embedding credential is present
    pub fn has_api_key(&self) -> bool {
        self.embedding.provider != EmbeddingProvider::OpenAI || !self.embedding.api_key.is_empty()
    }

    /// Checks for commands that embed text
    pub fn validate_embedding(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        if self.embedding.dimension != self.workflow.collection.dimension {
            return Err(ConfigError::Validation(format!(
                "embedding dimension {} does not match collection dimension {}",
                self.embedding.dimension, self.workflow.collection.dimension
            )));
        }
        Ok(())
    }

    /// Checks for commands that write the ingest record
    pub fn validate_ingest(&self) -> Result<(), ConfigError> {
        self.validate_embedding()?;
        if self.workflow.ingest.text.len() > self.workflow.collection.text_max_length {
            return Err(ConfigError::Validation(format!(
                "ingest text is {} bytes, collection text_max_length is {}",
                self.workflow.ingest.text.len(),
                self.workflow.collection.text_max_length
            )));
        }
        Ok(())
    }
}

impl EnvOverride for Settings {
    fn apply_env(&mut self, env: &EnvResolver) -> Result<(), ConfigError> {
        if let Some(backend) = env.resolve_parse::<Backend>("BACKEND")? {
            self.store.backend = backend;
        }
        self.store.milvus.apply_env(env)?;
        self.embedding.apply_env(env)?;
        self.workflow.apply_env(env)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vecflow_core::config::ConfigLoader;
    use vecflow_core::config::ExistingCollectionPolicy;

    fn loader(dir: &std::path::Path, env: EnvResolver) -> ConfigLoader {
        ConfigLoader::new("VECFLOW")
            .with_env_resolver(env)
            .with_search_paths(vec![dir.to_path_buf()])
    }

    #[test]
    fn test_defaults_need_a_key_only_to_embed() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvResolver::new("VECFLOW_CLI_TEST_ISOLATED");
        let settings: Settings = loader(dir.path(), env).load_or_default(SETTINGS_FILE).unwrap();
        // OPENAI_API_KEY may be set in the developer's shell
        if std::env::var("OPENAI_API_KEY").map(|k| k.is_empty()).unwrap_or(true) {
            assert!(!settings.has_api_key());
            assert!(matches!(
                settings.validate_embedding(),
                Err(ConfigError::MissingField(_))
            ));
        }

        let env = EnvResolver::new("VECFLOW_CLI_TEST_ISOLATED").with_override("OPENAI_API_KEY", "sk-test");
        let settings: Settings = loader(dir.path(), env).load_or_default(SETTINGS_FILE).unwrap();
        assert_eq!(settings.store.backend, Backend::Milvus);
        assert_eq!(settings.store.milvus.address, "http://127.0.0.1:19530");
        assert_eq!(settings.workflow.database, "my_database");
        assert_eq!(settings.embedding.model, "text-embedding-ada-002");
        assert!(settings.has_api_key());
    }

    #[test]
    fn test_toml_file_with_flag_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("vecflow.toml")).unwrap();
        writeln!(
            file,
            r#"
[store]
backend = "milvus"
address = "http://milvus:19530"
timeout_secs = 10

[embedding]
provider = "hashing"
dimension = 64

[workflow]
database = "docs_db"

[workflow.collection]
name = "notes"
dimension = 64

[workflow.ingest]
on_existing = "recreate"
"#
        )
        .unwrap();

        let env = EnvResolver::new("VECFLOW_CLI_TEST_ISOLATED")
            .with_override("BACKEND", "memory")
            .with_override("COLLECTION", "other");
        let settings: Settings = loader(dir.path(), env).load_or_default(SETTINGS_FILE).unwrap();
        assert_eq!(settings.store.backend, Backend::Memory);
        assert_eq!(settings.store.milvus.address, "http://milvus:19530");
        assert_eq!(settings.store.milvus.timeout_secs, 10);
        assert_eq!(settings.embedding.provider, EmbeddingProvider::Hashing);
        assert_eq!(settings.workflow.database, "docs_db");
        assert_eq!(settings.workflow.collection.name, "other");
        assert_eq!(
            settings.workflow.ingest.on_existing,
            ExistingCollectionPolicy::Recreate
        );
    }

    #[test]
    fn test_dimension_disagreement_is_rejected() {
        let mut settings = Settings::default();
        settings.embedding.provider = EmbeddingProvider::Hashing;
        settings.embedding.dimension = 768;
        assert!(settings.validate().is_ok());
        assert!(matches!(
            settings.validate_embedding(),
            Err(ConfigError::Validation(msg)) if msg.contains("768")
        ));

        let env = EnvResolver::new("VECFLOW_CLI_TEST_ISOLATED").with_override("DIMENSION", "768");
        settings.apply_env(&env).unwrap();
        assert!(settings.validate_embedding().is_ok());
    }

    #[test]
    fn test_text_length_only_limits_ingest() {
        let mut settings = Settings::default();
        settings.embedding.provider = EmbeddingProvider::Hashing;
        settings.workflow.collection.text_max_length = 16;
        assert!(settings.validate().is_ok());
        assert!(settings.validate_embedding().is_ok());
        assert!(matches!(
            settings.validate_ingest(),
            Err(ConfigError::Validation(msg)) if msg.contains("text_max_length is 16")
        ));

        settings.workflow.ingest.text = "short".to_string();
        assert!(settings.validate_ingest().is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        let env = EnvResolver::new("VECFLOW_CLI_TEST_ISOLATED").with_override("BACKEND", "qdrant");
        let mut settings = Settings::default();
        assert!(settings.apply_env(&env).is_err());
    }
}
