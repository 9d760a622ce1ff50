//! Configuration loading with file formats, environment overrides and validation

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::info;

use crate::error_handling::RetryConfig;
use crate::schema::CollectionSchema;
use crate::schema::IndexDescriptor;
use crate::schema::IndexType;
use crate::schema::MetricType;
use crate::schema::VECTOR_FIELD;

/// Text embedded by the ingest workflow when none is given
pub const DEFAULT_INGEST_TEXT: &str = "At the core of the city’s operation lies a network of advanced AI systems that oversee every aspect of its infrastructure—from transportation and energy to public services and security. These AI systems are meticulously designed to ensure the city functions seamlessly, efficiently, and sustainably, showcasing the potential of AI in creating a harmonious urban environment.";

/// Query embedded by the search workflow when none is given
pub const DEFAULT_SEARCH_QUERY: &str = "cdk";

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error when reading config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// TOML format
    Toml,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Parse `content` in this format
    pub fn parse<T: DeserializeOwned>(&self, content: &str) -> Result<T, ConfigError> {
        Ok(match self {
            Self::Json => serde_json::from_str(content)?,
            Self::Yaml => serde_yaml::from_str(content)?,
            Self::Toml => toml::from_str(content)?,
        })
    }
}

/// Configuration validation trait
pub trait ConfigValidation {
    /// Validate configuration
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Configuration that can be overridden from the environment
pub trait EnvOverride {
    /// Apply overrides resolved through `env`
    fn apply_env(&mut self, env: &EnvResolver) -> Result<(), ConfigError>;
}

/// Environment variable resolver
#[derive(Debug, Clone)]
pub struct EnvResolver {
    /// Prefix for environment variables
    prefix: String,
    /// Values that take precedence over the process environment
    overrides: HashMap<String, String>,
}

impl EnvResolver {
    /// Create a new environment resolver
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_uppercase(),
            overrides: HashMap::new(),
        }
    }

    /// Pin a value regardless of the process environment
    pub fn with_override(mut self, key: &str, value: &str) -> Self {
        self.overrides
            .insert(key.to_uppercase(), value.to_string());
        self
    }

    /// Resolve `{PREFIX}_{KEY}`
    pub fn resolve(&self, key: &str) -> Option<String> {
        let key = key.to_uppercase();
        if let Some(value) = self.overrides.get(&key) {
            return Some(value.clone());
        }

        let env_key = format!("{}_{}", self.prefix, key);
        match std::env::var(&env_key) {
            Ok(value) if !value.is_empty() => {
                debug!("Resolved {} from environment", env_key);
                Some(value)
            }
            _ => None,
        }
    }

    /// Resolve an unprefixed variable such as `OPENAI_API_KEY`
    pub fn resolve_raw(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value.clone());
        }
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    /// Resolve and parse environment variable
    pub fn resolve_parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.resolve(key) {
            match value.parse::<T>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => Err(ConfigError::Validation(format!(
                    "Failed to parse {} for key {}: {}",
                    value, key, e
                ))),
            }
        } else {
            Ok(None)
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Environment resolver
    env_resolver: EnvResolver,
    /// Configuration search paths
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new(env_prefix: &str) -> Self {
        let mut search_paths = vec![PathBuf::from("."), PathBuf::from("config")];
        if let Ok(home) = std::env::var("HOME") {
            search_paths.push(PathBuf::from(home).join(".config/vecflow"));
        }
        Self {
            env_resolver: EnvResolver::new(env_prefix),
            search_paths,
        }
    }

    /// Replace the environment resolver
    pub fn with_env_resolver(mut self, env_resolver: EnvResolver) -> Self {
        self.env_resolver = env_resolver;
        self
    }

    /// Replace the search paths
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// The environment resolver
    pub fn env(&self) -> &EnvResolver {
        &self.env_resolver
    }

    /// Load configuration from an explicit path
    pub fn load_from_path<T>(&self, path: &Path) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + ConfigValidation + EnvOverride,
    {
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)?;

        let format = ConfigFormat::from_extension(path).ok_or_else(|| {
            ConfigError::Validation(format!("Unknown config file format: {}", path.display()))
        })?;

        let mut config: T = format.parse(&content)?;
        self.finish(&mut config)?;
        Ok(config)
    }

    /// Load `filename` from the first search path containing it, or fall
    /// back to defaults when no file exists
    pub fn load_or_default<T>(&self, filename: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + ConfigValidation + EnvOverride + Default,
    {
        match self.find_config_file(filename) {
            Some(path) => self.load_from_path(&path),
            None => {
                debug!("No configuration file named {} found, using defaults", filename);
                let mut config = T::default();
                self.finish(&mut config)?;
                Ok(config)
            }
        }
    }

    fn finish<T>(&self, config: &mut T) -> Result<(), ConfigError>
    where
        T: ConfigValidation + EnvOverride,
    {
        config.apply_env(&self.env_resolver)?;
        config.validate()
    }

    /// Find configuration file in search paths
    fn find_config_file(&self, filename: &str) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            let config_path = search_path.join(filename);
            if config_path.is_file() {
                return Some(config_path);
            }
        }

        let extensions = ["toml", "json", "yaml", "yml"];
        let base_name = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename);

        for search_path in &self.search_paths {
            for ext in &extensions {
                let config_path = search_path.join(format!("{}.{}", base_name, ext));
                if config_path.is_file() {
                    return Some(config_path);
                }
            }
        }

        None
    }
}

/// What ingest does when the target collection already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingCollectionPolicy {
    /// Attempt creation anyway and surface the store's conflict error
    Fail,
    /// Keep the collection and upsert the record
    #[default]
    Upsert,
    /// Drop and recreate the collection
    Recreate,
}

impl std::str::FromStr for ExistingCollectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "upsert" => Ok(Self::Upsert),
            "recreate" => Ok(Self::Recreate),
            other => Err(format!("unknown existing-collection policy '{}'", other)),
        }
    }
}

/// Vector index settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index algorithm
    pub index_type: IndexType,
    /// Similarity metric
    pub metric_type: MetricType,
    /// IVF cluster count
    pub nlist: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_type: IndexType::IvfFlat,
            metric_type: MetricType::Cosine,
            nlist: 128,
        }
    }
}

/// Target collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Collection name
    pub name: String,
    /// Vector dimension
    pub dimension: usize,
    /// Maximum length of the text field
    pub text_max_length: usize,
    /// Index settings
    pub index: IndexConfig,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: "text_embeddings".to_string(),
            dimension: 1536,
            text_max_length: 1024,
            index: IndexConfig::default(),
        }
    }
}

impl CollectionConfig {
    /// Schema for this collection
    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema::text_embeddings(&self.name, self.dimension, self.text_max_length)
    }

    /// Index descriptor for the vector field
    pub fn index_descriptor(&self) -> IndexDescriptor {
        IndexDescriptor {
            field: VECTOR_FIELD.to_string(),
            index_type: self.index.index_type,
            metric_type: self.index.metric_type,
            params: serde_json::json!({ "nlist": self.index.nlist }),
        }
    }
}

/// Ingest workflow settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Primary key of the written record
    pub record_id: i64,
    /// Text to embed and store
    pub text: String,
    /// Behaviour when the collection already exists
    pub on_existing: ExistingCollectionPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            record_id: 7,
            text: DEFAULT_INGEST_TEXT.to_string(),
            on_existing: ExistingCollectionPolicy::default(),
        }
    }
}

/// Search workflow settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Query text
    pub query: String,
    /// Number of neighbours
    pub top_k: usize,
    /// IVF probe count
    pub nprobe: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_SEARCH_QUERY.to_string(),
            top_k: 5,
            nprobe: 128,
        }
    }
}

/// Settings shared by the ingest and search workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Database to select
    pub database: String,
    /// Target collection
    pub collection: CollectionConfig,
    /// Ingest settings
    pub ingest: IngestConfig,
    /// Search settings
    pub search: SearchConfig,
    /// Polling policy for index build and collection load
    pub readiness: RetryConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            database: "my_database".to_string(),
            collection: CollectionConfig::default(),
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            readiness: RetryConfig::default(),
        }
    }
}

impl ConfigValidation for WorkflowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.is_empty() {
            return Err(ConfigError::MissingField("workflow.database".to_string()));
        }
        if self.collection.name.is_empty() {
            return Err(ConfigError::MissingField(
                "workflow.collection.name".to_string(),
            ));
        }
        if self.collection.dimension == 0 {
            return Err(ConfigError::Validation(
                "collection dimension must be greater than 0".to_string(),
            ));
        }
        if self.collection.text_max_length == 0 {
            return Err(ConfigError::Validation(
                "text_max_length must be greater than 0".to_string(),
            ));
        }
        if self.search.top_k == 0 {
            return Err(ConfigError::Validation(
                "search top_k must be greater than 0".to_string(),
            ));
        }
        if self.readiness.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "readiness max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl EnvOverride for WorkflowConfig {
    fn apply_env(&mut self, env: &EnvResolver) -> Result<(), ConfigError> {
        if let Some(database) = env.resolve("DATABASE") {
            self.database = database;
        }
        if let Some(collection) = env.resolve("COLLECTION") {
            self.collection.name = collection;
        }
        if let Some(dimension) = env.resolve_parse::<usize>("DIMENSION")? {
            self.collection.dimension = dimension;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn isolated_env() -> EnvResolver {
        EnvResolver::new("VECFLOW_TEST_ISOLATED")
    }

    #[test]
    fn test_workflow_config_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.database, "my_database");
        assert_eq!(config.collection.name, "text_embeddings");
        assert_eq!(config.collection.dimension, 1536);
        assert_eq!(config.ingest.record_id, 7);
        assert_eq!(config.search.query, "cdk");
        assert_eq!(config.search.top_k, 5);
        assert_eq!(config.ingest.on_existing, ExistingCollectionPolicy::Upsert);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_dimension() {
        let mut config = WorkflowConfig::default();
        config.collection.dimension = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ConfigFormat::from_extension(Path::new("vecflow.toml")),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension(Path::new("vecflow.yml")),
            Some(ConfigFormat::Yaml)
        );
        assert_eq!(ConfigFormat::from_extension(Path::new("vecflow.ini")), None);
    }

    #[test]
    fn test_load_toml_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vecflow.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "database = \"prod\"\n[collection]\nname = \"docs\"\n[ingest]\non_existing = \"recreate\""
        )
        .unwrap();

        let loader = ConfigLoader::new("VECFLOW").with_env_resolver(isolated_env());
        let config: WorkflowConfig = loader.load_from_path(&path).unwrap();
        assert_eq!(config.database, "prod");
        assert_eq!(config.collection.name, "docs");
        assert_eq!(config.collection.dimension, 1536);
        assert_eq!(config.ingest.on_existing, ExistingCollectionPolicy::Recreate);
    }

    #[test]
    fn test_load_or_default_searches_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vecflow.json"),
            r#"{ "search": { "query": "city infrastructure", "top_k": 3 } }"#,
        )
        .unwrap();

        let loader = ConfigLoader::new("VECFLOW")
            .with_env_resolver(isolated_env())
            .with_search_paths(vec![dir.path().to_path_buf()]);
        let config: WorkflowConfig = loader.load_or_default("vecflow").unwrap();
        assert_eq!(config.search.query, "city infrastructure");
        assert_eq!(config.search.top_k, 3);

        let empty = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new("VECFLOW")
            .with_env_resolver(isolated_env())
            .with_search_paths(vec![empty.path().to_path_buf()]);
        let config: WorkflowConfig = loader.load_or_default("vecflow").unwrap();
        assert_eq!(config, WorkflowConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env = isolated_env()
            .with_override("DATABASE", "staging")
            .with_override("DIMENSION", "768");
        let mut config = WorkflowConfig::default();
        config.apply_env(&env).unwrap();
        assert_eq!(config.database, "staging");
        assert_eq!(config.collection.dimension, 768);

        let env = isolated_env().with_override("DIMENSION", "wide");
        assert!(config.apply_env(&env).is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "FAIL".parse::<ExistingCollectionPolicy>().unwrap(),
            ExistingCollectionPolicy::Fail
        );
        assert!("merge".parse::<ExistingCollectionPolicy>().is_err());
    }
}
