//! Milvus connection settings

use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use vecflow_core::config::ConfigError;
use vecflow_core::config::ConfigValidation;
use vecflow_core::config::EnvOverride;
use vecflow_core::config::EnvResolver;

/// Milvus connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MilvusConfig {
    /// Server address, e.g. `http://127.0.0.1:19530`
    pub address: String,
    /// Bearer token (`user:password` or an API key), never serialized back out
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:19530".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

impl MilvusConfig {
    /// Address with a scheme and without a trailing slash
    pub fn endpoint(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ConfigValidation for MilvusConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingField("store.address".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "store timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl EnvOverride for MilvusConfig {
    fn apply_env(&mut self, env: &EnvResolver) -> Result<(), ConfigError> {
        if let Some(address) = env.resolve("MILVUS_ADDRESS") {
            self.address = address;
        }
        if let Some(token) = env.resolve("MILVUS_TOKEN") {
            self.token = Some(token);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_adds_scheme() {
        let mut config = MilvusConfig::default();
        assert_eq!(config.endpoint(), "http://127.0.0.1:19530");

        config.address = "milvus.internal:19530/".to_string();
        assert_eq!(config.endpoint(), "http://milvus.internal:19530");

        config.address = "https://in01.cloud.example:443".to_string();
        assert_eq!(config.endpoint(), "https://in01.cloud.example:443");
    }

    #[test]
    fn test_env_overrides_and_validation() {
        let env = EnvResolver::new("VECFLOW_MILVUS_TEST_ISOLATED")
            .with_override("MILVUS_ADDRESS", "10.0.0.5:19530")
            .with_override("MILVUS_TOKEN", "root:Milvus");
        let mut config = MilvusConfig::default();
        config.apply_env(&env).unwrap();
        assert_eq!(config.endpoint(), "http://10.0.0.5:19530");
        assert_eq!(config.token.as_deref(), Some("root:Milvus"));
        assert!(config.validate().is_ok());

        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
