//! Error types for vecflow

use thiserror::Error;

/// Main error type for vecflow operations
#[derive(Error, Debug)]
pub enum Error {
    /// The remote endpoint could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credentials were missing or rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A remote call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The store connection was already closed
    #[error("Connection already closed")]
    ConnectionClosed,

    /// Rate limit errors
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// The selected database does not exist
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// The collection does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// A collection with that name already exists
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// An existing collection does not match the requested schema
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// A vector length differs from the schema dimension
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared by the schema
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// The store reported that an index build failed
    #[error("Index build failed: {0}")]
    IndexBuildFailed(String),

    /// A server-side asynchronous operation has not completed yet
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    EmbeddingProvider(String),

    /// Error reported by the vector store that has no finer classification
    #[error("Store error (code {code}): {message}")]
    Store {
        /// Store-specific status code
        code: i64,
        /// Message returned by the store
        message: String,
    },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for vecflow operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a store error
    pub fn store(code: i64, msg: impl Into<String>) -> Self {
        Self::Store {
            code,
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-ready error
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound(_) | Self::CollectionNotFound(_)
        )
    }

    /// Check if this is a temporary error that can be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit(_) | Self::Timeout(_) | Self::Connection(_) | Self::NotReady(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::store(65535, "collection not loaded");
        assert_eq!(
            err.to_string(),
            "Store error (code 65535): collection not loaded"
        );

        let err = Error::DimensionMismatch {
            expected: 1536,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Vector dimension mismatch: expected 1536, got 3"
        );
    }

    #[test]
    fn test_error_helpers() {
        let err = Error::CollectionNotFound("text_embeddings".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = Error::not_ready("index building");
        assert!(!err.is_not_found());
        assert!(err.is_retryable());

        assert!(!Error::CollectionExists("x".to_string()).is_retryable());
        assert!(!Error::ConnectionClosed.is_retryable());
    }

    #[test]
    fn test_error_from_traits() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
