//! Error types shared across the indexer

use thiserror::Error;

/// Indexer-wide error type for upstream clients and ingestion
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    pub fn api(msg: impl Into<String>) -> Self {
        IndexerError::Api(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        IndexerError::Network(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        IndexerError::Auth(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        IndexerError::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        IndexerError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        IndexerError::Internal(msg.into())
    }

    /// Fatal errors stop the affected ingester; everything else backs off
    /// and retries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexerError::Auth(_) | IndexerError::Config(_))
    }
}

/// Result type alias for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;
