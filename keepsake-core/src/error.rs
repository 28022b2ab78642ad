//! Error types for keepsake-core

use thiserror::Error;

/// Main error type for the keepsake-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parse error for chat exports
    #[error("parse error in {source_id}: {message}")]
    Parse { source_id: String, message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// LLM transport error (timeouts, rate limits, unreadable responses)
    #[error("LLM error: {0}")]
    Llm(String),

    /// The LLM returned parseable JSON that does not match the extraction schema
    #[error("schema violation for chunk {fingerprint}: {message}")]
    SchemaViolation { fingerprint: String, message: String },

    /// A curation operation was rejected before any mutation
    #[error(transparent)]
    Curation(#[from] CurationError),
}

/// Structured rejection reasons for curation operations.
///
/// Every variant is raised before the graph is touched; a caller seeing one
/// of these can assume the database is byte-for-byte unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurationError {
    /// No exchange row with this id
    #[error("exchange not found: {0}")]
    UnknownExchange(i64),

    /// No message row with this id
    #[error("message not found: {0}")]
    UnknownMessage(i64),

    /// Merge attempted across different source files
    #[error("cannot merge exchanges from different source files: {0:?} vs {1:?}")]
    CrossSourceMerge(String, String),

    /// Merge needs at least two distinct exchange ids
    #[error("merge requires at least two distinct exchange ids")]
    NotEnoughExchanges,
}

/// Result type alias for keepsake-core
pub type Result<T> = std::result::Result<T, Error>;
