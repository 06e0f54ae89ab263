//! Error types for the `bookkb` crate.

use thiserror::Error;

/// Errors that can occur in knowledge-base operations.
#[derive(Debug, Error)]
pub enum KbError {
    /// An error occurred during embedding generation.
    #[error("embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in a vector store backend.
    #[error("vector store error ({backend}): {message}")]
    Store {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during document chunking.
    #[error("chunking error: {0}")]
    Chunking(String),

    /// A configuration validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error from document or index persistence.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON serialization error from document or metadata persistence.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A binary codec error from index persistence.
    #[error("index codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// A convenience result type for knowledge-base operations.
pub type Result<T> = std::result::Result<T, KbError>;
