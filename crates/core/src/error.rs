//! Error types for the chatrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for chatrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Upstream completion errors ---
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    // --- Durable store errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Why a call to the upstream completion endpoint produced no reply.
///
/// Every variant is an `UpstreamError` from the caller's point of view; the
/// variants only exist so logs and metadata can tell the categories apart.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompletionError {
    #[error("Upstream not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Upstream returned status {status_code}: {preview}")]
    Status { status_code: u16, preview: String },

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("Upstream response contained no reply text")]
    EmptyBody,
}

impl CompletionError {
    /// A short, stable category name for logs and response metadata.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Status { .. } => "status",
            Self::MalformedBody(_) => "malformed_body",
            Self::EmptyBody => "empty_body",
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
