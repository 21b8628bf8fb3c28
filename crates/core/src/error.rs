//! Error types for the lectag domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all lectag operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Training errors ---
    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Suggestion errors ---
    #[error("Suggestion error: {0}")]
    Suggest(#[from] SuggestError),

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

/// Failures reported by an embedding or reasoning collaborator.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("No training examples carry a known tag")]
    NoExamples,

    #[error("Embedding dimension mismatch for {document_id}: expected {expected}, found {found}")]
    DimensionMismatch {
        document_id: String,
        expected: usize,
        found: usize,
    },

    #[error("Empty embedding for {0}")]
    EmptyEmbedding(String),

    #[error("A retrain is already running")]
    AlreadyRunning,

    #[error("Embedding failed for {text_id}: {source}")]
    Embedding {
        text_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Publishing failed: {0}")]
    Publish(#[from] StoreError),

    #[error("Training task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Prototype set version {0} not found")]
    VersionNotFound(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record for tag {tag_id}: {reason}")]
    Corrupt { tag_id: String, reason: String },

    #[error("Prototype set version {0} is already archived")]
    VersionExists(u64),
}

/// Failures surfaced for a single document; never abort a batch.
#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("No active prototype set has been published")]
    NoActiveSet,

    #[error("Embedding failed for document {document_id}: {source}")]
    Embedding {
        document_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Embedding for document {document_id} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        document_id: String,
        expected: usize,
        found: usize,
    },
}
