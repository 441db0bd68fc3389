//! Error types for the mentor memory engine.

use thiserror::Error;

/// Result type alias using the memory error type.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Unified error type for the memory engine.
///
/// Transient retrieval and indexing failures (`IndexUnavailable`)
/// never abort a conversation or reflection flow; callers degrade.
/// `Store` failures are fatal for the operation and surface to the
/// caller. `Misconfiguration` is fatal at startup.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Embedding model unavailable at startup. Non-fatal: the
    /// provider factory downgrades to the fallback encoder.
    #[error("embedding model unavailable: {0}")]
    ModelLoad(String),

    /// Model-path failure on a single encode call. The call falls
    /// back to hash encoding; the memory is still stored.
    #[error("failed to encode text: {0}")]
    Encode(String),

    /// Vector backend unreachable or timed out. Ranking degrades to
    /// recency-only; writes leave the record with indexed=false.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Relational write or read failure. Fatal for the operation.
    #[error("relational store error: {0}")]
    Store(String),

    /// Declared dimension does not match the active model's native
    /// output size, or another invalid setup. Fatal at startup.
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// Requested record not found, or not owned by the caller.
    #[error("not found: {0}")]
    NotFound(String),
}

impl MemoryError {
    /// Check whether the error is transient: the caller should take a
    /// degraded path rather than fail.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_) | Self::Encode(_))
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<tokio::task::JoinError> for MemoryError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Store(format!("blocking task failed: {e}"))
    }
}
