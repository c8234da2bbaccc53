//! Error types for session store operations.

/// Error type for session store operations.
///
/// Most backend failures never reach callers: reads degrade to "not found" and
/// writes are retried on the next cycle. These variants cover what does surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error reported by a backing store adapter.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Identifier rejected by the fixed-length precondition.
    #[error("Invalid session id '{id}': expected {expected} characters")]
    InvalidIdentifier { id: String, expected: usize },

    /// Store configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
