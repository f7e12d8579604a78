//! Error types for repository operations
//!
//! Absence is never an error here: lookups that find nothing return `None`
//! or an empty result set. Everything below is a genuine fault the caller
//! has to handle.

use thiserror::Error;

/// Main error type for repository operations
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The search backend answered with a non-successful status
    #[error("Backend query failed with status {status}: {message}")]
    BackendQuery { status: u16, message: String },

    /// The backend could not be reached or the transport failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// An optimistic update ran out of conflict retries
    #[error("Update of {id} conflicted {attempts} times, giving up")]
    ConflictExhausted { id: String, attempts: u32 },

    /// A mutation would break a reference held by another document
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Invalid arguments supplied by the caller; no I/O was attempted
    #[error("Invalid argument: {0}")]
    Misuse(String),

    /// The cache backend failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl RepositoryError {
    /// Shorthand for building a [`RepositoryError::Misuse`]
    pub fn misuse(message: impl Into<String>) -> Self {
        RepositoryError::Misuse(message.into())
    }

    /// Whether the error was produced before any I/O happened
    pub fn is_misuse(&self) -> bool {
        matches!(self, RepositoryError::Misuse(_))
    }
}

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

impl From<String> for RepositoryError {
    fn from(s: String) -> Self {
        RepositoryError::Other(s)
    }
}

impl From<&str> for RepositoryError {
    fn from(s: &str) -> Self {
        RepositoryError::Other(s.to_string())
    }
}
