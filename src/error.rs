//! Error types for Lyra.
//!
//! Every fallible operation returns [`Result`], whose error side is a
//! [`LyraError`]. Each variant carries a human readable message and maps to
//! exactly one [`ErrorKind`] tag, so callers can branch on the failure class
//! without matching on message text.
//!
//! # Examples
//!
//! ```
//! use lyra::error::{ErrorKind, LyraError, Result};
//!
//! fn lookup() -> Result<()> {
//!     Err(LyraError::not_found("vector index 'missing'"))
//! }
//!
//! let err = lookup().unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! ```

use thiserror::Error;

/// The main error type for Lyra operations.
#[derive(Error, Debug)]
pub enum LyraError {
    /// A referenced vector index, listener, model or encoder is not registered.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A query was chained in a way that cannot be executed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A component refers to components that are not registered, or removal
    /// would leave a dangling reference.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A component with the same identifier but a different implementation
    /// is already registered.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Encoding or decoding a payload failed.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A transformation failed for a specific document.
    #[error("Transformation error: {0}")]
    Transformation(String),

    /// Opaque failure surfaced from the storage backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors raised from user supplied transformation closures.
    #[error("Transformation error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`LyraError`].
pub type Result<T> = std::result::Result<T, LyraError>;

/// Coarse classification of a [`LyraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidQuery,
    InvalidReference,
    AlreadyExists,
    EncodingFailure,
    TransformationFailure,
    BackendFailure,
    InvalidConfig,
}

impl LyraError {
    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        LyraError::NotFound(msg.into())
    }

    /// Create a new invalid query error.
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        LyraError::InvalidQuery(msg.into())
    }

    /// Create a new invalid reference error.
    pub fn invalid_reference<S: Into<String>>(msg: S) -> Self {
        LyraError::InvalidReference(msg.into())
    }

    /// Create a new already exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        LyraError::AlreadyExists(msg.into())
    }

    /// Create a new encoding error.
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        LyraError::Encoding(msg.into())
    }

    /// Create a new transformation error.
    pub fn transformation<S: Into<String>>(msg: S) -> Self {
        LyraError::Transformation(msg.into())
    }

    /// Create a new backend error.
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        LyraError::Backend(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        LyraError::InvalidConfig(msg.into())
    }

    /// Return the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LyraError::NotFound(_) => ErrorKind::NotFound,
            LyraError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            LyraError::InvalidReference(_) => ErrorKind::InvalidReference,
            LyraError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            LyraError::Encoding(_) | LyraError::Json(_) => ErrorKind::EncodingFailure,
            LyraError::Transformation(_) | LyraError::Anyhow(_) => {
                ErrorKind::TransformationFailure
            }
            LyraError::Backend(_) => ErrorKind::BackendFailure,
            LyraError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Whether this error aborts a whole call rather than a single document.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::InvalidQuery | ErrorKind::InvalidReference
        )
    }
}
