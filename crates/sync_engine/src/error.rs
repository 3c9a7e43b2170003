//! Error types for the sync engine crate.

use thiserror::Error;

/// Result type alias for engine-internal operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur inside the engine.
///
/// These never escape the public steady-state surface; persistence and
/// serialization failures are absorbed at the point of occurrence and
/// reported through diagnostics only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Reading or writing the session store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serializing or deserializing the pending queue failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Rejection returned by a caller-supplied apply function.
///
/// Any rejection is treated as "retry later"; the engine attaches no
/// meaning to the message beyond diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("apply rejected: {0}")]
pub struct ApplyError(pub String);

impl ApplyError {
    /// Create a new apply rejection with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<&str> for ApplyError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for ApplyError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}
