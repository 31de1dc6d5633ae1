//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the object-execution core.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (malformed control buffers, duplicate ids).
    #[error("validation error: {0}")]
    Validation(String),

    /// Object, element, or class not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid lifecycle state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Operation cannot proceed right now; caller should retry
    /// (e.g. scheduler de-registration while a monitor is mid-flight).
    #[error("busy: {0}")]
    Busy(String),

    /// The memory collaborator could not supply a chunk.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// A bounded retry budget was exhausted. Fatal at this layer;
    /// escalation is the caller's responsibility.
    #[error("retry budget exhausted: {0}")]
    RetryExhausted(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn allocation_failed(msg: impl Into<String>) -> Self {
        Self::AllocationFailed(msg.into())
    }

    pub fn retry_exhausted(msg: impl Into<String>) -> Self {
        Self::RetryExhausted(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
