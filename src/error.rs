//! Typed errors for the memory subsystem.
//!
//! Every store and transport operation returns [`MemoryError`]. Application
//! edges (config, CLI, embedding) wrap these in `anyhow` as needed.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by memory stores and the remote connection.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Local filesystem failure.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A payload or document did not have the expected shape.
    #[error("malformed payload: {0}")]
    Serialization(String),

    /// The link to the remote store is down or failed mid-call.
    #[error("transport error: {0}")]
    Transport(String),

    /// No response arrived before the call deadline.
    #[error("`{method}` timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The remote store answered with an application-level error.
    #[error("remote error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// The record already exists for this owner. Callers may ignore it.
    #[error("duplicate memory")]
    Duplicate,

    /// The owner id cannot be used as a storage key.
    #[error("invalid owner id: {0:?}")]
    InvalidOwner(String),

    /// A vector with NaN or infinite components.
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// The connection was shut down explicitly.
    #[error("connection closed")]
    Closed,
}

impl MemoryError {
    /// `true` for the non-fatal duplicate class.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }

    /// `true` for errors caused by the link rather than the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. } | Self::Closed)
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
