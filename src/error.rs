/// Error types for registry, storage and runner operations
///
/// Registry and placeholder errors surface directly to the caller. Errors raised
/// while running a stub are captured in that stub's terminal state instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PyflowError {
    /// Unknown function name, or its metadata entry is missing or unreadable
    #[error("function `{0}` is not registered")]
    NotFound(String),

    #[error("`{0}` is not a valid function name (must be a single path component)")]
    InvalidName(String),

    /// The persisted closure cannot be turned back into something invocable
    #[error("cannot materialize function `{name}`: {reason}")]
    Deserialization { name: String, reason: String },

    #[error("stored blob at {} is unreadable: {reason}", path.display())]
    StorageCorrupt { path: PathBuf, reason: String },

    /// A placeholder was read before its producing stub wrote an output
    #[error("output of execution {execution_id} (`{function}`) is not ready")]
    NotReady { function: String, execution_id: String },

    #[error("call to `{function}` does not match its signature: {reason}")]
    SignatureMismatch { function: String, reason: String },

    /// Wraps any error raised by user code during invocation
    #[error("execution {execution_id} of `{function}` failed: {source}")]
    ExecutionFailed {
        function: String,
        execution_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution {execution_id} of `{function}` was not run: upstream execution {upstream} failed")]
    UpstreamFailed {
        function: String,
        execution_id: String,
        upstream: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("execution journal: {0}")]
    Journal(#[from] sqlx::Error),
}

impl PyflowError {
    /// Short kind label used in logs and the execution journal
    pub fn kind(&self) -> &'static str {
        match self {
            PyflowError::NotFound(_) => "not_found",
            PyflowError::InvalidName(_) => "invalid_name",
            PyflowError::Deserialization { .. } => "deserialization",
            PyflowError::StorageCorrupt { .. } => "storage_corrupt",
            PyflowError::NotReady { .. } => "not_ready",
            PyflowError::SignatureMismatch { .. } => "signature_mismatch",
            PyflowError::ExecutionFailed { .. } => "execution_failed",
            PyflowError::UpstreamFailed { .. } => "upstream_failed",
            PyflowError::Io(_) => "io",
            PyflowError::Journal(_) => "journal",
        }
    }
}

pub type Result<T> = std::result::Result<T, PyflowError>;
