//! Error types for CampusBot.
//!
//! Library crates use [`CampusBotError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Callers that need to branch on the failure class (the chat adapter, the
//! warmup scheduler) should match on [`CampusBotError::kind`] rather than on
//! individual variants.

use std::path::PathBuf;
use std::sync::Arc;

/// Coarse failure classes surfaced to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    NoResults,
    Unavailable,
    Cancelled,
    Conflict,
    Internal,
}

/// Top-level error type for all CampusBot operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CampusBotError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Caller supplied a term or key the store refuses to handle.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A point lookup found no live row.
    #[error("{kind} not found: {key}")]
    NotFound { kind: String, key: String },

    /// Every resolver tier came back empty.
    #[error("no {kind} results for {term:?}")]
    NoResults { kind: String, term: String },

    /// Upstream exhausted its retries, or the store stayed busy.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected unique-constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upstream answered with a non-retryable 4xx status.
    #[error("client error from {url}: HTTP {status}")]
    ClientError { url: String, status: u16 },

    /// Network/HTTP error that is not classified as retryable exhaustion.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CampusBotError>;

impl CampusBotError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-argument error from any displayable message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn no_results(kind: impl Into<String>, term: impl Into<String>) -> Self {
        Self::NoResults {
            kind: kind.into(),
            term: term.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Classify a libSQL/SQLite error message.
    ///
    /// Busy/locked databases are transient (`Unavailable`), unique-constraint
    /// failures are `Conflict`, everything else is an opaque storage error.
    pub fn from_storage_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_ascii_lowercase();
        if lower.contains("database is locked") || lower.contains("busy") {
            Self::Unavailable(msg)
        } else if lower.contains("unique constraint failed") {
            Self::Conflict(msg)
        } else {
            Self::Storage(msg)
        }
    }

    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NoResults { .. } => ErrorKind::NoResults,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Config { .. }
            | Self::ClientError { .. }
            | Self::Network(_)
            | Self::Parse { .. }
            | Self::Storage(_)
            | Self::Io { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
