//! Error types for storage backend operations.

use thiserror::Error;

/// Errors that can occur while talking to a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// File does not exist; "no annotations yet" is a normal state for
    /// callers loading label files
    #[error("file not found: {path}")]
    NotFound {
        /// Backend-relative path that was requested
        path: String,
    },

    /// I/O error during read/write/listing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No backend has been configured yet (dummy backend)
    #[error("storage not configured")]
    NotConfigured,

    /// A storage URI could not be parsed
    #[error("invalid storage URI '{uri}': {reason}")]
    InvalidUri {
        /// The URI as given
        uri: String,
        /// What was wrong with it
        reason: String,
    },

    /// The remote session could not be established or its subprocess died
    #[error("connection to {server} failed: {reason}")]
    Connection {
        /// Remote server the session targets
        server: String,
        /// What went wrong
        reason: String,
    },

    /// The remote side violated the file-transfer protocol
    #[error("file transfer protocol error: {0}")]
    Protocol(String),

    /// A glob pattern could not be compiled
    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl StorageError {
    /// Create a not-found error for a path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a connection error.
    pub fn connection(server: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            server: server.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether this error indicates the backend itself is unusable, as
    /// opposed to a problem with one file.
    ///
    /// Fatal errors make a metadata scan fail fast instead of silently
    /// under-counting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::Connection { .. } | Self::Protocol(_)
        )
    }
}
