use thiserror::Error;

/// Errors from a storage backend. "Not found" is never one of these; it is
/// `Ok(false)` from `exists`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("{operation} failed with HTTP {status}: {message}")]
    HttpStatus {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("{operation} request failed: {source}")]
    Http {
        operation: &'static str,
        source: reqwest::Error,
    },

    #[error("Bucket '{0}' not found or not accessible with this key")]
    BucketNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Transient failures worth another attempt inside the backend.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            StorageError::Http { .. } => true,
            _ => false,
        }
    }

    /// The backend's credentials expired and a fresh authorization may help.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StorageError::HttpStatus { status: 401, .. })
    }
}
