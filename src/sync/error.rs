use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Why one task failed. Never fatal to the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Existence check failed: {0}")]
    Exists(#[source] StorageError),

    #[error("Fetch failed: {0}")]
    Fetch(#[source] RemoteError),

    #[error("Size '{0}' is not available for this item")]
    Unavailable(&'static str),

    #[error("Metadata normalization failed: {0:#}")]
    Normalize(#[source] anyhow::Error),

    #[error("Scratch space error: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Write failed: {0}")]
    Write(#[source] StorageError),

    #[error("Worker failed: {0}")]
    Worker(String),
}
