//! Destination stores.
//!
//! Objects are addressed by `/`-separated relative paths such as
//! `2023/05/04/IMG_0001.JPG`. A backend only has to answer "is something
//! there?" and "put these bytes there"; the sync engine builds everything
//! else on top of those two calls.

pub mod b2;
pub mod error;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::b2::B2Backend;
pub use self::error::StorageError;
pub use self::local::LocalBackend;
use crate::config::BackendConfig;

/// Presence check + whole-object write.
///
/// Called concurrently from every sync worker without external locking;
/// implementations synchronize internally where they need to.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// `Ok(true)` iff an object already occupies `path`. A missing object is
    /// `Ok(false)`, never an error.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Create or replace the object at `path` with exactly `data`.
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Human-readable description of where objects go, for logs.
    fn describe(&self) -> String;
}

/// Build the configured backend.
pub fn build_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        BackendConfig::Local { root } => Arc::new(LocalBackend::new(root.clone())),
        BackendConfig::B2 {
            api_url,
            key_id,
            application_key,
            bucket_name,
        } => Arc::new(B2Backend::new(
            api_url.clone(),
            key_id.clone(),
            application_key.clone(),
            bucket_name.clone(),
        )?),
    };
    Ok(backend)
}

/// Reject paths that could escape the destination root or that no backend
/// can store.
pub(crate) fn validate_object_path(path: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(invalid("must be a relative '/'-separated path"));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("empty or relative path segment"));
    }
    Ok(())
}
