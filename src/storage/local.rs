use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_object_path, StorageBackend, StorageError};

/// Mirrors objects into a directory tree on the local filesystem.
///
/// Writes go to a uniquely named `.part` file in the target directory and are
/// renamed into place, so readers (and the next run's `exists`) never see a
/// half-written object and concurrent writers never share a temp file.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_object_path(path)?;
        let mut full = self.root.clone();
        for segment in path.split('/') {
            full.push(segment);
        }
        Ok(full)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Blocking half of [`LocalBackend::write`].
fn write_atomically(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let mut part = tempfile::Builder::new()
        .prefix(".")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| io_error(dir, e))?;
    part.write_all(data).map_err(|e| io_error(part.path(), e))?;
    part.as_file()
        .sync_all()
        .map_err(|e| io_error(part.path(), e))?;
    part.persist(target).map_err(|e| io_error(target, e.error))?;
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        tracing::debug!(path = %full.display(), size_bytes = data.len(), "writing object");
        tokio::task::spawn_blocking(move || write_atomically(&full, &data))
            .await
            .map_err(|e| StorageError::Other(anyhow::anyhow!("Write task panicked: {}", e)))?
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.root.display())
    }
}
