//! Streaming media download with checksum verification.

use std::path::{Path, PathBuf};

use base64::Engine;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::retry::{self, RetryAction, RetryPolicy};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {path}")]
    HttpStatus { status: u16, path: String },

    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("HTTP error downloading {path} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        path: String,
        bytes_written: u64,
    },
}

impl DownloadError {
    /// Checksum mismatches count as transient: they come from truncated
    /// transfers or expired CDN URLs, not stored corruption.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::ChecksumMismatch(_) => true,
            DownloadError::Http { .. } => true,
            DownloadError::Disk(_) => false,
        }
    }
}

/// Sibling `.part` path that the body streams into before the rename.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Apple checksums are base64 of either a raw 32-byte SHA-256 or a 33-byte
/// value with a one-byte type prefix. Anything else cannot be checked.
fn checksum_matches(expected_b64: &str, actual: &[u8]) -> bool {
    match base64::engine::general_purpose::STANDARD.decode(expected_b64) {
        Ok(expected) if expected.len() == 32 => actual == expected.as_slice(),
        Ok(expected) if expected.len() == 33 => actual == &expected[1..],
        _ => true,
    }
}

/// Download `url` into `dest`, returning the number of bytes written.
pub async fn download_to(
    client: &Client,
    url: &str,
    dest: &Path,
    checksum: &str,
    policy: &RetryPolicy,
) -> Result<u64, DownloadError> {
    let part = part_path(dest);
    let label = format!("Download of {}", dest.display());
    retry::retry_with_backoff(
        policy,
        &label,
        |e: &DownloadError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || async {
            // Always restart from scratch so the checksum covers the whole body.
            let _ = fs::remove_file(&part).await;
            attempt(client, url, dest, &part, checksum).await
        },
    )
    .await
}

async fn attempt(
    client: &Client,
    url: &str,
    dest: &Path,
    part: &Path,
    checksum: &str,
) -> Result<u64, DownloadError> {
    let path = dest.display().to_string();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| DownloadError::Http {
            source,
            path: path.clone(),
            bytes_written: 0,
        })?;
    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            path,
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part)
        .await?;
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Http {
            source,
            path: path.clone(),
            bytes_written,
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if !checksum_matches(checksum, hasher.finalize().as_slice()) {
        let _ = fs::remove_file(part).await;
        return Err(DownloadError::ChecksumMismatch(path));
    }
    fs::rename(part, dest).await?;
    tracing::debug!(path = %dest.display(), size_bytes = bytes_written, "downloaded");
    Ok(bytes_written)
}
