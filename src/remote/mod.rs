//! Remote media source contract.
//!
//! The sync engine only sees [`RemoteSession`] and the fixed-shape
//! [`RemoteItem`] values it returns. Provider adapters (see `crate::icloud`)
//! translate their record formats into this shape at the boundary.

pub mod error;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

pub use self::error::RemoteError;
pub use crate::types::SizeClass;

/// Collection enumerated when none is configured.
pub const DEFAULT_COLLECTION: &str = "All Photos";

/// What a remote item is, as far as the mirror cares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    /// Anything else; keeps the provider's type string for the skip log.
    Other(String),
}

impl MediaKind {
    /// Only still images and videos are mirrored.
    pub fn is_syncable(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Video => f.write_str("video"),
            MediaKind::Other(raw) => f.write_str(raw),
        }
    }
}

/// One downloadable rendition of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaVersion {
    pub url: String,
    pub checksum: String,
    pub size: u64,
}

/// A remote photo or video.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub id: String,
    pub filename: Option<String>,
    pub kind: MediaKind,
    /// Capture instant as reported by the provider; `None` when missing or
    /// unparseable.
    pub captured: Option<DateTime<FixedOffset>>,
    /// Uppercase extension of the original's file format (`HEIC`, `PNG`,
    /// `MOV`) when the provider reports one. Names items that have no
    /// filename.
    pub extension: Option<String>,
    pub versions: HashMap<SizeClass, MediaVersion>,
}

impl std::fmt::Display for RemoteItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.filename {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "<unnamed> ({})", self.id),
        }
    }
}

/// Result of fetching an item's media into a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched { bytes: u64 },
    /// The requested size class does not exist for this item.
    Unavailable,
}

/// Authenticated handle to a remote media library.
///
/// Shared read-only across workers, so implementations must tolerate
/// concurrent `fetch` calls.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Establish (or validate) the session. Called once per run before
    /// anything else.
    async fn authenticate(&self) -> Result<(), RemoteError>;

    /// List every item in the named collection. Either the full listing is
    /// returned or an error; never a partial result.
    async fn list_items(&self, collection: &str) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Download one rendition of `item` into `dest`, replacing any file there.
    async fn fetch(
        &self,
        item: &RemoteItem,
        size: SizeClass,
        dest: &Path,
    ) -> Result<FetchOutcome, RemoteError>;
}
