use thiserror::Error;

/// Failures surfaced by a [`super::RemoteSession`].
///
/// `Auth` and `Enumeration` are fatal to a run; `Fetch` is confined to the
/// task that issued it.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to enumerate collection '{collection}': {reason}")]
    Enumeration { collection: String, reason: String },

    #[error("Unknown collection '{name}'. Available: {available}")]
    UnknownCollection { name: String, available: String },

    #[error("Failed to fetch {id}: {reason}")]
    Fetch { id: String, reason: String },
}
