use thiserror::Error;

#[derive(Error, Debug)]
pub enum ICloudError {
    #[error("No saved iCloud session at {0}; log in interactively once to create it")]
    NoSavedSession(String),
    #[error("Saved iCloud session is no longer valid: {0}")]
    InvalidSession(String),
    #[error("Apple insists on using {0} for this account; rerun with --domain cn")]
    WrongDomain(String),
    #[error("iCloud Photos is not available for this account: {0}")]
    ServiceNotActivated(String),
    #[error("Photo library not finished indexing")]
    IndexingNotFinished,
    #[error("CloudKit request to {url} failed with HTTP {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },
    #[error("Not authenticated; call authenticate() first")]
    NotAuthenticated,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ICloudError {
    /// Worth retrying the same CloudKit request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ICloudError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ICloudError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
