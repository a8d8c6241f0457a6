//! iCloud Photos as a [`RemoteSession`].
//!
//! Authentication reuses the web session an interactive login saved to the
//! cookie directory; the token is exchanged for the CloudKit endpoint and the
//! primary library is opened. Listing and downloads go through CloudKit.

mod album;
pub mod download;
pub mod error;
mod library;
mod records;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use self::album::AlbumQuery;
use self::download::DownloadError;
pub use self::error::ICloudError;
use self::library::PhotoLibrary;
use self::session::WebSession;
use crate::remote::{FetchOutcome, RemoteError, RemoteItem, RemoteSession, SizeClass};
use crate::retry::RetryPolicy;
use crate::types::Domain;

pub struct ICloudSession {
    cookie_directory: PathBuf,
    username: String,
    domain: Domain,
    client_id: Option<String>,
    download_retry: RetryPolicy,
    connected: OnceCell<Connected>,
}

struct Connected {
    http: Arc<WebSession>,
    library: PhotoLibrary,
}

impl ICloudSession {
    pub fn new(
        cookie_directory: PathBuf,
        username: String,
        domain: Domain,
        client_id: Option<String>,
    ) -> Self {
        Self {
            cookie_directory,
            username,
            domain,
            client_id,
            download_retry: RetryPolicy::default(),
            connected: OnceCell::new(),
        }
    }

    async fn connect(&self) -> Result<Connected, ICloudError> {
        let http = Arc::new(
            WebSession::load(&self.cookie_directory, &self.username, self.domain).await?,
        );
        let account = http.account_login().await?;

        let service_root = account
            .webservices
            .and_then(|ws| ws.ckdatabasews)
            .map(|ep| ep.url)
            .ok_or_else(|| {
                ICloudError::ServiceNotActivated("no ckdatabasews endpoint in account data".into())
            })?;
        let dsid = account
            .ds_info
            .and_then(|ds| ds.dsid)
            .ok_or_else(|| ICloudError::InvalidSession("account data has no dsid".into()))?;
        let client_id = http
            .client_id()
            .map(str::to_string)
            .or_else(|| self.client_id.clone())
            .unwrap_or_else(|| format!("auth-{:032x}", rand::random::<u128>()));

        tracing::debug!("CloudKit service root: {}", service_root);
        let library = PhotoLibrary::open(http.clone(), &service_root, &client_id, &dsid).await?;
        Ok(Connected { http, library })
    }

    fn connected(&self) -> Result<&Connected, ICloudError> {
        self.connected.get().ok_or(ICloudError::NotAuthenticated)
    }

    async fn resolve_album(
        &self,
        library: &PhotoLibrary,
        name: &str,
    ) -> Result<AlbumQuery, RemoteError> {
        if let Some(album) = AlbumQuery::smart_folders()
            .into_iter()
            .find(|a| a.name == name)
        {
            return Ok(album);
        }
        let albums = library.albums().await.map_err(|e| RemoteError::Enumeration {
            collection: name.to_string(),
            reason: e.to_string(),
        })?;
        let available = albums
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        albums
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownCollection {
                name: name.to_string(),
                available,
            })
    }
}

#[async_trait]
impl RemoteSession for ICloudSession {
    async fn authenticate(&self) -> Result<(), RemoteError> {
        self.connected
            .get_or_try_init(|| self.connect())
            .await
            .map_err(|e| RemoteError::Auth(e.to_string()))?;
        tracing::info!("Authenticated as {}", self.username);
        Ok(())
    }

    async fn list_items(&self, collection: &str) -> Result<Vec<RemoteItem>, RemoteError> {
        let enumeration = |e: ICloudError| RemoteError::Enumeration {
            collection: collection.to_string(),
            reason: e.to_string(),
        };
        let library = &self.connected().map_err(enumeration)?.library;
        let album = self.resolve_album(library, collection).await?;

        match library.count(&album).await {
            Ok(count) => tracing::debug!("Album '{}' reports {} items", album.name, count),
            Err(e) => tracing::debug!("Could not count album '{}': {}", album.name, e),
        }
        library.items(&album).await.map_err(enumeration)
    }

    async fn fetch(
        &self,
        item: &RemoteItem,
        size: SizeClass,
        dest: &Path,
    ) -> Result<FetchOutcome, RemoteError> {
        let Some(version) = item.versions.get(&size) else {
            return Ok(FetchOutcome::Unavailable);
        };
        let fetch_error = |reason: String| RemoteError::Fetch {
            id: item.id.clone(),
            reason,
        };
        let connected = self.connected().map_err(|e| fetch_error(e.to_string()))?;
        tracing::debug!(
            id = %item.id,
            size_bytes = version.size,
            "Downloading {} rendition of {}",
            size.as_str(),
            item
        );
        let bytes = download::download_to(
            connected.http.client(),
            &version.url,
            dest,
            &version.checksum,
            &self.download_retry,
        )
        .await
        .map_err(|e: DownloadError| fetch_error(e.to_string()))?;
        Ok(FetchOutcome::Fetched { bytes })
    }
}
