//! Backblaze B2 over the native `b2api/v2` HTTP API.
//!
//! The account is authorized lazily on first use and the token is cached;
//! any 401 drops the cache and the call is replayed once with a fresh
//! authorization. Transient failures (429, 5xx, transport) are retried with
//! backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{validate_object_path, StorageBackend, StorageError};
use crate::retry::{self, RetryAction, RetryPolicy};

const API_PREFIX: &str = "b2api/v2";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
    #[serde(default)]
    allowed: Option<Allowed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Allowed {
    bucket_id: Option<String>,
    bucket_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Cached result of `b2_authorize_account` plus the resolved bucket id.
#[derive(Debug, Clone)]
struct B2Auth {
    token: String,
    api_url: String,
    download_url: String,
    bucket_id: String,
}

pub struct B2Backend {
    client: Client,
    api_base: String,
    key_id: String,
    application_key: String,
    bucket_name: String,
    auth: RwLock<Option<Arc<B2Auth>>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for B2Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Backend")
            .field("api_base", &self.api_base)
            .field("key_id", &self.key_id)
            .field("bucket_name", &self.bucket_name)
            .finish_non_exhaustive()
    }
}

/// Percent-encode an object path for `X-Bz-File-Name` and download URLs,
/// keeping `/` as the separator.
pub(crate) fn encode_file_name(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Turn a non-success B2 response into a [`StorageError`], pulling the
/// message out of B2's JSON error body when there is one.
async fn status_error(operation: &'static str, response: Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) if !err.message.is_empty() => format!("{} ({})", err.message, err.code),
        _ => body.chars().take(200).collect(),
    };
    StorageError::HttpStatus {
        operation,
        status,
        message,
    }
}

fn http_error(operation: &'static str) -> impl FnOnce(reqwest::Error) -> StorageError {
    move |source| StorageError::Http { operation, source }
}

/// Accept the native API base with or without a scheme. S3-compatible
/// endpoints (`s3.<region>.backblazeb2.com`) speak a different protocol.
fn normalize_api_base(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let base = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = url::Url::parse(&base).with_context(|| format!("Invalid B2 API URL: {}", raw))?;
    if url.host_str().is_some_and(|host| host.starts_with("s3.")) {
        anyhow::bail!(
            "B2 API URL {} is an S3-compatible endpoint; \
             set B2_API_URL to the native API base (https://api.backblazeb2.com)",
            raw
        );
    }
    Ok(base)
}

fn classify(e: &StorageError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

impl B2Backend {
    pub fn new(
        api_base: String,
        key_id: String,
        application_key: String,
        bucket_name: String,
    ) -> anyhow::Result<Self> {
        let api_base = normalize_api_base(&api_base)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for B2")?;
        Ok(Self {
            client,
            api_base,
            key_id,
            application_key,
            bucket_name,
            auth: RwLock::new(None),
            retry: RetryPolicy::default(),
        })
    }

    async fn authorize(&self) -> Result<B2Auth, StorageError> {
        let url = format!("{}/{}/b2_authorize_account", self.api_base, API_PREFIX);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.key_id, Some(&self.application_key))
            .send()
            .await
            .map_err(http_error("b2_authorize_account"))?;
        if !response.status().is_success() {
            return Err(status_error("b2_authorize_account", response).await);
        }
        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(http_error("b2_authorize_account"))?;

        // Restricted keys name their bucket directly; otherwise look it up.
        let bucket_id = match &body.allowed {
            Some(Allowed {
                bucket_id: Some(id),
                bucket_name: Some(name),
            }) if *name == self.bucket_name => id.clone(),
            _ => self.lookup_bucket_id(&body).await?,
        };
        tracing::debug!(bucket = %self.bucket_name, "Authorized with B2");

        Ok(B2Auth {
            token: body.authorization_token,
            api_url: body.api_url,
            download_url: body.download_url,
            bucket_id,
        })
    }

    async fn lookup_bucket_id(&self, auth: &AuthorizeResponse) -> Result<String, StorageError> {
        let url = format!("{}/{}/b2_list_buckets", auth.api_url, API_PREFIX);
        let response = self
            .client
            .post(&url)
            .header("Authorization", &auth.authorization_token)
            .json(&serde_json::json!({
                "accountId": auth.account_id,
                "bucketName": self.bucket_name,
            }))
            .send()
            .await
            .map_err(http_error("b2_list_buckets"))?;
        if !response.status().is_success() {
            return Err(status_error("b2_list_buckets", response).await);
        }
        let body: ListBucketsResponse = response
            .json()
            .await
            .map_err(http_error("b2_list_buckets"))?;
        body.buckets
            .into_iter()
            .find(|b| b.bucket_name == self.bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| StorageError::BucketNotFound(self.bucket_name.clone()))
    }

    async fn current_auth(&self) -> Result<Arc<B2Auth>, StorageError> {
        if let Some(auth) = self.auth.read().await.as_ref() {
            return Ok(auth.clone());
        }
        let mut guard = self.auth.write().await;
        // Another worker may have authorized while we waited for the lock.
        if let Some(auth) = guard.as_ref() {
            return Ok(auth.clone());
        }
        let auth = Arc::new(self.authorize().await?);
        *guard = Some(auth.clone());
        Ok(auth)
    }

    async fn invalidate(&self, stale: &B2Auth) {
        let mut guard = self.auth.write().await;
        if guard.as_ref().is_some_and(|a| a.token == stale.token) {
            *guard = None;
        }
    }

    /// Run `call` with the cached authorization, replaying it once with a
    /// fresh one if B2 answers 401.
    async fn with_auth<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, StorageError>
    where
        F: Fn(Arc<B2Auth>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let auth = self.current_auth().await?;
        match call(auth.clone()).await {
            Err(e) if e.is_unauthorized() => {
                tracing::debug!("B2 token rejected during {}, re-authorizing", operation);
                self.invalidate(&auth).await;
                let fresh = self.current_auth().await?;
                call(fresh).await
            }
            other => other,
        }
    }

    async fn head_once(&self, auth: Arc<B2Auth>, path: &str) -> Result<bool, StorageError> {
        let url = format!(
            "{}/file/{}/{}",
            auth.download_url,
            urlencoding::encode(&self.bucket_name),
            encode_file_name(path)
        );
        let response = self
            .client
            .head(&url)
            .header("Authorization", &auth.token)
            .send()
            .await
            .map_err(http_error("exists"))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error("exists", response).await),
        }
    }

    async fn upload_once(
        &self,
        auth: Arc<B2Auth>,
        path: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let url = format!("{}/{}/b2_get_upload_url", auth.api_url, API_PREFIX);
        let response = self
            .client
            .post(&url)
            .header("Authorization", &auth.token)
            .json(&serde_json::json!({ "bucketId": auth.bucket_id }))
            .send()
            .await
            .map_err(http_error("b2_get_upload_url"))?;
        if !response.status().is_success() {
            return Err(status_error("b2_get_upload_url", response).await);
        }
        let target: UploadUrlResponse = response
            .json()
            .await
            .map_err(http_error("b2_get_upload_url"))?;

        let response = self
            .client
            .post(&target.upload_url)
            .header("Authorization", &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(path))
            .header("Content-Type", "b2/x-auto")
            .header("X-Bz-Content-Sha1", "do_not_verify")
            .body(data.to_vec())
            .send()
            .await
            .map_err(http_error("b2_upload_file"))?;
        if !response.status().is_success() {
            return Err(status_error("b2_upload_file", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for B2Backend {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        validate_object_path(path)?;
        retry::retry_with_backoff(&self.retry, "B2 exists check", classify, || {
            self.with_auth("exists", |auth| self.head_once(auth, path))
        })
        .await
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
        validate_object_path(path)?;
        tracing::debug!(path, size_bytes = data.len(), "uploading to B2");
        retry::retry_with_backoff(&self.retry, "B2 upload", classify, || {
            self.with_auth("upload", |auth| self.upload_once(auth, path, &data))
        })
        .await
    }

    fn describe(&self) -> String {
        format!("B2 bucket {}", self.bucket_name)
    }
}
