//! Persisted iCloud web session.
//!
//! Reads the cookie jar and session token that an earlier interactive login
//! saved under the cookie directory, and exchanges the token for account
//! data via `accountLogin`. Nothing here prompts for credentials.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::error::ICloudError;
use crate::retry::{self, RetryAction, RetryPolicy};
use crate::types::Domain;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Per-region iCloud web endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub home: &'static str,
    pub setup: &'static str,
}

impl Endpoints {
    pub fn for_domain(domain: Domain) -> Self {
        match domain {
            Domain::Com => Self {
                home: "https://www.icloud.com",
                setup: "https://setup.icloud.com/setup/ws/1",
            },
            Domain::Cn => Self {
                home: "https://www.icloud.com.cn",
                setup: "https://setup.icloud.com.cn/setup/ws/1",
            },
        }
    }
}

/// Response from `/accountLogin`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLoginResponse {
    #[serde(default)]
    pub ds_info: Option<DsInfo>,
    #[serde(default)]
    pub webservices: Option<Webservices>,
    #[serde(default)]
    pub hsa_challenge_required: bool,
    #[serde(default)]
    pub domain_to_use: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DsInfo {
    #[serde(default)]
    pub dsid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Webservices {
    #[serde(default)]
    pub ckdatabasews: Option<WebserviceEndpoint>,
}

#[derive(Debug, Deserialize)]
pub struct WebserviceEndpoint {
    pub url: String,
}

/// A single persisted cookie entry (URL + Set-Cookie header value).
#[derive(Deserialize)]
struct CookieEntry {
    url: String,
    cookie: String,
}

/// Keep only word characters, which is how session files are named on disk.
pub fn sanitize_username(username: &str) -> String {
    username
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

fn is_cookie_expired(cookie_str: &str, now: &chrono::DateTime<chrono::Utc>) -> bool {
    if let Ok(parsed) = cookie::Cookie::parse(cookie_str) {
        if let Some(expires) = parsed.expires_datetime() {
            let expires_utc =
                chrono::DateTime::<chrono::Utc>::from(std::time::SystemTime::from(expires));
            return expires_utc < *now;
        }
    }
    false
}

/// Load the JSON cookie jar, dropping expired entries. A missing or corrupt
/// jar yields an empty one: the session token alone may still be accepted.
async fn load_cookies(path: &Path) -> Arc<reqwest::cookie::Jar> {
    let jar = Arc::new(reqwest::cookie::Jar::default());
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::debug!("No cookie jar at {}: {}", path.display(), e);
            return jar;
        }
    };
    let entries: Vec<CookieEntry> = match serde_json::from_str(&contents) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Ignoring unreadable cookie jar {}: {}", path.display(), e);
            return jar;
        }
    };
    let now = chrono::Utc::now();
    let mut loaded = 0usize;
    for entry in entries {
        if is_cookie_expired(&entry.cookie, &now) {
            tracing::debug!("Pruning expired cookie from {}", entry.url);
            continue;
        }
        if let Ok(url) = entry.url.parse::<url::Url>() {
            jar.add_cookie_str(&entry.cookie, &url);
            loaded += 1;
        }
    }
    tracing::debug!("Loaded {} cookies from {}", loaded, path.display());
    jar
}

/// Session file values are usually strings; anything else is kept in its
/// JSON form.
fn parse_session_data(contents: &str) -> Result<HashMap<String, String>, serde_json::Error> {
    let map: HashMap<String, Value> = serde_json::from_str(contents)?;
    Ok(map
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

pub struct WebSession {
    client: Client,
    session_data: HashMap<String, String>,
    endpoints: Endpoints,
    retry: RetryPolicy,
}

impl std::fmt::Debug for WebSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSession")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl WebSession {
    /// Load the saved session for `username` from `cookie_dir`.
    pub async fn load(
        cookie_dir: &Path,
        username: &str,
        domain: Domain,
    ) -> Result<Self, ICloudError> {
        let sanitized = sanitize_username(username);
        let session_path: PathBuf = cookie_dir.join(format!("{}.session", sanitized));
        let contents = match tokio::fs::read_to_string(&session_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ICloudError::NoSavedSession(
                    session_path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let session_data = parse_session_data(&contents)?;
        if session_data
            .get("session_token")
            .map_or(true, |t| t.is_empty())
        {
            return Err(ICloudError::InvalidSession(format!(
                "{} has no session token",
                session_path.display()
            )));
        }
        tracing::debug!("Loaded session data from {}", session_path.display());

        let jar = load_cookies(&cookie_dir.join(&sanitized)).await;
        let endpoints = Endpoints::for_domain(domain);

        // Origin/Referer are required by Apple's CORS checks.
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ORIGIN, HeaderValue::from_static(endpoints.home));
        default_headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", endpoints.home))
                .unwrap_or_else(|_| HeaderValue::from_static(endpoints.home)),
        );
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .cookie_provider(jar)
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            session_data,
            endpoints,
            retry: RetryPolicy::default(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The client id the session was created with, if it recorded one.
    pub fn client_id(&self) -> Option<&str> {
        self.session_data.get("client_id").map(String::as_str)
    }

    fn value(&self, key: &str) -> String {
        self.session_data.get(key).cloned().unwrap_or_default()
    }

    /// Exchange the saved session token for account data.
    pub async fn account_login(&self) -> Result<AccountLoginResponse, ICloudError> {
        let body = serde_json::json!({
            "accountCountryCode": self.value("account_country"),
            "dsWebAuthToken": self.value("session_token"),
            "extended_login": true,
            "trustToken": self.value("trust_token"),
        });
        let url = format!("{}/accountLogin", self.endpoints.setup);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ICloudError::InvalidSession(format!(
                "accountLogin returned HTTP {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }
        let data: AccountLoginResponse = response.json().await?;

        if let Some(domain) = &data.domain_to_use {
            return Err(ICloudError::WrongDomain(domain.clone()));
        }
        if data.hsa_challenge_required {
            return Err(ICloudError::InvalidSession(
                "two-factor verification is required again".into(),
            ));
        }
        Ok(data)
    }

    /// POST a CloudKit query body and return the parsed JSON, retrying
    /// throttling and server errors.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ICloudError> {
        let payload = body.to_string();
        retry::retry_with_backoff(
            &self.retry,
            "CloudKit request",
            |e: &ICloudError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || async {
                let response = self
                    .client
                    .post(url)
                    .header("Content-type", "text/plain")
                    .body(payload.clone())
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ICloudError::HttpStatus {
                        url: url.split('?').next().unwrap_or(url).to_string(),
                        status: status.as_u16(),
                        message: message.chars().take(200).collect(),
                    });
                }
                Ok(response.json::<Value>().await?)
            },
        )
        .await
    }
}
