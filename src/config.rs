use std::path::PathBuf;

use crate::types::{BackendKind, Domain, SizeClass};

/// Destination store settings, validated per backend.
pub enum BackendConfig {
    Local {
        root: PathBuf,
    },
    B2 {
        api_url: String,
        key_id: String,
        application_key: String,
        bucket_name: String,
    },
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendConfig::Local { root } => {
                f.debug_struct("Local").field("root", root).finish()
            }
            BackendConfig::B2 {
                api_url,
                key_id,
                bucket_name,
                ..
            } => f
                .debug_struct("B2")
                .field("api_url", api_url)
                .field("key_id", key_id)
                .field("application_key", &"<redacted>")
                .field("bucket_name", bucket_name)
                .finish(),
        }
    }
}

/// Application configuration.
pub struct Config {
    pub username: String,
    pub cookie_directory: PathBuf,
    pub client_id: Option<String>,
    pub album: String,
    pub backend: BackendConfig,

    pub threads_num: u16,

    pub domain: Domain,
    pub size: SizeClass,

    pub set_exif_datetime: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("cookie_directory", &self.cookie_directory)
            .field("album", &self.album)
            .field("backend", &self.backend)
            .field("threads_num", &self.threads_num)
            .field("domain", &self.domain)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Treat empty strings from the environment as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        let backend = match cli.backend {
            BackendKind::Local => BackendConfig::Local {
                root: expand_tilde(&cli.local_root),
            },
            BackendKind::B2 => {
                let mut missing = Vec::new();
                let key_id = non_empty(cli.b2_key_id);
                let application_key = non_empty(cli.b2_application_key);
                let bucket_name = non_empty(cli.b2_bucket_name);
                if key_id.is_none() {
                    missing.push("B2_KEY_ID");
                }
                if application_key.is_none() {
                    missing.push("B2_APPLICATION_KEY");
                }
                if bucket_name.is_none() {
                    missing.push("B2_BUCKET_NAME");
                }
                match (key_id, application_key, bucket_name) {
                    (Some(key_id), Some(application_key), Some(bucket_name)) => {
                        BackendConfig::B2 {
                            api_url: cli.b2_api_url.trim_end_matches('/').to_string(),
                            key_id,
                            application_key,
                            bucket_name,
                        }
                    }
                    _ => anyhow::bail!(
                        "Backend B2 is not configured: missing {}",
                        missing.join(", ")
                    ),
                }
            }
        };

        if cli.album.trim().is_empty() {
            anyhow::bail!("Album name must not be empty");
        }

        Ok(Self {
            username: cli.username,
            cookie_directory: expand_tilde(&cli.cookie_directory),
            client_id: non_empty(cli.client_id),
            album: cli.album,
            backend,
            threads_num: cli.threads_num.max(1),
            domain: cli.domain,
            size: cli.size,
            set_exif_datetime: !cli.no_exif_datetime,
            dry_run: cli.dry_run,
            no_progress_bar: cli.no_progress_bar,
        })
    }
}
