use clap::Parser;

use crate::remote::DEFAULT_COLLECTION;
use crate::types::*;

/// Every option can come from the environment (or a `.env` file), so the
/// binary runs with no arguments once configured.
#[derive(Parser, Debug)]
#[command(
    name = "photos-backup",
    version,
    about = "Mirror new iCloud photos and videos into a backup store"
)]
pub struct Cli {
    /// Apple ID email address
    #[arg(short = 'u', long, env = "ICLOUD_PHOTOS_USERNAME")]
    pub username: String,

    /// iCloud domain (com or cn)
    #[arg(long, value_enum, env = "ICLOUD_DOMAIN", default_value = "com")]
    pub domain: Domain,

    /// Directory holding the persisted iCloud session (cookies and tokens)
    #[arg(long, env = "ICLOUD_COOKIE_DIRECTORY", default_value = "~/.photos-backup")]
    pub cookie_directory: String,

    /// Client id to present to iCloud when the session has none stored
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Destination backend
    #[arg(long, value_enum, ignore_case = true, env = "BACKUP_BACKEND")]
    pub backend: BackendKind,

    /// Root directory for the local backend
    #[arg(long, env = "BACKUP_LOCAL_ROOT", default_value = ".")]
    pub local_root: String,

    /// Backblaze B2 native API base URL. Not the S3-compatible
    /// `s3.<region>.backblazeb2.com` endpoint; the bucket's region is
    /// discovered at authorization.
    #[arg(long, env = "B2_API_URL", default_value = "https://api.backblazeb2.com")]
    pub b2_api_url: String,

    /// Backblaze B2 application key id
    #[arg(long, env = "B2_KEY_ID")]
    pub b2_key_id: Option<String>,

    /// Backblaze B2 application key.
    /// Prefer the B2_APPLICATION_KEY environment variable over the flag.
    #[arg(long, env = "B2_APPLICATION_KEY", hide_env_values = true)]
    pub b2_application_key: Option<String>,

    /// Backblaze B2 bucket name
    #[arg(long, env = "B2_BUCKET_NAME")]
    pub b2_bucket_name: Option<String>,

    /// Collection to mirror
    #[arg(short = 'a', long, env = "SYNC_ALBUM", default_value = DEFAULT_COLLECTION)]
    pub album: String,

    /// Rendition to download
    #[arg(long, value_enum, env = "SYNC_SIZE", default_value = "original")]
    pub size: SizeClass,

    /// Number of concurrent fetch/commit workers
    #[arg(long, env = "SYNC_THREADS", default_value_t = 10)]
    pub threads_num: u16,

    /// Do not write a DateTimeOriginal EXIF tag into JPEGs that lack one
    #[arg(long, env = "SYNC_NO_EXIF_DATETIME")]
    pub no_exif_datetime: bool,

    /// List what would be synced without fetching or writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[cfg(test)]
pub(crate) fn parse_for_test(args: &[&str]) -> Cli {
    let mut argv = vec!["photos-backup", "--username", "u@example.com"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}
