//! Aligns a fetched file's embedded and filesystem timestamps with the
//! capture time the library reports.

use std::fs::FileTimes;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};

use super::exif;
use crate::remote::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Nothing to normalize: the scratch file is missing or empty.
    NoFile,
    Normalized {
        exif_written: bool,
    },
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
}

/// Set modification and access time. Instants before 1970 clamp to the epoch.
pub(crate) fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64);
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)
}

/// Normalize the file at `path` in place. Blocking; run it off the runtime.
pub fn normalize(
    path: &Path,
    kind: &MediaKind,
    captured: &DateTime<FixedOffset>,
    set_exif_datetime: bool,
) -> Result<NormalizeOutcome> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        _ => return Ok(NormalizeOutcome::NoFile),
    }

    let mut exif_written = false;
    if set_exif_datetime && *kind == MediaKind::Image && is_jpeg(path) {
        match exif::get_datetime_original(path)? {
            Some(existing) => {
                tracing::debug!(
                    "{} already has DateTimeOriginal {}",
                    path.display(),
                    existing
                );
            }
            None => {
                let value = captured.format("%Y:%m:%d %H:%M:%S").to_string();
                exif::set_datetime_original(path, &value)?;
                tracing::debug!(
                    "Set DateTimeOriginal on {} to {}",
                    path.display(),
                    captured.format("%Y-%m-%d %H:%M:%S%z")
                );
                exif_written = true;
            }
        }
    }

    set_file_mtime(path, captured.timestamp())
        .with_context(|| format!("Setting file times on {}", path.display()))?;
    Ok(NormalizeOutcome::Normalized { exif_written })
}
