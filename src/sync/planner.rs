//! Maps a remote item to the destination path it is mirrored under.

use std::time::UNIX_EPOCH;

use chrono::{DateTime, Datelike, FixedOffset, Local, Offset, TimeDelta, TimeZone, Utc};

use crate::remote::{MediaKind, RemoteItem};

/// Longest id prefix used when an item has no usable filename.
const FALLBACK_ID_LEN: usize = 12;

/// One item the engine should mirror.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub item: RemoteItem,
    /// Capture time in the zone the destination folders are dated in.
    pub captured: DateTime<FixedOffset>,
    /// Sanitized leaf name; also the scratch file name.
    pub filename: String,
    /// `YYYY/MM/DD/<filename>`.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedKind(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UnsupportedKind(kind) => write!(f, "unsupported media kind '{}'", kind),
        }
    }
}

#[derive(Debug)]
pub enum Planned {
    Task(SyncTask),
    Skip(SkipReason),
}

/// Plan `item` against the system's local time zone.
pub fn plan(item: RemoteItem) -> Planned {
    plan_in(item, &Local)
}

/// Plan `item`, dating its folder in `tz`.
pub fn plan_in<Tz: TimeZone>(item: RemoteItem, tz: &Tz) -> Planned {
    if !item.kind.is_syncable() {
        tracing::info!("Skipping {}: unsupported media kind '{}'", item, item.kind);
        return Planned::Skip(SkipReason::UnsupportedKind(item.kind.to_string()));
    }

    let captured = resolve_capture_time(&item, tz);
    let filename = match item.filename.as_deref().map(sanitize_filename) {
        Some(name) if is_usable(&name) => name,
        _ => fallback_filename(&item.id, &item.kind, item.extension.as_deref()),
    };
    let path = format!(
        "{:04}/{:02}/{:02}/{}",
        captured.year(),
        captured.month(),
        captured.day(),
        filename
    );
    Planned::Task(SyncTask {
        item,
        captured,
        filename,
        path,
    })
}

fn epoch() -> DateTime<FixedOffset> {
    DateTime::<Utc>::from(UNIX_EPOCH).with_timezone(&Utc.fix())
}

/// Instants this close to the ends of chrono's range cannot be shifted into
/// an arbitrary zone.
fn near_range_limit(instant: &DateTime<FixedOffset>) -> bool {
    let utc = instant.with_timezone(&Utc);
    let margin = TimeDelta::days(1);
    utc.signed_duration_since(DateTime::<Utc>::MIN_UTC) < margin
        || DateTime::<Utc>::MAX_UTC.signed_duration_since(utc) < margin
}

fn resolve_capture_time<Tz: TimeZone>(item: &RemoteItem, tz: &Tz) -> DateTime<FixedOffset> {
    let Some(raw) = item.captured else {
        tracing::warn!("{} has no capture time; dating it at the Unix epoch", item);
        return epoch();
    };
    if near_range_limit(&raw) {
        tracing::error!(
            "Could not convert capture time {} of {} to the local zone; using it as reported",
            raw,
            item
        );
        return raw;
    }
    raw.with_timezone(tz).fixed_offset()
}

/// Drop characters that common filesystems and object stores reject.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect()
}

fn is_usable(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".."
}

/// `<id prefix>.<ext>` for items without a usable name. The extension is the
/// provider's format hint, else `JPG` / `MOV` by kind.
fn fallback_filename(id: &str, kind: &MediaKind, extension: Option<&str>) -> String {
    let mut stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(FALLBACK_ID_LEN)
        .collect();
    if stem.is_empty() {
        stem.push_str("unnamed");
    }
    let hint =
        extension.filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
    let ext = match (hint, kind) {
        (Some(ext), _) => ext,
        (None, MediaKind::Video) => "MOV",
        (None, _) => "JPG",
    };
    format!("{}.{}", stem, ext)
}
