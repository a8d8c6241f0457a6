//! CloudKit record shapes and their translation into [`RemoteItem`]s.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::remote::{MediaKind, MediaVersion, RemoteItem};
use crate::types::SizeClass;

/// Fields requested on every listing query.
pub(crate) const DESIRED_KEYS: &[&str] = &[
    "recordName",
    "recordType",
    "masterRef",
    "itemType",
    "filenameEnc",
    "assetDate",
    "addedDate",
    "timeZoneOffset",
    "isDeleted",
    "isHidden",
    "resOriginalRes",
    "resOriginalFileType",
    "resJPEGMedRes",
    "resJPEGMedFileType",
    "resJPEGThumbRes",
    "resJPEGThumbFileType",
    "resVidMedRes",
    "resVidMedFileType",
    "resVidSmallRes",
    "resVidSmallFileType",
];

/// CloudKit field prefixes per size class. `<prefix>Res` holds the resource.
const PHOTO_VERSIONS: &[(SizeClass, &str)] = &[
    (SizeClass::Original, "resOriginal"),
    (SizeClass::Medium, "resJPEGMed"),
    (SizeClass::Thumb, "resJPEGThumb"),
];

const VIDEO_VERSIONS: &[(SizeClass, &str)] = &[
    (SizeClass::Original, "resOriginal"),
    (SizeClass::Medium, "resVidMed"),
    (SizeClass::Thumb, "resVidSmall"),
];

/// Uppercase file extension per uniform type identifier.
const UTI_EXTENSIONS: &[(&str, &str)] = &[
    ("public.heic", "HEIC"),
    ("public.heif", "HEIF"),
    ("public.jpeg", "JPG"),
    ("public.png", "PNG"),
    ("com.compuserve.gif", "GIF"),
    ("public.tiff", "TIFF"),
    ("com.adobe.raw-image", "DNG"),
    ("com.canon.cr2-raw-image", "CR2"),
    ("com.canon.crw-raw-image", "CRW"),
    ("com.canon.cr3-raw-image", "CR3"),
    ("com.sony.arw-raw-image", "ARW"),
    ("com.fuji.raw-image", "RAF"),
    ("com.panasonic.rw2-raw-image", "RW2"),
    ("com.nikon.nrw-raw-image", "NRW"),
    ("com.nikon.raw-image", "NEF"),
    ("com.pentax.raw-image", "PEF"),
    ("com.olympus.raw-image", "ORF"),
    ("com.olympus.or-raw-image", "ORF"),
    ("com.apple.quicktime-movie", "MOV"),
    ("public.mpeg-4", "MP4"),
];

/// Response from `/records/query`.
#[derive(Debug, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Response from `/internal/records/query/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchQueryResponse {
    #[serde(default)]
    pub batch: Vec<QueryResponse>,
}

/// A CloudKit record. Fields stay dynamic JSON; Apple's schema varies by
/// record type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub record_name: String,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub fields: Value,
}

impl Record {
    fn field(&self, name: &str) -> &Value {
        &self.fields[name]["value"]
    }

    /// For `CPLAsset` records: the `CPLMaster` this asset renders.
    pub fn master_ref(&self) -> Option<&str> {
        self.fields["masterRef"]["value"]["recordName"].as_str()
    }
}

/// Map a uniform type identifier from `itemType` to a media kind.
pub(crate) fn kind_from_uti(uti: &str) -> Option<MediaKind> {
    match uti {
        "public.heic"
        | "public.heif"
        | "public.jpeg"
        | "public.png"
        | "com.compuserve.gif"
        | "public.tiff"
        | "com.adobe.raw-image"
        | "com.canon.cr2-raw-image"
        | "com.canon.crw-raw-image"
        | "com.canon.cr3-raw-image"
        | "com.sony.arw-raw-image"
        | "com.fuji.raw-image"
        | "com.panasonic.rw2-raw-image"
        | "com.nikon.nrw-raw-image"
        | "com.nikon.raw-image"
        | "com.pentax.raw-image"
        | "com.olympus.raw-image"
        | "com.olympus.or-raw-image" => Some(MediaKind::Image),
        "com.apple.quicktime-movie" | "public.mpeg-4" => Some(MediaKind::Video),
        _ => None,
    }
}

fn extension_for_uti(uti: &str) -> Option<&'static str> {
    UTI_EXTENSIONS
        .iter()
        .find(|(key, _)| *key == uti)
        .map(|(_, ext)| *ext)
}

/// The original's format: `resOriginalFileType`, else the item's `itemType`.
fn original_extension(master: &Record) -> Option<String> {
    [master.field("resOriginalFileType"), master.field("itemType")]
        .into_iter()
        .filter_map(Value::as_str)
        .find_map(extension_for_uti)
        .map(str::to_string)
}

fn kind_from_extension(filename: &str) -> Option<MediaKind> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "heic" | "heif" | "jpg" | "jpeg" | "png" | "gif" | "tiff" | "dng" => {
            Some(MediaKind::Image)
        }
        "mov" | "mp4" | "m4v" => Some(MediaKind::Video),
        _ => None,
    }
}

/// Decode `filenameEnc`, which is either a plain string or base64 bytes.
fn decode_filename(master: &Record) -> Option<String> {
    let enc = &master.fields["filenameEnc"];
    let value = enc["value"].as_str()?;
    match enc["type"].as_str().unwrap_or("STRING") {
        "STRING" => Some(value.to_string()),
        "ENCRYPTED_BYTES" => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(value)
                .ok()?;
            String::from_utf8(decoded).ok()
        }
        other => {
            tracing::warn!("Unsupported filenameEnc type: {}", other);
            None
        }
    }
}

/// `assetDate` is milliseconds since the epoch; `timeZoneOffset` (seconds)
/// records the zone the item was captured in, when known.
fn capture_time(asset: &Record) -> Option<DateTime<FixedOffset>> {
    let ms = asset.field("assetDate").as_f64()?;
    let utc = Utc.timestamp_millis_opt(ms as i64).single()?;
    let offset = asset
        .field("timeZoneOffset")
        .as_i64()
        .and_then(|secs| i32::try_from(secs).ok())
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    Some(utc.with_timezone(&offset))
}

fn versions(
    master: &Record,
    asset: &Record,
    kind: &MediaKind,
) -> HashMap<SizeClass, MediaVersion> {
    let lookup = if *kind == MediaKind::Video {
        VIDEO_VERSIONS
    } else {
        PHOTO_VERSIONS
    };
    let mut versions = HashMap::new();
    for (size, prefix) in lookup {
        let res_field = format!("{prefix}Res");
        // Adjusted renditions live on the asset record, originals on the master.
        let res = [asset, master]
            .into_iter()
            .map(|r| r.field(&res_field))
            .find(|v| !v.is_null());
        let Some(res) = res else { continue };
        let Some(url) = res["downloadURL"].as_str() else {
            tracing::warn!("{} of {} has no downloadURL", res_field, master.record_name);
            continue;
        };
        versions.insert(
            *size,
            MediaVersion {
                url: url.to_string(),
                checksum: res["fileChecksum"].as_str().unwrap_or_default().to_string(),
                size: res["size"].as_u64().unwrap_or(0),
            },
        );
    }
    versions
}

/// Build a [`RemoteItem`] from a `CPLMaster` and its `CPLAsset`.
pub fn to_remote_item(master: &Record, asset: &Record) -> RemoteItem {
    let filename = decode_filename(master);
    let kind = match master.field("itemType").as_str() {
        Some(uti) => kind_from_uti(uti)
            .or_else(|| filename.as_deref().and_then(kind_from_extension))
            .unwrap_or_else(|| MediaKind::Other(uti.to_string())),
        None => filename
            .as_deref()
            .and_then(kind_from_extension)
            .unwrap_or_else(|| MediaKind::Other("unknown".to_string())),
    };
    let versions = versions(master, asset, &kind);
    RemoteItem {
        id: master.record_name.clone(),
        filename,
        captured: capture_time(asset),
        extension: original_extension(master),
        versions,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn master(fields: Value) -> Record {
        record(json!({"recordName": "MASTER1", "recordType": "CPLMaster", "fields": fields}))
    }

    fn asset(fields: Value) -> Record {
        record(json!({"recordName": "ASSET1", "recordType": "CPLAsset", "fields": fields}))
    }

    #[test]
    fn test_plain_and_encoded_filenames() {
        let plain = master(json!({"filenameEnc": {"value": "IMG_0001.JPG", "type": "STRING"}}));
        assert_eq!(decode_filename(&plain).as_deref(), Some("IMG_0001.JPG"));

        let encoded = base64::engine::general_purpose::STANDARD.encode(b"IMG_0002.HEIC");
        let enc = master(json!({"filenameEnc": {"value": encoded, "type": "ENCRYPTED_BYTES"}}));
        assert_eq!(decode_filename(&enc).as_deref(), Some("IMG_0002.HEIC"));

        assert_eq!(decode_filename(&master(json!({}))), None);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(kind_from_uti("public.jpeg"), Some(MediaKind::Image));
        assert_eq!(kind_from_uti("com.apple.quicktime-movie"), Some(MediaKind::Video));
        assert_eq!(kind_from_uti("public.mp3"), None);
    }

    #[test]
    fn test_unknown_uti_kept_as_other() {
        let item = to_remote_item(
            &master(json!({
                "itemType": {"value": "public.mp3"},
                "filenameEnc": {"value": "memo.m4a", "type": "STRING"}
            })),
            &asset(json!({})),
        );
        assert_eq!(item.kind, MediaKind::Other("public.mp3".into()));
    }

    #[test]
    fn test_unknown_uti_falls_back_to_extension() {
        let item = to_remote_item(
            &master(json!({
                "itemType": {"value": "com.example.new-image"},
                "filenameEnc": {"value": "photo.heic", "type": "STRING"}
            })),
            &asset(json!({})),
        );
        assert_eq!(item.kind, MediaKind::Image);
    }

    #[test]
    fn test_unnamed_heic_carries_format_hint() {
        let item = to_remote_item(
            &master(json!({
                "itemType": {"value": "public.heic"},
                "resOriginalFileType": {"value": "public.heic"}
            })),
            &asset(json!({})),
        );
        assert_eq!(item.filename, None);
        assert_eq!(item.kind, MediaKind::Image);
        assert_eq!(item.extension.as_deref(), Some("HEIC"));
    }

    #[test]
    fn test_format_hint_falls_back_to_item_type() {
        let item = to_remote_item(
            &master(json!({
                "itemType": {"value": "public.png"},
                "resOriginalFileType": {"value": "com.example.unknown"}
            })),
            &asset(json!({})),
        );
        assert_eq!(item.extension.as_deref(), Some("PNG"));
        assert_eq!(original_extension(&master(json!({}))), None);
    }

    #[test]
    fn test_capture_time_uses_zone_offset() {
        // 2023-05-04T17:00:00Z
        let a = asset(json!({
            "assetDate": {"value": 1683219600000.0_f64},
            "timeZoneOffset": {"value": -25200}
        }));
        let captured = capture_time(&a).unwrap();
        assert_eq!(captured.to_rfc3339(), "2023-05-04T10:00:00-07:00");
    }

    #[test]
    fn test_capture_time_defaults_to_utc() {
        let a = asset(json!({"assetDate": {"value": 1683219600000_i64}}));
        assert_eq!(capture_time(&a).unwrap().to_rfc3339(), "2023-05-04T17:00:00+00:00");
        assert!(capture_time(&asset(json!({}))).is_none());
    }

    #[test]
    fn test_photo_versions_from_master_and_asset() {
        let item = to_remote_item(
            &master(json!({
                "itemType": {"value": "public.jpeg"},
                "filenameEnc": {"value": "IMG_0001.JPG", "type": "STRING"},
                "resOriginalRes": {"value": {
                    "size": 2048,
                    "downloadURL": "https://cvws.icloud-content.com/orig",
                    "fileChecksum": "AbCd"
                }}
            })),
            &asset(json!({
                "resJPEGMedRes": {"value": {
                    "size": 512,
                    "downloadURL": "https://cvws.icloud-content.com/med",
                    "fileChecksum": "EfGh"
                }}
            })),
        );
        assert_eq!(item.id, "MASTER1");
        assert_eq!(item.versions[&SizeClass::Original].size, 2048);
        assert_eq!(
            item.versions[&SizeClass::Medium].url,
            "https://cvws.icloud-content.com/med"
        );
        assert!(!item.versions.contains_key(&SizeClass::Thumb));
    }

    #[test]
    fn test_video_versions_use_video_fields() {
        let item = to_remote_item(
            &master(json!({
                "itemType": {"value": "com.apple.quicktime-movie"},
                "resVidSmallRes": {"value": {"size": 10, "downloadURL": "https://x/small"}},
                "resJPEGThumbRes": {"value": {"size": 5, "downloadURL": "https://x/thumb"}}
            })),
            &asset(json!({})),
        );
        assert_eq!(item.kind, MediaKind::Video);
        assert_eq!(item.versions[&SizeClass::Thumb].url, "https://x/small");
    }

    #[test]
    fn test_master_ref() {
        let a = asset(json!({"masterRef": {"value": {"recordName": "MASTER1"}}}));
        assert_eq!(a.master_ref(), Some("MASTER1"));
    }
}
