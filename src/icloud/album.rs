//! Named collections and the CloudKit queries that enumerate them.

use base64::Engine;
use serde_json::{json, Value};

use super::records::{Record, DESIRED_KEYS};
use crate::remote::DEFAULT_COLLECTION;

// Apple's sentinel folder ids: containers, not real albums.
const ROOT_FOLDER: &str = "----Root-Folder----";
const PROJECT_ROOT_FOLDER: &str = "----Project-Root-Folder----";

const SMART_ALBUM_LIST: &str = "CPLAssetAndMasterInSmartAlbumByAssetDate";

/// How to query one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumQuery {
    pub name: String,
    list_type: &'static str,
    obj_type: String,
    filter: Option<Value>,
}

fn smart_album_filter(value: &str) -> Value {
    json!([{
        "fieldName": "smartAlbum",
        "comparator": "EQUALS",
        "fieldValue": {"type": "STRING", "value": value}
    }])
}

impl AlbumQuery {
    /// Every non-hidden, non-deleted item in the library.
    pub fn all_photos() -> Self {
        Self {
            name: DEFAULT_COLLECTION.to_string(),
            list_type: "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted",
            obj_type: "CPLAssetByAssetDateWithoutHiddenOrDeleted".to_string(),
            filter: None,
        }
    }

    fn smart(name: &str, obj_suffix: &str, smart_album: &str) -> Self {
        Self {
            name: name.to_string(),
            list_type: SMART_ALBUM_LIST,
            obj_type: format!("CPLAssetInSmartAlbumByAssetDate:{}", obj_suffix),
            filter: Some(smart_album_filter(smart_album)),
        }
    }

    /// Built-in collections every library has.
    pub fn smart_folders() -> Vec<Self> {
        vec![
            Self::all_photos(),
            Self::smart("Time-lapse", "Timelapse", "TIMELAPSE"),
            Self::smart("Videos", "Video", "VIDEO"),
            Self::smart("Slo-mo", "Slomo", "SLOMO"),
            Self {
                name: "Bursts".to_string(),
                list_type: "CPLBurstStackAssetAndMasterByAssetDate",
                obj_type: "CPLAssetBurstStackAssetByAssetDate".to_string(),
                filter: None,
            },
            Self::smart("Favorites", "Favorite", "FAVORITE"),
            Self::smart("Panoramas", "Panorama", "PANORAMA"),
            Self::smart("Screenshots", "Screenshot", "SCREENSHOT"),
            Self::smart("Live", "Live", "LIVE"),
            Self {
                name: "Hidden".to_string(),
                list_type: "CPLAssetAndMasterHiddenByAssetDate",
                obj_type: "CPLAssetHiddenByAssetDate".to_string(),
                filter: None,
            },
        ]
    }

    /// A user-created album from a `CPLAlbumByPositionLive` record, or `None`
    /// for folders and deleted albums.
    pub fn from_folder(record: &Record) -> Option<Self> {
        let id = record.record_name.as_str();
        if id.is_empty() || id == ROOT_FOLDER || id == PROJECT_ROOT_FOLDER {
            return None;
        }
        if record.fields["isDeleted"]["value"].as_bool().unwrap_or(false) {
            return None;
        }
        let name = record.fields["albumNameEnc"]["value"]
            .as_str()
            .and_then(|enc| base64::engine::general_purpose::STANDARD.decode(enc).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| id.to_string());
        Some(Self {
            name,
            list_type: "CPLContainerRelationLiveByAssetDate",
            obj_type: format!("CPLContainerRelationNotDeletedByAssetDate:{}", id),
            filter: Some(json!([{
                "fieldName": "parentId",
                "comparator": "EQUALS",
                "fieldValue": {"type": "STRING", "value": id},
            }])),
        })
    }

    /// Body for one page of `records/query`, starting at rank `offset`.
    /// Each item is a master + asset pair, so the limit is twice the page.
    pub fn list_query(&self, offset: u64, page_size: usize, zone_id: &Value) -> Value {
        let mut filter_by = vec![
            json!({
                "fieldName": "startRank",
                "fieldValue": {"type": "INT64", "value": offset},
                "comparator": "EQUALS",
            }),
            json!({
                "fieldName": "direction",
                "fieldValue": {"type": "STRING", "value": "ASCENDING"},
                "comparator": "EQUALS",
            }),
        ];
        if let Some(extra) = self.filter.as_ref().and_then(Value::as_array) {
            filter_by.extend(extra.iter().cloned());
        }
        json!({
            "query": {
                "filterBy": filter_by,
                "recordType": self.list_type,
            },
            "resultsLimit": page_size * 2,
            "desiredKeys": DESIRED_KEYS,
            "zoneID": zone_id,
        })
    }

    /// Body for the `HyperionIndexCountLookup` batch query.
    pub fn count_query(&self, zone_id: &Value) -> Value {
        json!({
            "batch": [{
                "resultsLimit": 1,
                "query": {
                    "filterBy": {
                        "fieldName": "indexCountID",
                        "fieldValue": {"type": "STRING_LIST", "value": [&self.obj_type]},
                        "comparator": "IN",
                    },
                    "recordType": "HyperionIndexCountLookup",
                },
                "zoneWide": true,
                "zoneID": zone_id,
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Value {
        json!({"zoneName": "PrimarySync"})
    }

    #[test]
    fn test_all_photos_is_default_collection() {
        let all = AlbumQuery::all_photos();
        assert_eq!(all.name, "All Photos");
        let body = all.list_query(0, 100, &zone());
        assert_eq!(
            body["query"]["recordType"],
            "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted"
        );
        assert_eq!(body["resultsLimit"], 200);
        assert_eq!(body["query"]["filterBy"].as_array().unwrap().len(), 2);
        assert_eq!(body["zoneID"]["zoneName"], "PrimarySync");
    }

    #[test]
    fn test_list_query_carries_offset_and_smart_filter() {
        let favorites = AlbumQuery::smart_folders()
            .into_iter()
            .find(|a| a.name == "Favorites")
            .unwrap();
        let body = favorites.list_query(300, 100, &zone());
        let filters = body["query"]["filterBy"].as_array().unwrap();
        assert_eq!(filters[0]["fieldValue"]["value"], 300);
        assert_eq!(filters[2]["fieldValue"]["value"], "FAVORITE");
    }

    #[test]
    fn test_count_query_uses_obj_type() {
        let body = AlbumQuery::all_photos().count_query(&zone());
        assert_eq!(
            body["batch"][0]["query"]["filterBy"]["fieldValue"]["value"][0],
            "CPLAssetByAssetDateWithoutHiddenOrDeleted"
        );
    }

    #[test]
    fn test_user_album_from_folder() {
        let name = base64::engine::general_purpose::STANDARD.encode("Holidays");
        let record: Record = serde_json::from_value(json!({
            "recordName": "F00D-1",
            "recordType": "CPLAlbum",
            "fields": {"albumNameEnc": {"value": name}}
        }))
        .unwrap();
        let album = AlbumQuery::from_folder(&record).unwrap();
        assert_eq!(album.name, "Holidays");
        let body = album.list_query(0, 100, &zone());
        assert_eq!(body["query"]["filterBy"][2]["fieldValue"]["value"], "F00D-1");
    }

    #[test]
    fn test_sentinel_and_deleted_folders_skipped() {
        let root: Record =
            serde_json::from_value(json!({"recordName": "----Root-Folder----"})).unwrap();
        assert!(AlbumQuery::from_folder(&root).is_none());
        let deleted: Record = serde_json::from_value(json!({
            "recordName": "ABC",
            "fields": {"isDeleted": {"value": true}}
        }))
        .unwrap();
        assert!(AlbumQuery::from_folder(&deleted).is_none());
    }
}
