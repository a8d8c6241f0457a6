use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use super::album::AlbumQuery;
use super::error::ICloudError;
use super::records::{self, BatchQueryResponse, QueryResponse, Record};
use super::session::WebSession;
use crate::remote::RemoteItem;

/// Items per page; CloudKit returns two records (master + asset) per item.
const PAGE_SIZE: usize = 100;

/// Query-string parameters sent with every CloudKit call.
pub(crate) fn encode_params(params: &[(&str, String)]) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// The primary photo library of an authenticated account.
pub struct PhotoLibrary {
    http: Arc<WebSession>,
    service_endpoint: String,
    query_string: String,
    zone_id: Value,
}

impl PhotoLibrary {
    /// Open the private `PrimarySync` zone under `service_root` and check
    /// that Apple has finished indexing it.
    pub async fn open(
        http: Arc<WebSession>,
        service_root: &str,
        client_id: &str,
        dsid: &str,
    ) -> Result<Self, ICloudError> {
        let params = [
            ("clientBuildNumber", "2522Project44".to_string()),
            ("clientMasteringNumber", "2522B2".to_string()),
            ("clientId", client_id.to_string()),
            ("dsid", dsid.to_string()),
            ("remapEnums", "true".to_string()),
            ("getCurrentSyncToken", "true".to_string()),
        ];
        let library = Self {
            http,
            service_endpoint: format!(
                "{}/database/1/com.apple.photos.cloud/production/private",
                service_root.trim_end_matches('/')
            ),
            query_string: encode_params(&params),
            zone_id: json!({"zoneName": "PrimarySync"}),
        };

        let state = library
            .query(&json!({
                "query": {"recordType": "CheckIndexingState"},
                "zoneID": &library.zone_id,
            }))
            .await?;
        let indexing = state
            .records
            .first()
            .and_then(|r| r.fields["state"]["value"].as_str())
            .unwrap_or("");
        if indexing != "FINISHED" {
            return Err(ICloudError::IndexingNotFinished);
        }
        Ok(library)
    }

    async fn query(&self, body: &Value) -> Result<QueryResponse, ICloudError> {
        let url = format!("{}/records/query?{}", self.service_endpoint, self.query_string);
        let response = self.http.post_json(&url, body).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Smart folders plus the account's own albums.
    pub async fn albums(&self) -> Result<Vec<AlbumQuery>, ICloudError> {
        let mut albums = AlbumQuery::smart_folders();
        let folders = self
            .query(&json!({
                "query": {"recordType": "CPLAlbumByPositionLive"},
                "zoneID": &self.zone_id,
            }))
            .await?;
        albums.extend(folders.records.iter().filter_map(AlbumQuery::from_folder));
        Ok(albums)
    }

    /// Number of items Apple reports for `album`.
    pub async fn count(&self, album: &AlbumQuery) -> Result<u64, ICloudError> {
        let url = format!(
            "{}/internal/records/query/batch?{}",
            self.service_endpoint, self.query_string
        );
        let response = self
            .http
            .post_json(&url, &album.count_query(&self.zone_id))
            .await?;
        let batch: BatchQueryResponse = serde_json::from_value(response)?;
        Ok(batch
            .batch
            .first()
            .and_then(|q| q.records.first())
            .and_then(|r| r.fields["itemCount"]["value"].as_u64())
            .unwrap_or(0))
    }

    /// Page through `album` until a page yields no masters.
    pub async fn items(&self, album: &AlbumQuery) -> Result<Vec<RemoteItem>, ICloudError> {
        let mut items = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let page = self
                .query(&album.list_query(offset, PAGE_SIZE, &self.zone_id))
                .await?;
            let (masters, mut assets) = split_page(page.records);
            debug!(
                "Album '{}': {} masters at offset {}",
                album.name,
                masters.len(),
                offset
            );
            if masters.is_empty() {
                break;
            }
            for master in &masters {
                if let Some(asset) = assets.remove(&master.record_name) {
                    items.push(records::to_remote_item(master, &asset));
                } else {
                    debug!("Master {} has no asset record; skipping", master.record_name);
                }
                offset += 1;
            }
        }
        Ok(items)
    }
}

/// Separate a page into `CPLMaster` records and `CPLAsset` records keyed by
/// the master they reference.
fn split_page(records: Vec<Record>) -> (Vec<Record>, HashMap<String, Record>) {
    let mut masters = Vec::new();
    let mut assets = HashMap::new();
    for record in records {
        match record.record_type.as_str() {
            "CPLMaster" => masters.push(record),
            "CPLAsset" => {
                if let Some(master_id) = record.master_ref().map(str::to_string) {
                    assets.insert(master_id, record);
                }
            }
            _ => {}
        }
    }
    (masters, assets)
}
