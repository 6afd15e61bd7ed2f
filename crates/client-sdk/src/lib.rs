use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use common::{
    BucketSummary, HealthStatus, InfrastructureSnapshot, ObjectRecord, ReplicationStatus,
    UploadReceipt,
};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

/// HTTP client for a zonewatch server node.
#[derive(Clone)]
pub struct ZonewatchClient {
    http: Client,
    server_base_url: String,
}

impl ZonewatchClient {
    pub fn new(server_base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_base_url: server_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_base_url(&self) -> &str {
        &self.server_base_url
    }

    pub async fn upload(&self, filename: &str, data: Bytes) -> Result<UploadReceipt> {
        let url = self.object_url([filename])?;

        self.http
            .put(url)
            .body(data)
            .send()
            .await
            .with_context(|| format!("failed to upload file={filename}"))?
            .error_for_status()
            .with_context(|| format!("server rejected upload for file={filename}"))?
            .json::<UploadReceipt>()
            .await
            .with_context(|| format!("failed to decode upload receipt for file={filename}"))
    }

    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let url = self.object_url(key.split('/'))?;

        self.http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to GET object key={key}"))?
            .error_for_status()
            .with_context(|| format!("object not found or inaccessible key={key}"))?
            .bytes()
            .await
            .with_context(|| format!("failed to read payload for key={key}"))
    }

    pub async fn list_objects(&self) -> Result<Vec<ObjectRecord>> {
        self.get_json("/api/filelist").await
    }

    pub async fn summary(&self) -> Result<BucketSummary> {
        self.get_json("/api/summary").await
    }

    pub async fn replication_statuses(&self) -> Result<BTreeMap<String, ReplicationStatus>> {
        self.get_json("/api/replication").await
    }

    pub async fn infrastructure(&self) -> Result<InfrastructureSnapshot> {
        self.get_json("/api/infrastructure").await
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.get_json("/healthz").await
    }

    /// `/api/objects/...` with every segment percent-encoded, so names containing `#`, `?`,
    /// `%` or spaces reach the server intact.
    fn object_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/api/objects", self.server_base_url))
            .with_context(|| format!("invalid server url {}", self.server_base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("server url {} cannot carry a path", self.server_base_url))?
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.server_base_url, path);

        self.http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to contact server for {path}"))?
            .error_for_status()
            .with_context(|| format!("server returned error status for {path}"))?
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode response for {path}"))
    }
}
