use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use bytes::Bytes;
use common::UNKNOWN_ZONE;
use object_store::{ObjectStore, PutOptions, StoreResult};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Upload origin of each object key. Only known zones are held; an unknown origin is absence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProvenanceMap {
    origins: BTreeMap<String, String>,
}

impl ProvenanceMap {
    /// Decodes the persisted blob, dropping the legacy `"Unknown"` sentinel, blanks and nulls.
    pub(crate) fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        let raw: BTreeMap<String, Option<String>> = serde_json::from_slice(payload)?;

        let origins = raw
            .into_iter()
            .filter_map(|(key, zone)| known_zone(zone.as_deref()).map(|zone| (key, zone.to_string())))
            .collect();

        Ok(Self { origins })
    }

    pub(crate) fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.origins)
    }

    pub(crate) fn zone_for(&self, key: &str) -> Option<&str> {
        self.origins.get(key).map(String::as_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.origins.len()
    }

    /// Sets the origin of `key` when `zone` is known. Returns whether anything was written.
    pub(crate) fn record_upload(&mut self, key: &str, zone: Option<&str>) -> bool {
        match known_zone(zone) {
            Some(zone) => {
                self.origins.insert(key.to_string(), zone.to_string());
                true
            }
            None => false,
        }
    }

    /// Adopts every remote origin this map does not know yet. First known value wins.
    pub(crate) fn merge_from(&mut self, remote: ProvenanceMap) -> usize {
        let mut adopted = 0;
        for (key, zone) in remote.origins {
            if let Entry::Vacant(slot) = self.origins.entry(key) {
                slot.insert(zone);
                adopted += 1;
            }
        }
        adopted
    }
}

fn known_zone(zone: Option<&str>) -> Option<&str> {
    zone.map(str::trim)
        .filter(|zone| !zone.is_empty() && *zone != UNKNOWN_ZONE)
}

/// In-memory provenance backed by one JSON blob in the bucket.
///
/// Every process merges the blob into its working copy before writing it back, so entries from
/// concurrent writers survive unless two saves race, in which case the later write wins.
pub(crate) struct ProvenanceStore {
    store: Arc<dyn ObjectStore>,
    blob_key: String,
    origins: RwLock<ProvenanceMap>,
}

impl ProvenanceStore {
    pub(crate) fn new(store: Arc<dyn ObjectStore>, blob_key: impl Into<String>) -> Self {
        Self {
            store,
            blob_key: blob_key.into(),
            origins: RwLock::new(ProvenanceMap::default()),
        }
    }

    pub(crate) fn blob_key(&self) -> &str {
        &self.blob_key
    }

    /// Merges the persisted blob into memory and returns how many origins were adopted.
    ///
    /// An absent, unreadable or corrupt blob contributes nothing.
    pub(crate) async fn load(&self) -> usize {
        let remote = match self.fetch_remote().await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(blob = %self.blob_key, error = %err, "failed to load upload origins");
                ProvenanceMap::default()
            }
        };

        let adopted = self.origins.write().await.merge_from(remote);
        if adopted > 0 {
            debug!(blob = %self.blob_key, adopted, "merged persisted upload origins");
        }
        adopted
    }

    /// Refreshes from the blob, then overwrites it with the full working copy.
    ///
    /// Returns false when nothing was written. The working copy is kept either way.
    pub(crate) async fn save(&self) -> bool {
        match self.fetch_remote().await {
            Ok(remote) => {
                self.origins.write().await.merge_from(remote);
            }
            Err(err) => {
                warn!(
                    blob = %self.blob_key,
                    error = %err,
                    "could not refresh upload origins, skipping save"
                );
                return false;
            }
        }

        let payload = match self.origins.read().await.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(blob = %self.blob_key, error = %err, "failed to encode upload origins");
                return false;
            }
        };

        match self
            .store
            .put_object(&self.blob_key, Bytes::from(payload), PutOptions::json())
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(blob = %self.blob_key, error = %err, "failed to save upload origins");
                false
            }
        }
    }

    pub(crate) async fn record_upload(&self, key: &str, zone: Option<&str>) -> bool {
        self.origins.write().await.record_upload(key, zone)
    }

    #[cfg(test)]
    pub(crate) async fn zone_for(&self, key: &str) -> Option<String> {
        self.origins.read().await.zone_for(key).map(ToString::to_string)
    }

    pub(crate) async fn snapshot(&self) -> ProvenanceMap {
        self.origins.read().await.clone()
    }

    /// The persisted map, or empty when the blob does not exist. A corrupt blob is logged and
    /// read as empty so the next save replaces it.
    async fn fetch_remote(&self) -> StoreResult<ProvenanceMap> {
        let payload = match self.store.get_object(&self.blob_key).await {
            Ok(payload) => payload,
            Err(err) if err.is_not_found() => return Ok(ProvenanceMap::default()),
            Err(err) => return Err(err),
        };

        match ProvenanceMap::from_json(&payload) {
            Ok(remote) => Ok(remote),
            Err(err) => {
                warn!(blob = %self.blob_key, error = %err, "upload origins blob is not valid json");
                Ok(ProvenanceMap::default())
            }
        }
    }
}
