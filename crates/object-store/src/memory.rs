use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{ObjectStore, PutOptions, PutOutcome, StoreError, StoreResult, StoredObject};

/// Process-local bucket used for development runs and tests.
///
/// Clones share the same objects. `set_offline(true)` makes every call fail with a backend
/// error, which is how tests exercise outage handling.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    bucket: String,
    served_by: Option<String>,
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            served_by: None,
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reports `zone` as the serving zone on every put.
    pub fn with_served_by(mut self, zone: impl Into<String>) -> Self {
        self.served_by = Some(zone.into());
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    fn ensure_online(&self, operation: &'static str) -> StoreResult<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::backend(operation, "store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_objects(&self) -> StoreResult<Vec<StoredObject>> {
        self.ensure_online("list_objects")?;

        Ok(self
            .objects
            .read()
            .await
            .iter()
            .map(|(key, payload)| StoredObject {
                key: key.clone(),
                size_bytes: payload.len() as u64,
            })
            .collect())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.ensure_online("get_object")?;

        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        key: &str,
        payload: Bytes,
        _options: PutOptions,
    ) -> StoreResult<PutOutcome> {
        self.ensure_online("put_object")?;

        let size_bytes = payload.len() as u64;
        self.objects.write().await.insert(key.to_string(), payload);

        Ok(PutOutcome {
            key: key.to_string(),
            size_bytes,
            served_by: self.served_by.clone(),
        })
    }
}
