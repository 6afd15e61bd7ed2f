use std::collections::BTreeMap;

use common::{BucketSummary, ObjectRecord, UsageSummary};
use object_store::{ObjectStore, StoreResult};

use crate::config::INTERNAL_PREFIX;
use crate::provenance::ProvenanceStore;
use crate::replication::ReplicationStatusCache;

pub(crate) fn is_internal_key(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
}

/// Joins the current listing with both caches. Origins are refreshed from the blob first.
pub(crate) async fn collect_object_records(
    store: &dyn ObjectStore,
    replication: &ReplicationStatusCache,
    provenance: &ProvenanceStore,
) -> StoreResult<Vec<ObjectRecord>> {
    provenance.load().await;

    let objects = store.list_objects().await?;
    let statuses = replication.snapshot().await;
    let origins = provenance.snapshot().await;

    Ok(objects
        .into_iter()
        .filter(|object| !is_internal_key(&object.key))
        .map(|object| ObjectRecord {
            replication_status: statuses.get(&object.key).copied().unwrap_or_default(),
            upload_origin: origins.zone_for(&object.key).map(ToString::to_string),
            key: object.key,
            size_bytes: object.size_bytes,
        })
        .collect())
}

/// Number of objects per upload origin, with unrecorded origins counted under `Unknown`.
pub(crate) fn upload_counts(records: &[ObjectRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.origin_label().to_string()).or_insert(0) += 1;
    }
    counts
}

pub(crate) fn bucket_summary(
    bucket: &str,
    local_zone: &str,
    quota_mib: f64,
    records: &[ObjectRecord],
) -> BucketSummary {
    let total_bytes = records.iter().map(|record| record.size_bytes).sum();

    BucketSummary {
        bucket: bucket.to_string(),
        local_zone: local_zone.to_string(),
        object_count: records.len(),
        usage: UsageSummary::compute(total_bytes, quota_mib),
        upload_counts: upload_counts(records),
    }
}
