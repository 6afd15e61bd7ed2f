use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use common::ReplicationStatus;
use object_store::{ObjectStore, StoreResult};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;

pub(crate) const REPLICATION_STATUS_HEADER: &str = "x-amz-replication-status";
pub(crate) const REPLICATED_FROM_HEADER: &str = "x-rgw-replicated-from";

const COMPLETION_MARKERS: [&str; 2] = ["REPLICA", "COMPLETED"];

/// Sticky per-object replication status shared by the prober and readers.
///
/// Entries are never removed and a `Yes` is never replaced.
#[derive(Clone, Default)]
pub(crate) struct ReplicationStatusCache {
    statuses: Arc<RwLock<HashMap<String, ReplicationStatus>>>,
}

impl ReplicationStatusCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn status(&self, key: &str) -> ReplicationStatus {
        self.statuses
            .read()
            .await
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) async fn is_replicated(&self, key: &str) -> bool {
        self.status(key).await.is_replicated()
    }

    /// Starts tracking `key` as pending if it has not been seen before.
    pub(crate) async fn observe(&self, key: &str) {
        self.statuses
            .write()
            .await
            .entry(key.to_string())
            .or_default();
    }

    /// Folds a probe result into the cache and returns the stored status.
    pub(crate) async fn record(&self, key: &str, observed: ReplicationStatus) -> ReplicationStatus {
        let mut statuses = self.statuses.write().await;
        let entry = statuses.entry(key.to_string()).or_default();
        *entry = entry.advance(observed);
        *entry
    }

    pub(crate) async fn snapshot(&self) -> BTreeMap<String, ReplicationStatus> {
        self.statuses
            .read()
            .await
            .iter()
            .map(|(key, status)| (key.clone(), *status))
            .collect()
    }

    /// True only for a non-empty cache whose entries are all `Yes`.
    pub(crate) async fn all_replicated(&self) -> bool {
        let statuses = self.statuses.read().await;
        !statuses.is_empty() && statuses.values().all(|status| status.is_replicated())
    }

    pub(crate) async fn len(&self) -> usize {
        self.statuses.read().await.len()
    }
}

/// Asks replica gateways whether they hold a completed copy of an object.
#[derive(Clone)]
pub(crate) struct ReplicaProber {
    http: Client,
    bucket: String,
    endpoints: Vec<String>,
    timeout: Duration,
}

impl ReplicaProber {
    pub(crate) fn new(
        http: Client,
        bucket: impl Into<String>,
        endpoints: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            bucket: bucket.into(),
            endpoints,
            timeout,
        }
    }

    pub(crate) fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Header-only probe of one gateway. Every failure mode is reported as `No`.
    pub(crate) async fn probe(&self, endpoint: &str, key: &str) -> ReplicationStatus {
        let url = replica_object_url(endpoint, &self.bucket, key);

        match self.http.head(&url).timeout(self.timeout).send().await {
            Ok(response) => classify_replica_response(response.status(), response.headers()),
            Err(err) => {
                debug!(url = %url, error = %err, "replica probe failed");
                ReplicationStatus::No
            }
        }
    }

    /// `Yes` as soon as any gateway confirms the object, `No` when none does.
    pub(crate) async fn check_object(&self, key: &str) -> ReplicationStatus {
        for endpoint in &self.endpoints {
            if self.probe(endpoint, key).await.is_replicated() {
                return ReplicationStatus::Yes;
            }
        }
        ReplicationStatus::No
    }
}

pub(crate) fn replica_object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/'))
}

pub(crate) fn classify_replica_response(status: StatusCode, headers: &HeaderMap) -> ReplicationStatus {
    if !status.is_success() {
        return ReplicationStatus::No;
    }

    let state_complete = headers
        .get(REPLICATION_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .map(|value| {
            COMPLETION_MARKERS
                .iter()
                .any(|marker| value.eq_ignore_ascii_case(marker))
        })
        .unwrap_or(false);

    if state_complete && headers.contains_key(REPLICATED_FROM_HEADER) {
        ReplicationStatus::Yes
    } else {
        ReplicationStatus::No
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReplicationPassReport {
    pub(crate) listed: usize,
    pub(crate) already_replicated: usize,
    pub(crate) probed: usize,
    pub(crate) replicated: usize,
}

/// One sequential sweep over the bucket listing. Only a listing failure is an error.
pub(crate) async fn run_replication_pass(
    store: &dyn ObjectStore,
    prober: &ReplicaProber,
    cache: &ReplicationStatusCache,
) -> StoreResult<ReplicationPassReport> {
    let objects = store.list_objects().await?;
    let mut report = ReplicationPassReport {
        listed: objects.len(),
        ..ReplicationPassReport::default()
    };

    for object in objects {
        if cache.is_replicated(&object.key).await {
            report.already_replicated += 1;
            continue;
        }

        cache.observe(&object.key).await;
        let observed = prober.check_object(&object.key).await;
        report.probed += 1;

        if cache.record(&object.key, observed).await.is_replicated() {
            report.replicated += 1;
            debug!(key = %object.key, "object replicated");
        }
    }

    Ok(report)
}

pub(crate) fn spawn_replication_loop(
    store: Arc<dyn ObjectStore>,
    prober: ReplicaProber,
    cache: ReplicationStatusCache,
    cadence: &ProbeConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_replication_loop(
        store,
        prober,
        cache,
        cadence.pass_interval,
        cadence.error_backoff,
        shutdown,
    ))
}

/// Runs passes until `shutdown` flips to true or its sender is dropped.
pub(crate) async fn run_replication_loop(
    store: Arc<dyn ObjectStore>,
    prober: ReplicaProber,
    cache: ReplicationStatusCache,
    pass_interval: Duration,
    error_backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        endpoints = prober.endpoints().len(),
        interval_secs = pass_interval.as_secs(),
        "replication prober started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match run_replication_pass(store.as_ref(), &prober, &cache).await {
            Ok(report) => {
                debug!(
                    listed = report.listed,
                    already_replicated = report.already_replicated,
                    probed = report.probed,
                    replicated = report.replicated,
                    "replication pass complete"
                );
                pass_interval
            }
            Err(err) => {
                warn!(error = %err, "replication check failed");
                error_backoff
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("replication prober stopped");
}
