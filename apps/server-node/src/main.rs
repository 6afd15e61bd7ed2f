use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{
    BucketSummary, HealthStatus, InfrastructureSnapshot, NodeId, ObjectRecord, ReplicationStatus,
    UNKNOWN_ZONE, UploadReceipt,
};
use object_store::{InMemoryObjectStore, ObjectStore, PutOptions, S3ObjectStore, S3StoreConfig};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unicode_normalization::UnicodeNormalization;

mod config;
mod infrastructure;
mod provenance;
mod replication;
mod report;
mod ui;

#[cfg(test)]
mod test_support;

use config::{ServerConfig, StoreBackend};
use infrastructure::InfrastructureMonitor;
use provenance::ProvenanceStore;
use replication::{ReplicaProber, ReplicationStatusCache, spawn_replication_loop};

#[derive(Clone)]
struct ServerState {
    node_id: NodeId,
    config: Arc<ServerConfig>,
    store: Arc<dyn ObjectStore>,
    replication: ReplicationStatusCache,
    prober: ReplicaProber,
    provenance: Arc<ProvenanceStore>,
    infrastructure: InfrastructureMonitor,
}

impl ServerState {
    fn new(config: ServerConfig, store: Arc<dyn ObjectStore>, http: reqwest::Client) -> Self {
        let prober = ReplicaProber::new(
            http.clone(),
            config.bucket.clone(),
            config.replica_endpoints(),
            config.probe.timeout,
        );
        let infrastructure = InfrastructureMonitor::from_config(http, &config);
        let provenance = Arc::new(ProvenanceStore::new(
            store.clone(),
            config.provenance_key.clone(),
        ));

        Self {
            node_id: NodeId::new_v4(),
            config: Arc::new(config),
            store,
            replication: ReplicationStatusCache::new(),
            prober,
            provenance,
            infrastructure,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = ServerConfig::from_env().context("failed to load server configuration")?;
    let store = build_store(&config).await;
    let state = ServerState::new(config, store, reqwest::Client::new());

    let adopted = state.provenance.load().await;
    info!(
        blob = %state.provenance.blob_key(),
        adopted,
        "seeded upload origins"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let prober = spawn_replication_loop(
        state.store.clone(),
        state.prober.clone(),
        state.replication.clone(),
        &state.config.probe,
        shutdown_rx,
    );

    let bind_addr = state.config.bind_addr;
    info!(
        %bind_addr,
        bucket = %state.config.bucket,
        local_zone = %state.config.local_zone,
        "server node listening"
    );

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = prober.await {
        error!(error = %err, "replication prober task failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn build_store(config: &ServerConfig) -> Arc<dyn ObjectStore> {
    match config.store_backend {
        StoreBackend::S3 => {
            let mut s3 = S3StoreConfig::new(config.global_endpoint.clone(), config.bucket.clone());
            s3.region = config.region.clone();
            s3.access_key = config.access_key.clone();
            s3.secret_key = config.secret_key.clone();
            Arc::new(S3ObjectStore::connect(&s3).await)
        }
        StoreBackend::Memory => {
            let mut store = InMemoryObjectStore::new(config.bucket.clone());
            if let Some(zone) = &config.memory_served_by {
                store = store.with_served_by(zone.clone());
            }
            Arc::new(store)
        }
    }
}

fn build_router(state: ServerState) -> Router {
    let upload_limit = match state.config.max_upload_bytes {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(max),
    };

    Router::new()
        .route("/", get(ui::index))
        .route("/healthz", get(health))
        .route("/api/filelist", get(list_files))
        .route("/api/summary", get(summary))
        .route("/api/replication", get(replication_statuses))
        .route("/api/infrastructure", get(infrastructure))
        .route(
            "/api/objects/{*key}",
            get(download_object)
                .put(upload_object)
                .layer(upload_limit),
        )
        .with_state(state)
}

async fn health(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        node_id: state.node_id,
        role: "server-node".to_string(),
        local_zone: state.config.local_zone.clone(),
        online: true,
    })
}

async fn list_files(State(state): State<ServerState>) -> Json<Vec<ObjectRecord>> {
    match report::collect_object_records(
        state.store.as_ref(),
        &state.replication,
        &state.provenance,
    )
    .await
    {
        Ok(records) => Json(records),
        Err(err) => {
            error!(error = %err, "failed to list objects");
            Json(Vec::new())
        }
    }
}

async fn summary(State(state): State<ServerState>) -> Result<Json<BucketSummary>, StatusCode> {
    let records = report::collect_object_records(
        state.store.as_ref(),
        &state.replication,
        &state.provenance,
    )
    .await
    .map_err(|err| {
        error!(error = %err, "failed to build bucket summary");
        StatusCode::BAD_GATEWAY
    })?;

    Ok(Json(report::bucket_summary(
        &state.config.bucket,
        &state.config.local_zone,
        state.config.bucket_quota_mib,
        &records,
    )))
}

async fn replication_statuses(
    State(state): State<ServerState>,
) -> Json<BTreeMap<String, ReplicationStatus>> {
    let mut statuses = state.replication.snapshot().await;
    statuses.retain(|key, _| !report::is_internal_key(key));
    Json(statuses)
}

async fn infrastructure(State(state): State<ServerState>) -> Json<InfrastructureSnapshot> {
    Json(state.infrastructure.aggregate(&state.replication).await)
}

async fn upload_object(
    State(state): State<ServerState>,
    Path(filename): Path<String>,
    payload: Bytes,
) -> Response {
    if payload.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty upload").into_response();
    }
    let Some(key) = upload_key(&filename, Utc::now()) else {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    };

    let outcome = match state
        .store
        .put_object(&key, payload, PutOptions::public_upload())
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(key = %key, error = %err, "failed to upload object");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    state
        .provenance
        .record_upload(&outcome.key, outcome.served_by.as_deref())
        .await;
    state.provenance.save().await;

    info!(
        key = %outcome.key,
        size_bytes = outcome.size_bytes,
        served_by = outcome.served_by.as_deref().unwrap_or(UNKNOWN_ZONE),
        "stored object"
    );

    (
        StatusCode::CREATED,
        Json(UploadReceipt {
            key: outcome.key,
            size_bytes: outcome.size_bytes,
            served_by: outcome.served_by,
        }),
    )
        .into_response()
}

async fn download_object(State(state): State<ServerState>, Path(key): Path<String>) -> Response {
    match state.store.get_object(&key).await {
        Ok(payload) => (StatusCode::OK, payload).into_response(),
        Err(err) if err.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(key = %key, error = %err, "failed to read object");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Reduces a client supplied name to ASCII letters, digits, `.`, `-` and `_`.
///
/// Accented letters are decomposed first so they keep their base letter. Path separators and
/// whitespace runs become `_`; leading and trailing dots and underscores are removed so the
/// result can never address a parent or hidden path.
fn sanitize_filename(filename: &str) -> String {
    let spaced: String = filename
        .nfkd()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// `YYYYmmddHHMMSS_<name>` in UTC, or `None` when nothing of the name survives sanitizing.
fn upload_key(filename: &str, now: DateTime<Utc>) -> Option<String> {
    let name = sanitize_filename(filename);
    if name.is_empty() {
        return None;
    }
    Some(format!("{}_{name}", now.format("%Y%m%d%H%M%S")))
}
