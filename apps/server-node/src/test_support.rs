use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use object_store::InMemoryObjectStore;

use crate::ServerState;
use crate::config::ServerConfig;
use crate::replication::{REPLICATED_FROM_HEADER, REPLICATION_STATUS_HEADER};

/// Nothing listens on the discard port locally, so connections are refused.
pub(crate) const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:9";

pub(crate) async fn spawn_http(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Shared behaviour of a fake replica gateway.
#[derive(Clone, Default)]
pub(crate) struct GatewayState {
    replicated: Arc<Mutex<HashSet<String>>>,
    hits: Arc<AtomicUsize>,
    omit_source: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl GatewayState {
    pub(crate) fn replicating(keys: &[&str]) -> Self {
        let state = Self::default();
        for key in keys {
            state.mark_replicated(key);
        }
        state
    }

    pub(crate) fn mark_replicated(&self, key: &str) {
        self.replicated.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn omit_source_header(&self) {
        self.omit_source.store(true, Ordering::SeqCst);
    }

    pub(crate) fn delay_responses(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub(crate) fn replica_gateway(state: GatewayState) -> Router {
    Router::new()
        .route("/{bucket}/{*key}", get(gateway_head))
        .with_state(state)
}

async fn gateway_head(
    State(state): State<GatewayState>,
    Path((_bucket, key)): Path<(String, String)>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let replicated = state.replicated.lock().unwrap().contains(&key);
    if !replicated {
        return StatusCode::NOT_FOUND.into_response();
    }

    if state.omit_source.load(Ordering::SeqCst) {
        return (StatusCode::OK, [(REPLICATION_STATUS_HEADER, "COMPLETED")]).into_response();
    }

    (
        StatusCode::OK,
        [
            (REPLICATION_STATUS_HEADER, "COMPLETED"),
            (REPLICATED_FROM_HEADER, "zone-remote"),
        ],
    )
        .into_response()
}

/// An endpoint whose root always answers with `status`.
pub(crate) fn status_endpoint(status: StatusCode) -> Router {
    Router::new().route("/", get(move || async move { status }))
}

/// Server state over `store`, probing `gateways` with every other endpoint unreachable.
pub(crate) fn test_state(store: InMemoryObjectStore, gateways: &[String]) -> ServerState {
    let mut vars = HashMap::new();
    vars.insert("ZONEWATCH_STORE_BACKEND", "memory".to_string());
    vars.insert("ZONEWATCH_BUCKET", store_bucket(&store));
    vars.insert("ZONEWATCH_GLOBAL_ENDPOINT", UNREACHABLE_ENDPOINT.to_string());
    vars.insert("ZONEWATCH_DC1_LB_ENDPOINT", UNREACHABLE_ENDPOINT.to_string());
    vars.insert("ZONEWATCH_DC2_LB_ENDPOINT", UNREACHABLE_ENDPOINT.to_string());
    let dc1_gateways = if gateways.is_empty() {
        UNREACHABLE_ENDPOINT.to_string()
    } else {
        gateways.join(",")
    };
    vars.insert("ZONEWATCH_DC1_GATEWAYS", dc1_gateways);
    vars.insert("ZONEWATCH_DC2_GATEWAYS", UNREACHABLE_ENDPOINT.to_string());
    vars.insert("ZONEWATCH_PROBE_TIMEOUT_MS", "500".to_string());

    let config = ServerConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
    ServerState::new(config, Arc::new(store), reqwest::Client::new())
}

fn store_bucket(store: &InMemoryObjectStore) -> String {
    use object_store::ObjectStore;
    store.bucket().to_string()
}
