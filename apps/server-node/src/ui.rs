use super::*;
use axum::response::Html;

pub(crate) async fn index(State(state): State<ServerState>) -> Html<String> {
    let backend = match state.config.store_backend {
        StoreBackend::S3 => format!("s3 ({})", state.config.global_endpoint),
        StoreBackend::Memory => "in-memory".to_string(),
    };

    let tracked_objects = state.replication.len().await;
    let replication_signal = if state.replication.all_replicated().await {
        "all tracked objects replicated"
    } else {
        "replication incomplete or nothing tracked yet"
    };
    let known_origins = state.provenance.snapshot().await.len();

    let datacenters = state
        .config
        .datacenters
        .iter()
        .map(|dc| {
            format!(
                "<li><code>{}</code>: load balancer <code>{}</code>, {} gateway(s)</li>",
                dc.name,
                dc.lb_endpoint,
                dc.gateways.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n            ");

    let body = format!(
        "<!doctype html>
<html lang=\"en\">
<head>
    <meta charset=\"utf-8\" />
    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />
    <title>zonewatch Server Node</title>
    <style>
        body {{ font-family: system-ui, sans-serif; margin: 2rem; }}
        main {{ max-width: 760px; margin: 0 auto; }}
        code {{ background: #f4f4f4; padding: 0.2rem 0.4rem; border-radius: 0.2rem; }}
        ul {{ line-height: 1.6; }}
    </style>
</head>
<body>
    <main>
        <h1>zonewatch Server Node</h1>
        <p>Node ID: <code>{}</code></p>
        <p>Bucket: <code>{}</code> via {}</p>
        <p>Local zone: <code>{}</code></p>
        <p>Tracked objects: <code>{}</code> ({})</p>
        <p>Known upload origins: <code>{}</code> (blob <code>{}</code>)</p>
        <h2>Datacenters</h2>
        <ul>
            {}
        </ul>
        <h2>Available routes</h2>
        <ul>
            <li><code>GET /</code>: this information page</li>
            <li><code>GET /healthz</code>: node health JSON</li>
            <li><code>GET /api/filelist</code>: objects with replication status and upload origin</li>
            <li><code>GET /api/summary</code>: usage and per-zone upload counts</li>
            <li><code>GET /api/replication</code>: cached replication status per key</li>
            <li><code>GET /api/infrastructure</code>: endpoint liveness</li>
            <li><code>PUT /api/objects/{{filename}}</code>: upload object bytes</li>
            <li><code>GET /api/objects/{{key}}</code>: fetch object bytes</li>
        </ul>
    </main>
</body>
</html>\n",
        state.node_id,
        state.config.bucket,
        backend,
        state.config.local_zone,
        tracked_objects,
        replication_signal,
        known_origins,
        state.provenance.blob_key(),
        datacenters,
    );

    Html(body)
}
