#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Stdio;
    use std::sync::OnceLock;
    use std::time::{Duration, SystemTime};

    use anyhow::{Context, Result, bail};
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use bytes::Bytes;
    use client_sdk::ZonewatchClient;
    use common::{EndpointStatus, ReplicationStatus};
    use reqwest::StatusCode;
    use tokio::process::{Child, Command};
    use tokio::time::sleep;

    const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:9";

    #[tokio::test]
    async fn sdk_upload_then_download_against_live_server() -> Result<()> {
        let bind = "127.0.0.1:19180";
        let gateway = spawn_replica_gateway().await?;
        let mut server = start_server(bind, &gateway).await?;

        let result = async {
            let client = ZonewatchClient::new(format!("http://{bind}"));
            let payload = Bytes::from_static(b"hello-from-sdk");

            let receipt = client.upload("sdk notes.txt", payload.clone()).await?;
            assert!(receipt.key.ends_with("_sdk_notes.txt"));
            assert_eq!(receipt.served_by.as_deref(), Some("Madrid"));

            assert_eq!(client.download(&receipt.key).await?, payload);

            let records = client.list_objects().await?;
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].upload_origin.as_deref(), Some("Madrid"));

            let summary = client.summary().await?;
            assert_eq!(summary.object_count, 1);
            assert_eq!(summary.upload_counts.get("Madrid"), Some(&1));

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        result
    }

    #[tokio::test]
    async fn cli_upload_is_reported_replicated_by_background_prober() -> Result<()> {
        let bind = "127.0.0.1:19181";
        let base_url = format!("http://{bind}");
        let gateway = spawn_replica_gateway().await?;
        let mut server = start_server(bind, &gateway).await?;
        let work_dir = fresh_temp_dir("cli-upload");

        let result = async {
            let source = work_dir.join("report.log");
            fs::write(&source, b"line one\nline two\n")?;

            let output = run_cli(&[
                "--server-url",
                &base_url,
                "upload",
                source.to_str().context("temp path is not utf-8")?,
            ])
            .await?;
            assert!(output.contains("_report.log"));
            assert!(output.contains("via Madrid"));

            let client = ZonewatchClient::new(&base_url);
            let key = client.list_objects().await?[0].key.clone();
            wait_for_replication(&client, &key, 100).await?;

            let listing = run_cli(&["--server-url", &base_url, "list"]).await?;
            assert!(listing.contains(&key));
            assert!(listing.contains("replicated=yes"));
            assert!(listing.contains("origin=Madrid"));

            let downloaded = work_dir.join("copy.log");
            run_cli(&[
                "--server-url",
                &base_url,
                "download",
                &key,
                "--output",
                downloaded.to_str().context("temp path is not utf-8")?,
            ])
            .await?;
            assert_eq!(fs::read(&downloaded)?, b"line one\nline two\n");

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        let _ = fs::remove_dir_all(&work_dir);
        result
    }

    #[tokio::test]
    async fn infrastructure_reports_each_endpoint_and_replication_signal() -> Result<()> {
        let bind = "127.0.0.1:19182";
        let base_url = format!("http://{bind}");
        let gateway = spawn_replica_gateway().await?;
        let mut server = start_server(bind, &gateway).await?;

        let result = async {
            let client = ZonewatchClient::new(&base_url);

            let before = client.infrastructure().await?;
            assert_eq!(before.average_replication, ReplicationStatus::No);
            assert_eq!(before.global.status, EndpointStatus::Up);
            assert_eq!(before.datacenters[0].gateways[0].status, EndpointStatus::Up);
            assert_eq!(before.datacenters[1].load_balancer.status, EndpointStatus::Down);

            client
                .upload("probe.txt", Bytes::from_static(b"probe"))
                .await?;

            // The origins blob is probed too, so wait for the aggregate signal itself.
            let mut complete = false;
            for _ in 0..100 {
                if client.infrastructure().await?.average_replication == ReplicationStatus::Yes {
                    complete = true;
                    break;
                }
                sleep(Duration::from_millis(100)).await;
            }
            assert!(complete, "replication signal never turned complete");

            let output = run_cli(&["--server-url", &base_url, "infrastructure"]).await?;
            assert!(output.contains("Gateway Madrid - 1"));
            assert!(output.contains("LB - Paris"));
            assert!(output.contains("replication: complete"));

            let health = run_cli(&["--server-url", &base_url, "health"]).await?;
            assert!(health.contains("\"local_zone\": \"Madrid\""));

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        result
    }

    /// Gateway that answers 200 at its root and confirms every object as replicated.
    async fn spawn_replica_gateway() -> Result<String> {
        let app = Router::new()
            .route("/", get(|| async { AxumStatus::OK }))
            .route(
                "/{bucket}/{*key}",
                get(|| async {
                    (
                        AxumStatus::OK,
                        [
                            ("x-amz-replication-status", "COMPLETED"),
                            ("x-rgw-replicated-from", "zone-paris"),
                        ],
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock gateway")?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(format!("http://{addr}"))
    }

    async fn start_server(bind: &str, gateway: &str) -> Result<Child> {
        let server_bin = binary_path("server-node")?;

        let child = Command::new(server_bin)
            .env("ZONEWATCH_SERVER_BIND", bind)
            .env("ZONEWATCH_STORE_BACKEND", "memory")
            .env("ZONEWATCH_MEMORY_SERVED_BY", "Madrid")
            .env("ZONEWATCH_GLOBAL_ENDPOINT", gateway)
            .env("ZONEWATCH_DC1_LB_ENDPOINT", gateway)
            .env("ZONEWATCH_DC1_GATEWAYS", gateway)
            .env("ZONEWATCH_DC2_LB_ENDPOINT", UNREACHABLE_ENDPOINT)
            .env("ZONEWATCH_DC2_GATEWAYS", UNREACHABLE_ENDPOINT)
            .env("ZONEWATCH_PROBE_TIMEOUT_MS", "500")
            .env("ZONEWATCH_PROBE_INTERVAL_SECS", "1")
            .env("ZONEWATCH_PROBE_ERROR_BACKOFF_SECS", "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn server-node")?;

        wait_for_server(bind, 40).await?;
        Ok(child)
    }

    async fn wait_for_replication(
        client: &ZonewatchClient,
        key: &str,
        retries: usize,
    ) -> Result<()> {
        for _ in 0..retries {
            let statuses = client.replication_statuses().await?;
            if statuses.get(key) == Some(&ReplicationStatus::Yes) {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }

        bail!("object {key} was never reported replicated");
    }

    async fn run_cli(args: &[&str]) -> Result<String> {
        let cli_bin = binary_path("cli-client")?;
        let output = Command::new(cli_bin)
            .args(args)
            .output()
            .await
            .context("failed to execute cli-client")?;

        if !output.status.success() {
            bail!(
                "cli-client failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn wait_for_server(bind: &str, retries: usize) -> Result<()> {
        let health_url = format!("http://{bind}/healthz");
        wait_for_url_status(&health_url, StatusCode::OK, retries).await
    }

    async fn wait_for_url_status(url: &str, expected: StatusCode, retries: usize) -> Result<()> {
        let http = reqwest::Client::new();

        for _ in 0..retries {
            if let Ok(resp) = http.get(url).send().await
                && resp.status() == expected
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }

        bail!("service did not return {expected} at {url}");
    }

    async fn stop_server(child: &mut Child) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    fn binary_path(name: &str) -> Result<PathBuf> {
        let workspace_root = workspace_root()?;
        ensure_binaries_built(&workspace_root)?;
        let mut path = workspace_root.join("target").join("debug").join(name);

        if let Some(suffix) = std::env::consts::EXE_SUFFIX.strip_prefix('.') {
            let mut filename = OsString::from(name);
            filename.push(".");
            filename.push(suffix);
            path = workspace_root.join("target").join("debug").join(filename);
        }

        if !path.exists() {
            bail!("expected binary does not exist: {}", path.display());
        }

        Ok(path)
    }

    fn workspace_root() -> Result<PathBuf> {
        let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        crate_dir
            .parent()
            .and_then(|p| p.parent())
            .map(PathBuf::from)
            .context("failed to resolve workspace root")
    }

    fn build_required_binaries(workspace_root: &Path) -> Result<()> {
        let status = std::process::Command::new("cargo")
            .arg("build")
            .arg("-p")
            .arg("server-node")
            .arg("-p")
            .arg("cli-client")
            .current_dir(workspace_root)
            .status()
            .context("failed to run cargo build for system test binaries")?;

        if !status.success() {
            bail!("cargo build for system test binaries failed");
        }

        Ok(())
    }

    fn ensure_binaries_built(workspace_root: &Path) -> Result<()> {
        static BUILD_RESULT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

        let result = BUILD_RESULT.get_or_init(|| {
            build_required_binaries(workspace_root).map_err(|err| err.to_string())
        });

        if let Err(message) = result {
            bail!("failed to build required binaries: {message}");
        }

        Ok(())
    }

    fn fresh_temp_dir(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("zonewatch-{name}-{unique}"));
        let _ = fs::remove_dir_all(&path);
        let _ = fs::create_dir_all(&path);
        path
    }
}
