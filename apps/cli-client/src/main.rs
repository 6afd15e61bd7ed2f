use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use client_sdk::ZonewatchClient;
use common::{EndpointStatus, ReplicationStatus};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "zonewatch")]
#[command(about = "CLI client for the zonewatch replication monitor")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    server_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a local file; the server prefixes its name with a UTC timestamp.
    Upload { path: PathBuf },
    Download {
        key: String,
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    List,
    Summary,
    Replication,
    Infrastructure,
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ZonewatchClient::new(&cli.server_url);

    match cli.command {
        Commands::Upload { path } => {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("{} has no usable file name", path.display()))?
                .to_string();
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;

            let receipt = client.upload(&filename, Bytes::from(data)).await?;
            println!(
                "stored '{}' ({} bytes) via {}",
                receipt.key,
                receipt.size_bytes,
                receipt.served_by.as_deref().unwrap_or(common::UNKNOWN_ZONE)
            );
        }
        Commands::Download { key, output } => {
            let payload = client.download(&key).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &payload)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("wrote {} bytes to {}", payload.len(), path.display());
                }
                None => {
                    std::io::stdout()
                        .write_all(&payload)
                        .context("failed to write object to stdout")?;
                }
            }
        }
        Commands::List => {
            for record in client.list_objects().await? {
                println!(
                    "{}\t{} bytes\treplicated={}\torigin={}",
                    record.key,
                    record.size_bytes,
                    status_label(record.replication_status),
                    record.origin_label()
                );
            }
        }
        Commands::Summary => print_json(&client.summary().await?)?,
        Commands::Replication => print_json(&client.replication_statuses().await?)?,
        Commands::Infrastructure => {
            let snapshot = client.infrastructure().await?;
            for endpoint in snapshot.endpoints() {
                let status = match endpoint.status {
                    EndpointStatus::Up => "up",
                    EndpointStatus::Down => "down",
                };
                println!("{:<24} {:<5} {}", endpoint.name, status, endpoint.url);
            }
            println!(
                "replication: {}",
                if snapshot.average_replication.is_replicated() {
                    "complete"
                } else {
                    "incomplete"
                }
            );
        }
        Commands::Health => print_json(&client.health().await?)?,
    }

    Ok(())
}

fn status_label(status: ReplicationStatus) -> &'static str {
    match status {
        ReplicationStatus::Pending => "pending",
        ReplicationStatus::Yes => "yes",
        ReplicationStatus::No => "no",
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
