use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

pub(crate) const DEFAULT_PROVENANCE_KEY: &str = "_internal_data/upload_origins.json";

/// Keys under this prefix hold service metadata and are hidden from object listings.
pub(crate) const INTERNAL_PREFIX: &str = "_internal_data/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreBackend {
    S3,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DatacenterConfig {
    pub(crate) name: String,
    pub(crate) lb_endpoint: String,
    pub(crate) gateways: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeConfig {
    pub(crate) timeout: Duration,
    pub(crate) pass_interval: Duration,
    pub(crate) error_backoff: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            pass_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) bucket: String,
    pub(crate) global_endpoint: String,
    pub(crate) region: String,
    pub(crate) access_key: Option<String>,
    pub(crate) secret_key: Option<String>,
    pub(crate) store_backend: StoreBackend,
    pub(crate) memory_served_by: Option<String>,
    pub(crate) local_zone: String,
    pub(crate) bucket_quota_mib: f64,
    /// Largest accepted upload body. Zero means unlimited.
    pub(crate) max_upload_bytes: usize,
    pub(crate) datacenters: Vec<DatacenterConfig>,
    pub(crate) probe: ProbeConfig,
    pub(crate) provenance_key: String,
}

impl ServerConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |name: &str, default: &str| {
            non_empty(&lookup, name).unwrap_or_else(|| default.to_string())
        };

        let store_backend = match text("ZONEWATCH_STORE_BACKEND", "s3").to_ascii_lowercase().as_str()
        {
            "s3" => StoreBackend::S3,
            "memory" => StoreBackend::Memory,
            other => bail!("unsupported ZONEWATCH_STORE_BACKEND: {other} (expected s3 or memory)"),
        };

        let bucket_quota_mib = parse_var(&lookup, "ZONEWATCH_BUCKET_QUOTA_MB", 30.0_f64)?;
        if !bucket_quota_mib.is_finite() || bucket_quota_mib < 0.0 {
            bail!("ZONEWATCH_BUCKET_QUOTA_MB must be a non-negative number");
        }

        let datacenters = vec![
            DatacenterConfig {
                name: text("ZONEWATCH_DC1_NAME", "Madrid"),
                lb_endpoint: text("ZONEWATCH_DC1_LB_ENDPOINT", "https://s3.mad.eu.cephlabs.com"),
                gateways: endpoint_list(
                    &lookup,
                    "ZONEWATCH_DC1_GATEWAYS",
                    "http://ceph-node-00:8088, http://ceph-node-01:8088",
                ),
            },
            DatacenterConfig {
                name: text("ZONEWATCH_DC2_NAME", "Paris"),
                lb_endpoint: text("ZONEWATCH_DC2_LB_ENDPOINT", "https://s3.par.eu.cephlabs.com"),
                gateways: endpoint_list(
                    &lookup,
                    "ZONEWATCH_DC2_GATEWAYS",
                    "http://ceph-node-05:8088, http://ceph-node-06:8088",
                ),
            },
        ];

        let probe = ProbeConfig {
            timeout: Duration::from_millis(parse_var(&lookup, "ZONEWATCH_PROBE_TIMEOUT_MS", 2_000)?),
            pass_interval: Duration::from_secs(parse_var(
                &lookup,
                "ZONEWATCH_PROBE_INTERVAL_SECS",
                30,
            )?),
            error_backoff: Duration::from_secs(parse_var(
                &lookup,
                "ZONEWATCH_PROBE_ERROR_BACKOFF_SECS",
                25,
            )?),
        };

        Ok(Self {
            bind_addr: parse_var(
                &lookup,
                "ZONEWATCH_SERVER_BIND",
                SocketAddr::from(([127, 0, 0, 1], 5000)),
            )?,
            bucket: text("ZONEWATCH_BUCKET", "logstore"),
            global_endpoint: text("ZONEWATCH_GLOBAL_ENDPOINT", "https://s3.eu.cephlabs.com")
                .trim_end_matches('/')
                .to_string(),
            region: text("ZONEWATCH_REGION", "us-east-1"),
            access_key: non_empty(&lookup, "ZONEWATCH_ACCESS_KEY"),
            secret_key: non_empty(&lookup, "ZONEWATCH_SECRET_KEY"),
            store_backend,
            memory_served_by: non_empty(&lookup, "ZONEWATCH_MEMORY_SERVED_BY"),
            local_zone: text("ZONEWATCH_LOCAL_ZONE", "Madrid"),
            bucket_quota_mib,
            max_upload_bytes: parse_var(&lookup, "ZONEWATCH_MAX_UPLOAD_BYTES", 0_usize)?,
            datacenters,
            probe,
            provenance_key: text("ZONEWATCH_PROVENANCE_KEY", DEFAULT_PROVENANCE_KEY),
        })
    }

    /// Every datacenter's gateways, concatenated in configuration order.
    pub(crate) fn replica_endpoints(&self) -> Vec<String> {
        self.datacenters
            .iter()
            .flat_map(|dc| dc.gateways.iter().cloned())
            .collect()
    }
}

pub(crate) fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.trim_end_matches('/').to_string())
        .collect()
}

/// A set variable is used as is, so an empty value yields no endpoints. Unset falls back to
/// `default`.
fn endpoint_list(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> Vec<String> {
    parse_endpoint_list(&lookup(name).unwrap_or_else(|| default.to_string()))
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(lookup, name) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        None => Ok(default),
    }
}
