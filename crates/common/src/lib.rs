use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NodeId = Uuid;

/// Label used wherever an upload origin has not been recorded.
pub const UNKNOWN_ZONE: &str = "Unknown";

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Cross-datacenter replication state of a single object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    #[default]
    Pending,
    Yes,
    No,
}

impl ReplicationStatus {
    pub fn is_replicated(self) -> bool {
        self == Self::Yes
    }

    /// Folds a fresh observation into the current status.
    ///
    /// `Yes` is sticky and a `Pending` observation never replaces a probed result.
    pub fn advance(self, observed: ReplicationStatus) -> ReplicationStatus {
        match (self, observed) {
            (Self::Yes, _) => Self::Yes,
            (current, Self::Pending) => current,
            (_, observed) => observed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub size_bytes: u64,
    pub replication_status: ReplicationStatus,
    #[serde(default)]
    pub upload_origin: Option<String>,
}

impl ObjectRecord {
    pub fn origin_label(&self) -> &str {
        self.upload_origin.as_deref().unwrap_or(UNKNOWN_ZONE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub total_bytes: u64,
    pub total_mib: f64,
    pub quota_mib: f64,
    pub usage_percentage: f64,
}

impl UsageSummary {
    /// Percentage is clamped to 100 and reported as 0 when no quota is configured.
    pub fn compute(total_bytes: u64, quota_mib: f64) -> Self {
        let total_mib = total_bytes as f64 / BYTES_PER_MIB;
        let usage_percentage = if quota_mib > 0.0 {
            (total_mib / quota_mib * 100.0).min(100.0)
        } else {
            0.0
        };

        Self {
            total_bytes,
            total_mib,
            quota_mib,
            usage_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketSummary {
    pub bucket: String,
    pub local_zone: String,
    pub object_count: usize,
    pub usage: UsageSummary,
    pub upload_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub size_bytes: u64,
    pub served_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub node_id: NodeId,
    pub role: String,
    pub local_zone: String,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointHealth {
    pub name: String,
    pub url: String,
    pub status: EndpointStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatacenterHealth {
    pub name: String,
    pub load_balancer: EndpointHealth,
    pub gateways: Vec<EndpointHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InfrastructureSnapshot {
    pub global: EndpointHealth,
    pub datacenters: Vec<DatacenterHealth>,
    pub average_replication: ReplicationStatus,
    pub captured_at: DateTime<Utc>,
}

impl InfrastructureSnapshot {
    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointHealth> {
        std::iter::once(&self.global).chain(
            self.datacenters
                .iter()
                .flat_map(|dc| std::iter::once(&dc.load_balancer).chain(dc.gateways.iter())),
        )
    }
}
