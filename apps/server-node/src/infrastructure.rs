use std::time::Duration;

use chrono::Utc;
use common::{
    DatacenterHealth, EndpointHealth, EndpointStatus, InfrastructureSnapshot, ReplicationStatus,
};
use reqwest::Client;
use tracing::debug;

use crate::config::{DatacenterConfig, ServerConfig};
use crate::replication::ReplicationStatusCache;

/// On-demand liveness checks of the ingress, load balancers and gateways.
#[derive(Clone)]
pub(crate) struct InfrastructureMonitor {
    http: Client,
    timeout: Duration,
    global_endpoint: String,
    datacenters: Vec<DatacenterConfig>,
}

impl InfrastructureMonitor {
    pub(crate) fn new(
        http: Client,
        timeout: Duration,
        global_endpoint: impl Into<String>,
        datacenters: Vec<DatacenterConfig>,
    ) -> Self {
        Self {
            http,
            timeout,
            global_endpoint: global_endpoint.into(),
            datacenters,
        }
    }

    pub(crate) fn from_config(http: Client, config: &ServerConfig) -> Self {
        Self::new(
            http,
            config.probe.timeout,
            config.global_endpoint.clone(),
            config.datacenters.clone(),
        )
    }

    /// GET `url` once. Up only for a 2xx answer within the deadline.
    pub(crate) async fn probe(&self, name: impl Into<String>, url: &str) -> EndpointHealth {
        let status = match self.http.get(url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => EndpointStatus::Up,
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "endpoint answered with error status");
                EndpointStatus::Down
            }
            Err(err) => {
                debug!(url = %url, error = %err, "endpoint unreachable");
                EndpointStatus::Down
            }
        };

        EndpointHealth {
            name: name.into(),
            url: url.to_string(),
            status,
        }
    }

    /// Probes every configured endpoint in order and reads the replication signal from `cache`.
    pub(crate) async fn aggregate(&self, cache: &ReplicationStatusCache) -> InfrastructureSnapshot {
        let global = self.probe("Global Endpoint", &self.global_endpoint).await;

        let mut datacenters = Vec::with_capacity(self.datacenters.len());
        for dc in &self.datacenters {
            let load_balancer = self
                .probe(format!("LB - {}", dc.name), &dc.lb_endpoint)
                .await;

            let mut gateways = Vec::with_capacity(dc.gateways.len());
            for (index, url) in dc.gateways.iter().enumerate() {
                gateways.push(
                    self.probe(format!("Gateway {} - {}", dc.name, index + 1), url)
                        .await,
                );
            }

            datacenters.push(DatacenterHealth {
                name: dc.name.clone(),
                load_balancer,
                gateways,
            });
        }

        let average_replication = if cache.all_replicated().await {
            ReplicationStatus::Yes
        } else {
            ReplicationStatus::No
        };

        InfrastructureSnapshot {
            global,
            datacenters,
            average_replication,
            captured_at: Utc::now(),
        }
    }
}
