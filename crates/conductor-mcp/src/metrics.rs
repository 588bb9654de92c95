//! Metrics collection and aggregation over supervised servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;

use conductor_core::{ServerMetrics, TotalMetrics};

use crate::supervisor::ConnectionSupervisor;

/// How long a cached per-server snapshot stays fresh.
pub const DEFAULT_METRICS_TTL: Duration = Duration::from_secs(300);

/// Errors from metrics queries.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Unknown server: {0}")]
    UnknownServer(String),
}

/// TTL-cached metrics reader on top of a supervisor.
///
/// Single-server queries refresh from the live connection when the
/// cache is stale; aggregate queries tolerate missing servers and
/// report whatever data is available.
pub struct MetricsService {
    supervisor: Arc<ConnectionSupervisor>,
    cache: RwLock<HashMap<String, ServerMetrics>>,
    ttl: Duration,
}

impl MetricsService {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self::with_ttl(supervisor, DEFAULT_METRICS_TTL)
    }

    pub fn with_ttl(supervisor: Arc<ConnectionSupervisor>, ttl: Duration) -> Self {
        Self {
            supervisor,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Metrics for one server. Served from cache while fresh unless
    /// `force_refresh` is set.
    pub async fn server_metrics(
        &self,
        name: &str,
        force_refresh: bool,
    ) -> Result<ServerMetrics, MetricsError> {
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(name) {
                if self.is_fresh(cached) {
                    return Ok(cached.clone());
                }
            }
        }

        let metrics = self.collect(name).await?;
        self.cache
            .write()
            .await
            .insert(name.to_string(), metrics.clone());
        Ok(metrics)
    }

    /// Aggregate metrics over the named servers.
    ///
    /// Servers that are unknown or failing contribute zero; the average
    /// response time covers only servers that reported one. Partial
    /// data is expected, never an error.
    pub async fn total_metrics(&self, names: &[String]) -> TotalMetrics {
        let mut totals = TotalMetrics::default();
        let mut response_times = Vec::new();

        for name in names {
            let Ok(metrics) = self.server_metrics(name, false).await else {
                continue;
            };

            totals.tool_count += metrics.tool_count;
            totals.token_estimate += metrics.token_estimate;
            totals.reporting_count += 1;
            if metrics.is_connected {
                totals.connected_count += 1;
            }
            if let Some(rtt) = metrics.response_time_ms {
                response_times.push(rtt);
            }
        }

        if !response_times.is_empty() {
            let sum: u64 = response_times.iter().sum();
            totals.avg_response_time_ms = Some(sum / response_times.len() as u64);
        }

        totals
    }

    /// Drop the cached snapshot for one server.
    pub async fn invalidate(&self, name: &str) {
        self.cache.write().await.remove(name);
    }

    fn is_fresh(&self, metrics: &ServerMetrics) -> bool {
        chrono::Utc::now()
            .signed_duration_since(metrics.last_updated)
            .to_std()
            .is_ok_and(|age| age < self.ttl)
    }

    /// Build a fresh snapshot. Prefers live listing over the status
    /// snapshot, falling back to the supervisor's last-known counts
    /// when the connection is unhealthy.
    async fn collect(&self, name: &str) -> Result<ServerMetrics, MetricsError> {
        let status = self
            .supervisor
            .status(name)
            .await
            .ok_or_else(|| MetricsError::UnknownServer(name.to_string()))?;

        let mut tool_count = status.tool_count;
        let mut resource_count = status.resource_count;
        let mut response_time_ms = status.response_time_ms;

        if status.connected {
            if let Ok(tools) = self.supervisor.list_tools(name).await {
                tool_count = tools.len();
            }
            if let Ok(resources) = self.supervisor.list_resources(name).await {
                resource_count = resources.len();
            }
            if let Ok(rtt) = self.supervisor.ping(name).await {
                #[allow(clippy::cast_possible_truncation)]
                {
                    response_time_ms = Some(rtt.as_millis() as u64);
                }
            }
        }

        Ok(ServerMetrics {
            tool_count,
            resource_count,
            response_time_ms,
            token_estimate: ServerMetrics::estimate_tokens(resource_count),
            is_connected: status.connected,
            last_updated: chrono::Utc::now(),
        })
    }
}
