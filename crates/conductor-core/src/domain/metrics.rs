//! Per-server and aggregate metrics read models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heuristic token cost per advertised resource.
///
/// Token usage is an estimate, not a measured value: the wire protocol
/// does not report context size, so resource count is used as a rough
/// proxy. Callers should surface the estimate as approximate.
pub const TOKENS_PER_RESOURCE: u64 = 100;

/// Point-in-time metrics for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetrics {
    /// Number of tools the server advertises.
    pub tool_count: usize,

    /// Number of resources the server advertises.
    pub resource_count: usize,

    /// Latest ping round-trip, in milliseconds (absent when disconnected).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Estimated token footprint (`resource_count * TOKENS_PER_RESOURCE`).
    pub token_estimate: u64,

    /// Whether the server was connected when these metrics were taken.
    pub is_connected: bool,

    /// When these metrics were computed.
    pub last_updated: DateTime<Utc>,
}

impl ServerMetrics {
    /// Compute the token estimate for a resource count.
    #[must_use]
    pub const fn estimate_tokens(resource_count: usize) -> u64 {
        resource_count as u64 * TOKENS_PER_RESOURCE
    }
}

/// Aggregate metrics across a set of servers.
///
/// Sums skip servers with no data; the average covers only servers that
/// reported a response time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalMetrics {
    /// Sum of tool counts.
    pub tool_count: usize,

    /// Sum of token estimates.
    pub token_estimate: u64,

    /// Mean response time over servers that reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<u64>,

    /// How many of the queried servers are currently connected.
    pub connected_count: usize,

    /// How many of the queried servers had metrics at all.
    pub reporting_count: usize,
}
