//! Connection status snapshots produced by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supervision state of a managed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ServerState {
    /// Connection is up and passing health checks.
    Connected,

    /// Connection was lost; reconnection attempts are in progress.
    Reconnecting {
        /// 1-based index of the next reconnection attempt.
        attempt: u32,
    },

    /// Reconnection budget exhausted. Terminal until `start` is called
    /// again for this server.
    Unavailable,

    /// Not managed (never started, or stopped).
    Stopped,
}

impl ServerState {
    /// Check if the state represents a live connection.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the state is terminal (no further automatic work).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Stopped)
    }
}

/// Read-only snapshot of one server's connection health.
///
/// Produced by the supervisor on request; consumers get a copy and can
/// never mutate supervisor state through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Current supervision state.
    pub state: ServerState,

    /// Whether the connection is currently usable.
    pub connected: bool,

    /// When the last successful health ping completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping_at: Option<DateTime<Utc>>,

    /// Round-trip latency of the last successful ping, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Most recent error observed on this connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Consecutive failed health checks / reconnection attempts.
    /// Reset to zero by a successful ping.
    pub retry_count: u32,

    /// Number of tools the server advertised at last listing.
    pub tool_count: usize,

    /// Number of resources the server advertised at last listing.
    pub resource_count: usize,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ServerState::Stopped,
            connected: false,
            last_ping_at: None,
            response_time_ms: None,
            last_error: None,
            retry_count: 0,
            tool_count: 0,
            resource_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(ServerState::Connected.is_connected());
        assert!(!ServerState::Connected.is_terminal());

        let reconnecting = ServerState::Reconnecting { attempt: 2 };
        assert!(!reconnecting.is_connected());
        assert!(!reconnecting.is_terminal());

        assert!(ServerState::Unavailable.is_terminal());
        assert!(ServerState::Stopped.is_terminal());
    }

    #[test]
    fn test_serialization() {
        let status = ConnectionStatus {
            state: ServerState::Reconnecting { attempt: 3 },
            retry_count: 3,
            last_error: Some("connection closed".to_string()),
            ..ConnectionStatus::default()
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"reconnecting\""));
        assert!(json.contains("\"attempt\":3"));
        assert!(json.contains("\"retryCount\":3"));
        assert!(!json.contains("lastPingAt"));
    }
}
