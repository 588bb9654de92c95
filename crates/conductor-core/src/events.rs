//! Server lifecycle events.
//!
//! The supervisor publishes these on an `mpsc` channel that the embedding
//! layer drains at its leisure. Typed messages over a channel replace the
//! event-emitter callback style, so no consumer code runs re-entrantly
//! inside supervisor locks.
//!
//! # Wire Format
//!
//! Events serialize with a `type` tag for frontend compatibility:
//!
//! ```json
//! { "type": "disconnected", "server": "files", "reason": "process exited" }
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle events for supervised servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A server connected and completed its handshake.
    Connected {
        /// Server name.
        server: String,
        /// Number of tools discovered at connect time.
        tool_count: usize,
    },

    /// A server's connection was lost (crash, EOF, or failed ping).
    Disconnected {
        /// Server name.
        server: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A lost server came back after one or more reconnection attempts.
    Reconnected {
        /// Server name.
        server: String,
        /// Which attempt succeeded (1-based).
        attempt: u32,
    },

    /// The reconnection budget is exhausted; the server is terminal
    /// until started again explicitly.
    Unavailable {
        /// Server name.
        server: String,
        /// How many reconnection attempts were made.
        attempts: u32,
    },

    /// A server was stopped on request.
    Stopped {
        /// Server name.
        server: String,
    },
}

impl ServerEvent {
    /// Name of the server this event concerns.
    #[must_use]
    pub fn server(&self) -> &str {
        match self {
            Self::Connected { server, .. }
            | Self::Disconnected { server, .. }
            | Self::Reconnected { server, .. }
            | Self::Unavailable { server, .. }
            | Self::Stopped { server } => server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = ServerEvent::Unavailable {
            server: "files".to_string(),
            attempts: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"unavailable\""));
        assert!(json.contains("\"attempts\":5"));
        assert_eq!(event.server(), "files");
    }
}
