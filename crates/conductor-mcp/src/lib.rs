//! MCP protocol client core.
//!
//! Spawns MCP servers as subprocesses, speaks newline-delimited
//! JSON-RPC 2.0 over their stdio, supervises the connections with
//! periodic health checks and bounded reconnection, and aggregates
//! per-server metrics.
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

pub mod codec;
pub mod connection;
pub mod metrics;
pub(crate) mod path;
pub mod resolver;
pub mod supervisor;

// Re-export domain types from core for convenience
pub use conductor_core::{
    ConnectionStatus, PromptDescriptor, ResourceDescriptor, ServerConfig, ServerEvent,
    ServerMetrics, ServerState, ToolCallOutcome, ToolDescriptor, TotalMetrics,
};

// Re-export this crate's public surface
pub use connection::{ConnectOptions, ConnectionError, ConnectionState, ServerConnection};
pub use metrics::{MetricsError, MetricsService, DEFAULT_METRICS_TTL};
pub use resolver::{Resolution, ResolveError};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorError};

// Dev-dependencies exercised only by integration tests.
#[cfg(test)]
use anyhow as _;
#[cfg(test)]
use tempfile as _;
