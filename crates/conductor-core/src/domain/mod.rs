//! Domain model for managed MCP servers.

mod catalog;
mod config;
mod metrics;
mod status;

pub use catalog::{PromptDescriptor, ResourceDescriptor, ToolCallOutcome, ToolDescriptor};
pub use config::ServerConfig;
pub use metrics::{ServerMetrics, TotalMetrics, TOKENS_PER_RESOURCE};
pub use status::{ConnectionStatus, ServerState};
