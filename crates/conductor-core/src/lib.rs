//! Core domain types for conductor.
//!
//! This crate holds the data shapes shared between the protocol machinery
//! (`conductor-mcp`) and whatever embeds it: launch configurations going
//! in, status snapshots and metrics read models coming out, and the typed
//! event union delivered over the supervisor's event channel.
//!
//! Nothing in here spawns processes or touches the wire.
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod events;

// Re-export commonly used types for convenience
pub use domain::{
    ConnectionStatus, PromptDescriptor, ResourceDescriptor, ServerConfig, ServerMetrics,
    ServerState, ToolCallOutcome, ToolDescriptor, TotalMetrics, TOKENS_PER_RESOURCE,
};
pub use events::ServerEvent;
