//! Server lifecycle supervision.
//!
//! Keeps a registry of running servers, pings each one on a fixed
//! interval, and reconnects crashed processes with bounded exponential
//! backoff. After the reconnect budget is exhausted a server is parked
//! in the terminal `Unavailable` state until an explicit restart.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use conductor_core::{
    ConnectionStatus, PromptDescriptor, ResourceDescriptor, ServerConfig, ServerEvent, ServerState,
    ToolCallOutcome, ToolDescriptor,
};

use crate::connection::{ConnectOptions, ConnectionError, ServerConnection};

/// Errors from supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Server already running: {0}")]
    AlreadyRunning(String),

    #[error("Server not running: {0}")]
    NotRunning(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Supervision timing knobs. Defaults match production behavior; tests
/// compress them to millisecond scale.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between liveness pings.
    pub health_interval: Duration,
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before a server is parked as `Unavailable`.
    pub max_reconnect_attempts: u32,
    /// Bound on concurrent connection handshakes.
    pub max_concurrent_connects: usize,
    /// Per-connection options.
    pub connect: ConnectOptions,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            max_concurrent_connects: 2,
            connect: ConnectOptions::default(),
        }
    }
}

impl SupervisorConfig {
    /// Backoff delay for the given 1-based attempt: base, 2x, 4x, ...
    fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// One supervised server.
struct Supervised {
    config: ServerConfig,
    connection: Arc<ServerConnection>,
    status: ConnectionStatus,
    /// Request id counter shared across reconnects of this server.
    next_id: Arc<AtomicU64>,
    cancel: CancellationToken,
    monitor: Option<tokio::task::JoinHandle<()>>,
}

struct Inner {
    config: SupervisorConfig,
    servers: RwLock<HashMap<String, Supervised>>,
    /// Names claimed by in-flight `start` calls that have not registered
    /// yet. Only mutated while holding the `servers` write lock, so a
    /// name is never claimable twice.
    starting: std::sync::Mutex<HashSet<String>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    connect_gate: Semaphore,
}

/// Supervisor for a fleet of MCP servers.
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connect_gate = Semaphore::new(config.max_concurrent_connects);
        Self {
            inner: Arc::new(Inner {
                config,
                servers: RwLock::new(HashMap::new()),
                starting: std::sync::Mutex::new(HashSet::new()),
                events: events_tx,
                connect_gate,
            }),
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Take the lifecycle event receiver. Available once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Start supervising a server: connect, discover its surface, and
    /// spawn the health loop.
    ///
    /// A server parked in a terminal state (`Unavailable`, `Stopped`)
    /// may be restarted; starting a live one is an error.
    pub async fn start(&self, config: ServerConfig) -> Result<ConnectionStatus, SupervisorError> {
        start_server(Arc::clone(&self.inner), config).await
    }

    /// Start several servers, bounded by the connect semaphore.
    /// Returns per-server outcomes; one failure never aborts the rest.
    pub async fn start_all(
        &self,
        configs: Vec<ServerConfig>,
    ) -> Vec<(String, Result<ConnectionStatus, SupervisorError>)> {
        let mut tasks = tokio::task::JoinSet::new();
        for config in configs {
            let inner = Arc::clone(&self.inner);
            let name = config.name.clone();
            tasks.spawn(async move {
                let result = start_server(inner, config).await;
                (name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(outcome) = joined {
                results.push(outcome);
            }
        }
        results
    }

    /// Stop a server and remove it from supervision.
    ///
    /// Cancels the health loop and awaits it before disconnecting, so
    /// no tick or reconnect attempt can happen after this returns.
    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let mut entry = {
            let mut servers = self.inner.servers.write().await;
            servers
                .remove(name)
                .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?
        };

        entry.cancel.cancel();
        if let Some(monitor) = entry.monitor.take() {
            let _ = monitor.await;
        }
        entry.connection.disconnect().await;

        tracing::info!(server = %name, "Server stopped");
        let _ = self.inner.events.send(ServerEvent::Stopped {
            server: name.to_string(),
        });

        Ok(())
    }

    /// Stop every supervised server.
    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let servers = self.inner.servers.read().await;
            servers.keys().cloned().collect()
        };

        for name in names {
            if let Err(err) = self.stop(&name).await {
                tracing::warn!(server = %name, error = %err, "Failed to stop server");
            }
        }
    }

    /// Status snapshot for one server.
    pub async fn status(&self, name: &str) -> Option<ConnectionStatus> {
        let servers = self.inner.servers.read().await;
        servers.get(name).map(|entry| entry.status.clone())
    }

    /// Status snapshots for every supervised server.
    pub async fn all_statuses(&self) -> HashMap<String, ConnectionStatus> {
        let servers = self.inner.servers.read().await;
        servers
            .iter()
            .map(|(name, entry)| (name.clone(), entry.status.clone()))
            .collect()
    }

    /// Whether a server is currently supervised.
    pub async fn is_running(&self, name: &str) -> bool {
        let servers = self.inner.servers.read().await;
        servers.contains_key(name)
    }

    pub async fn ping(&self, name: &str) -> Result<Duration, SupervisorError> {
        let connection = self.connection(name).await?;
        Ok(connection.ping().await?)
    }

    pub async fn list_tools(&self, name: &str) -> Result<Vec<ToolDescriptor>, SupervisorError> {
        let connection = self.connection(name).await?;
        Ok(connection.list_tools().await?)
    }

    pub async fn list_resources(
        &self,
        name: &str,
    ) -> Result<Vec<ResourceDescriptor>, SupervisorError> {
        let connection = self.connection(name).await?;
        Ok(connection.list_resources().await?)
    }

    pub async fn list_prompts(&self, name: &str) -> Result<Vec<PromptDescriptor>, SupervisorError> {
        let connection = self.connection(name).await?;
        Ok(connection.list_prompts().await?)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolCallOutcome, SupervisorError> {
        let connection = self.connection(name).await?;
        Ok(connection.call_tool(tool, arguments).await?)
    }

    pub async fn read_resource(&self, name: &str, uri: &str) -> Result<Value, SupervisorError> {
        let connection = self.connection(name).await?;
        Ok(connection.read_resource(uri).await?)
    }

    /// Connection handle for a server. The registry lock is released
    /// before any I/O happens on the handle.
    pub(crate) async fn connection(
        &self,
        name: &str,
    ) -> Result<Arc<ServerConnection>, SupervisorError> {
        let servers = self.inner.servers.read().await;
        servers
            .get(name)
            .map(|entry| Arc::clone(&entry.connection))
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

/// Connect, discover the server's surface, register it, and spawn its
/// health loop. Shared by `start` and the `start_all` worker tasks.
async fn start_server(
    inner: Arc<Inner>,
    config: ServerConfig,
) -> Result<ConnectionStatus, SupervisorError> {
    let name = config.name.clone();

    // Claim the name before connecting: evict a terminal entry, reject
    // a live one or one another start call is already bringing up.
    let next_id = {
        let mut servers = inner.servers.write().await;
        if !claim_name(&inner, &name) {
            return Err(SupervisorError::AlreadyRunning(name));
        }
        let prior_id = match servers.get(&name) {
            Some(entry) if !entry.status.state.is_terminal() => {
                release_name(&inner, &name);
                return Err(SupervisorError::AlreadyRunning(name));
            }
            Some(entry) => Some(Arc::clone(&entry.next_id)),
            None => None,
        };
        servers.remove(&name);
        prior_id.unwrap_or_else(|| Arc::new(AtomicU64::new(1)))
    };

    let connected = {
        let _permit = inner.connect_gate.acquire().await;
        ServerConnection::connect(&config, Arc::clone(&next_id), inner.config.connect.clone()).await
    };
    let connection = match connected {
        Ok(connection) => Arc::new(connection),
        Err(err) => {
            release_name(&inner, &name);
            return Err(err.into());
        }
    };

    let (tool_count, resource_count) = discover_counts(&connection).await;
    let status = ConnectionStatus {
        state: ServerState::Connected,
        connected: true,
        tool_count,
        resource_count,
        ..ConnectionStatus::default()
    };

    // Register before spawning the monitor so its first snapshot always
    // finds the entry.
    let cancel = CancellationToken::new();
    {
        let mut servers = inner.servers.write().await;
        servers.insert(
            name.clone(),
            Supervised {
                config,
                connection,
                status: status.clone(),
                next_id,
                cancel: cancel.clone(),
                monitor: None,
            },
        );
        release_name(&inner, &name);
    }

    let monitor = tokio::spawn(monitor_loop(Arc::clone(&inner), name.clone(), cancel));
    {
        let mut servers = inner.servers.write().await;
        if let Some(entry) = servers.get_mut(&name) {
            entry.monitor = Some(monitor);
        }
    }

    tracing::info!(server = %name, tool_count, "Server supervised");
    let _ = inner.events.send(ServerEvent::Connected {
        server: name,
        tool_count,
    });

    Ok(status)
}

/// Claim a name for an in-flight start. Returns false when another
/// start call already holds it. Callers must hold the `servers` write
/// lock so the claim and the registry check are one atomic step.
fn claim_name(inner: &Inner, name: &str) -> bool {
    let mut starting = inner
        .starting
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    starting.insert(name.to_string())
}

fn release_name(inner: &Inner, name: &str) {
    let mut starting = inner
        .starting
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    starting.remove(name);
}

async fn discover_counts(connection: &ServerConnection) -> (usize, usize) {
    let tool_count = connection.list_tools().await.map_or(0, |tools| tools.len());
    let resource_count = connection
        .list_resources()
        .await
        .map_or(0, |resources| resources.len());
    (tool_count, resource_count)
}

enum Recovery {
    Recovered,
    GaveUp,
    Cancelled,
}

/// Health loop for one server: ping on an interval, reconnect on
/// failure or process death, stop on cancellation.
async fn monitor_loop(inner: Arc<Inner>, name: String, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.health_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the connection was just
    // established, so skip it.
    ticker.tick().await;

    loop {
        let Some((connection, closed)) = snapshot(&inner, &name).await else {
            break;
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            () = closed.cancelled() => {
                tracing::warn!(server = %name, "Server process died");
                let _ = inner.events.send(ServerEvent::Disconnected {
                    server: name.clone(),
                    reason: "process exited".to_string(),
                });
                match handle_down(&inner, &name, &cancel).await {
                    Recovery::Recovered => {}
                    Recovery::GaveUp | Recovery::Cancelled => break,
                }
            }
            _ = ticker.tick() => {
                match connection.ping().await {
                    Ok(rtt) => {
                        update_status(&inner, &name, |status| {
                            status.last_ping_at = Some(chrono::Utc::now());
                            #[allow(clippy::cast_possible_truncation)]
                            {
                                status.response_time_ms = Some(rtt.as_millis() as u64);
                            }
                            status.retry_count = 0;
                            status.last_error = None;
                        })
                        .await;
                    }
                    Err(err) => {
                        tracing::warn!(server = %name, error = %err, "Ping failed");
                        let _ = inner.events.send(ServerEvent::Disconnected {
                            server: name.clone(),
                            reason: err.to_string(),
                        });
                        match handle_down(&inner, &name, &cancel).await {
                            Recovery::Recovered => {}
                            Recovery::GaveUp | Recovery::Cancelled => break,
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(server = %name, "Health loop finished");
}

/// Reconnect with bounded exponential backoff. Exhausting the budget
/// parks the server as `Unavailable`.
async fn handle_down(inner: &Arc<Inner>, name: &str, cancel: &CancellationToken) -> Recovery {
    // Reap the dead connection first.
    if let Some((connection, _)) = snapshot(inner, name).await {
        connection.disconnect().await;
    }

    let max_attempts = inner.config.max_reconnect_attempts;
    for attempt in 1..=max_attempts {
        update_status(inner, name, |status| {
            status.state = ServerState::Reconnecting { attempt };
            status.connected = false;
            status.retry_count = attempt;
        })
        .await;

        let delay = inner.config.reconnect_delay(attempt);
        tracing::info!(server = %name, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
        tokio::select! {
            () = cancel.cancelled() => return Recovery::Cancelled,
            () = tokio::time::sleep(delay) => {}
        }

        let Some((config, next_id)) = connect_params(inner, name).await else {
            // Entry removed while we were backing off.
            return Recovery::Cancelled;
        };

        let connected = {
            let _permit = inner.connect_gate.acquire().await;
            ServerConnection::connect(&config, next_id, inner.config.connect.clone()).await
        };

        match connected {
            Ok(connection) => {
                let connection = Arc::new(connection);
                let (tool_count, resource_count) = discover_counts(&connection).await;

                let mut servers = inner.servers.write().await;
                let Some(entry) = servers.get_mut(name) else {
                    drop(servers);
                    connection.disconnect().await;
                    return Recovery::Cancelled;
                };
                entry.connection = connection;
                entry.status.state = ServerState::Connected;
                entry.status.connected = true;
                entry.status.retry_count = 0;
                entry.status.last_error = None;
                entry.status.tool_count = tool_count;
                entry.status.resource_count = resource_count;
                drop(servers);

                tracing::info!(server = %name, attempt, "Reconnected");
                let _ = inner.events.send(ServerEvent::Reconnected {
                    server: name.to_string(),
                    attempt,
                });
                return Recovery::Recovered;
            }
            Err(err) => {
                tracing::warn!(server = %name, attempt, error = %err, "Reconnect failed");
                update_status(inner, name, |status| {
                    status.last_error = Some(err.to_string());
                })
                .await;
            }
        }
    }

    update_status(inner, name, |status| {
        status.state = ServerState::Unavailable;
        status.connected = false;
    })
    .await;

    tracing::warn!(server = %name, attempts = max_attempts, "Giving up on server");
    let _ = inner.events.send(ServerEvent::Unavailable {
        server: name.to_string(),
        attempts: max_attempts,
    });
    Recovery::GaveUp
}

async fn snapshot(
    inner: &Arc<Inner>,
    name: &str,
) -> Option<(Arc<ServerConnection>, CancellationToken)> {
    let servers = inner.servers.read().await;
    servers
        .get(name)
        .map(|entry| (Arc::clone(&entry.connection), entry.connection.closed()))
}

async fn connect_params(inner: &Arc<Inner>, name: &str) -> Option<(ServerConfig, Arc<AtomicU64>)> {
    let servers = inner.servers.read().await;
    servers
        .get(name)
        .map(|entry| (entry.config.clone(), Arc::clone(&entry.next_id)))
}

async fn update_status(inner: &Arc<Inner>, name: &str, apply: impl FnOnce(&mut ConnectionStatus)) {
    let mut servers = inner.servers.write().await;
    if let Some(entry) = servers.get_mut(name) {
        apply(&mut entry.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays_double() {
        let config = SupervisorConfig::default();
        assert_eq!(config.reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(config.reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(config.reconnect_delay(4), Duration::from_secs(8));
        assert_eq!(config.reconnect_delay(5), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_status_of_unknown_server() {
        let supervisor = ConnectionSupervisor::default();
        assert!(supervisor.status("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_unknown_server() {
        let supervisor = ConnectionSupervisor::default();
        let result = supervisor.stop("ghost").await;
        assert!(matches!(result, Err(SupervisorError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_events_receiver_taken_once() {
        let supervisor = ConnectionSupervisor::default();
        assert!(supervisor.take_events().is_some());
        assert!(supervisor.take_events().is_none());
    }
}
