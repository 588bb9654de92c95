//! A single MCP server session over stdio.
//!
//! Spawns the server process, runs the initialize handshake, and then
//! multiplexes JSON-RPC requests over the child's stdin/stdout. A
//! background reader task routes responses to per-request waiters, so
//! callers can issue concurrent requests and receive replies out of
//! order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use conductor_core::{ServerConfig, ToolCallOutcome};

use crate::codec::{
    self, CodecError, Envelope, ErrorObject, FrameReader, ResponseEnvelope, JSONRPC_VERSION,
};
use crate::resolver::{self, ResolveError};

/// MCP protocol revision spoken by this client.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Errors from a server session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    CommandNotFound(#[from] ResolveError),

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn server process: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for initialize handshake")]
    HandshakeTimeout,

    #[error("Timed out waiting for response to '{method}'")]
    RequestTimeout { method: String },

    #[error("Server returned error: code={code}, message={message}")]
    Server { code: i64, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,
}

/// Tunable timeouts and client identity for a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound on the initialize request.
    pub handshake_timeout: Duration,
    /// Bound on every other request.
    pub request_timeout: Duration,
    /// How long to wait for the child to exit at each shutdown stage
    /// (stdin close, then SIGTERM) before escalating.
    pub disconnect_grace: Duration,
    /// `clientInfo.name` sent during initialize.
    pub client_name: String,
    /// `clientInfo.version` sent during initialize.
    pub client_version: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_secs(3),
            client_name: "conductor".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Result of the initialize handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

/// Server identity from initialize.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Feature surface advertised by the server. Listing calls for a
/// surface the server did not advertise are short-circuited locally.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// Session lifecycle. Any state can jump to `Closed` on a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

type PendingMap = std::sync::Mutex<HashMap<u64, oneshot::Sender<Result<Value, ConnectionError>>>>;
type StateSlot = Arc<std::sync::Mutex<ConnectionState>>;

fn set_state(slot: &StateSlot, state: ConnectionState) {
    if let Ok(mut guard) = slot.lock() {
        // Closed is terminal.
        if *guard != ConnectionState::Closed {
            *guard = state;
        }
    }
}

/// Live session with one spawned MCP server.
#[derive(Debug)]
pub struct ServerConnection {
    name: String,
    child: Mutex<Option<Child>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: Arc<PendingMap>,
    next_id: Arc<AtomicU64>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: CancellationToken,
    options: ConnectOptions,
    init: std::sync::RwLock<Option<InitializeResult>>,
    state: StateSlot,
}

impl ServerConnection {
    /// Spawn the configured server and complete the MCP handshake.
    ///
    /// `next_id` supplies request ids; passing the same counter across
    /// reconnects keeps ids monotonic for the server's whole lifetime.
    pub async fn connect(
        config: &ServerConfig,
        next_id: Arc<AtomicU64>,
        options: ConnectOptions,
    ) -> Result<Self, ConnectionError> {
        let state: StateSlot = Arc::new(std::sync::Mutex::new(ConnectionState::Idle));

        config.validate().map_err(ConnectionError::InvalidConfig)?;

        if let Some(cwd) = &config.cwd {
            crate::path::validate_working_dir(cwd).map_err(ConnectionError::InvalidConfig)?;
        }

        set_state(&state, ConnectionState::Connecting);
        let resolution = resolver::resolve(&config.command, &config.extra_dirs).await?;
        for warning in &resolution.warnings {
            tracing::warn!(server = %config.name, "{warning}");
        }

        let child_path = crate::path::build_child_path(&resolution.path, &config.extra_dirs);

        let mut command = tokio::process::Command::new(&resolution.path);
        command
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("PATH", &child_path)
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            ConnectionError::Spawn(format!(
                "Failed to spawn '{}': {e} (args: {:?}, cwd: {:?})",
                resolution.path.display(),
                config.args,
                config.cwd
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConnectionError::Spawn("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConnectionError::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConnectionError::Spawn("Failed to capture stderr".to_string()))?;

        spawn_stderr_logger(config.name.clone(), stderr);

        let stdin = Arc::new(Mutex::new(Some(stdin)));
        let pending: Arc<PendingMap> = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let reader = spawn_reader_task(ReaderContext {
            server: config.name.clone(),
            stdout,
            stdin: Arc::clone(&stdin),
            pending: Arc::clone(&pending),
            closed: closed.clone(),
            state: Arc::clone(&state),
        });

        let connection = Self {
            name: config.name.clone(),
            child: Mutex::new(Some(child)),
            stdin,
            pending,
            next_id,
            reader: Mutex::new(Some(reader)),
            closed,
            options,
            init: std::sync::RwLock::new(None),
            state,
        };

        set_state(&connection.state, ConnectionState::Handshaking);
        match connection.initialize().await {
            Ok(()) => {
                set_state(&connection.state, ConnectionState::Ready);
                Ok(connection)
            }
            Err(err) => {
                connection.disconnect().await;
                Err(err)
            }
        }
    }

    async fn initialize(&self) -> Result<(), ConnectionError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            },
            "capabilities": {},
        });

        let result = self
            .request_with_timeout("initialize", Some(params), self.options.handshake_timeout)
            .await
            .map_err(|err| match err {
                ConnectionError::RequestTimeout { .. } => ConnectionError::HandshakeTimeout,
                other => other,
            })?;

        let init: InitializeResult = serde_json::from_value(result)?;
        tracing::info!(
            server = %self.name,
            remote = %init.server_info.name,
            protocol = %init.protocol_version,
            "MCP session initialized"
        );

        if let Ok(mut slot) = self.init.write() {
            *slot = Some(init);
        }

        self.notify("notifications/initialized", None).await
    }

    /// Liveness probe. Returns the round-trip time on success.
    pub async fn ping(&self) -> Result<Duration, ConnectionError> {
        let started = std::time::Instant::now();
        self.request("ping", None).await?;
        Ok(started.elapsed())
    }

    /// List tools. Servers that did not advertise the tools capability
    /// return an empty list without a round trip.
    pub async fn list_tools(&self) -> Result<Vec<conductor_core::ToolDescriptor>, ConnectionError> {
        if !self.has_capability(|c| c.tools.is_some()) {
            return Ok(Vec::new());
        }

        let result = self.request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    /// List resources, gated on the resources capability.
    pub async fn list_resources(
        &self,
    ) -> Result<Vec<conductor_core::ResourceDescriptor>, ConnectionError> {
        if !self.has_capability(|c| c.resources.is_some()) {
            return Ok(Vec::new());
        }

        let result = self.request("resources/list", None).await?;
        let resources = result.get("resources").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(resources)?)
    }

    /// List prompts, gated on the prompts capability.
    pub async fn list_prompts(
        &self,
    ) -> Result<Vec<conductor_core::PromptDescriptor>, ConnectionError> {
        if !self.has_capability(|c| c.prompts.is_some()) {
            return Ok(Vec::new());
        }

        let result = self.request("prompts/list", None).await?;
        let prompts = result.get("prompts").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(prompts)?)
    }

    /// Invoke a tool. Tool-level failures (`isError: true`) come back
    /// as an error outcome, not an `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolCallOutcome, ConnectionError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;

        let content = result.get("content").cloned().unwrap_or_else(|| json!([]));
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if is_error {
            let message = content
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            Ok(ToolCallOutcome::error(message))
        } else {
            Ok(ToolCallOutcome::success(content))
        }
    }

    /// Read a resource by URI. Returns the raw `contents` array.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, ConnectionError> {
        let params = json!({ "uri": uri });
        let result = self.request("resources/read", Some(params)).await?;
        Ok(result.get("contents").cloned().unwrap_or_else(|| json!([])))
    }

    /// Send a request and wait for its response under the default
    /// request timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ConnectionError> {
        self.request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| ConnectionError::Protocol("Pending map poisoned".to_string()))?;
            pending.insert(id, tx);
        }

        let line = codec::encode_request(id, method, params)?;
        if let Err(err) = self.write_line(&line).await {
            self.remove_pending(id);
            return Err(err);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::ConnectionClosed),
            Err(_) => {
                self.remove_pending(id);
                Err(ConnectionError::RequestTimeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ConnectionError> {
        let line = codec::encode_notification(method, params)?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), ConnectionError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn remove_pending(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    fn has_capability(&self, check: impl Fn(&ServerCapabilities) -> bool) -> bool {
        self.init
            .read()
            .map(|init| init.as_ref().is_some_and(|i| check(&i.capabilities)))
            .unwrap_or(false)
    }

    /// Identity of the remote server, once initialized.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.init
            .read()
            .ok()
            .and_then(|init| init.as_ref().map(|i| i.server_info.clone()))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map_or(ConnectionState::Closed, |guard| *guard)
    }

    /// Whether the session is still usable.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready && !self.closed.is_cancelled()
    }

    /// Token cancelled when the session dies (server exit, stdout EOF,
    /// or explicit disconnect). Supervisors select on this.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Shut the session down, escalating if the server lingers:
    /// close stdin, wait, SIGTERM, wait, SIGKILL. Idempotent.
    pub async fn disconnect(&self) {
        set_state(&self.state, ConnectionState::Closing);
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        let grace = self.options.disconnect_grace;
        if timeout(grace, child.wait()).await.is_err() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                tracing::debug!(server = %self.name, pid, "Sending SIGTERM");
                #[allow(clippy::cast_possible_wrap)]
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            if timeout(grace, child.wait()).await.is_err() {
                tracing::warn!(server = %self.name, "Server ignored SIGTERM, killing");
                let _ = child.kill().await;
            }
        }

        self.closed.cancel();

        if let Some(reader) = self.reader.lock().await.take() {
            let _ = reader.await;
        }

        if let Ok(mut guard) = self.state.lock() {
            *guard = ConnectionState::Closed;
        }
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        // kill_on_drop on the child is the backstop when disconnect()
        // was never awaited.
        self.closed.cancel();
    }
}

struct ReaderContext {
    server: String,
    stdout: tokio::process::ChildStdout,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: Arc<PendingMap>,
    closed: CancellationToken,
    state: StateSlot,
}

/// Reader loop: decode stdout frames and route them.
///
/// Responses complete their pending waiter; late or unknown ids are
/// dropped. Server-initiated requests get a method-not-found error
/// reply. Malformed lines (npm banners and the like) are skipped. On
/// EOF every pending waiter is failed and the closed token fires.
fn spawn_reader_task(ctx: ReaderContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ReaderContext {
            server,
            stdout,
            stdin,
            pending,
            closed,
            state,
        } = ctx;
        let mut frames = FrameReader::new(stdout);

        loop {
            let frame = match frames.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(CodecError::Io(err)) => {
                    tracing::warn!(server = %server, error = %err, "Read failed");
                    break;
                }
                Err(err) => {
                    tracing::warn!(server = %server, error = %err, "Skipping bad frame");
                    continue;
                }
            };

            match codec::decode_line(&frame) {
                Ok(Envelope::Response(response)) => {
                    route_response(&server, &pending, response);
                }
                Ok(Envelope::Notification(note)) => {
                    tracing::debug!(server = %server, method = %note.method, "Notification");
                }
                Ok(Envelope::Request(request)) => {
                    reply_method_not_found(&stdin, request.id).await;
                }
                Err(_) => {
                    // Startup chatter from npx and friends.
                    tracing::debug!(server = %server, line = %frame, "Skipping non-JSON-RPC output");
                }
            }
        }

        drain_pending(&pending);
        if let Ok(mut guard) = state.lock() {
            *guard = ConnectionState::Closed;
        }
        closed.cancel();
        tracing::debug!(server = %server, "Reader task finished");
    })
}

fn route_response(server: &str, pending: &PendingMap, response: ResponseEnvelope) {
    let waiter = pending
        .lock()
        .ok()
        .and_then(|mut pending| pending.remove(&response.id));

    let Some(waiter) = waiter else {
        // Response for a request we stopped waiting on.
        tracing::debug!(server = %server, id = response.id, "Dropping late response");
        return;
    };

    let outcome = if let Some(error) = response.error {
        Err(ConnectionError::Server {
            code: error.code,
            message: error.message,
        })
    } else {
        Ok(response.result.unwrap_or(Value::Null))
    };

    let _ = waiter.send(outcome);
}

async fn reply_method_not_found(stdin: &Mutex<Option<ChildStdin>>, id: u64) {
    let response = Envelope::Response(ResponseEnvelope {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result: None,
        error: Some(ErrorObject {
            code: -32601,
            message: "Method not supported".to_string(),
            data: None,
        }),
    });

    let Ok(line) = codec::encode_envelope(&response) else {
        return;
    };

    let mut guard = stdin.lock().await;
    if let Some(stdin) = guard.as_mut() {
        let _ = stdin.write_all(line.as_bytes()).await;
        let _ = stdin.flush().await;
    }
}

fn drain_pending(pending: &PendingMap) {
    let Ok(mut pending) = pending.lock() else {
        return;
    };
    for (_, waiter) in pending.drain() {
        let _ = waiter.send(Err(ConnectionError::ConnectionClosed));
    }
}

/// Forward the child's stderr to the log so server-side failures are
/// visible without attaching a debugger.
fn spawn_stderr_logger(server: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                tracing::debug!(server = %server, "stderr: {line}");
            }
        }
    });
}
