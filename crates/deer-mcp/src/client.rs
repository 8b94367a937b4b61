//! MCP client implementation.
//!
//! An [`McpClient`] owns one connection to one MCP server: it opens the
//! transport, performs the initialize handshake, and correlates requests
//! with responses by id so any number of requests can be in flight at once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deer_core::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use deer_core::McpServerConfig;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::pending::{CloseReason, PendingRequests};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListToolsParams, ListToolsResult, McpToolDefinition,
};
use crate::transport::{self, Transport};

/// Connection state for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Built but never connected.
    Created,
    /// Transport open, handshake in progress.
    Connecting,
    /// Handshake complete; requests may be sent.
    Initialized,
    /// Closed on purpose or after the connection was lost.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Connecting => write!(f, "connecting"),
            Self::Initialized => write!(f, "initialized"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Per-client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// How long a single request may wait for its response.
    pub request_timeout: Duration,
    /// Identity announced during the handshake.
    pub client_info: ClientInfo,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            client_info: ClientInfo::default(),
        }
    }
}

impl ClientOptions {
    /// Options taken from the loaded configuration.
    pub fn from_config(config: &deer_core::Config) -> Self {
        Self {
            request_timeout: config.mcp.request_timeout(),
            client_info: ClientInfo::named(&config.general.client_name),
        }
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the announced client identity.
    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }
}

/// A connection to a single MCP server.
pub struct McpClient {
    name: String,
    config: McpServerConfig,
    options: ClientOptions,
    state: RwLock<ConnectionState>,
    server_info: RwLock<Option<InitializeResult>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    pending: Arc<PendingRequests>,
    request_counter: AtomicU64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("transport", &self.config.transport_kind())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl McpClient {
    /// Create a client for server `name`. Nothing is started until [`connect`](Self::connect).
    pub fn new(name: impl Into<String>, config: McpServerConfig, options: ClientOptions) -> Self {
        let name = name.into();
        Self {
            pending: Arc::new(PendingRequests::new(name.clone())),
            name,
            config,
            options,
            state: RwLock::new(ConnectionState::Created),
            server_info: RwLock::new(None),
            transport: RwLock::new(None),
            request_counter: AtomicU64::new(1),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// The options this client was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Get the current connection state.
    ///
    /// A connection whose server went away reports `Disconnected` even
    /// before [`disconnect`](Self::disconnect) is called.
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.read();
        if state == ConnectionState::Initialized && self.pending.is_closed() {
            ConnectionState::Disconnected
        } else {
            state
        }
    }

    /// Check if the handshake completed and the connection is still up.
    pub fn is_initialized(&self) -> bool {
        self.state() == ConnectionState::Initialized
    }

    /// What the server reported about itself during the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().clone()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Open the transport and perform the initialize handshake.
    ///
    /// Only valid on a freshly created client. On any failure the client
    /// ends up disconnected with its process terminated.
    pub async fn connect(&self) -> Result<(), McpError> {
        self.begin_connect()?;

        info!(
            server = %self.name,
            transport = self.config.transport_kind(),
            target = %self.config.target(),
            "Connecting to MCP server"
        );

        let transport =
            match transport::open(&self.name, &self.config, Arc::clone(&self.pending)).await {
                Ok(transport) => transport,
                Err(e) => {
                    self.disconnect().await;
                    return Err(e.into());
                }
            };

        self.attach_and_initialize(transport).await
    }

    /// Connect over an already-open transport.
    #[cfg(test)]
    pub(crate) async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        self.begin_connect()?;
        self.attach_and_initialize(transport).await
    }

    #[cfg(test)]
    pub(crate) fn pending_table(&self) -> Arc<PendingRequests> {
        Arc::clone(&self.pending)
    }

    fn begin_connect(&self) -> Result<(), McpError> {
        let mut state = self.state.write();
        if *state != ConnectionState::Created {
            return Err(McpError::invalid_state(
                ConnectionState::Created.to_string(),
                state.to_string(),
            ));
        }
        *state = ConnectionState::Connecting;
        Ok(())
    }

    async fn attach_and_initialize(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        let attached = {
            let mut slot = self.transport.write();
            if *self.state.read() == ConnectionState::Disconnected {
                false
            } else {
                *slot = Some(Arc::clone(&transport));
                true
            }
        };
        if !attached {
            // disconnect() won the race; it never saw this transport
            if let Err(e) = transport.close().await {
                warn!(server = %self.name, error = %e, "Failed to close transport");
            }
            return Err(McpError::Disconnected(self.name.clone()));
        }

        match self.initialize().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.disconnect().await;
                Err(e.into_handshake())
            }
        }
    }

    async fn initialize(&self) -> Result<(), McpError> {
        debug!(server = %self.name, "Initializing MCP connection");

        let params = InitializeParams::new(self.options.client_info.clone());
        let result: InitializeResult = self.request("initialize", Some(params)).await?;

        {
            let mut state = self.state.write();
            if *state != ConnectionState::Connecting {
                return Err(McpError::Disconnected(self.name.clone()));
            }
            *self.server_info.write() = Some(result.clone());
            *state = ConnectionState::Initialized;
        }

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            server_version = result.server_info.version.as_deref().unwrap_or("unknown"),
            protocol_version = %result.protocol_version,
            "MCP connection initialized"
        );

        if let Err(e) = self.notify::<Value>("notifications/initialized", None).await {
            warn!(server = %self.name, error = %e, "Failed to send initialized notification");
        }

        Ok(())
    }

    /// List available tools from the server, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = ListToolsParams {
                cursor: cursor.clone(),
            };
            let page: ListToolsResult = self.request("tools/list", Some(params)).await?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(server = %self.name, cursor = %next, "Server repeated a pagination cursor");
                    break;
                }
                None => break,
            }
        }

        debug!(server = %self.name, tool_count = tools.len(), "Listed tools");

        Ok(tools)
    }

    /// Call a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.ensure_initialized()?;

        debug!(server = %self.name, tool = name, "Calling tool");

        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error");
        }

        Ok(result)
    }

    /// Close the connection.
    ///
    /// Rejects every pending request, terminates the server and marks the
    /// client disconnected. Safe to call at any time, any number of times.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), ConnectionState::Disconnected);
        let rejected = self.pending.close(CloseReason::Disconnected);
        let transport = self.transport.write().take();

        if let Some(transport) = transport {
            debug!(server = %self.name, "Closing MCP connection");
            if let Err(e) = transport.close().await {
                warn!(server = %self.name, error = %e, "Failed to close transport");
            }
        }

        if previous != ConnectionState::Disconnected {
            info!(server = %self.name, rejected, "MCP connection closed");
        }
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        match *self.state.read() {
            ConnectionState::Initialized => Ok(()),
            ConnectionState::Disconnected => Err(McpError::Disconnected(self.name.clone())),
            ConnectionState::Created | ConnectionState::Connecting => {
                Err(McpError::NotInitialized(self.name.clone()))
            }
        }
    }

    fn current_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        self.transport
            .read()
            .clone()
            .ok_or_else(|| McpError::Disconnected(self.name.clone()))
    }

    /// Generate a new request ID.
    fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and wait for its response.
    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let transport = self.current_transport()?;
        let id = self.next_request_id();
        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let rx = self.pending.register(id)?;

        debug!(server = %self.name, method = method, id = id, "Sending request");

        let timeout = self.options.request_timeout;
        let value = match tokio::time::timeout(timeout, self.exchange(transport, &message, rx)).await
        {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.pending.cancel(id);
                return Err(e);
            }
            Err(_) => {
                self.pending.cancel(id);
                warn!(server = %self.name, method = method, id = id, "Request timed out");
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid '{}' result: {}", method, e)))
    }

    async fn exchange(
        &self,
        transport: Arc<dyn Transport>,
        message: &str,
        rx: oneshot::Receiver<Result<Value, McpError>>,
    ) -> Result<Value, McpError> {
        transport.send(message).await?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::Disconnected(self.name.clone())),
        }
    }

    /// Send a notification (no response expected).
    async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<(), McpError>
    where
        P: Serialize,
    {
        let transport = self.current_transport()?;
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        transport.send(&message).await?;
        Ok(())
    }
}
