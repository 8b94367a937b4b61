//! Registry of connected MCP servers.
//!
//! [`ServerRegistry`] owns one [`McpClient`] per server name. A server is
//! only registered after its handshake succeeded, and it is removed as one
//! unit (client and config together). The map lock is never held across
//! network I/O: callers take an `Arc<McpClient>` snapshot and release it.

use std::collections::BTreeMap;
use std::sync::Arc;

use deer_core::{McpConfig, McpServerConfig};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::{ClientOptions, ConnectionState, McpClient};
use crate::error::McpError;
use crate::protocol::{CallToolResult, McpToolDefinition};

#[derive(Clone)]
struct RegisteredServer {
    client: Arc<McpClient>,
    config: McpServerConfig,
}

/// Manages MCP server connections by name.
pub struct ServerRegistry {
    servers: RwLock<BTreeMap<String, RegisteredServer>>,
    options: ClientOptions,
}

impl ServerRegistry {
    /// Create an empty registry with default client options.
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    /// Create an empty registry whose clients use `options`.
    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            servers: RwLock::new(BTreeMap::new()),
            options,
        }
    }

    /// Create an empty registry using the timeout from `config`.
    ///
    /// Servers are not connected; see [`connect_all`](Self::connect_all).
    pub fn from_config(config: &McpConfig) -> Self {
        Self::with_options(ClientOptions::default().with_request_timeout(config.request_timeout()))
    }

    /// Options every new client is built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Connect to a server and register it under `name`.
    ///
    /// Nothing is registered unless the handshake succeeds.
    pub async fn add_server(
        &self,
        name: impl Into<String>,
        config: McpServerConfig,
    ) -> Result<Arc<McpClient>, McpError> {
        let name = name.into();
        if self.servers.read().await.contains_key(&name) {
            return Err(McpError::DuplicateServer(name));
        }

        let client = Arc::new(McpClient::new(name.clone(), config.clone(), self.options.clone()));
        client.connect().await?;

        let raced = {
            let mut servers = self.servers.write().await;
            if servers.contains_key(&name) {
                true
            } else {
                servers.insert(
                    name.clone(),
                    RegisteredServer {
                        client: Arc::clone(&client),
                        config,
                    },
                );
                false
            }
        };

        if raced {
            warn!(server = %name, "Server was registered concurrently, dropping new connection");
            client.disconnect().await;
            return Err(McpError::DuplicateServer(name));
        }

        info!(server = %name, "Registered MCP server");
        Ok(client)
    }

    /// Disconnect and remove a server. Returns whether it was registered.
    pub async fn remove_server(&self, name: &str) -> bool {
        let removed = self.servers.write().await.remove(name);
        match removed {
            Some(entry) => {
                entry.client.disconnect().await;
                info!(server = %name, "Removed MCP server");
                true
            }
            None => false,
        }
    }

    /// Tools of every registered server, ordered by server name.
    ///
    /// Servers are queried concurrently. A server that fails to answer is
    /// logged and left out.
    pub async fn get_all_tools(&self) -> Vec<(String, McpToolDefinition)> {
        let clients = self.snapshot().await;

        let results = join_all(clients.iter().map(|(name, client)| async move {
            (name.clone(), client.list_tools().await)
        }))
        .await;

        let mut tools = Vec::new();
        for (name, result) in results {
            match result {
                Ok(server_tools) => {
                    debug!(server = %name, tool_count = server_tools.len(), "Collected tools");
                    tools.extend(server_tools.into_iter().map(|tool| (name.clone(), tool)));
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Failed to list tools");
                }
            }
        }
        tools
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let client = self
            .get(server)
            .await
            .ok_or_else(|| McpError::ServerNotFound(server.to_string()))?;

        client.call_tool(tool, arguments).await
    }

    /// Disconnect every server and empty the registry.
    pub async fn disconnect_all(&self) {
        let entries = std::mem::take(&mut *self.servers.write().await);
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "Disconnecting all MCP servers");
        join_all(entries.values().map(|entry| entry.client.disconnect())).await;
    }

    /// Connect every enabled server in `servers` concurrently.
    ///
    /// Returns the servers that failed, with their errors. Disabled servers
    /// are skipped.
    pub async fn connect_all(
        &self,
        servers: &BTreeMap<String, McpServerConfig>,
    ) -> Vec<(String, McpError)> {
        let enabled: Vec<_> = servers
            .iter()
            .filter(|(name, config)| {
                if !config.enabled {
                    debug!(server = %name, "Skipping disabled server");
                }
                config.enabled
            })
            .collect();

        info!(count = enabled.len(), "Starting MCP servers");

        let results = join_all(enabled.into_iter().map(|(name, config)| async move {
            (name.clone(), self.add_server(name.clone(), config.clone()).await)
        }))
        .await;

        let mut failures = Vec::new();
        let mut connected = 0;
        for (name, result) in results {
            match result {
                Ok(_) => connected += 1,
                Err(e) => {
                    warn!(server = %name, error = %e, "Failed to start server");
                    failures.push((name, e));
                }
            }
        }

        info!(connected, failed = failures.len(), "MCP servers started");
        failures
    }

    /// Names of all registered servers, sorted.
    pub async fn server_names(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    /// Check if a server is registered.
    pub async fn has_server(&self, name: &str) -> bool {
        self.servers.read().await.contains_key(name)
    }

    /// Number of registered servers.
    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Whether no server is registered.
    pub async fn is_empty(&self) -> bool {
        self.servers.read().await.is_empty()
    }

    /// Get the client for a server.
    pub async fn get(&self, name: &str) -> Option<Arc<McpClient>> {
        self.servers
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.client))
    }

    /// Get the configuration a server was registered with.
    pub async fn config(&self, name: &str) -> Option<McpServerConfig> {
        self.servers
            .read()
            .await
            .get(name)
            .map(|entry| entry.config.clone())
    }

    /// Get server status.
    pub async fn server_status(&self, name: &str) -> ServerStatus {
        match self.get(name).await {
            Some(client) => ServerStatus::Registered {
                state: client.state(),
                pending: client.pending_count(),
            },
            None => ServerStatus::NotRegistered,
        }
    }

    async fn snapshot(&self) -> Vec<(String, Arc<McpClient>)> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.client)))
            .collect()
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Status of an MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// No server with that name.
    NotRegistered,
    /// Server is registered.
    Registered {
        /// Connection state.
        state: ConnectionState,
        /// Requests awaiting a response.
        pending: usize,
    },
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRegistered => write!(f, "not registered"),
            Self::Registered { state, pending } => {
                write!(f, "{} ({} pending)", state, pending)
            }
        }
    }
}
