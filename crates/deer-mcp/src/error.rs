//! Errors raised by MCP clients, transports and the server registry.

use std::time::Duration;

use thiserror::Error;

/// Failures of the byte pipe itself, below JSON-RPC.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    #[error("write error: {0}")]
    WriteError(std::io::Error),

    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// The peer closed its end (stdout EOF).
    #[error("connection closed")]
    ConnectionClosed,

    /// Send attempted after `close()` or after the peer went away.
    #[error("not connected")]
    NotConnected,

    #[error("failed to terminate process: {0}")]
    TerminateFailed(std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP endpoint answered with a non-success status.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    /// The configured endpoint is not a usable URL.
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
}

/// Everything a client or registry operation can fail with.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The initialize exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Operation attempted before the handshake completed.
    #[error("server '{0}' is not initialized")]
    NotInitialized(String),

    /// No response within the request timeout; the entry was removed.
    #[error("request '{method}' timed out after {}ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    /// The server answered with a JSON-RPC error object.
    #[error("{}", remote_message(.code, .message))]
    Remote { code: Option<i64>, message: String },

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server already exists: {0}")]
    DuplicateServer(String),

    /// The client was disconnected; pending and later requests fail with this.
    #[error("server '{0}' is disconnected")]
    Disconnected(String),

    /// The connection died underneath the client (process exit, stream closed).
    #[error("connection to server '{server}' lost: {reason}")]
    ConnectionLost { server: String, reason: String },

    /// A message that is not valid JSON-RPC.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A result that does not match the expected payload type.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `connect()` called on a client that is not fresh.
    #[error("invalid connection state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

fn remote_message(code: &Option<i64>, message: &str) -> String {
    match code {
        Some(code) => format!("MCP error (code {}): {}", code, message),
        None => format!("MCP error: {}", message),
    }
}

impl McpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a remote error from a JSON-RPC error object.
    pub fn remote(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(server: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            server: server.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Reclassify an error raised while the handshake was in flight.
    ///
    /// Transport failures keep their kind; anything that means "the server
    /// did not complete initialize" becomes a handshake error.
    pub(crate) fn into_handshake(self) -> Self {
        match self {
            Self::Transport(_) | Self::Handshake(_) => self,
            other => Self::Handshake(other.to_string()),
        }
    }
}

impl From<McpError> for deer_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::ServerNotFound(name) => deer_core::Error::NotFound(format!("MCP server '{}'", name)),
            other => deer_core::Error::Mcp(other.to_string()),
        }
    }
}
