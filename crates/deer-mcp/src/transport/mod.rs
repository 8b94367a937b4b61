//! MCP transport implementations.
//!
//! A transport moves serialized JSON-RPC messages to a server and pushes
//! every message it receives into the connection's [`PendingRequests`]
//! table. Two transports exist:
//!
//! - [`StdioTransport`] spawns a child process and speaks newline-delimited
//!   JSON over its stdin/stdout.
//! - [`HttpTransport`] POSTs each message to a streamable HTTP endpoint and
//!   dispatches the JSON or SSE reply.

use std::sync::Arc;

use async_trait::async_trait;
use deer_core::{McpServerConfig, ServerTransport};

use crate::error::TransportError;
use crate::pending::PendingRequests;

mod http;
mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// Trait for MCP transport implementations.
///
/// Receiving is push-based: implementations feed incoming messages into the
/// [`PendingRequests`] table they were opened with, and close that table with
/// a connection-lost reason when the underlying stream ends.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one serialized message to the server.
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Close the transport. Calling this more than once is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Open the transport described by `config` for server `name`.
pub async fn open(
    name: &str,
    config: &McpServerConfig,
    pending: Arc<PendingRequests>,
) -> Result<Arc<dyn Transport>, TransportError> {
    match &config.transport {
        ServerTransport::Stdio {
            command,
            args,
            env,
            working_dir,
        } => {
            let transport =
                StdioTransport::spawn(name, command, args, env, working_dir.as_deref(), pending)
                    .await?;
            Ok(Arc::new(transport))
        }
        ServerTransport::StreamableHttp { url } => {
            let transport = HttpTransport::new(name, url, pending)?;
            Ok(Arc::new(transport))
        }
    }
}
