//! # deer-mcp
//!
//! MCP (Model Context Protocol) client integration for Deer.
//!
//! This crate provides:
//! - [`McpClient`]: one JSON-RPC connection to one server, over stdio or
//!   streamable HTTP, with many requests in flight at once
//! - [`ServerRegistry`]: named clients, connected in parallel
//! - [`ParamSchema`]: normalised tool input schemas with argument validation
//! - [`McpToolWrapper`]: remote tools exposed as `deer_tools::Tool`s

use std::sync::Arc;

use once_cell::sync::OnceCell;

pub mod client;
pub mod error;
pub mod framing;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod tools;
pub mod transport;

pub use client::{ClientOptions, ConnectionState, McpClient};
pub use error::{McpError, TransportError};
pub use registry::{ServerRegistry, ServerStatus};
pub use schema::{ParamSchema, SchemaError, SchemaKind};
pub use tools::{
    create_mcp_tools, register_mcp_tools, McpToolWrapper, ResultFormat, ToolOutput,
    MCP_TOOL_PREFIX,
};

static GLOBAL_REGISTRY: OnceCell<Arc<ServerRegistry>> = OnceCell::new();

/// The process-wide registry, created with default options on first use.
///
/// Meant for the program's entry point only; everything below it should
/// receive the `Arc` explicitly.
pub fn global_registry() -> Arc<ServerRegistry> {
    Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(ServerRegistry::new())))
}

/// Create the process-wide registry with `options`.
///
/// Has no effect on options if the registry already exists.
pub fn init_global_registry(options: ClientOptions) -> Arc<ServerRegistry> {
    Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(ServerRegistry::with_options(options))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_registry_is_shared() {
        let first = init_global_registry(ClientOptions::default());
        let second = global_registry();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
