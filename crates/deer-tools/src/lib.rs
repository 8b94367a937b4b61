//! # deer-tools
//!
//! The host side of tool invocation for Deer.
//!
//! Tools implement the [`Tool`] trait and live in a [`ToolRegistry`], keyed by
//! name. Remote MCP tools (see `deer-mcp`) are wrapped as ordinary [`Tool`]s
//! whose category names the server they came from, so the registry can drop
//! or list one server's tools at once.
//!
//! ```ignore
//! let mut tools = ToolRegistry::new();
//! deer_mcp::register_mcp_tools(&servers, &mut tools).await;
//!
//! let call = ToolCall::new("call_1", "mcp__echo__ping", json!({}));
//! let result = tools.execute(&call, &ToolContext::default()).await?;
//! ```

use thiserror::Error;

pub mod registry;

pub use registry::{Tool, ToolContext, ToolRegistry};

/// Why a tool call could not be run.
///
/// A tool that ran and failed is not an error here; it produces a failed
/// `ToolResult` instead.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Arguments rejected before anything was sent.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Create an invalid arguments error.
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

impl From<ToolError> for deer_core::Error {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(name) => deer_core::Error::NotFound(format!("tool '{}'", name)),
            other => deer_core::Error::Tool(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_display() {
        assert_eq!(
            ToolError::invalid_args("$.path: expected string, got number").to_string(),
            "invalid arguments: $.path: expected string, got number"
        );
        assert_eq!(
            ToolError::NotFound("mcp__echo__pong".to_string()).to_string(),
            "tool not found: mcp__echo__pong"
        );
    }

    #[test]
    fn test_tool_error_to_core_error() {
        let core: deer_core::Error = ToolError::NotFound("mcp__x__y".to_string()).into();
        assert!(matches!(core, deer_core::Error::NotFound(_)));

        let core: deer_core::Error = ToolError::invalid_args("$: expected object, got null").into();
        assert!(matches!(core, deer_core::Error::Tool(_)));
    }
}
