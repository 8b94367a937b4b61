//! MCP tool wrapper for integration with deer's tool system.
//!
//! This module provides `McpToolWrapper`, which wraps MCP tools to implement
//! the `Tool` trait from `deer-tools`, allowing them to be used alongside
//! built-in tools.

use std::sync::Arc;

use async_trait::async_trait;
use deer_core::tool::{ToolCategory, ToolDefinition};
use deer_core::{ToolCall, ToolResult};
use deer_tools::{Tool, ToolContext, ToolError, ToolRegistry};
use serde_json::Value;
use tracing::debug;

use crate::error::McpError;
use crate::protocol::{CallToolResult, McpToolDefinition, ToolContent};
use crate::registry::ServerRegistry;
use crate::schema::ParamSchema;

/// Prefix for MCP tool names to avoid collisions with built-in tools.
pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// Separator between server and tool in a namespaced name.
const NAME_SEPARATOR: &str = "__";

/// What a tool invocation produced, as the host will show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }

    fn error(text: String) -> Self {
        Self {
            text,
            is_error: true,
        }
    }
}

/// How call results are turned into host-facing strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFormat {
    /// Joins the text entries of a successful result.
    pub separator: String,
    /// Precedes the content of a result the server flagged as an error.
    pub error_prefix: String,
    /// Precedes the message when the call itself failed.
    pub call_error_prefix: String,
}

impl Default for ResultFormat {
    fn default() -> Self {
        Self {
            separator: "\n".to_string(),
            error_prefix: "Error: ".to_string(),
            call_error_prefix: "Error calling MCP tool: ".to_string(),
        }
    }
}

impl ResultFormat {
    /// Render a result returned by the server.
    pub fn render(&self, result: &CallToolResult) -> ToolOutput {
        if result.is_error {
            return ToolOutput::error(format!("{}{}", self.error_prefix, content_json(&result.content)));
        }

        let texts: Vec<&str> = result.content.iter().filter_map(ToolContent::as_text).collect();
        if texts.is_empty() {
            ToolOutput::ok(content_json(&result.content))
        } else {
            ToolOutput::ok(texts.join(self.separator.as_str()))
        }
    }

    /// Render a call that never produced a result.
    pub fn render_failure(&self, error: &McpError) -> ToolOutput {
        ToolOutput::error(format!("{}{}", self.call_error_prefix, error))
    }
}

fn content_json(content: &[ToolContent]) -> String {
    serde_json::to_string(content).unwrap_or_else(|e| format!("<unrenderable content: {}>", e))
}

/// Wrapper that exposes an MCP tool as a deer `Tool`.
pub struct McpToolWrapper {
    /// Full tool name including server prefix (e.g., "mcp__filesystem__read_file").
    full_name: String,
    server_name: String,
    tool_def: McpToolDefinition,
    schema: ParamSchema,
    registry: Arc<ServerRegistry>,
    format: ResultFormat,
}

impl McpToolWrapper {
    /// Create a new MCP tool wrapper.
    ///
    /// The tool name will be prefixed with `mcp__<server>__` to avoid collisions.
    pub fn new(
        server_name: impl Into<String>,
        tool_def: McpToolDefinition,
        registry: Arc<ServerRegistry>,
    ) -> Self {
        let server_name = server_name.into();
        let full_name = Self::full_name_for(&server_name, &tool_def.name);
        let schema = ParamSchema::from_json(&tool_def.input_schema);

        Self {
            full_name,
            server_name,
            tool_def,
            schema,
            registry,
            format: ResultFormat::default(),
        }
    }

    /// Use a different result rendering.
    pub fn with_format(mut self, format: ResultFormat) -> Self {
        self.format = format;
        self
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Get the original tool name.
    pub fn tool_name(&self) -> &str {
        &self.tool_def.name
    }

    /// The normalised input schema.
    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    /// The namespaced name a tool of `server` is registered under.
    pub fn full_name_for(server: &str, tool: &str) -> String {
        format!("{}{}{}{}", MCP_TOOL_PREFIX, server, NAME_SEPARATOR, tool)
    }

    /// Parse a full MCP tool name into (server_name, tool_name).
    ///
    /// Returns None if the name is not a valid MCP tool name.
    pub fn parse_tool_name(full_name: &str) -> Option<(String, String)> {
        let rest = full_name.strip_prefix(MCP_TOOL_PREFIX)?;
        let (server, tool) = rest.split_once(NAME_SEPARATOR)?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some((server.to_string(), tool.to_string()))
    }

    /// Call the remote tool. Never fails: every outcome becomes a [`ToolOutput`].
    pub async fn invoke(&self, arguments: Value) -> ToolOutput {
        debug!(server = %self.server_name, tool = %self.tool_def.name, "Invoking MCP tool");

        match self
            .registry
            .call_tool(&self.server_name, &self.tool_def.name, arguments)
            .await
        {
            Ok(result) => self.format.render(&result),
            Err(e) => self.format.render_failure(&e),
        }
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn definition(&self) -> ToolDefinition {
        let description = self.tool_def.description.clone().unwrap_or_else(|| {
            format!("MCP tool: {} from {}", self.tool_def.name, self.server_name)
        });

        ToolDefinition::new(&self.full_name, description)
            .with_parameters(self.schema.to_parameters_schema())
            .with_category(ToolCategory::Mcp(self.server_name.clone()))
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        // ToolRegistry::execute records the duration
        let output = self.invoke(call.arguments.clone()).await;
        Ok(if output.is_error {
            ToolResult::error(&call.id, output.text)
        } else {
            ToolResult::success(&call.id, output.text)
        })
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        self.schema
            .validate(arguments)
            .map_err(|e| ToolError::invalid_args(e.to_string()))
    }
}

/// Create MCP tool wrappers for every tool of every connected server.
pub async fn create_mcp_tools(registry: &Arc<ServerRegistry>) -> Vec<McpToolWrapper> {
    registry
        .get_all_tools()
        .await
        .into_iter()
        .map(|(server_name, tool_def)| McpToolWrapper::new(server_name, tool_def, Arc::clone(registry)))
        .collect()
}

/// Bring the MCP tools in `tools` in line with `registry`. Returns how many were registered.
///
/// Tools of every server seen earlier are dropped first, so removed servers
/// and tools that a server stopped offering disappear. Built-in tools are kept.
pub async fn register_mcp_tools(registry: &Arc<ServerRegistry>, tools: &mut ToolRegistry) -> usize {
    for server in tools.servers() {
        tools.unregister_server(&server);
    }

    let wrappers = create_mcp_tools(registry).await;
    let count = wrappers.len();
    for wrapper in wrappers {
        tools.register(Arc::new(wrapper));
    }
    count
}
