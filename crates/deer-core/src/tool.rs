//! Tool definitions, calls and results exchanged with the host.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Where a tool comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Implemented inside the host process
    Builtin,
    /// Provided by the named MCP server
    Mcp(String),
}

impl ToolCategory {
    /// The MCP server behind this tool, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Mcp(server) => Some(server),
            Self::Builtin => None,
        }
    }
}

/// A tool as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
    pub category: ToolCategory,
}

impl ToolDefinition {
    /// A built-in tool that takes no arguments.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object", "properties": {}}),
            category: ToolCategory::Builtin,
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }
}

/// One invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its result
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of a tool execution.
///
/// A failed tool run is still a `ToolResult`: the host shows `error` to the
/// model as an ordinary turn instead of aborting the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    /// Wall-clock time of the execution
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: true,
            output: output.into(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// The text the host shows for this result: the output on success,
    /// the error message otherwise.
    pub fn display_text(&self) -> &str {
        match (&self.error, self.success) {
            (Some(error), false) => error,
            _ => &self.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_defaults() {
        let def = ToolDefinition::new("clock", "Current time");
        assert_eq!(def.parameters, json!({"type": "object", "properties": {}}));
        assert_eq!(def.category, ToolCategory::Builtin);
        assert_eq!(def.category.server(), None);
    }

    #[test]
    fn test_definition_builders() {
        let def = ToolDefinition::new("mcp__fs__read", "Read a file")
            .with_parameters(json!({"type": "object", "properties": {"path": {"type": "string"}}}))
            .with_category(ToolCategory::Mcp("fs".to_string()));
        assert_eq!(def.parameters["properties"]["path"]["type"], "string");
        assert_eq!(def.category.server(), Some("fs"));
    }

    #[test]
    fn test_result_display_text() {
        let ok = ToolResult::success("call_1", "pong").with_duration(12);
        assert!(ok.success);
        assert_eq!(ok.display_text(), "pong");
        assert_eq!(ok.duration_ms, 12);

        let failed = ToolResult::error("call_2", "Error: bad arg");
        assert!(!failed.success);
        assert_eq!(failed.display_text(), "Error: bad arg");
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&ToolCategory::Mcp("github".to_string())).unwrap();
        assert_eq!(json, r#"{"mcp":"github"}"#);
        let json = serde_json::to_string(&ToolCategory::Builtin).unwrap();
        assert_eq!(json, r#""builtin""#);
    }
}
