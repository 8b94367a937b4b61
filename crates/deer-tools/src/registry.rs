//! Name-keyed tool registry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use deer_core::{ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ToolError;

/// Host state handed to every tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Working directory of the host session
    pub working_dir: PathBuf,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

/// Something the host can call by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the tool is registered under.
    fn name(&self) -> &str;

    /// Definition shown to the model, including the parameter schema.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Failures of the tool itself belong in the returned
    /// `ToolResult`; `Err` is for calls that could not be run at all.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    /// Check arguments before [`execute`](Tool::execute). Accepts anything by default.
    fn validate(&self, _arguments: &Value) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Tools available to the host, ordered by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool previously registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Drop every tool that came from MCP server `server`. Returns how many were removed.
    pub fn unregister_server(&mut self, server: &str) -> usize {
        let before = self.tools.len();
        self.tools
            .retain(|_, tool| tool.definition().category.server() != Some(server));
        let removed = before - self.tools.len();
        if removed > 0 {
            debug!(server = %server, removed, "Unregistered server tools");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Definitions of every tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Names of the MCP servers that contributed at least one tool.
    pub fn servers(&self) -> BTreeSet<String> {
        self.tools
            .values()
            .filter_map(|tool| tool.definition().category.server().map(str::to_string))
            .collect()
    }

    /// Tools contributed by one MCP server, sorted by name.
    pub fn server_tools(&self, server: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .values()
            .filter(|tool| tool.definition().category.server() == Some(server))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up, validate and run a call, recording how long it took.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        tool.validate(&call.arguments)?;

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        let start = Instant::now();
        let result = tool.execute(call, ctx).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if !result.success {
            debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool reported failure");
        }
        Ok(result.with_duration(duration_ms))
    }
}
