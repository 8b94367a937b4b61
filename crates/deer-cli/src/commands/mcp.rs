//! MCP server management commands.

use deer_core::{Error, ToolCall};
use deer_mcp::{McpToolWrapper, ServerStatus};
use deer_tools::{Tool, ToolContext, ToolRegistry};
use uuid::Uuid;

use crate::{AppContext, McpAction};

pub async fn handle(action: McpAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        McpAction::List => list(ctx),
        McpAction::Status => status(ctx).await,
        McpAction::Tools => tools(ctx).await,
        McpAction::Call { server, tool, args } => call(ctx, &server, &tool, &args).await,
    }
}

fn list(ctx: &AppContext) -> anyhow::Result<()> {
    let servers = &ctx.config.mcp.servers;
    if servers.is_empty() {
        println!("No MCP servers configured");
        return Ok(());
    }

    println!(
        "Configured MCP servers ({} of {} enabled):",
        ctx.config.mcp.enabled_servers().count(),
        servers.len()
    );
    for (name, server) in servers {
        let mark = if server.enabled { "✓" } else { "✗" };
        println!(
            "  {} {} [{}] {}",
            mark,
            name,
            server.transport_kind(),
            server.target()
        );
    }
    Ok(())
}

async fn status(ctx: &AppContext) -> anyhow::Result<()> {
    let failures = ctx.registry.connect_all(&ctx.config.mcp.servers).await;

    println!("MCP servers:");
    for (name, server) in &ctx.config.mcp.servers {
        if !server.enabled {
            println!("  - {}: disabled", name);
            continue;
        }
        if let Some((_, error)) = failures.iter().find(|(failed, _)| failed == name) {
            println!("  ✗ {}: {}", name, error);
            continue;
        }

        match ctx.registry.server_status(name).await {
            ServerStatus::Registered { state, pending } => {
                let version = ctx
                    .registry
                    .get(name)
                    .await
                    .and_then(|client| client.server_info())
                    .map(|info| {
                        let version = info.server_info.version.unwrap_or_default();
                        format!("{} {}", info.server_info.name, version).trim_end().to_string()
                    })
                    .unwrap_or_default();
                println!("  ✓ {}: {} ({} pending) {}", name, state, pending, version);
            }
            ServerStatus::NotRegistered => println!("  ✗ {}: not registered", name),
        }
    }
    Ok(())
}

async fn tools(ctx: &AppContext) -> anyhow::Result<()> {
    for (name, error) in ctx.registry.connect_all(&ctx.config.mcp.servers).await {
        println!("  ✗ {}: {}", name, error);
    }

    let tools = deer_mcp::create_mcp_tools(&ctx.registry).await;
    if tools.is_empty() {
        println!("No MCP tools available");
        return Ok(());
    }

    println!("MCP tools:");
    for tool in &tools {
        println!("  {}", tool.name());
        println!("      {}", tool.definition().description);
    }
    Ok(())
}

async fn call(ctx: &AppContext, server: &str, tool: &str, args: &str) -> anyhow::Result<()> {
    let arguments: serde_json::Value = serde_json::from_str(args)
        .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {}", e))?;

    let config = ctx
        .config
        .mcp
        .servers
        .get(server)
        .ok_or_else(|| Error::NotFound(format!("MCP server '{}' in configuration", server)))?;
    ctx.registry
        .add_server(server, config.clone())
        .await
        .map_err(Error::from)?;

    let mut registry = ToolRegistry::new();
    deer_mcp::register_mcp_tools(&ctx.registry, &mut registry).await;

    let full_name = McpToolWrapper::full_name_for(server, tool);
    if !registry.contains(&full_name) {
        return Err(Error::NotFound(format!("tool '{}' on server '{}'", tool, server)).into());
    }

    let call_id = format!("call_{}", Uuid::new_v4().simple());
    let call = ToolCall::new(call_id, full_name, arguments);
    let result = registry
        .execute(&call, &ToolContext::default())
        .await
        .map_err(Error::from)?;

    println!("{}", result.display_text());
    if !result.success {
        anyhow::bail!("tool '{}' reported an error", tool);
    }
    Ok(())
}
