//! Minimal MCP server over stdio, used by the integration tests.
//!
//! Tools: `ping`, `echo`, `fail`, `sleep`, `hang`, `crash`, `garbage`.
//! Flags: `--fail-list` answers `tools/list` with an error, `--reject-init`
//! answers `initialize` with an error, `--exit-on-init` exits without
//! answering `initialize`.

use std::sync::Arc;
use std::time::Duration;

use deer_mcp::protocol::{
    CallToolParams, CallToolResult, IncomingMessage, InitializeResult, JsonRpcError,
    JsonRpcResponse, ListToolsResult, McpToolDefinition, RequestId, ServerCapabilities,
    ServerInfo, ToolsCapability, MCP_PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    fail_list: bool,
    reject_init: bool,
    exit_on_init: bool,
}

type Output = Arc<Mutex<Stdout>>;

#[tokio::main]
async fn main() {
    let mut flags = Flags::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--fail-list" => flags.fail_list = true,
            "--reject-init" => flags.reject_init = true,
            "--exit-on-init" => flags.exit_on_init = true,
            other => eprintln!("warning: ignoring unknown flag {}", other),
        }
    }

    eprintln!("echo-tool-server ready");

    let out: Output = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match IncomingMessage::parse(&line) {
            Ok(IncomingMessage::Request { id, method, params }) => {
                let out = Arc::clone(&out);
                tokio::spawn(async move { handle_request(flags, out, id, method, params).await });
            }
            Ok(IncomingMessage::Notification { method, .. }) => {
                eprintln!("received notification {}", method);
            }
            Ok(IncomingMessage::Response { .. }) => {}
            Err(e) => eprintln!("error: unreadable message: {}", e),
        }
    }
}

async fn handle_request(
    flags: Flags,
    out: Output,
    id: RequestId,
    method: String,
    params: Option<Value>,
) {
    let reply = match method.as_str() {
        "initialize" if flags.exit_on_init => {
            eprintln!("fatal: exiting before the handshake completes");
            std::process::exit(1);
        }
        "initialize" if flags.reject_init => Err(JsonRpcError::new(
            JsonRpcError::INVALID_PARAMS,
            "unsupported protocol version",
        )),
        "initialize" => to_value(InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                ..ServerCapabilities::default()
            },
            server_info: ServerInfo {
                name: "echo-tool-server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        }),
        "tools/list" if flags.fail_list => Err(JsonRpcError::new(
            JsonRpcError::INTERNAL_ERROR,
            "tool listing is broken",
        )),
        "tools/list" => to_value(ListToolsResult {
            tools: tool_definitions(),
            next_cursor: None,
        }),
        "tools/call" => match params.map(serde_json::from_value::<CallToolParams>) {
            Some(Ok(call)) => call_tool(&out, call).await,
            _ => Err(JsonRpcError::new(JsonRpcError::INVALID_PARAMS, "bad tools/call params")),
        },
        other => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("method not found: {}", other),
        )),
    };

    let response = match reply {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    };
    if let Ok(text) = serde_json::to_string(&response) {
        write_line(&out, &text).await;
    }
}

/// Run one tool. `hang` never resolves and `crash` exits the process.
async fn call_tool(out: &Output, call: CallToolParams) -> Result<Value, JsonRpcError> {
    let args = call.arguments.unwrap_or(Value::Null);

    let result = match call.name.as_str() {
        "ping" => CallToolResult::text("pong"),
        "echo" => match args.get("text").and_then(Value::as_str) {
            Some(text) => CallToolResult::text(text),
            None => CallToolResult::error_text("bad arg"),
        },
        "fail" => CallToolResult::error_text("bad arg"),
        "sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(100);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let text = args
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("slept {}ms", ms));
            CallToolResult::text(text)
        }
        "hang" => std::future::pending().await,
        "crash" => {
            eprintln!("fatal: crashing on request");
            std::process::exit(3);
        }
        "garbage" => {
            write_line(out, "this line is not json {").await;
            CallToolResult::text("survived")
        }
        other => {
            return Err(JsonRpcError::new(
                JsonRpcError::INVALID_PARAMS,
                format!("unknown tool: {}", other),
            ))
        }
    };

    to_value(result)
}

fn tool_definitions() -> Vec<McpToolDefinition> {
    let no_args = json!({"type": "object", "properties": {}});
    let tool = |name: &str, description: &str, schema: Value| McpToolDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema,
    };

    vec![
        tool("ping", "Reply with pong", no_args.clone()),
        tool(
            "echo",
            "Echo the given text",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string", "description": "Text to echo"}},
                "required": ["text"]
            }),
        ),
        tool("fail", "Always report a tool error", no_args.clone()),
        tool(
            "sleep",
            "Wait before answering",
            json!({
                "type": "object",
                "properties": {
                    "ms": {"type": "integer"},
                    "text": {"type": "string"}
                }
            }),
        ),
        tool("hang", "Never answer", no_args.clone()),
        tool("crash", "Exit the process", no_args.clone()),
        tool("garbage", "Emit a malformed line, then answer", no_args),
    ]
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
}

async fn write_line(out: &Output, line: &str) {
    let mut out = out.lock().await;
    let _ = out.write_all(line.as_bytes()).await;
    let _ = out.write_all(b"\n").await;
    let _ = out.flush().await;
}
