//! Integration tests for the MCP client against real servers.
//!
//! Stdio tests run the `echo-tool-server` fixture binary; HTTP tests run a
//! small responder on a local TCP port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deer_core::{McpServerConfig, ToolCall};
use deer_mcp::{
    create_mcp_tools, register_mcp_tools, ClientOptions, ConnectionState, McpClient, McpError,
    ServerRegistry, TransportError,
};
use deer_tools::{Tool, ToolContext, ToolError, ToolRegistry};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const ECHO_SERVER: &str = env!("CARGO_BIN_EXE_echo-tool-server");

fn echo_config() -> McpServerConfig {
    McpServerConfig::stdio(ECHO_SERVER)
}

fn options(timeout: Duration) -> ClientOptions {
    ClientOptions::default().with_request_timeout(timeout)
}

async fn connected_client(timeout: Duration) -> Arc<McpClient> {
    let client = Arc::new(McpClient::new("echo", echo_config(), options(timeout)));
    client.connect().await.expect("echo server should connect");
    client
}

async fn wait_for_pending(client: &McpClient, count: usize) {
    for _ in 0..400 {
        if client.pending_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} pending requests, have {}", count, client.pending_count());
}

fn first_text(result: &deer_mcp::protocol::CallToolResult) -> Option<&str> {
    result.content.first().and_then(|c| c.as_text())
}

#[tokio::test]
async fn test_ping_end_to_end() {
    let client = connected_client(Duration::from_secs(10)).await;
    assert_eq!(client.state(), ConnectionState::Initialized);

    let info = client.server_info().unwrap();
    assert_eq!(info.server_info.name, "echo-tool-server");
    assert!(info.capabilities.tools.is_some());

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["ping", "echo", "fail", "sleep", "hang", "crash", "garbage"]
    );

    let result = client.call_tool("ping", json!({})).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(first_text(&result), Some("pong"));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.call_tool("ping", json!({})).await,
        Err(McpError::Disconnected(_))
    ));
}

#[tokio::test]
async fn test_wrapped_tool_ping_and_error_rendering() {
    let registry = Arc::new(ServerRegistry::with_options(options(Duration::from_secs(10))));
    registry.add_server("echo", echo_config()).await.unwrap();

    let tools = create_mcp_tools(&registry).await;
    assert_eq!(tools.len(), 7);

    let ping = tools.iter().find(|t| t.name() == "mcp__echo__ping").unwrap();
    let output = ping.invoke(json!({})).await;
    assert!(!output.is_error);
    assert_eq!(output.text, "pong");

    let fail = tools.iter().find(|t| t.name() == "mcp__echo__fail").unwrap();
    let output = fail.invoke(json!({})).await;
    assert!(output.is_error);
    assert_eq!(output.text, r#"Error: [{"type":"text","text":"bad arg"}]"#);

    registry.disconnect_all().await;
    assert!(registry.is_empty().await);

    let output = ping.invoke(json!({})).await;
    assert_eq!(output.text, "Error calling MCP tool: server not found: echo");
}

#[tokio::test]
async fn test_concurrent_calls_complete_out_of_order() {
    let client = connected_client(Duration::from_secs(10)).await;
    let start = Instant::now();

    let slow = async {
        let result = client
            .call_tool("sleep", json!({"ms": 400, "text": "slow"}))
            .await
            .unwrap();
        (first_text(&result).map(str::to_string), start.elapsed())
    };
    let fast = async {
        // issued second, answered first
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = client
            .call_tool("sleep", json!({"ms": 10, "text": "fast"}))
            .await
            .unwrap();
        (first_text(&result).map(str::to_string), start.elapsed())
    };

    let ((slow_text, slow_done), (fast_text, fast_done)) = tokio::join!(slow, fast);
    assert_eq!(slow_text.as_deref(), Some("slow"));
    assert_eq!(fast_text.as_deref(), Some("fast"));
    assert!(fast_done < slow_done);
    assert_eq!(client.pending_count(), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn test_crash_rejects_pending_with_connection_lost() {
    let client = connected_client(Duration::from_secs(10)).await;

    let err = client.call_tool("crash", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ConnectionLost { ref server, .. } if server == "echo"));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    assert!(matches!(
        client.call_tool("ping", json!({})).await,
        Err(McpError::ConnectionLost { .. })
    ));

    client.disconnect().await;
}

#[tokio::test]
async fn test_hang_times_out_and_client_stays_usable() {
    let client = connected_client(Duration::from_millis(300)).await;

    let err = client.call_tool("hang", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { ref method, timeout } if method == "tools/call" && timeout == Duration::from_millis(300)));
    assert_eq!(client.pending_count(), 0);

    let result = client.call_tool("ping", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("pong"));

    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_rejects_every_pending_request() {
    let client = connected_client(Duration::from_secs(10)).await;

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call_tool("hang", json!({})).await })
        })
        .collect();
    wait_for_pending(&client, 3).await;

    client.disconnect().await;

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Disconnected(ref name) if name == "echo"));
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_garbage_line_is_tolerated() {
    let client = connected_client(Duration::from_secs(10)).await;

    let result = client.call_tool("garbage", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("survived"));

    let result = client.call_tool("echo", json!({"text": "still here"})).await.unwrap();
    assert_eq!(first_text(&result), Some("still here"));

    client.disconnect().await;
}

#[tokio::test]
async fn test_rejected_initialize_is_handshake_error() {
    let client = McpClient::new(
        "picky",
        echo_config().with_args(["--reject-init"]),
        options(Duration::from_secs(10)),
    );

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Handshake(ref m) if m.contains("unsupported protocol version")));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_exit_during_handshake_is_handshake_error() {
    let client = McpClient::new(
        "quitter",
        echo_config().with_args(["--exit-on-init"]),
        options(Duration::from_secs(10)),
    );
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Handshake(ref m) if m.contains("quitter")), "{}", err);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.pending_count(), 0);

    let registry = ServerRegistry::with_options(options(Duration::from_secs(10)));
    let err = registry
        .add_server("quitter", echo_config().with_args(["--exit-on-init"]))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Handshake(_)));
    assert!(registry.is_empty().await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_invalid_utf8_on_stderr_does_not_kill_server() {
    let script = format!("printf '\\377\\n' >&2; sleep 0.5; exec '{}'", ECHO_SERVER);
    let config = McpServerConfig::stdio("sh").with_args(["-c".to_string(), script]);
    let client = McpClient::new("noisy", config, options(Duration::from_secs(10)));

    client.connect().await.unwrap();
    // the fixture logs to stderr on startup and on every notification
    let result = client.call_tool("ping", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("pong"));
    assert_eq!(client.state(), ConnectionState::Initialized);

    client.disconnect().await;
}

#[tokio::test]
async fn test_missing_command_is_transport_error() {
    let client = McpClient::new(
        "missing",
        McpServerConfig::stdio("/definitely/not/a/real/mcp-server"),
        ClientOptions::default(),
    );

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(TransportError::SpawnFailed(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_duplicate_add_keeps_first_server() {
    let registry = ServerRegistry::with_options(options(Duration::from_secs(10)));
    let first = registry.add_server("echo", echo_config()).await.unwrap();

    let err = registry
        .add_server("echo", echo_config().with_args(["--fail-list"]))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::DuplicateServer(ref name) if name == "echo"));

    let current = registry.get("echo").await.unwrap();
    assert!(Arc::ptr_eq(&first, &current));
    assert_eq!(registry.config("echo").await, Some(echo_config()));

    let result = registry.call_tool("echo", "ping", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("pong"));

    registry.disconnect_all().await;
}

#[tokio::test]
async fn test_concurrent_duplicate_add() {
    let registry = ServerRegistry::with_options(options(Duration::from_secs(10)));

    let (a, b) = tokio::join!(
        registry.add_server("echo", echo_config()),
        registry.add_server("echo", echo_config())
    );

    let failures = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(McpError::DuplicateServer(_))))
        .count();
    assert_eq!(failures, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_eq!(registry.len().await, 1);

    registry.disconnect_all().await;
}

#[tokio::test]
async fn test_get_all_tools_skips_failing_server() {
    let registry = ServerRegistry::with_options(options(Duration::from_secs(10)));
    let mut servers = std::collections::BTreeMap::new();
    servers.insert("good".to_string(), echo_config());
    servers.insert("listless".to_string(), echo_config().with_args(["--fail-list"]));
    servers.insert("off".to_string(), echo_config().with_enabled(false));

    let failures = registry.connect_all(&servers).await;
    assert!(failures.is_empty());
    assert_eq!(registry.server_names().await, vec!["good", "listless"]);

    let tools = registry.get_all_tools().await;
    assert_eq!(tools.len(), 7);
    assert!(tools.iter().all(|(server, _)| server == "good"));

    // a server that can't list tools still serves calls
    let result = registry.call_tool("listless", "ping", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("pong"));

    assert!(registry.remove_server("listless").await);
    assert!(!registry.remove_server("listless").await);
    registry.disconnect_all().await;
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_host_tool_registry_execution() {
    let registry = Arc::new(ServerRegistry::with_options(options(Duration::from_secs(10))));
    registry.add_server("echo", echo_config()).await.unwrap();

    let mut tools = ToolRegistry::new();
    assert_eq!(register_mcp_tools(&registry, &mut tools).await, 7);
    let ctx = ToolContext::default();

    let call = ToolCall::new("call_1", "mcp__echo__echo", json!({"text": "hi"}));
    let result = tools.execute(&call, &ctx).await.unwrap();
    assert!(result.success);
    assert_eq!(result.output, "hi");
    assert_eq!(result.tool_call_id, "call_1");

    // only the host registry times a call
    let call = ToolCall::new("call_0", "mcp__echo__sleep", json!({"ms": 50}));
    let wrapper = tools.get("mcp__echo__sleep").unwrap();
    assert_eq!(wrapper.execute(&call, &ctx).await.unwrap().duration_ms, 0);
    let timed = tools.execute(&call, &ctx).await.unwrap();
    assert!(timed.duration_ms >= 50);

    let call = ToolCall::new("call_2", "mcp__echo__echo", json!({"text": 5}));
    let err = tools.execute(&call, &ctx).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(ref m) if m.contains("$.text")));

    let call = ToolCall::new("call_3", "mcp__echo__fail", json!({}));
    let result = tools.execute(&call, &ctx).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.display_text(), r#"Error: [{"type":"text","text":"bad arg"}]"#);

    // resync after the server goes away
    assert_eq!(register_mcp_tools(&registry, &mut tools).await, 7);
    assert_eq!(tools.len(), 7);
    assert!(registry.remove_server("echo").await);
    assert_eq!(register_mcp_tools(&registry, &mut tools).await, 0);
    assert!(tools.is_empty());

    registry.disconnect_all().await;
}

// ============================================================================
// Streamable HTTP
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum HttpMode {
    /// Reply with plain JSON bodies.
    Json,
    /// Reply to tools/call with an SSE stream.
    Sse,
    /// Reply 404 to everything.
    NotFound,
}

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    session: Option<String>,
    body: Value,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

async fn spawn_http_server(mode: HttpMode) -> (String, Log) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let server_log = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let log = Arc::clone(&server_log);
            tokio::spawn(async move { serve_one(stream, mode, log).await });
        }
    });

    (format!("http://{}/mcp", addr), log)
}

async fn serve_one(mut stream: TcpStream, mode: HttpMode, log: Log) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let method = head.split_whitespace().next().unwrap_or("").to_string();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    };
    let length: usize = header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    let session = header("mcp-session-id");

    while buf.len() < header_end + length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body: Value = serde_json::from_slice(&buf[header_end..header_end + length]).unwrap_or(Value::Null);

    log.lock().await.push(Recorded {
        method: method.clone(),
        session,
        body: body.clone(),
    });

    let reply = match (mode, method.as_str()) {
        (HttpMode::NotFound, _) => http_reply("404 Not Found", &[], ""),
        (_, "DELETE") => http_reply("200 OK", &[], ""),
        _ => answer(mode, &body),
    };
    let _ = stream.write_all(reply.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn answer(mode: HttpMode, body: &Value) -> String {
    let id = body["id"].clone();
    let result = match body["method"].as_str() {
        Some("initialize") => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "http-echo", "version": "1.0.0"}
        }),
        Some("tools/list") => json!({"tools": [{"name": "ping", "inputSchema": {"type": "object"}}]}),
        Some("tools/call") => json!({"content": [{"type": "text", "text": "pong"}]}),
        // notifications get no body
        _ => return http_reply("202 Accepted", &[], ""),
    };
    let message = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();

    match (mode, body["method"].as_str()) {
        (_, Some("initialize")) => http_reply(
            "200 OK",
            &[("Content-Type", "application/json"), ("Mcp-Session-Id", "sess-1")],
            &message,
        ),
        (HttpMode::Sse, Some("tools/call")) => http_reply(
            "200 OK",
            &[("Content-Type", "text/event-stream")],
            &format!("event: message\ndata: {}\n\n", message),
        ),
        _ => http_reply("200 OK", &[("Content-Type", "application/json")], &message),
    }
}

fn http_reply(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut reply = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        body.len()
    );
    for (name, value) in headers {
        reply.push_str(&format!("{}: {}\r\n", name, value));
    }
    reply.push_str("\r\n");
    reply.push_str(body);
    reply
}

#[tokio::test]
async fn test_http_transport_round_trip_and_session() {
    let (url, log) = spawn_http_server(HttpMode::Json).await;
    let client = McpClient::new("remote", McpServerConfig::http(&url), options(Duration::from_secs(10)));

    client.connect().await.unwrap();
    assert_eq!(client.server_info().unwrap().server_info.name, "http-echo");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    let result = client.call_tool("ping", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("pong"));

    client.disconnect().await;

    let log = log.lock().await.clone();
    let methods: Vec<_> = log
        .iter()
        .map(|r| r.body["method"].as_str().unwrap_or(&r.method).to_string())
        .collect();
    assert_eq!(
        methods,
        vec!["initialize", "notifications/initialized", "tools/list", "tools/call", "DELETE"]
    );
    assert_eq!(log[0].session, None);
    assert!(log[1..].iter().all(|r| r.session.as_deref() == Some("sess-1")));
}

#[tokio::test]
async fn test_http_transport_sse_reply() {
    let (url, _log) = spawn_http_server(HttpMode::Sse).await;
    let client = McpClient::new("remote", McpServerConfig::http(&url), options(Duration::from_secs(10)));

    client.connect().await.unwrap();
    let result = client.call_tool("ping", json!({})).await.unwrap();
    assert_eq!(first_text(&result), Some("pong"));
    assert_eq!(client.pending_count(), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn test_http_error_status_fails_connect() {
    let (url, _log) = spawn_http_server(HttpMode::NotFound).await;
    let client = McpClient::new("remote", McpServerConfig::http(&url), options(Duration::from_secs(10)));

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(TransportError::HttpStatus(404))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
