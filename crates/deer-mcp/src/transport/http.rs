//! Streamable HTTP transport.
//!
//! Each outgoing message is POSTed to the endpoint. The reply is either a
//! plain JSON body, an SSE stream whose `data:` lines carry messages, or an
//! empty body (notifications are answered with 202 Accepted).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, Url};
use serde_json::Value;
use tracing::debug;

use super::Transport;
use crate::error::TransportError;
use crate::framing::LineBuffer;
use crate::pending::PendingRequests;

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// HTTP transport for streamable-HTTP MCP servers.
pub struct HttpTransport {
    server: String,
    url: Url,
    client: Client,
    pending: Arc<PendingRequests>,
    session_id: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create a transport for `url`. Only http and https URLs are accepted.
    pub fn new(
        server: &str,
        url: &str,
        pending: Arc<PendingRequests>,
    ) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder().build()?;

        Ok(Self {
            server: server.to_string(),
            url: parsed,
            client,
            pending,
            session_id: Mutex::new(None),
            connected: AtomicBool::new(true),
        })
    }

    /// The session id the server assigned, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn remember_session(&self, response: &Response) {
        let Some(value) = response.headers().get(SESSION_HEADER) else {
            return;
        };
        if let Ok(id) = value.to_str() {
            let mut session = self.session_id.lock();
            if session.as_deref() != Some(id) {
                debug!(server = %self.server, session = id, "MCP session established");
                *session = Some(id.to_string());
            }
        }
    }

    fn dispatch_body(&self, body: &str) {
        let body = body.trim();
        if body.is_empty() {
            return;
        }

        // batched replies arrive as a JSON array
        if body.starts_with('[') {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) {
                for item in items {
                    self.pending.handle_message(&item.to_string());
                }
                return;
            }
        }
        self.pending.handle_message(body);
    }

    async fn dispatch_event_stream(&self, response: Response) -> Result<(), TransportError> {
        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::with_blank_lines();
        let mut event = SseEvent::default();

        while let Some(chunk) = stream.next().await {
            for line in lines.feed(&chunk?) {
                if let Some(data) = event.push_line(&line) {
                    self.dispatch_body(&data);
                }
            }
        }

        // the stream may end without the blank line closing the last event
        if let Some(data) = lines.finish().and_then(|line| event.push_line(&line)) {
            self.dispatch_body(&data);
        }
        if let Some(data) = event.take() {
            self.dispatch_body(&data);
        }
        Ok(())
    }
}

/// The `data:` lines of one server-sent event.
#[derive(Debug, Default)]
struct SseEvent {
    data: Vec<String>,
}

impl SseEvent {
    /// Take one line of the stream. Returns the event payload once a blank
    /// line ends an event that carried data.
    fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take();
        }
        // event:, id:, retry: and comments carry nothing to dispatch
        if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        None
    }

    fn take(&mut self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        debug!(server = %self.server, message = message, "POSTing message to MCP server");

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE))
            .body(message.to_string());
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        self.remember_session(&response);

        if is_event_stream(&response) {
            self.dispatch_event_stream(response).await
        } else {
            let body = response.text().await?;
            self.dispatch_body(&body);
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // let the server drop its session state; the guard must not live across the await
        let session = self.session_id.lock().take();
        if let Some(session) = session {
            let result = self
                .client
                .delete(self.url.clone())
                .header(SESSION_HEADER, session)
                .send()
                .await;
            if let Err(e) = result {
                debug!(server = %self.server, error = %e, "Failed to end MCP session");
            }
        }

        debug!(server = %self.server, "Closed HTTP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
