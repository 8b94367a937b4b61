//! Pending-request bookkeeping.
//!
//! Every outgoing request registers a one-shot waiter under its id. The
//! transport's reader pushes each received line into [`PendingRequests::handle_message`],
//! which resolves the waiter whose id matches, so responses may arrive in
//! any order. A waiter is removed exactly once: by its response, by
//! cancellation (timeout or failed send), or by [`PendingRequests::close`].

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::McpError;
use crate::protocol::IncomingMessage;

type Waiter = oneshot::Sender<Result<Value, McpError>>;

/// Why the table stopped accepting requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client disconnected on purpose.
    Disconnected,
    /// The connection died (process exit, stream closed, ...).
    ConnectionLost(String),
}

impl CloseReason {
    fn to_error(&self, server: &str) -> McpError {
        match self {
            Self::Disconnected => McpError::Disconnected(server.to_string()),
            Self::ConnectionLost(reason) => McpError::connection_lost(server, reason.clone()),
        }
    }
}

#[derive(Default)]
struct Inner {
    waiters: HashMap<u64, Waiter>,
    closed: Option<CloseReason>,
}

/// Table of in-flight requests for one server connection.
pub struct PendingRequests {
    server: String,
    inner: Mutex<Inner>,
}

impl PendingRequests {
    /// Create an empty table for `server`.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a waiter for `id`.
    ///
    /// Fails immediately once the table has been closed.
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<Result<Value, McpError>>, McpError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.closed {
            return Err(reason.to_error(&self.server));
        }
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Drop the waiter for `id` without resolving it.
    pub fn cancel(&self, id: u64) -> bool {
        self.inner.lock().waiters.remove(&id).is_some()
    }

    /// Resolve the waiter for `id`. Returns false if nothing was waiting.
    pub fn complete(&self, id: u64, outcome: Result<Value, McpError>) -> bool {
        let waiter = self.inner.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                // the requester may have given up already
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Handle one received line.
    ///
    /// Malformed lines are logged and dropped. Server-initiated requests and
    /// notifications are logged and ignored.
    pub fn handle_message(&self, line: &str) {
        let message = match IncomingMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %self.server, error = %e, "Dropping malformed message");
                return;
            }
        };

        match message {
            IncomingMessage::Response { id, outcome } => {
                let resolved = id
                    .as_u64()
                    .map(|n| self.complete(n, outcome.map_err(McpError::from)))
                    .unwrap_or(false);
                if !resolved {
                    debug!(server = %self.server, id = %id, "Discarding response for unknown request");
                }
            }
            IncomingMessage::Notification { method, .. } => {
                debug!(server = %self.server, method = %method, "Ignoring server notification");
            }
            IncomingMessage::Request { id, method, .. } => {
                debug!(server = %self.server, id = %id, method = %method, "Ignoring server request");
            }
        }
    }

    /// Stop accepting requests and fail every outstanding one.
    ///
    /// The first reason wins; later calls only drain. Returns how many
    /// waiters were rejected.
    pub fn close(&self, reason: CloseReason) -> usize {
        let (waiters, reason) = {
            let mut inner = self.inner.lock();
            let reason = inner.closed.get_or_insert(reason).clone();
            let waiters: Vec<Waiter> = inner.waiters.drain().map(|(_, tx)| tx).collect();
            (waiters, reason)
        };

        let count = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(reason.to_error(&self.server)));
        }
        if count > 0 {
            debug!(server = %self.server, count, "Rejected pending requests");
        }
        count
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    /// Why the table was closed, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock().closed.clone()
    }

    /// Whether a waiter is registered for `id`.
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().waiters.contains_key(&id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Whether there are no outstanding requests.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
