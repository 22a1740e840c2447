//! Request correlation for a single connection.
//!
//! Every outbound request is registered in a shared pending table before it
//! is written. The transport's reader hands every inbound message to
//! [`Correlator::on_message`], which completes the matching entry. Each entry
//! ends exactly once: matched, timed out, or failed by [`Correlator::close`].
//! All four mutation points take the same lock, and completion slots are
//! filled while that lock is held.

use crate::error::McpError;
use crate::framing::encode_line;
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

type Outcome = Result<JsonRpcMessage, McpError>;

struct PendingRequest {
    method: String,
    slot: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    closed: bool,
}

impl PendingTable {
    /// Oldest pending request with the given method name.
    fn oldest_with_method(&self, method: &str) -> Option<u64> {
        self.entries
            .iter()
            .filter(|(_, p)| p.method == method)
            .map(|(id, _)| *id)
            .min()
    }
}

/// Matches inbound messages to outstanding requests on one connection.
pub struct Correlator {
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request through `outbound` and wait for its outcome.
    ///
    /// Resolves with the matched message, or fails with
    /// [`McpError::Timeout`] once `timeout` elapses, or with
    /// [`McpError::ConnectionClosed`] if the connection closes first.
    pub async fn dispatch(
        &self,
        outbound: &mpsc::Sender<String>,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcMessage, McpError> {
        let deadline = Instant::now() + timeout;
        let (id, rx) = self.register(method)?;
        let mut guard = PendingGuard {
            correlator: self,
            id,
            armed: true,
        };

        let line = encode_line(&JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, "sending MCP request");

        let timed_out = || McpError::Timeout {
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };

        // The deadline covers queueing the line as well as the reply.
        match tokio::time::timeout_at(deadline, outbound.send(line)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                guard.armed = false;
                return self.settle(
                    id,
                    rx,
                    McpError::ConnectionClosed {
                        method: method.to_string(),
                    },
                );
            }
            Err(_) => {
                tracing::debug!(id, method, "MCP request timed out before it was written");
                guard.armed = false;
                return self.settle(id, rx, timed_out());
            }
        }

        let mut rx = rx;
        let result = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed {
                method: method.to_string(),
            }),
            Err(_) => {
                tracing::debug!(id, method, "MCP request timed out");
                self.settle(id, rx, timed_out())
            }
        };
        guard.armed = false;
        result
    }

    /// Allocate an id and a completion slot for `method`.
    fn register(&self, method: &str) -> Result<(u64, oneshot::Receiver<Outcome>), McpError> {
        let mut table = self.table();
        if table.closed {
            return Err(McpError::ConnectionClosed {
                method: method.to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                slot,
            },
        );
        Ok((id, rx))
    }

    /// Finish a request locally with `err`, unless another path already
    /// completed it, in which case that outcome is already in the slot.
    fn settle(&self, id: u64, mut rx: oneshot::Receiver<Outcome>, err: McpError) -> Outcome {
        let removed = self.table().entries.remove(&id).is_some();
        if removed {
            return Err(err);
        }
        rx.try_recv().unwrap_or(Err(err))
    }

    /// Route one inbound message to the request it answers.
    ///
    /// Matching is by id first. If the id is missing or unknown, a message
    /// whose `method` equals a pending request's method completes the oldest
    /// such request; this tolerates servers that do not echo ids. Returns
    /// `false` when nothing matched and the message was discarded.
    pub fn on_message(&self, message: JsonRpcMessage) -> bool {
        let mut table = self.table();
        let key = message
            .numeric_id()
            .filter(|id| table.entries.contains_key(id))
            .or_else(|| {
                message
                    .method
                    .as_deref()
                    .and_then(|m| table.oldest_with_method(m))
            });

        let Some(pending) = key.and_then(|id| table.entries.remove(&id)) else {
            tracing::debug!(
                id = ?message.id,
                method = ?message.method,
                "discarding unsolicited MCP message"
            );
            return false;
        };
        tracing::debug!(id = ?key, method = %pending.method, "matched MCP response");
        let _ = pending.slot.send(Ok(message));
        true
    }

    /// Fail every pending request with [`McpError::ConnectionClosed`] and
    /// refuse new ones. Returns how many requests were failed.
    pub fn close(&self) -> usize {
        let mut table = self.table();
        table.closed = true;
        let failed = table.entries.len();
        for (_, pending) in table.entries.drain() {
            let _ = pending.slot.send(Err(McpError::ConnectionClosed {
                method: pending.method,
            }));
        }
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }

    /// Number of requests still awaiting an outcome.
    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }
}

/// Removes a registered request if its caller stops waiting early.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.table().entries.remove(&self.id);
        }
    }
}
