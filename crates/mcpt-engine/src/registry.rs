//! Connection registry owning every live MCP connection.
//!
//! Callers never touch transports directly: they connect, call and
//! disconnect by connection id. The registry is an ordinary value; whoever
//! composes the engine decides how long it lives.

use crate::config::{EngineSettings, TransportKind, TransportSpec};
use crate::error::McpError;
use crate::handshake;
use crate::jsonrpc::JsonRpcMessage;
use crate::transport::{HttpTransport, ProcessTransport, Transport};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Ready,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

/// One live session with an MCP server.
pub struct Connection {
    id: String,
    target: String,
    state: AtomicU8,
    transport: Transport,
}

impl Connection {
    fn new(id: String, target: String, transport: Transport) -> Self {
        Self {
            id,
            target,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            transport,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Current state; a transport that died on its own reads as closed.
    pub fn state(&self) -> ConnectionState {
        let state = ConnectionState::from_u8(self.state.load(Ordering::SeqCst));
        if state != ConnectionState::Closed && !self.transport.is_alive() {
            return ConnectionState::Closed;
        }
        state
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move from connecting to ready; fails if the connection was closed
    /// in the meantime.
    fn mark_ready(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Ready as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    async fn close(&self) {
        self.set_state(ConnectionState::Closed);
        self.transport.shutdown().await;
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            kind: self.kind(),
            target: self.target.clone(),
            state: self.state(),
            pending: self.transport.pending_count(),
        }
    }
}

/// Snapshot of a connection for listing.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub kind: TransportKind,
    pub target: String,
    pub state: ConnectionState,
    pub pending: usize,
}

/// Registry of live connections keyed by opaque connection id.
pub struct ConnectionRegistry {
    settings: EngineSettings,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl ConnectionRegistry {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Establish a connection and return its id.
    ///
    /// Process servers are spawned and must complete the handshake within
    /// the handshake window; they are listed as `connecting` until then.
    /// HTTP servers are checked once with a GET.
    pub async fn connect(&self, spec: &TransportSpec) -> Result<String, McpError> {
        let id = uuid::Uuid::new_v4().to_string();
        let target = spec.target();
        tracing::info!(connection_id = %id, kind = %spec.kind(), %target, "connecting to MCP server");

        let transport = match spec {
            TransportSpec::Process { command, args, env } => {
                Transport::Process(ProcessTransport::spawn(command, args, env)?)
            }
            TransportSpec::Http { url, headers } => Transport::Http(
                HttpTransport::connect(url, headers, self.settings.handshake_timeout()).await?,
            ),
        };
        let connection = Arc::new(Connection::new(id.clone(), target, transport));
        self.connections
            .write()
            .await
            .insert(id.clone(), Arc::clone(&connection));

        if let Transport::Process(process) = &connection.transport {
            if let Err(e) = handshake::perform(process, &self.settings).await {
                tracing::warn!(connection_id = %id, error = %e, "MCP handshake failed");
                self.disconnect(&id).await;
                return Err(e);
            }
        }

        if !connection.mark_ready() {
            return Err(McpError::ConnectionClosed {
                method: "initialize".to_string(),
            });
        }
        tracing::info!(connection_id = %id, "MCP connection ready");
        Ok(id)
    }

    /// Call `method` on a connection with the default per-call timeout.
    ///
    /// Absent params are sent as `{}`. JSON-RPC error replies are returned
    /// as ordinary responses.
    pub async fn call(
        &self,
        id: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcMessage, McpError> {
        self.call_with_timeout(id, method, params, self.settings.call_timeout())
            .await
    }

    /// Call `method` with an explicit deadline.
    pub async fn call_with_timeout(
        &self,
        id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcMessage, McpError> {
        let connection = self.live(id).await?;
        let params = params.unwrap_or_else(|| serde_json::json!({}));
        tracing::debug!(connection_id = %id, method, "routing MCP call");
        connection.transport.request(method, Some(params), timeout).await
    }

    /// Ask a connected server for its identity and capabilities.
    pub async fn server_info(&self, id: &str) -> Result<JsonRpcMessage, McpError> {
        let params = serde_json::to_value(handshake::server_info_params(&self.settings))?;
        self.call(id, "initialize", Some(params)).await
    }

    /// Tear down a connection. Unknown ids are ignored.
    pub async fn disconnect(&self, id: &str) {
        let removed = self.connections.write().await.remove(id);
        if let Some(connection) = removed {
            tracing::info!(connection_id = %id, "disconnecting MCP server");
            connection.close().await;
        }
    }

    /// Snapshot of every registered connection.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self
            .connections
            .read()
            .await
            .values()
            .map(|c| c.info())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Disconnect everything concurrently.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        let closes = drained.iter().map(|(_, c)| c.close());
        futures_util::future::join_all(closes).await;
    }

    /// Look up a connection that can still carry requests.
    ///
    /// A connection whose process died is dropped from the registry here and
    /// reported as not found.
    async fn live(&self, id: &str) -> Result<Arc<Connection>, McpError> {
        let not_found = || McpError::NotFound { id: id.to_string() };
        let connection = self
            .connections
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(not_found)?;

        if connection.state() == ConnectionState::Closed {
            tracing::info!(connection_id = %id, "reaping closed MCP connection");
            self.disconnect(id).await;
            return Err(not_found());
        }
        Ok(connection)
    }
}
