//! Error types for MCP connections and calls.

use crate::jsonrpc::JsonRpcError;
use thiserror::Error;

/// Errors from connecting to, calling, or tearing down an MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP server '{command}' produced no usable output within {timeout_ms}ms")]
    HandshakeTimeout { command: String, timeout_ms: u64 },

    #[error("MCP server '{command}' exited during handshake: {message}")]
    HandshakeFailed { command: String, message: String },

    #[error("Transport error{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("Connection not found: {id}")]
    NotFound { id: String },

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Connection closed while '{method}' was pending")]
    ConnectionClosed { method: String },

    #[error("{0}")]
    Rpc(JsonRpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {s})"),
        None => String::new(),
    }
}

impl McpError {
    /// Transport failure without an HTTP status (network errors, bad headers).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// The HTTP status attached to a transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
