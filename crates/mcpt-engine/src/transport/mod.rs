//! MCP transport layer.
//!
//! - **Process**: spawn a child, exchange newline-delimited JSON-RPC over
//!   stdin/stdout.
//! - **Http**: one POST per request, the body of the reply is the response.

mod http;
mod process;

pub use http::HttpTransport;
pub use process::ProcessTransport;

use crate::config::TransportKind;
use crate::error::McpError;
use crate::jsonrpc::JsonRpcMessage;
use serde_json::Value;
use std::time::Duration;

/// A live transport owned by one connection.
pub enum Transport {
    Process(ProcessTransport),
    Http(HttpTransport),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Process(_) => TransportKind::Process,
            Self::Http(_) => TransportKind::Http,
        }
    }

    /// Send a JSON-RPC request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcMessage, McpError> {
        match self {
            Self::Process(t) => t.request(method, params, timeout).await,
            Self::Http(t) => t.request(method, params, timeout).await,
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            Self::Process(t) => t.is_alive(),
            Self::Http(t) => t.is_alive(),
        }
    }

    /// Requests awaiting a correlated response (always 0 for HTTP).
    pub fn pending_count(&self) -> usize {
        match self {
            Self::Process(t) => t.pending_count(),
            Self::Http(_) => 0,
        }
    }

    pub async fn shutdown(&self) {
        match self {
            Self::Process(t) => t.shutdown().await,
            Self::Http(t) => t.shutdown(),
        }
    }
}
