//! Connection and request-correlation engine for MCP servers.
//!
//! Servers are reached either as child processes speaking newline-delimited
//! JSON-RPC 2.0 over stdin/stdout, or as HTTP endpoints taking one POST per
//! request. [`ConnectionRegistry`] owns the live connections; callers address
//! them by opaque connection id.

pub mod config;
pub mod correlator;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod jsonrpc;
pub mod launch;
pub mod registry;
pub mod transport;

pub use config::{EngineSettings, PROTOCOL_VERSION, ReadinessPolicy, TransportKind, TransportSpec};
pub use correlator::Correlator;
pub use error::McpError;
pub use jsonrpc::{JsonRpcError, JsonRpcMessage};
pub use registry::{ConnectionInfo, ConnectionRegistry, ConnectionState};
