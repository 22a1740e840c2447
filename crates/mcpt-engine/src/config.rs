//! Connection specs and engine settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// MCP protocol version sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

fn default_call_timeout() -> u64 {
    10_000
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_client_name() -> String {
    "mcpt".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_capabilities() -> serde_json::Value {
    serde_json::json!({})
}

/// What a caller asks the registry to connect to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSpec {
    /// A server spawned as a child process speaking over stdin/stdout.
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Merged over the ambient environment.
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// A server reached by one HTTP POST per request.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Process { .. } => TransportKind::Process,
            Self::Http { .. } => TransportKind::Http,
        }
    }

    /// Short human-readable target (command line or URL).
    pub fn target(&self) -> String {
        match self {
            Self::Process { command, args, .. } if args.is_empty() => command.clone(),
            Self::Process { command, args, .. } => format!("{command} {}", args.join(" ")),
            Self::Http { url, .. } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Process,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => f.write_str("process"),
            Self::Http => f.write_str("http"),
        }
    }
}

/// When a freshly spawned process counts as ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessPolicy {
    /// Ready once a correlated `initialize` response arrives.
    #[default]
    InitializeResponse,
    /// Ready on the first stdout output, whatever it contains.
    FirstOutput,
}

/// Tunables for the engine. Deserialized from the `[engine]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Per-call deadline in milliseconds (default: 10000).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// How long a spawned process may take to become ready (default: 5000).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Client capabilities advertised in `initialize`.
    #[serde(default = "default_capabilities")]
    pub capabilities: serde_json::Value,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            readiness: ReadinessPolicy::default(),
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            capabilities: default_capabilities(),
        }
    }
}

impl EngineSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
