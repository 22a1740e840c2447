//! The MCP `initialize` handshake.
//!
//! Run once when a process connection is established. The same request,
//! with an empty capability set, doubles as the way to ask any connected
//! server for its identity and capabilities.

use crate::config::{EngineSettings, ReadinessPolicy};
use crate::error::McpError;
use crate::transport::ProcessTransport;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client info sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// `initialize` parameters advertising the configured capabilities.
pub fn initialize_params(settings: &EngineSettings) -> InitializeParams {
    InitializeParams {
        protocol_version: settings.protocol_version.clone(),
        capabilities: settings.capabilities.clone(),
        client_info: ClientInfo {
            name: settings.client_name.clone(),
            version: settings.client_version.clone(),
        },
    }
}

/// `initialize` parameters used to query server identity on a live connection.
pub fn server_info_params(settings: &EngineSettings) -> InitializeParams {
    InitializeParams {
        capabilities: serde_json::json!({}),
        ..initialize_params(settings)
    }
}

/// Run the handshake on a freshly spawned process.
///
/// With [`ReadinessPolicy::InitializeResponse`] the process is ready once its
/// `initialize` response arrives, after which `notifications/initialized` is
/// sent. With [`ReadinessPolicy::FirstOutput`] any stdout output counts; the
/// `initialize` reply is still matched in the background.
pub async fn perform(
    transport: &ProcessTransport,
    settings: &EngineSettings,
) -> Result<(), McpError> {
    let params = serde_json::to_value(initialize_params(settings))?;
    let window = settings.handshake_timeout();

    match settings.readiness {
        ReadinessPolicy::FirstOutput => {
            transport.request_detached("initialize", Some(params), window);
            transport.wait_for_output(window).await
        }
        ReadinessPolicy::InitializeResponse => {
            let resp = match transport.request("initialize", Some(params), window).await {
                Ok(resp) => resp,
                Err(McpError::Timeout { .. }) => {
                    return Err(McpError::HandshakeTimeout {
                        command: transport.command().to_string(),
                        timeout_ms: settings.handshake_timeout_ms,
                    });
                }
                Err(McpError::ConnectionClosed { .. }) => {
                    return Err(McpError::HandshakeFailed {
                        command: transport.command().to_string(),
                        message: transport.exit_description().await,
                    });
                }
                Err(e) => return Err(e),
            };

            match &resp.error {
                Some(err) => tracing::warn!(
                    command = %transport.command(),
                    %err,
                    "MCP server rejected initialize; continuing"
                ),
                None => tracing::info!(
                    command = %transport.command(),
                    server_info = ?resp.result.as_ref().and_then(|r| r.get("serverInfo")),
                    "MCP handshake complete"
                ),
            }

            transport.notify("notifications/initialized", None).await
        }
    }
}
