//! HTTP transport: one POST per JSON-RPC request.
//!
//! HTTP pairs each reply with its request, so no correlation table is
//! needed. The connect-time GET advertises `text/event-stream`, but
//! replies are always read as a single JSON body; nothing is streamed.

use crate::error::McpError;
use crate::framing::{decode_body, encode_body};
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Client for an MCP server reachable over HTTP.
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl HttpTransport {
    /// Check `url` with a GET and keep the session if it answers with success.
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::transport(e.to_string()))?;
        let headers = to_header_map(headers)?;

        let mut get_headers = HeaderMap::new();
        get_headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        get_headers.extend(headers.clone());

        tracing::debug!(url, "checking MCP HTTP endpoint");
        let check = http.get(url).headers(get_headers).send();
        let response = match tokio::time::timeout(connect_timeout, check).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(McpError::transport(format!("connection failed: {e}"))),
            Err(_) => {
                return Err(McpError::transport(format!(
                    "GET timed out after {}ms",
                    connect_timeout.as_millis()
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, String::new()));
        }
        tracing::info!(url, %status, "MCP HTTP endpoint reachable");

        Ok(Self {
            http,
            url: url.to_string(),
            headers,
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one request and parse the reply body as its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcMessage, McpError> {
        let closed = || McpError::ConnectionClosed {
            method: method.to_string(),
        };
        if self.closed.is_cancelled() {
            return Err(closed());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = encode_body(&JsonRpcRequest::new(id, method, params))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(self.headers.clone());

        tracing::debug!(id, method, url = %self.url, "POST MCP request");
        let exchange = async {
            let response = self
                .http
                .post(&self.url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|e| McpError::transport(format!("request failed: {e}")))?;

            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| McpError::transport(format!("failed to read response: {e}")))?;
            if !status.is_success() {
                return Err(status_error(
                    status,
                    String::from_utf8_lossy(&bytes).into_owned(),
                ));
            }
            decode_body(&bytes)
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(closed()),
            result = tokio::time::timeout(timeout, exchange) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Abort in-flight requests and refuse new ones.
    pub fn shutdown(&self) {
        self.closed.cancel();
    }
}

fn to_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| McpError::transport(format!("invalid header name '{name}'")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| McpError::transport(format!("invalid value for header '{name}'")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn status_error(status: StatusCode, body: String) -> McpError {
    let body = body.trim();
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    };
    McpError::Transport {
        status: Some(status.as_u16()),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_accepts_credentials() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let map = to_header_map(&headers).unwrap();
        assert_eq!(map["authorization"], "Bearer abc");
    }

    #[test]
    fn header_map_rejects_invalid_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        match to_header_map(&headers) {
            Err(McpError::Transport { status, message }) => {
                assert_eq!(status, None);
                assert!(message.contains("bad header"));
            }
            other => panic!("Expected Transport error, got {other:?}"),
        }
    }

    #[test]
    fn status_error_uses_reason_for_empty_body() {
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, String::new());
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("Internal Server Error"));
    }

    #[test]
    fn status_error_keeps_body() {
        let err = status_error(StatusCode::UNAUTHORIZED, "  bad token\n".to_string());
        match err {
            McpError::Transport { status, message } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "bad token");
            }
            other => panic!("Expected Transport error, got {other:?}"),
        }
    }
}
