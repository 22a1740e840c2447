//! Integration tests for HTTP-backed connections.
//!
//! Uses a raw TCP test server that answers the connect-time GET and
//! JSON-RPC POSTs, recording every request it sees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mcpt_engine::{ConnectionRegistry, EngineSettings, McpError, TransportSpec};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as seen by the test server.
#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> String + Send + Sync>;

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

fn ok_get_then(post: impl Fn(&Recorded) -> String + Send + Sync + 'static) -> Handler {
    Arc::new(move |req: &Recorded| {
        if req.method == "GET" {
            http_response("200 OK", "")
        } else {
            post(req)
        }
    })
}

/// Echo the request id back in a JSON-RPC result.
fn echo_result(req: &Recorded) -> String {
    let body = req.json();
    let reply = json!({
        "jsonrpc": "2.0",
        "id": body["id"],
        "result": {"method": body["method"], "params": body["params"]},
    });
    http_response("200 OK", &reply.to_string())
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let method = lines.next()?.split(' ').next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(Recorded {
        method,
        headers,
        body,
    })
}

/// Start a test server. Returns its URL and the log of requests received.
async fn start_test_server(handler: Handler) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = Arc::clone(&log);

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let handler = Arc::clone(&handler);
            let log = Arc::clone(&log_clone);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let response = handler(&request);
                log.lock().unwrap().push(request);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/mcp"), log)
}

fn http(url: &str, headers: &[(&str, &str)]) -> TransportSpec {
    TransportSpec::Http {
        url: url.to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        call_timeout_ms: 5_000,
        handshake_timeout_ms: 5_000,
        ..EngineSettings::default()
    }
}

#[tokio::test]
async fn failed_get_reports_status() {
    let (url, log) =
        start_test_server(Arc::new(|_: &Recorded| http_response("500 Internal Server Error", ""))).await;
    let registry = ConnectionRegistry::new(settings());

    let err = registry.connect(&http(&url, &[])).await.unwrap_err();
    assert!(matches!(err, McpError::Transport { .. }), "got {err:?}");
    assert_eq!(err.status(), Some(500));
    assert!(registry.is_empty().await);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].method, "GET");
    assert_eq!(log[0].headers["accept"], "text/event-stream");
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = ConnectionRegistry::new(settings());
    let err = registry
        .connect(&http(&format!("http://{addr}/mcp"), &[]))
        .await
        .unwrap_err();
    match err {
        McpError::Transport { status, .. } => assert_eq!(status, None),
        other => panic!("Expected Transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn post_reply_is_the_response() {
    let (url, log) = start_test_server(ok_get_then(echo_result)).await;
    let registry = ConnectionRegistry::new(settings());
    let id = registry.connect(&http(&url, &[])).await.unwrap();

    let resp = registry
        .call(&id, "tools/call", Some(json!({"name": "echo"})))
        .await
        .unwrap();
    let result = resp.result.unwrap();
    assert_eq!(result["method"], "tools/call");
    assert_eq!(result["params"], json!({"name": "echo"}));

    let log = log.lock().unwrap();
    let post = log.iter().find(|r| r.method == "POST").unwrap();
    assert_eq!(post.headers["content-type"], "application/json");
    let body = post.json();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["method"], "tools/call");
    assert!(body["id"].is_u64());
}

#[tokio::test]
async fn custom_headers_reach_get_and_calls() {
    let (url, log) = start_test_server(ok_get_then(echo_result)).await;
    let registry = ConnectionRegistry::new(settings());
    let id = registry
        .connect(&http(&url, &[("Authorization", "Bearer secret"), ("X-Trace", "abc")]))
        .await
        .unwrap();
    registry.call(&id, "ping", None).await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    for request in log.iter() {
        assert_eq!(request.headers["authorization"], "Bearer secret");
        assert_eq!(request.headers["x-trace"], "abc");
    }
}

#[tokio::test]
async fn invalid_header_is_rejected_before_connecting() {
    let registry = ConnectionRegistry::new(settings());
    let err = registry
        .connect(&http("http://127.0.0.1:1/mcp", &[("bad header", "x")]))
        .await
        .unwrap_err();
    match err {
        McpError::Transport { status, message } => {
            assert_eq!(status, None);
            assert!(message.contains("bad header"));
        }
        other => panic!("Expected Transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn post_failure_status_is_transport_error() {
    let handler = ok_get_then(|_: &Recorded| {
        http_response("500 Internal Server Error", r#"{"error":"boom"}"#)
    });
    let (url, _log) = start_test_server(handler).await;
    let registry = ConnectionRegistry::new(settings());
    let id = registry.connect(&http(&url, &[])).await.unwrap();

    let err = registry.call(&id, "ping", None).await.unwrap_err();
    match err {
        McpError::Transport { status, message } => {
            assert_eq!(status, Some(500));
            assert!(message.contains("boom"));
        }
        other => panic!("Expected Transport error, got {other:?}"),
    }

    // The connection stays registered after a failed call.
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn jsonrpc_error_is_passed_through() {
    let handler = ok_get_then(|req: &Recorded| {
        let reply = json!({
            "jsonrpc": "2.0",
            "id": req.json()["id"],
            "error": {"code": -32601, "message": "Method not found", "data": {"method": "nope"}},
        });
        http_response("200 OK", &reply.to_string())
    });
    let (url, _log) = start_test_server(handler).await;
    let registry = ConnectionRegistry::new(settings());
    let id = registry.connect(&http(&url, &[])).await.unwrap();

    let resp = registry.call(&id, "nope", None).await.unwrap();
    let err = resp.error.unwrap();
    assert_eq!(err.code, -32601);
    assert_eq!(err.message, "Method not found");
    assert_eq!(err.data, Some(json!({"method": "nope"})));
}

#[tokio::test]
async fn non_json_reply_is_an_error() {
    let handler = ok_get_then(|_: &Recorded| http_response("200 OK", "definitely not json"));
    let (url, _log) = start_test_server(handler).await;
    let registry = ConnectionRegistry::new(settings());
    let id = registry.connect(&http(&url, &[])).await.unwrap();

    assert!(registry.call(&id, "ping", None).await.is_err());
}

#[tokio::test]
async fn unknown_connection_is_not_found() {
    let (url, _log) = start_test_server(ok_get_then(echo_result)).await;
    let registry = ConnectionRegistry::new(settings());
    let id = registry.connect(&http(&url, &[])).await.unwrap();

    let err = registry
        .call("not-a-connection", "ping", None)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::NotFound { .. }), "got {err:?}");

    registry.disconnect(&id).await;
    let err = registry.call(&id, "ping", None).await.unwrap_err();
    assert!(matches!(err, McpError::NotFound { .. }), "got {err:?}");
}
