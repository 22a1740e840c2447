//! Wire framing for JSON-RPC messages.
//!
//! Over a pipe every message is one line of UTF-8 JSON terminated by `\n`.
//! Over HTTP a message is the whole request or response body.

use crate::error::McpError;
use crate::jsonrpc::JsonRpcMessage;
use serde::Serialize;

/// Longest partial line kept while waiting for its newline.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Serialize a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, McpError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Serialize a message as an HTTP request body.
pub fn encode_body<T: Serialize>(message: &T) -> Result<Vec<u8>, McpError> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse an HTTP response body as a single JSON-RPC message.
pub fn decode_body(body: &[u8]) -> Result<JsonRpcMessage, McpError> {
    Ok(serde_json::from_slice(body)?)
}

/// Incremental decoder for newline-delimited JSON.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; bytes after the
/// last newline stay buffered until the next chunk completes them. Each byte
/// is scanned for a newline once, however many chunks a line spans.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
    max_line: usize,
    dropped: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that discards any line longer than `max_line` bytes.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
            dropped: 0,
        }
    }

    /// Feed a chunk and return every complete, well-formed message in it.
    ///
    /// Blank lines are skipped. Lines that are not a JSON-RPC object, or that
    /// exceed the length cap, are logged and dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<JsonRpcMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else if let Some(msg) = self.parse_line(start, end) {
                messages.push(msg);
            }
            start = end + 1;
            self.scanned = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            if !self.discarding {
                tracing::warn!(
                    bytes = self.buffer.len(),
                    "discarding oversized line from MCP server"
                );
                self.dropped += 1;
                self.discarding = true;
            }
            self.buffer.clear();
            self.scanned = 0;
        }

        messages
    }

    /// Bytes waiting for a terminating newline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines dropped as malformed or oversized so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn parse_line(&mut self, start: usize, end: usize) -> Option<JsonRpcMessage> {
        let trimmed = self.buffer[start..end].trim_ascii();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_slice::<JsonRpcMessage>(trimmed) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    line = %String::from_utf8_lossy(trimmed),
                    "dropping malformed line from MCP server"
                );
                self.dropped += 1;
                None
            }
        }
    }
}
