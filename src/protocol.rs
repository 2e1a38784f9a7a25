//! Wire protocol: newline-delimited JSON documents.
//!
//! Each logical message is one complete JSON document terminated by `\n`:
//!
//! ```text
//! { "type": "request",  "id": 1, "method": "switch_scene", "params": {...} }
//! { "type": "response", "id": 1, "result": {...} }
//! { "type": "response", "id": 1, "error": { "code": "...", "message": "..." } }
//! { "type": "event",    "kind": "scene_switched", "payload": {...} }
//! ```
//!
//! Partial reads are buffered until a full line is available. A document
//! that fails to parse is a protocol violation fatal to the connection.

use crate::error::ConnectionError;
use crate::events::EventKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames larger than this are treated as a protocol violation.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Structured error carried in an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// One protocol message: request, response, or event-notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Event {
        kind: EventKind,
        #[serde(default)]
        payload: Value,
    },
}

impl Message {
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Message::Request {
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn response_ok(id: u64, result: Value) -> Self {
        Message::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn response_err(id: u64, error: ErrorBody) -> Self {
        Message::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn event(kind: EventKind, payload: Value) -> Self {
        Message::Event { kind, payload }
    }
}

/// Encode a message as one newline-terminated JSON document.
pub fn encode(msg: &Message) -> Vec<u8> {
    // Message serialization cannot fail: every payload is already a Value.
    let mut bytes = serde_json::to_vec(msg).expect("message serializes");
    bytes.push(b'\n');
    bytes
}

/// Incremental decoder for the inbound byte stream.
///
/// Push raw socket bytes in, pull complete messages out. Keeps at most one
/// partial line buffered.
#[derive(Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete message, if a full line is buffered.
    ///
    /// `Ok(None)` means more bytes are needed. A line that is not a valid
    /// message document, or a partial line exceeding [`MAX_FRAME_LEN`],
    /// yields `ConnectionError::MalformedFrame`.
    pub fn next_frame(&mut self) -> Result<Option<Message>, ConnectionError> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.buf.len() > MAX_FRAME_LEN {
                    return Err(ConnectionError::MalformedFrame(format!(
                        "frame exceeds {MAX_FRAME_LEN} bytes"
                    )));
                }
                return Ok(None);
            };

            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            // Tolerate CRLF peers and blank keep-alive lines.
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_FRAME_LEN {
                return Err(ConnectionError::MalformedFrame(format!(
                    "frame exceeds {MAX_FRAME_LEN} bytes"
                )));
            }

            return serde_json::from_slice::<Message>(line)
                .map(Some)
                .map_err(|e| ConnectionError::MalformedFrame(e.to_string()));
        }
    }
}
