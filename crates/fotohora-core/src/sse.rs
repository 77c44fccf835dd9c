//! Server-sent events decoding for realtime-database streams.
//!
//! [`SseParser`] turns the raw bytes of a `text/event-stream` body into
//! [`SseEvent`]s, and [`StreamEvent::decode`] interprets those as database
//! stream events. Neither does any I/O.

use serde::Deserialize;
use serde_json::Value;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Event type; `message` if the server sent none.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Bytes may be fed in arbitrary chunks; lines split across chunks,
/// including inside multi-byte characters, are reassembled.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body, returning every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    path: String,
    data: Value,
}

/// A realtime-database stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Replace the value at `path` (relative to the subscribed location).
    Put { path: String, data: Value },
    /// Merge the children of `data` into the value at `path`.
    Patch { path: String, data: Value },
    /// Heartbeat.
    KeepAlive,
    /// The server cancelled the stream, usually for lack of permission.
    Cancel(String),
    /// The credential expired or was revoked.
    AuthRevoked(String),
    /// An event type this client does not know.
    Unknown(String),
}

impl StreamEvent {
    /// Interpret a server-sent event.
    pub fn decode(event: &SseEvent) -> serde_json::Result<Self> {
        Ok(match event.event.as_str() {
            "put" => {
                let Payload { path, data } = serde_json::from_str(&event.data)?;
                Self::Put { path, data }
            }
            "patch" => {
                let Payload { path, data } = serde_json::from_str(&event.data)?;
                Self::Patch { path, data }
            }
            "keep-alive" => Self::KeepAlive,
            "cancel" => Self::Cancel(reason(&event.data, "cancelled by server")),
            "auth_revoked" => Self::AuthRevoked(reason(&event.data, "credential revoked")),
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// The `data` of a cancel event is usually a JSON string, sometimes `null`.
fn reason(data: &str, fallback: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) if !s.is_empty() => s,
        Ok(Value::Null) => fallback.to_string(),
        _ if data.trim().is_empty() => fallback.to_string(),
        _ => data.trim().to_string(),
    }
}
