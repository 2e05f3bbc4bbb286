//! WebSocket events and message payloads.

use http::HeaderMap;
use serde_json::Value;
use std::time::SystemTime;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Why the set of live connections changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Cleared,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq)]
pub struct WsMessage {
    pub direction: Direction,
    /// Payload as text; binary frames are decoded lossily.
    pub text: String,
    /// Parsed payload when the text is JSON.
    pub json: Option<Value>,
    pub hex_dump: String,
    pub timestamp: SystemTime,
}

impl WsMessage {
    pub fn new(direction: Direction, payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload).into_owned();
        Self {
            direction,
            json: serde_json::from_str(&text).ok(),
            hex_dump: hex_dump(payload),
            text,
            timestamp: SystemTime::now(),
        }
    }
}

/// Notifications for one connection, or for the client as a whole when
/// `request_id` is absent.
#[derive(Debug, Clone)]
pub struct WsEvent {
    pub request_id: Option<String>,
    pub collection_uid: Option<String>,
    pub kind: WsEventKind,
}

#[derive(Debug, Clone)]
pub enum WsEventKind {
    Connecting,
    Open { url: String },
    Redirect { url: String, headers: HeaderMap },
    Upgrade { headers: HeaderMap },
    Message(WsMessage),
    Close { code: u16, reason: String },
    Error { message: String },
    ConnectionsChanged { kind: ChangeKind, active_ids: Vec<String> },
}

/// Text actually put on the wire for a queued message: JSON is sent
/// compacted, anything else verbatim.
pub fn outgoing_text(message: &str) -> String {
    match serde_json::from_str::<Value>(message) {
        Ok(value) => value.to_string(),
        Err(_) => message.to_string(),
    }
}

/// Classic 16-bytes-per-row dump with offsets and an ASCII gutter.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        out.push_str(&format!("{:08x}  ", row * 16));
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{:02x} ", b)),
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('|');
    }
    out
}
