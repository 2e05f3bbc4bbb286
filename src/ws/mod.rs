//! WebSocket client.
//!
//! Connections are keyed by request id and reuse the agents, proxy
//! resolution and TLS setup of the HTTP path. State changes, handshake
//! redirects and every message are reported as [`WsEvent`]s.
//!
//! # Example
//! ```ignore
//! let (client, mut events) = WsClient::new(agents, prefs, &config);
//! client.start_connection(request, scopes, WsOptions::default())?;
//! client.queue_message(&request_id, r#"{"op":"subscribe"}"#)?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

pub mod client;
pub mod connection;
pub mod message;

pub use client::{ws_url, WsClient, WsOptions, DEFAULT_CLOSE_REASON, MAX_WS_REDIRECTS};
pub use connection::ConnectionState;
pub use message::{hex_dump, ChangeKind, Direction, WsEvent, WsEventKind, WsMessage};
