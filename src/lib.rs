//! # probenet
//!
//! The request execution engine of an API client.
//!
//! `probenet` takes a stored request description and layered variable
//! scopes, resolves `{{variables}}`, merges collection and folder settings,
//! injects authentication, and sends the request over HTTP/1.1 or a
//! WebSocket. HTTP requests go through a bounded redirect and challenge
//! loop, persist cookies and reuse TLS sessions through a capped agent
//! cache. Every request produces a response plus a diagnostic timeline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use probenet::config::{EngineConfig, Preferences};
//! use probenet::http::RequestRunner;
//! use probenet::interpolate::VariableScopes;
//! use probenet::request::PreparedRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = RequestRunner::with_defaults(Preferences::default(), EngineConfig::default());
//!     let request = PreparedRequest::new("GET", "https://example.com/{{path}}");
//!     let output = runner
//!         .execute(request, VariableScopes::new(), &CancellationToken::new())
//!         .await
//!         .unwrap();
//!     println!("Status: {}", output.response.status());
//!     for line in output.timeline.messages() {
//!         println!("{}", line);
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and the request timeline
//! - [`config`] - User preferences and engine settings
//! - [`request`] - Request items, collection settings and the merge
//! - [`interpolate`] - Variable scopes and `{{name}}` resolution
//! - [`auth`] - Basic, bearer, digest, AWS SigV4, NTLM, WSSE, API key and OAuth2
//! - [`cookies`] - Cookie jar with public suffix checks
//! - [`socket`] - Connect jobs, proxies, TLS and CA loading
//! - [`agent`] - Fingerprinted connection agents and their LRU cache
//! - [`http`] - Transactions, redirects and the request runner
//! - [`ws`] - WebSocket client
//!
//! ## Security
//!
//! - Redirects that leave the original origin drop credential headers
//! - Cookie `Domain=` attributes are checked against the public suffix list
//! - TLS options that change trust are part of the agent fingerprint, so a
//!   session is never reused across different verification settings

pub mod agent;
pub mod auth;
pub mod base;
pub mod config;
pub mod cookies;
pub mod http;
pub mod interpolate;
pub mod request;
pub mod socket;
pub mod ws;
