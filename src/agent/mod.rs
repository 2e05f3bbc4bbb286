//! Reusable connection agents.
//!
//! An [`Agent`] owns one TLS client and proxy choice plus the idle
//! keep-alive connections opened through them. The [`AgentCache`] shares
//! agents between requests whose configuration fingerprints match, so
//! repeated requests skip the TCP and TLS handshakes.

#[allow(clippy::module_inception)]
mod agent;
pub mod cache;
pub mod fingerprint;

pub use agent::{Agent, HttpConnection};
pub(crate) use agent::origin_key;
pub use cache::AgentCache;
pub use fingerprint::AgentClass;
