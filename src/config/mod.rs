//! Configuration.
//!
//! - [`Preferences`]: user preferences supplied by the host (serde, camelCase)
//! - [`EngineConfig`]: builder for engine-wide limits and paths

mod engine;
mod preferences;

pub use engine::{EngineConfig, DEFAULT_AGENT_CACHE_CAPACITY, DEFAULT_WS_QUEUE_CAPACITY};
pub use preferences::{
    CustomCaCertificate, Preferences, ProxyAuth, ProxyConfig, ProxyPreferenceMode,
    ProxyPreferences, RequestPreferences, Toggle, DEFAULT_MAX_REDIRECTS,
};
