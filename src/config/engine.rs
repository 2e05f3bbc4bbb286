//! Engine-wide settings that are not user preferences.

use std::path::PathBuf;

/// Agents kept alive for TLS session reuse.
pub const DEFAULT_AGENT_CACHE_CAPACITY: usize = 100;
/// Outbound WebSocket messages buffered per connection.
pub const DEFAULT_WS_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub agent_cache_capacity: usize,
    /// Response bodies are written under this directory.
    pub artifact_dir: PathBuf,
    pub ws_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_cache_capacity: DEFAULT_AGENT_CACHE_CAPACITY,
            artifact_dir: std::env::temp_dir().join("probenet"),
            ws_queue_capacity: DEFAULT_WS_QUEUE_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_cache_capacity(mut self, capacity: usize) -> Self {
        self.agent_cache_capacity = capacity.max(1);
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn ws_queue_capacity(mut self, capacity: usize) -> Self {
        self.ws_queue_capacity = capacity;
        self
    }
}
