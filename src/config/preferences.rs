//! Host preferences consumed by the engine.
//!
//! Deserialised from the camelCase JSON the desktop host stores. Every
//! field has a default, so partial documents are accepted.

use crate::base::neterror::NetError;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Redirects followed when neither the request nor the preferences say otherwise.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub request: RequestPreferences,
    pub proxy: ProxyPreferences,
}

impl Preferences {
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(|_| NetError::JsonParseError)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestPreferences {
    pub ssl_verification: bool,
    pub custom_ca_certificate: CustomCaCertificate,
    pub keep_default_ca_certificates: Toggle,
    pub store_cookies: bool,
    pub send_cookies: bool,
    /// Connect + handshake timeout in milliseconds; 0 disables it.
    pub timeout: u64,
    pub max_redirects: usize,
}

impl Default for RequestPreferences {
    fn default() -> Self {
        Self {
            ssl_verification: true,
            custom_ca_certificate: CustomCaCertificate::default(),
            keep_default_ca_certificates: Toggle { enabled: true },
            store_cookies: true,
            send_cookies: true,
            timeout: 0,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl RequestPreferences {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(self.timeout))
    }

    /// The custom CA file, when enabled and set.
    pub fn custom_ca_path(&self) -> Option<&PathBuf> {
        if self.custom_ca_certificate.enabled {
            self.custom_ca_certificate.file_path.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomCaCertificate {
    pub enabled: bool,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPreferenceMode {
    #[default]
    Off,
    On,
    System,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyPreferences {
    pub mode: ProxyPreferenceMode,
    #[serde(flatten)]
    pub config: ProxyConfig,
}

/// A manually configured proxy. Fields stay strings until interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    pub protocol: String,
    pub hostname: String,
    #[serde(deserialize_with = "string_or_number")]
    pub port: String,
    pub auth: ProxyAuth,
    /// Comma separated hosts that bypass the proxy.
    pub bypass_proxy: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            hostname: String::new(),
            port: String::new(),
            auth: ProxyAuth::default(),
            bypass_proxy: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyAuth {
    pub enabled: bool,
    pub username: String,
    pub password: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}
