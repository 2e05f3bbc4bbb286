//! Cache keys for agents.
//!
//! Two requests that would build byte-identical TLS clients through the same
//! proxy get the same key, so the second reuses the first one's sessions and
//! idle connections. Secrets never appear in a key, only a truncated SHA-256.

use crate::auth::crypto::hex_digest;
use crate::socket::tls::TlsOptions;
use boring::hash::MessageDigest;
use serde_json::{json, Value};

/// Which transport an agent speaks to the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentClass {
    Http,
    Https,
}

impl AgentClass {
    pub fn for_scheme(scheme: &str) -> Self {
        match scheme {
            "https" | "wss" => AgentClass::Https,
            _ => AgentClass::Http,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            AgentClass::Http => 1,
            AgentClass::Https => 2,
        }
    }

    /// Timeline text for a cache hit.
    pub fn reuse_message(self) -> &'static str {
        match self {
            AgentClass::Http => "Reusing cached agent (connection reuse enabled)",
            AgentClass::Https => "Reusing cached agent (SSL session reuse enabled)",
        }
    }
}

/// First 16 hex chars of SHA-256, or null for absent/empty input.
fn short_hash(data: Option<&[u8]>) -> Value {
    match data {
        Some(d) if !d.is_empty() => hex_digest(MessageDigest::sha256(), d)
            .map(|h| Value::String(h[..16].to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Canonical key for an agent.
///
/// Plain-HTTP agents only vary by proxy; their TLS options never touch the
/// origin connection.
pub fn fingerprint(class: AgentClass, options: &TlsOptions, proxy_uri: Option<&str>) -> String {
    let key = match class {
        AgentClass::Http => json!({
            "agentClassId": class.id(),
            "proxyUri": proxy_uri,
            "keepAlive": true,
        }),
        AgentClass::Https => {
            let identity = options.client_identity.as_ref();
            let ca = options.ca.joined();
            json!({
                "agentClassId": class.id(),
                "proxyUri": proxy_uri,
                "rejectUnauthorized": options.reject_unauthorized,
                "ca": short_hash(Some(ca.as_bytes())),
                "cert": short_hash(identity.and_then(|i| i.cert.as_deref())),
                "key": short_hash(identity.and_then(|i| i.key.as_deref())),
                "pfx": short_hash(identity.and_then(|i| i.pfx.as_deref())),
                "passphrase": short_hash(
                    identity.and_then(|i| i.passphrase.as_ref()).map(|p| p.as_bytes())
                ),
                "minVersion": options.min_version,
                "secureProtocol": options.secure_protocol,
            })
        }
    };
    key.to_string()
}
