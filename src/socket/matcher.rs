//! Proxy bypass lists.
//!
//! Matches the `no_proxy` conventions most tools share:
//! - entries are separated by commas, semicolons or whitespace
//! - `*` alone disables the proxy for every host
//! - `host:port` only applies to that port
//! - `.example.com` and `*.example.com` match by suffix
//! - anything else must equal the host exactly

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct BypassRule {
    host: String,
    /// 0 applies to every port.
    port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMatcher {
    rules: Vec<BypassRule>,
    match_all: bool,
}

impl ProxyMatcher {
    /// `NO_PROXY`, falling back to `no_proxy`.
    pub fn from_env() -> Self {
        let raw = std::env::var("NO_PROXY")
            .or_else(|_| std::env::var("no_proxy"))
            .unwrap_or_default();
        Self::from_string(&raw)
    }

    pub fn from_string(bypass: &str) -> Self {
        if bypass == "*" {
            return ProxyMatcher {
                rules: Vec::new(),
                match_all: true,
            };
        }

        let rules = bypass
            .split([',', ';', ' ', '\t', '\n', '\r'])
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.rsplit_once(':') {
                Some((host, port))
                    if !host.is_empty()
                        && !port.is_empty()
                        && port.bytes().all(|b| b.is_ascii_digit()) =>
                {
                    BypassRule {
                        host: host.to_lowercase(),
                        port: port.parse().unwrap_or(0),
                    }
                }
                _ => BypassRule {
                    host: entry.to_lowercase(),
                    port: 0,
                },
            })
            .collect();

        ProxyMatcher {
            rules,
            match_all: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.match_all && self.rules.is_empty()
    }

    /// True when requests to `url` should go through the proxy.
    ///
    /// URLs without a host are never proxied.
    pub fn should_proxy(&self, url: &Url) -> bool {
        if self.match_all {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.rules.is_empty() {
            return true;
        }
        let host = host.to_lowercase();
        let port = url.port_or_known_default().unwrap_or(0);

        self.rules.iter().all(|rule| {
            if rule.port != 0 && rule.port != port {
                return true;
            }
            if rule.host.starts_with('.') || rule.host.starts_with('*') {
                let suffix = rule.host.strip_prefix('*').unwrap_or(&rule.host);
                !host.ends_with(suffix)
            } else {
                host != rule.host
            }
        })
    }

    pub fn should_bypass(&self, url: &Url) -> bool {
        !self.should_proxy(url)
    }
}
