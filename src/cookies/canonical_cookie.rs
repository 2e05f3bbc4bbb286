//! Parsed cookie with its domain, path and expiry resolved.

use crate::cookies::psl;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use time::OffsetDateTime;
use url::Url;

/// A stored cookie, keyed in the jar by domain, path and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalCookie {
    pub name: String,
    pub value: String,
    /// Lowercase, without a leading dot.
    pub domain: String,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    /// `None` for session cookies.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub expiration_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_access_time: OffsetDateTime,
    pub secure: bool,
    pub http_only: bool,
    pub host_only: bool,
    pub same_site: SameSite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Unspecified,
    None,
    Lax,
    Strict,
}

impl CanonicalCookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: path.into(),
            creation_time: now,
            expiration_time: None,
            last_access_time: now,
            secure: false,
            http_only: false,
            host_only: true,
            same_site: SameSite::Unspecified,
        }
    }

    /// Parse one `Set-Cookie` value received from `url`.
    ///
    /// Returns `None` for unparsable lines, domains the URL may not set
    /// (including public suffixes) and invalid `__Secure-` / `__Host-`
    /// prefixes. `Max-Age` wins over `Expires`.
    pub fn from_set_cookie(url: &Url, line: &str, now: OffsetDateTime) -> Option<Self> {
        let parsed = cookie::Cookie::parse(line.to_string()).ok()?;
        let host = url.host_str()?.trim_matches(['[', ']']).to_ascii_lowercase();

        let (domain, host_only) = match parsed.domain().map(normalize_domain) {
            Some(d) if !d.is_empty() => {
                let is_ip = host.parse::<IpAddr>().is_ok();
                if (is_ip && d != host) || (!is_ip && !psl::is_valid_cookie_domain(&d, &host)) {
                    tracing::trace!("Rejecting cookie domain {} for host {}", d, host);
                    return None;
                }
                (d, false)
            }
            _ => (host, true),
        };

        let path = match parsed.path() {
            Some(p) if p.starts_with('/') => p.to_string(),
            _ => default_path(url.path()),
        };

        let expiration_time = match parsed.max_age() {
            Some(max_age) => Some(now + max_age),
            None => parsed.expires().and_then(|e| e.datetime()),
        };

        let same_site = match parsed.same_site() {
            Some(cookie::SameSite::Lax) => SameSite::Lax,
            Some(cookie::SameSite::Strict) => SameSite::Strict,
            Some(cookie::SameSite::None) => SameSite::None,
            None => SameSite::Unspecified,
        };

        let cookie = Self {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            path,
            creation_time: now,
            expiration_time,
            last_access_time: now,
            secure: parsed.secure().unwrap_or(false),
            http_only: parsed.http_only().unwrap_or(false),
            host_only,
            same_site,
        };

        cookie
            .has_valid_prefix(is_potentially_trustworthy(url))
            .then_some(cookie)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration_time.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_session(&self) -> bool {
        self.expiration_time.is_none()
    }

    /// `__Secure-` needs Secure from a secure origin; `__Host-` additionally
    /// needs `Path=/` and no Domain attribute.
    pub fn has_valid_prefix(&self, secure_origin: bool) -> bool {
        if self.name.starts_with("__Secure-") && !(self.secure && secure_origin) {
            return false;
        }
        if self.name.starts_with("__Host-")
            && !(self.secure && secure_origin && self.path == "/" && self.host_only)
        {
            return false;
        }
        true
    }

    /// RFC 6265 domain-match against a request host.
    pub fn domain_matches(&self, host: &str) -> bool {
        if self.host_only {
            return self.domain.eq_ignore_ascii_case(host);
        }
        if host.eq_ignore_ascii_case(&self.domain) {
            return true;
        }
        host.len() > self.domain.len()
            && host[host.len() - self.domain.len()..].eq_ignore_ascii_case(&self.domain)
            && host.as_bytes()[host.len() - self.domain.len() - 1] == b'.'
    }

    /// RFC 6265 path-match against a request path.
    pub fn path_matches(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/'))
    }

    /// `name=value`, as sent in a `Cookie` header.
    pub fn cookie_string(&self) -> String {
        if self.name.is_empty() {
            self.value.clone()
        } else {
            format!("{}={}", self.name, self.value)
        }
    }
}

pub(crate) fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Directory of the request path (RFC 6265 5.1.4).
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

/// Secure cookies are sent to https/wss URLs and to loopback hosts.
pub fn is_potentially_trustworthy(url: &Url) -> bool {
    if matches!(url.scheme(), "https" | "wss") {
        return true;
    }
    match url.host() {
        Some(url::Host::Domain(d)) => {
            let d = d.to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
