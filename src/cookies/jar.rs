//! In-memory cookie jar keyed by cookie domain.
//!
//! `Set-Cookie` headers are stored per response URL and matched back onto
//! request URLs by domain, path, `Secure` and expiry. Each domain holds at
//! most [`MAX_COOKIES_PER_DOMAIN`] cookies.

use crate::base::neterror::NetError;
use crate::cookies::canonical_cookie::{
    is_potentially_trustworthy, normalize_domain, CanonicalCookie, SameSite,
};
use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

/// Per-domain cap; the oldest cookie of a full domain is evicted.
const MAX_COOKIES_PER_DOMAIN: usize = 50;

/// Jar-wide cap; the oldest cookie overall is evicted.
const MAX_COOKIES_TOTAL: usize = 3000;

/// Cookies of one domain as shown in the cookie manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCookies {
    pub domain: String,
    pub cookies: Vec<CanonicalCookie>,
    /// `name=value; ...` of the listed cookies.
    pub cookie_string: String,
}

/// Editable cookie fields for [`CookieJar::add_cookie_for_domain`] and
/// [`CookieJar::modify_cookie_for_domain`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieDraft {
    pub name: String,
    pub value: String,
    /// Defaults to `/`.
    pub path: Option<String>,
    pub expires: Option<OffsetDateTime>,
    pub secure: bool,
    pub http_only: bool,
    pub host_only: bool,
    pub same_site: SameSite,
}

/// The shared cookie store, keyed by domain.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: DashMap<String, Vec<CanonicalCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the cookie with the same domain, path and name.
    /// An already-expired cookie only deletes its predecessor.
    pub fn set_canonical_cookie(&self, cookie: CanonicalCookie) {
        let now = OffsetDateTime::now_utc();
        let mut entry = self.store.entry(cookie.domain.clone()).or_default();

        let previous = entry
            .iter()
            .position(|c| c.name == cookie.name && c.path == cookie.path);
        let mut cookie = cookie;
        if let Some(idx) = previous {
            let old = entry.remove(idx);
            cookie.creation_time = old.creation_time;
        }
        if cookie.is_expired(now) {
            return;
        }

        while entry.len() >= MAX_COOKIES_PER_DOMAIN {
            let Some(oldest) = entry
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.last_access_time)
                .map(|(i, _)| i)
            else {
                break;
            };
            entry.remove(oldest);
        }
        entry.push(cookie);
        drop(entry);

        self.enforce_global_limit();
    }

    fn enforce_global_limit(&self) {
        while self.total_cookie_count() > MAX_COOKIES_TOTAL {
            let mut oldest: Option<(String, usize, OffsetDateTime)> = None;
            for entry in self.store.iter() {
                for (idx, cookie) in entry.value().iter().enumerate() {
                    if oldest
                        .as_ref()
                        .map_or(true, |(_, _, t)| cookie.last_access_time < *t)
                    {
                        oldest = Some((entry.key().clone(), idx, cookie.last_access_time));
                    }
                }
            }
            let Some((domain, idx, _)) = oldest else {
                break;
            };
            if let Some(mut entry) = self.store.get_mut(&domain) {
                if idx < entry.len() {
                    entry.remove(idx);
                }
            }
        }
    }

    /// Store one `Set-Cookie` header received from `url`. Rejected cookies
    /// are dropped silently. Returns whether anything was stored.
    pub fn store_set_cookie(&self, url: &Url, header: &str) -> bool {
        match CanonicalCookie::from_set_cookie(url, header, OffsetDateTime::now_utc()) {
            Some(cookie) => {
                self.set_canonical_cookie(cookie);
                true
            }
            None => {
                tracing::debug!("Ignoring Set-Cookie from {}: {}", url, header);
                false
            }
        }
    }

    /// Unexpired cookies applicable to `url`, longest path first, then
    /// oldest first. Secure cookies need a trustworthy origin.
    pub fn cookies_for_url(&self, url: &Url) -> Vec<CanonicalCookie> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let host = host.trim_matches(['[', ']']).to_ascii_lowercase();
        let now = OffsetDateTime::now_utc();
        let secure_ok = is_potentially_trustworthy(url);
        let path = if url.path().is_empty() { "/" } else { url.path() };

        let mut result = Vec::new();
        for domain in candidate_domains(&host) {
            let Some(mut entry) = self.store.get_mut(&domain) else {
                continue;
            };
            for cookie in entry.iter_mut() {
                if cookie.is_expired(now)
                    || !cookie.domain_matches(&host)
                    || !cookie.path_matches(path)
                    || (cookie.secure && !secure_ok)
                {
                    continue;
                }
                cookie.last_access_time = now;
                result.push(cookie.clone());
            }
        }

        result.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.creation_time.cmp(&b.creation_time))
        });
        result
    }

    /// The `Cookie` header value for `url`; empty when nothing applies.
    pub fn get_cookie_string_for_url(&self, url: &Url) -> String {
        self.cookies_for_url(url)
            .iter()
            .map(CanonicalCookie::cookie_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Every domain holding at least one unexpired cookie, sorted by domain.
    pub fn domains_with_cookies(&self) -> Vec<DomainCookies> {
        let now = OffsetDateTime::now_utc();
        let mut out: Vec<DomainCookies> = self
            .store
            .iter()
            .filter_map(|entry| {
                let cookies: Vec<CanonicalCookie> = entry
                    .value()
                    .iter()
                    .filter(|c| !c.is_expired(now))
                    .cloned()
                    .collect();
                if cookies.is_empty() {
                    return None;
                }
                let cookie_string = cookies
                    .iter()
                    .map(CanonicalCookie::cookie_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Some(DomainCookies {
                    domain: entry.key().clone(),
                    cookies,
                    cookie_string,
                })
            })
            .collect();
        out.sort_by(|a, b| a.domain.cmp(&b.domain));
        out
    }

    pub fn delete_cookies_for_domain(&self, domain: &str) {
        self.store.remove(&normalize_domain(domain));
    }

    /// Remove one cookie. Returns whether it existed.
    pub fn delete_cookie(&self, domain: &str, path: &str, name: &str) -> bool {
        let domain = normalize_domain(domain);
        let Some(mut entry) = self.store.get_mut(&domain) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|c| !(c.path == path && c.name == name));
        let removed = entry.len() != before;
        let now_empty = entry.is_empty();
        drop(entry);
        if now_empty {
            self.store.remove_if(&domain, |_, v| v.is_empty());
        }
        removed
    }

    /// Add a cookie from the cookie manager.
    pub fn add_cookie_for_domain(&self, domain: &str, draft: CookieDraft) -> Result<(), NetError> {
        let cookie = build_cookie(domain, draft, OffsetDateTime::now_utc())?;
        self.set_canonical_cookie(cookie);
        Ok(())
    }

    /// Replace `old_name`/`old_path` under `domain` with `draft`, keeping the
    /// original identity (domain, path, name) and creation time.
    pub fn modify_cookie_for_domain(
        &self,
        domain: &str,
        old_path: &str,
        old_name: &str,
        draft: CookieDraft,
    ) -> Result<(), NetError> {
        let key = normalize_domain(domain);
        let creation_time = self
            .store
            .get(&key)
            .and_then(|entry| {
                entry
                    .iter()
                    .find(|c| c.path == old_path && c.name == old_name)
                    .map(|c| c.creation_time)
            })
            .ok_or_else(|| {
                NetError::CookieNotFound(format!("{} on {}{}", old_name, key, old_path))
            })?;

        let draft = CookieDraft {
            name: old_name.to_string(),
            path: Some(old_path.to_string()),
            ..draft
        };
        let mut cookie = build_cookie(&key, draft, OffsetDateTime::now_utc())?;
        cookie.creation_time = creation_time;
        self.set_canonical_cookie(cookie);
        Ok(())
    }

    pub fn total_cookie_count(&self) -> usize {
        self.store.iter().map(|e| e.value().len()).sum()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn iter_all_cookies(&self) -> impl Iterator<Item = CanonicalCookie> + '_ {
        self.store.iter().flat_map(|entry| entry.value().clone())
    }
}

fn build_cookie(
    domain: &str,
    draft: CookieDraft,
    now: OffsetDateTime,
) -> Result<CanonicalCookie, NetError> {
    let domain = normalize_domain(domain);
    if domain.is_empty() || draft.name.contains([';', '=']) || draft.value.contains(';') {
        return Err(NetError::InvalidCookie(draft.name));
    }
    let mut cookie = CanonicalCookie::new(
        draft.name,
        draft.value,
        domain,
        draft.path.filter(|p| p.starts_with('/')).unwrap_or_else(|| "/".to_string()),
        now,
    );
    cookie.expiration_time = draft.expires;
    cookie.secure = draft.secure;
    cookie.http_only = draft.http_only;
    cookie.host_only = draft.host_only;
    cookie.same_site = draft.same_site;
    Ok(cookie)
}

/// The host and each parent domain, e.g. `a.b.example.com`, `b.example.com`,
/// `example.com`, `com`.
fn candidate_domains(host: &str) -> Vec<String> {
    let mut domains = vec![host.to_string()];
    let mut rest = host;
    while let Some((_, parent)) = rest.split_once('.') {
        if parent.is_empty() {
            break;
        }
        domains.push(parent.to_string());
        rest = parent;
    }
    domains
}
