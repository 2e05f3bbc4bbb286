//! Redirect rules: when to follow, where to, and what the next hop keeps.

use super::transaction::{Attempt, HopResponse};
use crate::base::neterror::NetError;
use crate::base::timeline::Timeline;
use http::StatusCode;
use url::Url;

/// Statuses that are followed when a `Location` is present.
pub const REDIRECT_STATUSES: [u16; 6] = [300, 301, 302, 303, 307, 308];

/// Dropped from a hop that leaves the original origin.
pub const CREDENTIAL_HEADERS: [&str; 5] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "www-authenticate",
    "proxy-authenticate",
];

pub fn is_redirect(status: StatusCode) -> bool {
    REDIRECT_STATUSES.contains(&status.as_u16())
}

/// The `Location` of a followable redirect, if this response is one.
pub fn location(response: &HopResponse) -> Option<&str> {
    if !is_redirect(response.status) {
        return None;
    }
    response
        .headers
        .get(http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

/// Resolve `location` against `current`. Relative targets are noted on the
/// timeline.
pub fn resolve_location(
    current: &Url,
    location: &str,
    timeline: &Timeline,
) -> Result<Url, NetError> {
    if let Ok(absolute) = Url::parse(location) {
        return Ok(absolute);
    }
    let resolved = current.join(location).map_err(|_| NetError::InvalidRedirect)?;
    timeline.info(format!(
        "Resolving relative redirect URL: {} -> {}",
        location, resolved
    ));
    Ok(resolved)
}

/// Same scheme, host and port, with default ports filled in.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Build the next hop.
///
/// 301/302/303 turn anything but HEAD into a body-less GET; 307/308 keep
/// method and body. Leaving the origin strips credential headers.
pub fn follow(attempt: &Attempt, status: StatusCode, next: Url, timeline: &Timeline) -> Attempt {
    let mut hop = attempt.clone();

    if matches!(status.as_u16(), 301..=303) && hop.method != "HEAD" {
        hop.method = "GET".to_string();
        hop.body = None;
        hop.headers.remove_many(&["content-length", "content-type"]);
    }

    if !same_origin(&attempt.url, &next) {
        let removed = hop.headers.remove_many(&CREDENTIAL_HEADERS);
        hop.cross_origin = true;
        timeline.info(format!(
            "Redirect crosses origin ({} -> {}), {} credential header(s) removed",
            attempt.url.host_str().unwrap_or(""),
            next.host_str().unwrap_or(""),
            removed
        ));
    }
    tracing::debug!("redirect {} -> {}", attempt.url, next);

    hop.url = next;
    hop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HeaderList;
    use bytes::Bytes;

    fn attempt(method: &str, url: &str) -> Attempt {
        let mut headers = HeaderList::new();
        headers.set("Authorization", "Bearer t");
        headers.set("Cookie", "a=1");
        headers.set("Content-Type", "application/json");
        headers.set("X-Trace", "1");
        Attempt {
            method: method.to_string(),
            url: Url::parse(url).unwrap(),
            headers,
            body: Some(Bytes::from_static(b"{}")),
            cross_origin: false,
        }
    }

    #[test]
    fn test_302_post_becomes_get() {
        let tl = Timeline::new();
        let a = attempt("POST", "http://api.test/a");
        let next = Url::parse("http://api.test/b").unwrap();
        let hop = follow(&a, StatusCode::FOUND, next, &tl);
        assert_eq!(hop.method, "GET");
        assert!(hop.body.is_none());
        assert!(!hop.headers.contains("content-type"));
        assert_eq!(hop.headers.get("authorization"), Some("Bearer t"));
    }

    #[test]
    fn test_307_keeps_method_and_body() {
        let tl = Timeline::new();
        let a = attempt("POST", "http://api.test/a");
        let next = Url::parse("http://api.test/b").unwrap();
        let hop = follow(&a, StatusCode::TEMPORARY_REDIRECT, next, &tl);
        assert_eq!(hop.method, "POST");
        assert_eq!(hop.body.as_deref(), Some(&b"{}"[..]));
        assert!(hop.headers.contains("content-type"));
    }

    #[test]
    fn test_head_survives_303() {
        let tl = Timeline::new();
        let a = attempt("HEAD", "http://api.test/a");
        let hop = follow(&a, StatusCode::SEE_OTHER, a.url.clone(), &tl);
        assert_eq!(hop.method, "HEAD");
    }

    #[test]
    fn test_cross_origin_strips_credentials() {
        let tl = Timeline::new();
        let a = attempt("GET", "http://api.test/a");
        let next = Url::parse("http://other.test/b").unwrap();
        let hop = follow(&a, StatusCode::FOUND, next, &tl);
        assert!(!hop.headers.contains("authorization"));
        assert!(!hop.headers.contains("cookie"));
        assert_eq!(hop.headers.get("x-trace"), Some("1"));
        assert!(hop.cross_origin);
        assert!(tl.messages()[0].contains("api.test -> other.test"));
    }

    #[test]
    fn test_origin_compares_default_ports() {
        let a = Url::parse("https://api.test/x").unwrap();
        assert!(same_origin(&a, &Url::parse("https://api.test:443/y").unwrap()));
        assert!(!same_origin(&a, &Url::parse("http://api.test/y").unwrap()));
        assert!(!same_origin(&a, &Url::parse("https://api.test:8443/y").unwrap()));
    }

    #[test]
    fn test_resolve_relative() {
        let tl = Timeline::new();
        let cur = Url::parse("http://api.test/a/b?q=1").unwrap();
        let url = resolve_location(&cur, "../c", &tl).unwrap();
        assert_eq!(url.as_str(), "http://api.test/c");
        assert_eq!(
            tl.messages(),
            vec!["Resolving relative redirect URL: ../c -> http://api.test/c"]
        );
        assert_eq!(
            resolve_location(&cur, "https://elsewhere.test/", &tl)
                .unwrap()
                .host_str(),
            Some("elsewhere.test")
        );
    }

    #[test]
    fn test_status_set() {
        assert!(is_redirect(StatusCode::MULTIPLE_CHOICES));
        assert!(is_redirect(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_redirect(StatusCode::NOT_MODIFIED));
    }
}
