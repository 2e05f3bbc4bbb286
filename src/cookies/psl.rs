//! Public suffix checks for the `Domain` cookie attribute.

use psl::{List, Psl};

/// True when `domain` is itself a listed public suffix (`com`, `co.uk`,
/// `github.io`). Names under an unlisted TLD such as `localhost` are not.
pub fn is_public_suffix(domain: &str) -> bool {
    let lower = domain.to_ascii_lowercase();
    List.suffix(lower.as_bytes())
        .is_some_and(|suffix| suffix.is_known() && suffix.as_bytes() == lower.as_bytes())
}

/// eTLD+1 of `domain`, or `None` for a bare public suffix.
pub fn registrable_domain(domain: &str) -> Option<String> {
    let lower = domain.to_ascii_lowercase();
    psl::domain(lower.as_bytes())
        .and_then(|d| std::str::from_utf8(d.as_bytes()).ok())
        .map(str::to_string)
}

/// A response from `host` may set a cookie for `cookie_domain` when the
/// host is that domain or a subdomain of it and the domain is not a public
/// suffix.
pub fn is_valid_cookie_domain(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.').to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    if domain.is_empty() || is_public_suffix(&domain) {
        return false;
    }
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_suffixes() {
        assert!(is_public_suffix("com"));
        assert!(is_public_suffix("CO.UK"));
        assert!(is_public_suffix("github.io"));
        assert!(!is_public_suffix("example.com"));
        assert!(!is_public_suffix("localhost"));
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("deep.sub.example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(registrable_domain("com"), None);
    }

    #[test]
    fn test_cookie_domain_validity() {
        assert!(is_valid_cookie_domain(".example.com", "api.example.com"));
        assert!(is_valid_cookie_domain("localhost", "localhost"));
        assert!(!is_valid_cookie_domain("co.uk", "example.co.uk"));
        assert!(!is_valid_cookie_domain("other.com", "example.com"));
    }
}
