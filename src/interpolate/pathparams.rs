//! `:name` path parameter substitution.

use crate::base::neterror::NetError;
use crate::request::item::PathParam;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Segments like `Entity(id=:id)` get their embedded params replaced too.
static CALL_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+\([^)]*\)$").expect("valid regex"));
static EMBEDDED_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\w+)").expect("valid regex"));

/// Replace `:name` path segments of `url` with the matching param values.
///
/// A URL without an `http://` or `https://` prefix is treated as `http://`.
/// The query string is re-attached exactly as written. With no params the
/// URL is returned unchanged.
pub fn interpolate_path_params(url: &str, params: &[PathParam]) -> Result<String, NetError> {
    if params.is_empty() {
        return Ok(url.to_string());
    }

    let raw_query = url.find('?').map(|i| &url[i..]).unwrap_or("");
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    let parsed = Url::parse(&with_scheme).map_err(|_| NetError::invalid_url())?;

    let find = |name: &str| params.iter().find(|p| p.name == name).map(|p| p.value.as_str());

    let mut path = String::new();
    for segment in parsed.path().split('/').filter(|s| !s.is_empty()) {
        path.push('/');
        if let Some(name) = segment.strip_prefix(':') {
            path.push_str(find(name).unwrap_or(segment));
        } else if CALL_SEGMENT.is_match(segment) {
            let mut result = segment.to_string();
            for caps in EMBEDDED_PARAM.captures_iter(segment) {
                let token = &caps[1];
                let name = token
                    .trim_end_matches(['\'', ')', '"', '`'])
                    .trim_start_matches(['(', '\'', '"', '`']);
                if name.is_empty() {
                    continue;
                }
                if let Some(value) = find(name) {
                    result = result.replacen(&format!(":{}", token), value, 1);
                }
            }
            path.push_str(&result);
        } else {
            path.push_str(segment);
        }
    }

    let trailing = if parsed.path().ends_with('/') { "/" } else { "" };

    Ok(format!(
        "{}{}{}{}",
        parsed.origin().ascii_serialization(),
        path,
        trailing,
        raw_query
    ))
}
