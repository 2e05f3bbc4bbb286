//! JSON persistence for the cookie jar.
//!
//! Only persistent (non-session), unexpired cookies are written; loading
//! skips anything that expired while on disk.

use crate::base::neterror::NetError;
use crate::cookies::canonical_cookie::CanonicalCookie;
use crate::cookies::jar::CookieJar;
use std::fs;
use std::path::Path;
use time::OffsetDateTime;

pub fn save_cookies(jar: &CookieJar, path: &Path) -> Result<usize, NetError> {
    let now = OffsetDateTime::now_utc();
    let cookies: Vec<CanonicalCookie> = jar
        .iter_all_cookies()
        .filter(|c| !c.is_session() && !c.is_expired(now))
        .collect();

    let json = serde_json::to_string_pretty(&cookies)
        .map_err(|e| NetError::ArtifactWrite(e.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json).map_err(|e| NetError::ArtifactWrite(e.to_string()))?;
    Ok(cookies.len())
}

/// Merge cookies saved by [`save_cookies`] into `jar`. A missing file loads
/// nothing.
pub fn load_cookies(jar: &CookieJar, path: &Path) -> Result<usize, NetError> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let cookies: Vec<CanonicalCookie> =
        serde_json::from_str(&json).map_err(|_| NetError::JsonParseError)?;

    let now = OffsetDateTime::now_utc();
    let mut loaded = 0;
    for cookie in cookies.into_iter().filter(|c| !c.is_expired(now)) {
        jar.set_canonical_cookie(cookie);
        loaded += 1;
    }
    Ok(loaded)
}
