//! Cookie jar shared by every request of an engine.
//!
//! | Type | Responsibility |
//! |------|----------------|
//! | [`CookieJar`](jar::CookieJar) | Storage, URL matching, cookie manager operations |
//! | [`CanonicalCookie`](canonical_cookie::CanonicalCookie) | One parsed cookie |
//! | [`psl`] | Public suffix checks for `Domain=` |
//! | [`persistence`] | JSON save/load |

pub mod canonical_cookie;
pub mod jar;
pub mod persistence;
pub mod psl;

pub use canonical_cookie::{CanonicalCookie, SameSite};
pub use jar::{CookieDraft, CookieJar, DomainCookies};
