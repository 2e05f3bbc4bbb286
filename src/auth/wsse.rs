//! WS-Security UsernameToken header.

use super::crypto::{hex_digest, random_hex};
use crate::base::neterror::NetError;
use crate::request::HeaderList;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use boring::hash::MessageDigest;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsseAuth {
    pub username: String,
    pub password: String,
}

impl WsseAuth {
    pub fn apply(&self, headers: &mut HeaderList) -> Result<(), NetError> {
        let nonce = random_hex(16)?;
        let created = iso_timestamp(OffsetDateTime::now_utc());
        headers.set("X-WSSE", self.header_value(&nonce, &created)?);
        Ok(())
    }

    /// `PasswordDigest` is base64 of the *hex* SHA-1 of nonce + created + password.
    pub fn header_value(&self, nonce: &str, created: &str) -> Result<String, NetError> {
        let input = format!("{}{}{}", nonce, created, self.password);
        let hex = hex_digest(MessageDigest::sha1(), input.as_bytes())?;
        let digest = STANDARD.encode(hex);
        Ok(format!(
            "UsernameToken Username=\"{}\", PasswordDigest=\"{}\", Nonce=\"{}\", Created=\"{}\"",
            self.username, digest, nonce, created
        ))
    }
}

/// Millisecond-precision UTC timestamp, e.g. `2024-05-01T10:00:00.000Z`.
pub(crate) fn iso_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.millisecond()
    )
}
