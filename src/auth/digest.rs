//! HTTP Digest authentication (RFC 7616).
//!
//! Answered inside the challenge loop: a 401 carrying
//! `WWW-Authenticate: Digest ...` is parsed into a [`DigestChallenge`] and the
//! request is retried once with the computed `Authorization` header.
//!
//! ## Supported
//! - MD5, MD5-sess, SHA-256, SHA-256-sess
//! - qop=auth with nonce count and client nonce
//! - opaque passed back unchanged
//! - userhash (the username is sent hashed with the realm)

use super::crypto::{hex_digest, random_hex};
use crate::base::neterror::NetError;
use boring::hash::MessageDigest;

/// Credentials for the digest scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// Not named by the server; computed as MD5.
    #[default]
    Unspecified,
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn message_digest(&self) -> MessageDigest {
        match self {
            Self::Sha256 | Self::Sha256Sess => MessageDigest::sha256(),
            _ => MessageDigest::md5(),
        }
    }
}

/// A parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: DigestAlgorithm,
    /// Only `auth` is answered; `auth-int` alone is treated as no qop.
    qop_auth: bool,
    userhash: bool,
    nonce_count: u32,
}

impl DigestChallenge {
    /// Parse a full header value. Returns `None` when the scheme is not Digest.
    pub fn from_header(value: &str) -> Option<Result<Self, NetError>> {
        let trimmed = value.trim_start();
        let (scheme, rest) = trimmed.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }
        Some(Self::parse(rest))
    }

    /// Parse the parameter list that follows `Digest `.
    pub fn parse(params: &str) -> Result<Self, NetError> {
        let mut challenge = Self {
            realm: String::new(),
            nonce: String::new(),
            opaque: None,
            algorithm: DigestAlgorithm::default(),
            qop_auth: false,
            userhash: false,
            nonce_count: 0,
        };

        for part in split_params(params) {
            let (key, value) = parse_param(part)?;
            match key.to_lowercase().as_str() {
                "realm" => challenge.realm = value.to_string(),
                "nonce" => challenge.nonce = value.to_string(),
                "opaque" => challenge.opaque = Some(value.to_string()),
                "algorithm" => {
                    challenge.algorithm =
                        DigestAlgorithm::parse(value).ok_or(NetError::InvalidAuthChallenge)?;
                }
                "qop" => {
                    challenge.qop_auth = value
                        .split(',')
                        .any(|q| q.trim().eq_ignore_ascii_case("auth"));
                }
                "userhash" => challenge.userhash = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if challenge.nonce.is_empty() {
            return Err(NetError::InvalidAuthChallenge);
        }
        Ok(challenge)
    }

    /// Build the `Authorization` header value for `method` + `uri`.
    pub fn authorization(
        &mut self,
        method: &str,
        uri: &str,
        creds: &DigestAuth,
    ) -> Result<String, NetError> {
        let cnonce = random_hex(8)?;
        self.authorization_with_cnonce(method, uri, creds, &cnonce)
    }

    fn authorization_with_cnonce(
        &mut self,
        method: &str,
        uri: &str,
        creds: &DigestAuth,
        cnonce: &str,
    ) -> Result<String, NetError> {
        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);
        let response = self.compute_response(method, uri, creds, cnonce, &nc)?;

        // RFC 7616 3.4.4: the username travels as H(username:realm).
        let username = if self.userhash {
            hex_digest(
                self.algorithm.message_digest(),
                format!("{}:{}", creds.username, self.realm).as_bytes(),
            )?
        } else {
            creds.username.clone()
        };
        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            username, self.realm, self.nonce, uri
        );
        if self.algorithm != DigestAlgorithm::Unspecified {
            auth.push_str(&format!(", algorithm={}", self.algorithm.as_str()));
        }
        auth.push_str(&format!(", response=\"{}\"", response));
        if let Some(ref opaque) = self.opaque {
            auth.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        if self.qop_auth {
            auth.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
        }
        if self.userhash {
            auth.push_str(", userhash=true");
        }
        Ok(auth)
    }

    fn compute_response(
        &self,
        method: &str,
        uri: &str,
        creds: &DigestAuth,
        cnonce: &str,
        nc: &str,
    ) -> Result<String, NetError> {
        let h = |s: String| hex_digest(self.algorithm.message_digest(), s.as_bytes());

        let mut ha1 = h(format!("{}:{}:{}", creds.username, self.realm, creds.password))?;
        if self.algorithm.is_session() {
            ha1 = h(format!("{}:{}:{}", ha1, self.nonce, cnonce))?;
        }
        let ha2 = h(format!("{}:{}", method, uri))?;

        if self.qop_auth {
            h(format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2))
        } else {
            h(format!("{}:{}:{}", ha1, self.nonce, ha2))
        }
    }
}

fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = header[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let part = header[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

fn parse_param(param: &str) -> Result<(&str, &str), NetError> {
    let (key, value) = param
        .split_once('=')
        .ok_or(NetError::InvalidAuthChallenge)?;
    let mut value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }
    Ok((key.trim(), value))
}
