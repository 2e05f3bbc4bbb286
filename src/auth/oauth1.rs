//! OAuth 1.0a request signing (RFC 5849).
//!
//! Signed after the body is materialised, since form-encoded POST bodies
//! take part in the signature base string. Tokens are supplied by the
//! caller; the three-legged authorization dance is not driven here.

use super::awsv4::uri_encode;
use super::crypto::{hmac, random_hex};
use crate::base::neterror::NetError;
use crate::request::HeaderList;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use boring::hash::MessageDigest;
use boring::pkey::PKey;
use boring::sign::Signer;
use bytes::Bytes;
use std::path::Path;
use time::OffsetDateTime;
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMethod {
    #[default]
    HmacSha1,
    HmacSha256,
    RsaSha1,
    RsaSha256,
    Plaintext,
}

impl SignatureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMethod::HmacSha1 => "HMAC-SHA1",
            SignatureMethod::HmacSha256 => "HMAC-SHA256",
            SignatureMethod::RsaSha1 => "RSA-SHA1",
            SignatureMethod::RsaSha256 => "RSA-SHA256",
            SignatureMethod::Plaintext => "PLAINTEXT",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "HMAC-SHA1" => Some(SignatureMethod::HmacSha1),
            "HMAC-SHA256" => Some(SignatureMethod::HmacSha256),
            "RSA-SHA1" => Some(SignatureMethod::RsaSha1),
            "RSA-SHA256" => Some(SignatureMethod::RsaSha256),
            "PLAINTEXT" => Some(SignatureMethod::Plaintext),
            _ => None,
        }
    }
}

/// Where the protocol parameters travel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OAuth1Placement {
    #[default]
    Header,
    Query,
    /// Only for form-encoded POST requests; anything else falls back to
    /// the header.
    Body,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuth1Auth {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub token_secret: String,
    pub signature_method: SignatureMethod,
    pub placement: OAuth1Placement,
    /// PEM text (literal `\n` sequences allowed) or a path relative to the
    /// collection.
    pub rsa_private_key: String,
    pub callback_url: String,
    pub verifier: String,
    /// Sent in the header only; never signed.
    pub realm: String,
    /// Fixed values for reproducible signatures; generated when empty.
    pub timestamp: String,
    pub nonce: String,
}

impl OAuth1Auth {
    /// Sign the request in place according to [`placement`](Self::placement).
    pub fn apply(
        &self,
        method: &str,
        url: &mut Url,
        headers: &mut HeaderList,
        body: &mut Bytes,
        collection_path: &Path,
        now: OffsetDateTime,
    ) -> Result<(), NetError> {
        if self.consumer_key.is_empty() {
            return Err(NetError::MissingAuthCredentials);
        }
        let method = method.to_ascii_uppercase();
        let form_body = method == "POST"
            && headers
                .get("content-type")
                .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

        let mut oauth = self.protocol_params(now)?;
        let mut signed: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if form_body {
            let fields: Vec<(String, String)> =
                serde_urlencoded::from_bytes(&body[..]).unwrap_or_default();
            signed.extend(fields);
        }
        signed.extend(oauth.iter().cloned());

        let base = signature_base(&method, url, &signed);
        let signature = self.sign(&base, collection_path)?;
        oauth.push(("oauth_signature".into(), signature));
        tracing::trace!(method = self.signature_method.as_str(), "signed OAuth1 request");

        match self.placement {
            OAuth1Placement::Query => {
                let extra = encode_pairs(&oauth);
                let query = match url.query() {
                    Some(q) if !q.is_empty() => format!("{}&{}", q, extra),
                    _ => extra,
                };
                url.set_query(Some(&query));
            }
            OAuth1Placement::Body if form_body => {
                let extra = encode_pairs(&oauth);
                *body = if body.is_empty() {
                    Bytes::from(extra)
                } else {
                    let mut joined = body.to_vec();
                    joined.push(b'&');
                    joined.extend_from_slice(extra.as_bytes());
                    Bytes::from(joined)
                };
            }
            OAuth1Placement::Body | OAuth1Placement::Header => {
                headers.set("Authorization", self.header_value(&oauth));
            }
        }
        Ok(())
    }

    fn protocol_params(&self, now: OffsetDateTime) -> Result<Vec<(String, String)>, NetError> {
        let nonce = if self.nonce.is_empty() {
            random_hex(16)?
        } else {
            self.nonce.clone()
        };
        let timestamp = if self.timestamp.is_empty() {
            now.unix_timestamp().to_string()
        } else {
            self.timestamp.clone()
        };

        let mut params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce),
            (
                "oauth_signature_method".to_string(),
                self.signature_method.as_str().to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        for (name, value) in [
            ("oauth_token", &self.access_token),
            ("oauth_callback", &self.callback_url),
            ("oauth_verifier", &self.verifier),
        ] {
            if !value.is_empty() {
                params.push((name.to_string(), value.clone()));
            }
        }
        Ok(params)
    }

    fn signing_key(&self) -> String {
        format!(
            "{}&{}",
            uri_encode(&self.consumer_secret),
            uri_encode(&self.token_secret)
        )
    }

    fn sign(&self, base: &str, collection_path: &Path) -> Result<String, NetError> {
        let key = self.signing_key();
        match self.signature_method {
            SignatureMethod::Plaintext => Ok(key),
            SignatureMethod::HmacSha1 => Ok(STANDARD.encode(hmac(
                MessageDigest::sha1(),
                key.as_bytes(),
                base.as_bytes(),
            )?)),
            SignatureMethod::HmacSha256 => Ok(STANDARD.encode(hmac(
                MessageDigest::sha256(),
                key.as_bytes(),
                base.as_bytes(),
            )?)),
            SignatureMethod::RsaSha1 => self.rsa_sign(MessageDigest::sha1(), base, collection_path),
            SignatureMethod::RsaSha256 => {
                self.rsa_sign(MessageDigest::sha256(), base, collection_path)
            }
        }
    }

    fn rsa_sign(
        &self,
        md: MessageDigest,
        base: &str,
        collection_path: &Path,
    ) -> Result<String, NetError> {
        let pem = self.private_key_pem(collection_path)?;
        let key = PKey::private_key_from_pem(pem.as_bytes())
            .map_err(|_| NetError::MissingAuthCredentials)?;
        let mut signer = Signer::new(md, &key).map_err(|_| NetError::SslProtocolError)?;
        signer
            .update(base.as_bytes())
            .map_err(|_| NetError::SslProtocolError)?;
        let signature = signer
            .sign_to_vec()
            .map_err(|_| NetError::SslProtocolError)?;
        Ok(STANDARD.encode(signature))
    }

    fn private_key_pem(&self, collection_path: &Path) -> Result<String, NetError> {
        let key = self.rsa_private_key.trim();
        if key.is_empty() {
            return Err(NetError::MissingAuthCredentials);
        }
        if key.contains("-----BEGIN") {
            return Ok(key.replace("\\n", "\n"));
        }
        let path = Path::new(key);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            collection_path.join(path)
        };
        std::fs::read_to_string(&path).map_err(|e| {
            tracing::debug!("could not read RSA key {}: {}", path.display(), e);
            NetError::MissingAuthCredentials
        })
    }

    fn header_value(&self, oauth: &[(String, String)]) -> String {
        let mut parts = Vec::with_capacity(oauth.len() + 1);
        if !self.realm.is_empty() {
            parts.push(format!("realm=\"{}\"", uri_encode(&self.realm)));
        }
        let mut sorted: Vec<&(String, String)> = oauth.iter().collect();
        sorted.sort();
        parts.extend(
            sorted
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", uri_encode(k), uri_encode(v))),
        );
        format!("OAuth {}", parts.join(", "))
    }
}

/// `METHOD&base-url&normalized-params`, each part percent-encoded.
fn signature_base(method: &str, url: &Url, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method,
        uri_encode(&base_url(url)),
        uri_encode(&normalized)
    )
}

/// Scheme, host and path; the port only when it is not the default.
fn base_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    }
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
