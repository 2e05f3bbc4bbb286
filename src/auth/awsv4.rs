//! AWS Signature Version 4.
//!
//! Signed after the body is materialised and before the first send. The
//! signed header set is `host`, `content-type` when present, and every
//! `x-amz-*` header.

use super::crypto::{digest, hex_digest, hmac, to_hex};
use crate::base::neterror::NetError;
use crate::request::HeaderList;
use boring::hash::MessageDigest;
use std::path::PathBuf;
use time::OffsetDateTime;
use url::Url;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsV4Auth {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub service: String,
    pub region: String,
    /// Named profile in the shared credentials file, used when no key is set.
    pub profile_name: String,
}

/// Key material after profile resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsV4Auth {
    pub fn credentials(&self) -> Result<AwsCredentials, NetError> {
        if !self.access_key_id.is_empty() {
            return Ok(AwsCredentials {
                access_key_id: self.access_key_id.clone(),
                secret_access_key: self.secret_access_key.clone(),
                session_token: non_empty(&self.session_token),
            });
        }
        if !self.profile_name.is_empty() {
            let path = shared_credentials_path().ok_or(NetError::MissingAuthCredentials)?;
            let content =
                std::fs::read_to_string(&path).map_err(|_| NetError::MissingAuthCredentials)?;
            return profile_credentials(&content, &self.profile_name)
                .ok_or(NetError::MissingAuthCredentials);
        }
        Err(NetError::MissingAuthCredentials)
    }

    /// Sign the request in place, adding `x-amz-date`, `x-amz-content-sha256`,
    /// the session token when present, and `Authorization`.
    pub fn apply(
        &self,
        method: &str,
        url: &str,
        headers: &mut HeaderList,
        body: &[u8],
        now: OffsetDateTime,
    ) -> Result<(), NetError> {
        let creds = self.credentials()?;
        let parsed = Url::parse(url).map_err(|_| NetError::invalid_url())?;
        let amz_date = amz_date(now);
        let payload_hash = hex_digest(MessageDigest::sha256(), body)?;

        headers.set("x-amz-date", amz_date.clone());
        headers.set("x-amz-content-sha256", payload_hash.clone());
        if let Some(token) = &creds.session_token {
            headers.set("x-amz-security-token", token.clone());
        }

        let mut signed: Vec<(String, String)> = vec![("host".into(), host_header(&parsed))];
        for (name, value) in headers.iter() {
            let lower = name.to_ascii_lowercase();
            if lower == "content-type" || lower.starts_with("x-amz-") {
                signed.push((lower, value.to_string()));
            }
        }

        let authorization = sign(&SigningInput {
            method,
            url: &parsed,
            headers: &signed,
            payload_hash: &payload_hash,
            amz_date: &amz_date,
            region: &self.region,
            service: &self.service,
            creds: &creds,
        })?;
        headers.set("Authorization", authorization);
        Ok(())
    }
}

pub struct SigningInput<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    /// Lowercase names; all are signed.
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
    pub amz_date: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub creds: &'a AwsCredentials,
}

/// Produce the `Authorization` header value.
pub fn sign(input: &SigningInput<'_>) -> Result<String, NetError> {
    let date = &input.amz_date[..8];
    let scope = format!("{}/{}/{}/aws4_request", date, input.region, input.service);

    let mut headers: Vec<(String, String)> = input
        .headers
        .iter()
        .map(|(n, v)| (n.to_ascii_lowercase(), collapse_whitespace(v)))
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(n, v)| format!("{}:{}\n", n, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(n, _)| n.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method.to_uppercase(),
        canonical_uri(input.url),
        canonical_query(input.url),
        canonical_headers,
        signed_headers,
        input.payload_hash
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        input.amz_date,
        scope,
        hex_digest(MessageDigest::sha256(), canonical_request.as_bytes())?
    );

    let sha = MessageDigest::sha256();
    let k_date = hmac(
        sha,
        format!("AWS4{}", input.creds.secret_access_key).as_bytes(),
        date.as_bytes(),
    )?;
    let k_region = hmac(sha, &k_date, input.region.as_bytes())?;
    let k_service = hmac(sha, &k_region, input.service.as_bytes())?;
    let k_signing = hmac(sha, &k_service, b"aws4_request")?;
    let signature = to_hex(&hmac(sha, &k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, input.creds.access_key_id, scope, signed_headers, signature
    ))
}

/// Payload hash for an empty body.
pub fn empty_payload_hash() -> Result<String, NetError> {
    Ok(to_hex(&digest(MessageDigest::sha256(), b"")?))
}

fn amz_date(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|seg| {
            let decoded = percent_decode(seg);
            uri_encode(&decoded)
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding with only unreserved characters left bare.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn collapse_whitespace(v: &str) -> String {
    v.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn shared_credentials_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    Some(PathBuf::from(home).join(".aws").join("credentials"))
}

/// Read one `[profile]` section out of an AWS shared credentials file.
fn profile_credentials(content: &str, profile: &str) -> Option<AwsCredentials> {
    let mut in_section = false;
    let mut key_id = None;
    let mut secret = None;
    let mut token = None;

    for line in content.lines().map(str::trim) {
        if line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = name.trim() == profile;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().to_string();
            match k.trim() {
                "aws_access_key_id" => key_id = Some(v),
                "aws_secret_access_key" => secret = Some(v),
                "aws_session_token" => token = Some(v),
                _ => {}
            }
        }
    }

    Some(AwsCredentials {
        access_key_id: key_id?,
        secret_access_key: secret?,
        session_token: token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aws_documentation_vector() {
        // IAM ListUsers example from the SigV4 documentation.
        let url = Url::parse("https://iam.amazonaws.com/?Action=ListUsers&Version=2010-05-08")
            .unwrap();
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        };
        let headers = vec![
            (
                "content-type".to_string(),
                "application/x-www-form-urlencoded; charset=utf-8".to_string(),
            ),
            ("host".to_string(), "iam.amazonaws.com".to_string()),
            ("x-amz-date".to_string(), "20150830T123600Z".to_string()),
        ];
        let payload = empty_payload_hash().unwrap();

        let auth = sign(&SigningInput {
            method: "GET",
            url: &url,
            headers: &headers,
            payload_hash: &payload,
            amz_date: "20150830T123600Z",
            region: "us-east-1",
            service: "iam",
            creds: &creds,
        })
        .unwrap();

        assert_eq!(
            auth,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
    }

    #[test]
    fn test_apply_adds_amz_headers() {
        let auth = AwsV4Auth {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: "tok".into(),
            service: "execute-api".into(),
            region: "eu-west-1".into(),
            profile_name: String::new(),
        };
        let mut headers = HeaderList::new();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        auth.apply("POST", "https://api.example.com:8443/v1/items", &mut headers, b"{}", now)
            .unwrap();

        assert_eq!(headers.get("x-amz-date"), Some("20231114T221320Z"));
        assert_eq!(headers.get("x-amz-security-token"), Some("tok"));
        assert_eq!(headers.get("x-amz-content-sha256").unwrap().len(), 64);
        let authz = headers.get("authorization").unwrap();
        assert!(authz.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20231114/eu-west-1/execute-api/aws4_request"
        ));
        assert!(authz
            .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_missing_credentials() {
        let err = AwsV4Auth::default().credentials().unwrap_err();
        assert_eq!(err, NetError::MissingAuthCredentials);
    }

    #[test]
    fn test_profile_parsing() {
        let file = "[default]\naws_access_key_id = A\naws_secret_access_key = B\n\n\
                    [work]\naws_access_key_id=W\naws_secret_access_key=X\naws_session_token=T\n";
        let creds = profile_credentials(file, "work").unwrap();
        assert_eq!(creds.access_key_id, "W");
        assert_eq!(creds.session_token.as_deref(), Some("T"));
        assert!(profile_credentials(file, "missing").is_none());
    }

    #[test]
    fn test_uri_encoding() {
        assert_eq!(uri_encode("a b/c~"), "a%20b%2Fc~");
        let url = Url::parse("https://x/a%20b/c").unwrap();
        assert_eq!(canonical_uri(&url), "/a%20b/c");
    }
}
