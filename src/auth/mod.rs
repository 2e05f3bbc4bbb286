//! Authentication schemes.
//!
//! Header-only schemes are applied before the first send by
//! [`AuthMode::apply_static`]. AWS SigV4 and OAuth1 need the materialised
//! body and are signed by the runner; digest and NTLM answer challenges inside the
//! transport loop; OAuth2 resolves a token first.

pub mod apikey;
pub mod awsv4;
pub mod basic;
pub mod bearer;
pub(crate) mod crypto;
pub mod digest;
pub mod ntlm;
pub mod oauth1;
pub mod oauth2;
pub mod wsse;

pub use apikey::{ApiKeyAuth, ApiKeyPlacement};
pub use awsv4::AwsV4Auth;
pub use basic::BasicAuth;
pub use bearer::BearerAuth;
pub use digest::DigestAuth;
pub use ntlm::NtlmAuth;
pub use oauth1::{OAuth1Auth, OAuth1Placement, SignatureMethod};
pub use oauth2::OAuth2Config;
pub use wsse::WsseAuth;

use crate::base::neterror::NetError;
use crate::request::HeaderList;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthMode {
    #[default]
    None,
    /// Replaced by the collection's auth during the merge.
    Inherit,
    Basic(BasicAuth),
    Bearer(BearerAuth),
    Digest(DigestAuth),
    AwsV4(AwsV4Auth),
    OAuth1(OAuth1Auth),
    OAuth2(OAuth2Config),
    Ntlm(NtlmAuth),
    Wsse(WsseAuth),
    ApiKey(ApiKeyAuth),
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Inherit => "inherit",
            AuthMode::Basic(_) => "basic",
            AuthMode::Bearer(_) => "bearer",
            AuthMode::Digest(_) => "digest",
            AuthMode::AwsV4(_) => "awsv4",
            AuthMode::OAuth1(_) => "oauth1",
            AuthMode::OAuth2(_) => "oauth2",
            AuthMode::Ntlm(_) => "ntlm",
            AuthMode::Wsse(_) => "wsse",
            AuthMode::ApiKey(_) => "apikey",
        }
    }

    /// Apply schemes whose material does not depend on the body or a
    /// server challenge. NTLM contributes its negotiate message here.
    pub fn apply_static(&self, url: &mut String, headers: &mut HeaderList) -> Result<(), NetError> {
        match self {
            AuthMode::Basic(basic) => basic.apply(headers),
            AuthMode::Bearer(bearer) => bearer.apply(headers),
            AuthMode::Wsse(wsse) => wsse.apply(headers)?,
            AuthMode::ApiKey(key) => key.apply(url, headers)?,
            AuthMode::Ntlm(ntlm) => headers.set("Authorization", ntlm.negotiate_header()),
            AuthMode::None
            | AuthMode::Inherit
            | AuthMode::Digest(_)
            | AuthMode::AwsV4(_)
            | AuthMode::OAuth1(_)
            | AuthMode::OAuth2(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_schemes() {
        let mut url = "http://x/".to_string();
        let mut headers = HeaderList::new();
        AuthMode::Bearer(BearerAuth { token: "t".into() })
            .apply_static(&mut url, &mut headers)
            .unwrap();
        assert_eq!(headers.get("Authorization"), Some("Bearer t"));

        let mut headers = HeaderList::new();
        AuthMode::Digest(DigestAuth::default())
            .apply_static(&mut url, &mut headers)
            .unwrap();
        assert!(headers.is_empty());

        AuthMode::Ntlm(NtlmAuth::default())
            .apply_static(&mut url, &mut headers)
            .unwrap();
        assert!(headers.get("authorization").unwrap().starts_with("NTLM "));
    }

    #[test]
    fn test_wsse_header_present() {
        let mut url = "http://x/".to_string();
        let mut headers = HeaderList::new();
        AuthMode::Wsse(WsseAuth {
            username: "u".into(),
            password: "p".into(),
        })
        .apply_static(&mut url, &mut headers)
        .unwrap();
        assert!(headers
            .get("x-wsse")
            .unwrap()
            .starts_with("UsernameToken Username=\"u\""));
    }
}
