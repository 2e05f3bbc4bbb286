//! OAuth 2.0 token acquisition and placement.
//!
//! [`OAuth2Resolver`] decides between stored, refreshed and freshly fetched
//! credentials; [`client`] builds and parses the token endpoint exchanges;
//! [`token_store`] persists what the server handed out.

pub mod client;
pub mod grant;
pub mod token_store;

pub use client::{TokenHttp, TokenRequest, TokenResponse};
pub use grant::{AuthorizationHandler, AuthorizationRequest, OAuth2Outcome, OAuth2Resolver};
pub use token_store::{FileBackend, MemoryBackend, SecretBackend, StoredCredentials, TokenStore};

#[cfg(target_os = "linux")]
pub use token_store::KeyringBackend;

use crate::base::neterror::NetError;
use crate::request::HeaderList;
use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrantType {
    Password,
    #[default]
    ClientCredentials,
    AuthorizationCode,
    Implicit,
}

impl GrantType {
    fn flow_name(self) -> &'static str {
        match self {
            GrantType::Password => "password credentials",
            GrantType::ClientCredentials => "client credentials",
            GrantType::AuthorizationCode => "authorization code",
            GrantType::Implicit => "implicit",
        }
    }
}

/// Where the client id and secret travel on token requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialsPlacement {
    #[default]
    Body,
    BasicAuthHeader,
}

/// Where the access token goes on the outgoing request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenPlacement {
    #[default]
    Header,
    Url,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamLocation {
    #[default]
    Headers,
    QueryParams,
    Body,
}

/// Extra parameter attached to one of the OAuth2 exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalParam {
    pub name: String,
    pub value: String,
    pub send_in: ParamLocation,
    pub enabled: bool,
}

impl AdditionalParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>, send_in: ParamLocation) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            send_in,
            enabled: true,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.enabled && !self.name.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdditionalParams {
    pub authorization: Vec<AdditionalParam>,
    pub token: Vec<AdditionalParam>,
    pub refresh: Vec<AdditionalParam>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Config {
    pub grant_type: GrantType,
    pub access_token_url: String,
    pub authorization_url: String,
    pub callback_url: String,
    /// Falls back to `access_token_url` when empty.
    pub refresh_token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub scope: String,
    pub state: String,
    pub pkce: bool,
    pub credentials_placement: CredentialsPlacement,
    /// Name under which the credentials are stored and exposed as `$oauth2.<id>`.
    pub credentials_id: String,
    pub token_placement: TokenPlacement,
    pub token_header_prefix: String,
    /// Empty means `Authorization`.
    pub token_header_name: String,
    pub token_query_key: String,
    pub auto_fetch_token: bool,
    pub auto_refresh_token: bool,
    pub additional_params: AdditionalParams,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            grant_type: GrantType::default(),
            access_token_url: String::new(),
            authorization_url: String::new(),
            callback_url: String::new(),
            refresh_token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            scope: String::new(),
            state: String::new(),
            pkce: false,
            credentials_placement: CredentialsPlacement::default(),
            credentials_id: "credentials".to_string(),
            token_placement: TokenPlacement::default(),
            token_header_prefix: "Bearer".to_string(),
            token_header_name: String::new(),
            token_query_key: "access_token".to_string(),
            auto_fetch_token: true,
            auto_refresh_token: false,
            additional_params: AdditionalParams::default(),
        }
    }
}

impl OAuth2Config {
    pub fn client_credentials(
        access_token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: GrantType::ClientCredentials,
            access_token_url: access_token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Default::default()
        }
    }

    /// Key the credentials are stored under.
    pub fn storage_url(&self) -> &str {
        match self.grant_type {
            GrantType::Implicit => &self.authorization_url,
            _ => &self.access_token_url,
        }
    }

    pub fn refresh_url(&self) -> &str {
        if self.refresh_token_url.is_empty() {
            &self.access_token_url
        } else {
            &self.refresh_token_url
        }
    }

    /// Check the fields the grant needs before any network traffic.
    pub fn validate(&self) -> Result<(), NetError> {
        let flow = self.grant_type.flow_name();
        let require = |value: &str, what: &str| {
            if value.trim().is_empty() {
                Err(NetError::OAuth2(format!(
                    "{} is required for OAuth2 {} flow",
                    what, flow
                )))
            } else {
                Ok(())
            }
        };
        match self.grant_type {
            GrantType::AuthorizationCode => {
                require(&self.authorization_url, "Authorization URL")?;
                require(&self.access_token_url, "Access Token URL")?;
                require(&self.callback_url, "Callback URL")?;
                require(&self.client_id, "Client ID")
            }
            GrantType::ClientCredentials => {
                require(&self.access_token_url, "Access Token URL")?;
                require(&self.client_id, "Client ID")?;
                require(&self.client_secret, "Client Secret")
            }
            GrantType::Password => {
                require(&self.access_token_url, "Access Token URL")?;
                require(&self.username, "Username")?;
                require(&self.password, "Password")?;
                require(&self.client_id, "Client ID")
            }
            GrantType::Implicit => {
                require(&self.authorization_url, "Authorization URL")?;
                require(&self.callback_url, "Callback URL")
            }
        }
    }

    /// Put the access token on the outgoing request.
    pub fn apply_token(
        &self,
        credentials: &StoredCredentials,
        url: &mut String,
        headers: &mut HeaderList,
    ) -> Result<(), NetError> {
        let Some(token) = credentials.access_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        match self.token_placement {
            TokenPlacement::Header => {
                let name = if self.token_header_name.is_empty() {
                    "Authorization"
                } else {
                    self.token_header_name.as_str()
                };
                let value = format!("{} {}", self.token_header_prefix, token);
                headers.set(name, value.trim().to_string());
            }
            TokenPlacement::Url => {
                let mut parsed = Url::parse(url).map_err(|_| NetError::invalid_url())?;
                let key = self.token_query_key.as_str();
                let kept: Vec<(String, String)> = parsed
                    .query_pairs()
                    .filter(|(k, _)| k != key)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                {
                    let mut pairs = parsed.query_pairs_mut();
                    pairs.clear();
                    pairs.extend_pairs(kept);
                    pairs.append_pair(key, token);
                }
                *url = parsed.to_string();
            }
        }
        Ok(())
    }
}

/// The `$oauth2` variable tree: `{"$oauth2": {"<credentials id>": {...}}}`
/// entries merged into the oauth2-credential scope.
pub fn credentials_variables<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a StoredCredentials)>,
) -> Map<String, Value> {
    let mut by_id = Map::new();
    for (credentials_id, creds) in entries {
        by_id.insert(credentials_id.to_string(), creds.to_value());
    }
    let mut out = Map::new();
    out.insert("$oauth2".to_string(), Value::Object(by_id));
    out
}
