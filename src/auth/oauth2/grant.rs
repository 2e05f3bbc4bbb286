//! Picks stored, refreshed or new credentials for a request.

use super::client::{
    code_from_callback, credentials_from_fragment, parse_response, refresh_request,
    token_request, TokenHttp,
};
use super::token_store::{StoredCredentials, TokenStore};
use super::{GrantType, OAuth2Config, ParamLocation};
use crate::auth::crypto::{digest, random_hex};
use crate::base::neterror::NetError;
use crate::base::timeline::Timeline;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use boring::hash::MessageDigest;
use url::Url;

/// A browser round trip the host has to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub grant_type: GrantType,
    /// Fully built authorization URL, query included.
    pub authorize_url: String,
    /// The flow completes once the provider redirects here.
    pub callback_url: String,
    /// Additional authorization params the host should send as headers.
    pub headers: Vec<(String, String)>,
}

/// Implemented by the host application to drive the user-agent step of the
/// authorization code and implicit grants.
#[async_trait]
pub trait AuthorizationHandler: Send + Sync {
    /// Return the full URL the provider redirected to (the callback URL
    /// including its query and fragment).
    async fn authorize(&self, request: AuthorizationRequest) -> Result<String, NetError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuth2Outcome {
    /// `None` when nothing is stored and automatic fetching is off.
    pub credentials: Option<StoredCredentials>,
    pub url: String,
    pub credentials_id: String,
}

/// PKCE verifier / S256 challenge pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Result<Self, NetError> {
        Self::from_verifier(random_hex(22)?)
    }

    pub fn from_verifier(verifier: String) -> Result<Self, NetError> {
        let hashed = digest(MessageDigest::sha256(), verifier.as_bytes())?;
        Ok(Self {
            challenge: URL_SAFE_NO_PAD.encode(hashed),
            verifier,
        })
    }
}

/// The authorization endpoint URL plus the params meant for headers.
pub(crate) fn authorization_url(
    config: &OAuth2Config,
    pkce: Option<&Pkce>,
) -> Result<(String, Vec<(String, String)>), NetError> {
    let mut url = Url::parse(&config.authorization_url).map_err(|_| NetError::invalid_url())?;
    let mut headers = Vec::new();
    {
        let mut pairs = url.query_pairs_mut();
        let response_type = match config.grant_type {
            GrantType::Implicit => "token",
            _ => "code",
        };
        pairs.append_pair("response_type", response_type);
        pairs.append_pair("client_id", &config.client_id);
        if !config.callback_url.is_empty() {
            pairs.append_pair("redirect_uri", &config.callback_url);
        }
        if !config.scope.is_empty() {
            pairs.append_pair("scope", &config.scope);
        }
        if !config.state.is_empty() {
            pairs.append_pair("state", &config.state);
        }
        if let Some(pkce) = pkce {
            pairs.append_pair("code_challenge", &pkce.challenge);
            pairs.append_pair("code_challenge_method", "S256");
        }
        for param in config
            .additional_params
            .authorization
            .iter()
            .filter(|p| p.is_active())
        {
            match param.send_in {
                ParamLocation::Headers => headers.push((param.name.clone(), param.value.clone())),
                _ => {
                    pairs.append_pair(&param.name, &param.value);
                }
            }
        }
    }
    Ok((url.to_string(), headers))
}

pub struct OAuth2Resolver<'a> {
    store: &'a TokenStore,
    http: &'a dyn TokenHttp,
    handler: Option<&'a dyn AuthorizationHandler>,
    timeline: Option<&'a Timeline>,
}

impl<'a> OAuth2Resolver<'a> {
    pub fn new(store: &'a TokenStore, http: &'a dyn TokenHttp) -> Self {
        Self {
            store,
            http,
            handler: None,
            timeline: None,
        }
    }

    pub fn with_handler(mut self, handler: Option<&'a dyn AuthorizationHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_timeline(mut self, timeline: &'a Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    fn log(&self, message: impl Into<String>) {
        if let Some(timeline) = self.timeline {
            timeline.info(message);
        }
    }

    /// Stored and unexpired: reuse. Expired: refresh if allowed and a
    /// refresh token exists, else fetch if allowed, else hand back the
    /// expired token. Nothing stored: fetch if allowed.
    pub async fn resolve(
        &self,
        collection_uid: &str,
        config: &OAuth2Config,
    ) -> Result<OAuth2Outcome, NetError> {
        let url = config.storage_url().to_string();
        let credentials_id = config.credentials_id.clone();
        let outcome = |credentials: Option<StoredCredentials>| OAuth2Outcome {
            credentials,
            url: url.clone(),
            credentials_id: credentials_id.clone(),
        };

        let _held = self
            .store
            .lock_credential(collection_uid, &url, &credentials_id)
            .await;
        let stored = self.store.get(collection_uid, &url, &credentials_id).await?;

        let Some(stored) = stored else {
            if !config.auto_fetch_token {
                self.log("No stored OAuth2 credentials and automatic fetch is disabled");
                return Ok(outcome(None));
            }
            let fresh = self.fetch(collection_uid, config).await?;
            return Ok(outcome(Some(fresh)));
        };

        if !stored.is_expired() {
            self.log(format!("Using stored OAuth2 credentials '{}'", credentials_id));
            return Ok(outcome(Some(stored)));
        }

        let refresh_token = stored.refresh_token.clone().filter(|t| !t.is_empty());
        if config.auto_refresh_token && config.grant_type != GrantType::Implicit {
            if let Some(refresh_token) = refresh_token {
                match self.refresh(collection_uid, config, &refresh_token).await {
                    Ok(refreshed) => return Ok(outcome(Some(refreshed))),
                    Err(e) => {
                        tracing::debug!("OAuth2 refresh failed: {}", e);
                        self.log(format!("Token refresh failed: {}", e));
                        self.store.clear(collection_uid, &url, &credentials_id).await?;
                        if !config.auto_fetch_token {
                            return Ok(outcome(None));
                        }
                        let fresh = self.fetch(collection_uid, config).await?;
                        return Ok(outcome(Some(fresh)));
                    }
                }
            }
        }

        if config.auto_fetch_token {
            self.log("Stored OAuth2 token expired, fetching a new one");
            let fresh = self.fetch(collection_uid, config).await?;
            return Ok(outcome(Some(fresh)));
        }

        self.log("Stored OAuth2 token expired; using it anyway");
        Ok(outcome(Some(stored)))
    }

    /// Run the grant from scratch and persist the result.
    pub async fn fetch(
        &self,
        collection_uid: &str,
        config: &OAuth2Config,
    ) -> Result<StoredCredentials, NetError> {
        config.validate()?;
        tracing::debug!("Fetching OAuth2 token for {}", config.storage_url());

        let credentials = match config.grant_type {
            GrantType::ClientCredentials | GrantType::Password => {
                self.log(format!("Fetching OAuth2 token from {}", config.access_token_url));
                let request = token_request(config, None, None)?;
                parse_response(&self.http.send(request).await?)?
            }
            GrantType::AuthorizationCode => {
                let pkce = if config.pkce { Some(Pkce::generate()?) } else { None };
                let callback = self.authorize(config, pkce.as_ref()).await?;
                let code = code_from_callback(&callback)?;
                self.log(format!("Exchanging authorization code at {}", config.access_token_url));
                let request =
                    token_request(config, Some(&code), pkce.as_ref().map(|p| p.verifier.as_str()))?;
                parse_response(&self.http.send(request).await?)?
            }
            GrantType::Implicit => {
                let callback = self.authorize(config, None).await?;
                credentials_from_fragment(&callback)?
            }
        };

        let saved = self
            .store
            .save(collection_uid, config.storage_url(), &config.credentials_id, &credentials)
            .await?;
        Ok(saved.unwrap_or(credentials))
    }

    async fn authorize(
        &self,
        config: &OAuth2Config,
        pkce: Option<&Pkce>,
    ) -> Result<String, NetError> {
        let handler = self.handler.ok_or_else(|| {
            NetError::OAuth2("No authorization handler available for interactive OAuth2 flow".into())
        })?;
        let (authorize_url, headers) = authorization_url(config, pkce)?;
        self.log(format!("Authorizing at {}", config.authorization_url));
        handler
            .authorize(AuthorizationRequest {
                grant_type: config.grant_type,
                authorize_url,
                callback_url: config.callback_url.clone(),
                headers,
            })
            .await
    }

    async fn refresh(
        &self,
        collection_uid: &str,
        config: &OAuth2Config,
        refresh_token: &str,
    ) -> Result<StoredCredentials, NetError> {
        self.log(format!("Refreshing OAuth2 token at {}", config.refresh_url()));
        let request = refresh_request(config, refresh_token)?;
        let mut refreshed = parse_response(&self.http.send(request).await?)?;
        // Providers may omit the refresh token when it did not rotate.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.to_string());
        }
        let saved = self
            .store
            .save(collection_uid, config.storage_url(), &config.credentials_id, &refreshed)
            .await?;
        Ok(saved.unwrap_or(refreshed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth2::client::{TokenRequest, TokenResponse};
    use crate::auth::oauth2::token_store::{MemoryBackend, SecretBackend};
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Replays canned responses and records what was sent.
    struct Scripted {
        replies: Mutex<Vec<TokenResponse>>,
        sent: Mutex<Vec<TokenRequest>>,
    }

    impl Scripted {
        fn new(bodies: &[(u16, &str)]) -> Self {
            Self {
                replies: Mutex::new(
                    bodies
                        .iter()
                        .rev()
                        .map(|(status, body)| TokenResponse {
                            status: *status,
                            body: Bytes::from(body.to_string()),
                        })
                        .collect(),
                ),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<TokenRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenHttp for Scripted {
        async fn send(&self, request: TokenRequest) -> Result<TokenResponse, NetError> {
            self.sent.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or(NetError::ConnectionRefused)
        }
    }

    /// Answers every request after a delay, counting sends.
    struct Slow {
        sends: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TokenHttp for Slow {
        async fn send(&self, _request: TokenRequest) -> Result<TokenResponse, NetError> {
            let n = self.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(TokenResponse {
                status: 200,
                body: Bytes::from(format!(r#"{{"access_token":"t{}","expires_in":3600}}"#, n)),
            })
        }
    }

    struct Redirector(String);

    #[async_trait]
    impl AuthorizationHandler for Redirector {
        async fn authorize(&self, request: AuthorizationRequest) -> Result<String, NetError> {
            assert!(request.authorize_url.starts_with("https://idp/authorize?"));
            Ok(self.0.clone())
        }
    }

    fn config() -> OAuth2Config {
        OAuth2Config::client_credentials("https://idp/token", "cid", "sec")
    }

    fn expired(token: &str, refresh: Option<&str>) -> StoredCredentials {
        StoredCredentials {
            access_token: Some(token.into()),
            refresh_token: refresh.map(str::to_string),
            expires_in: Some(1),
            created_at: Some(0),
            ..Default::default()
        }
    }

    async fn store_with(creds: StoredCredentials) -> TokenStore {
        let backend = MemoryBackend::new();
        let blob = serde_json::json!({
            "c": [{"url": "https://idp/token", "credentialsId": "credentials", "credentials": creds}]
        });
        backend.write(&blob.to_string()).await.unwrap();
        TokenStore::new(backend)
    }

    #[test]
    fn test_pkce_rfc7636_vector() {
        let pkce =
            Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();
        assert_eq!(pkce.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(Pkce::generate().unwrap().verifier.len(), 44);
    }

    #[test]
    fn test_authorization_url_shape() {
        let config = OAuth2Config {
            grant_type: GrantType::AuthorizationCode,
            authorization_url: "https://idp/authorize".into(),
            callback_url: "http://localhost/cb".into(),
            client_id: "cid".into(),
            scope: "openid".into(),
            state: "s1".into(),
            ..Default::default()
        };
        let pkce = Pkce::from_verifier("v".into()).unwrap();
        let (url, headers) = authorization_url(&config, Some(&pkce)).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "http://localhost/cb".into())));
        assert!(pairs.contains(&("code_challenge_method".into(), "S256".into())));
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn test_fetches_and_stores_when_nothing_stored() {
        let store = TokenStore::in_memory();
        let http = Scripted::new(&[(200, r#"{"access_token":"fresh"}"#)]);
        let outcome = OAuth2Resolver::new(&store, &http)
            .resolve("c", &config())
            .await
            .unwrap();
        assert_eq!(outcome.credentials.unwrap().access_token.as_deref(), Some("fresh"));
        assert_eq!(outcome.url, "https://idp/token");

        let again = OAuth2Resolver::new(&store, &http)
            .resolve("c", &config())
            .await
            .unwrap();
        assert_eq!(again.credentials.unwrap().access_token.as_deref(), Some("fresh"));
        assert_eq!(http.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let store = TokenStore::in_memory();
        let http = Slow {
            sends: std::sync::atomic::AtomicUsize::new(0),
        };
        let config = config();
        let first = OAuth2Resolver::new(&store, &http);
        let second = OAuth2Resolver::new(&store, &http);

        let (a, b) = tokio::join!(first.resolve("c", &config), second.resolve("c", &config));
        let a = a.unwrap().credentials.unwrap().access_token;
        let b = b.unwrap().credentials.unwrap().access_token;
        assert_eq!(a.as_deref(), Some("t1"));
        assert_eq!(a, b);
        assert_eq!(http.sends.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_credentials_do_not_wait() {
        let store = TokenStore::in_memory();
        let held = store.lock_credential("c", "https://idp/token", "credentials").await;
        let other = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            store.lock_credential("c", "https://idp/token", "other"),
        )
        .await;
        assert!(other.is_ok());
        drop(held);
    }

    #[tokio::test]
    async fn test_no_auto_fetch_returns_nothing() {
        let store = TokenStore::in_memory();
        let http = Scripted::new(&[]);
        let mut config = config();
        config.auto_fetch_token = false;
        let outcome = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap();
        assert!(outcome.credentials.is_none());
        assert!(http.sent().is_empty());
    }

    #[tokio::test]
    async fn test_validation_runs_before_network() {
        let store = TokenStore::in_memory();
        let http = Scripted::new(&[]);
        let config = OAuth2Config::client_credentials("", "cid", "sec");
        let err = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap_err();
        assert_eq!(
            err,
            NetError::OAuth2(
                "Access Token URL is required for OAuth2 client credentials flow".into()
            )
        );
        assert!(http.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_refreshes() {
        let store = store_with(expired("old", Some("rt"))).await;
        let http = Scripted::new(&[(200, r#"{"access_token":"refreshed","expires_in":60}"#)]);
        let mut config = config();
        config.auto_refresh_token = true;

        let outcome = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap();
        let refreshed = outcome.credentials.unwrap();
        assert_eq!(refreshed.access_token.as_deref(), Some("refreshed"));
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rt"));
        let sent = http.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("grant_type=refresh_token"));
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_fetch() {
        let store = store_with(expired("old", Some("rt"))).await;
        let http = Scripted::new(&[
            (400, r#"{"error":"invalid_grant"}"#),
            (200, r#"{"access_token":"fetched"}"#),
        ]);
        let mut config = config();
        config.auto_refresh_token = true;

        let outcome = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap();
        assert_eq!(outcome.credentials.unwrap().access_token.as_deref(), Some("fetched"));
        let sent = http.sent();
        assert!(sent[1].body.contains("grant_type=client_credentials"));
    }

    #[tokio::test]
    async fn test_expired_token_used_when_nothing_automatic() {
        let store = store_with(expired("old", None)).await;
        let http = Scripted::new(&[]);
        let mut config = config();
        config.auto_fetch_token = false;

        let outcome = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap();
        assert_eq!(outcome.credentials.unwrap().access_token.as_deref(), Some("old"));
        assert!(http.sent().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_refetched_without_refresh_token() {
        let store = store_with(expired("old", None)).await;
        let http = Scripted::new(&[(200, r#"{"access_token":"new"}"#)]);
        let mut config = config();
        config.auto_refresh_token = true;

        let outcome = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap();
        assert_eq!(outcome.credentials.unwrap().access_token.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_oauth2_error() {
        let store = TokenStore::in_memory();
        let http = Scripted::new(&[(401, r#"{"error":"invalid_client"}"#)]);
        let err = OAuth2Resolver::new(&store, &http).resolve("c", &config()).await.unwrap_err();
        assert_eq!(err, NetError::OAuth2("invalid_client".into()));
        assert!(store.get("c", "https://idp/token", "credentials").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_implicit_flow_uses_handler() {
        let store = TokenStore::in_memory();
        let http = Scripted::new(&[]);
        let handler = Redirector("http://localhost/cb#access_token=imp&expires_in=60".into());
        let config = OAuth2Config {
            grant_type: GrantType::Implicit,
            authorization_url: "https://idp/authorize".into(),
            callback_url: "http://localhost/cb".into(),
            client_id: "cid".into(),
            ..Default::default()
        };
        let outcome = OAuth2Resolver::new(&store, &http)
            .with_handler(Some(&handler))
            .resolve("c", &config)
            .await
            .unwrap();
        assert_eq!(outcome.credentials.unwrap().access_token.as_deref(), Some("imp"));
        assert_eq!(outcome.url, "https://idp/authorize");
        assert!(http.sent().is_empty());
    }

    #[tokio::test]
    async fn test_interactive_flow_without_handler_fails() {
        let store = TokenStore::in_memory();
        let http = Scripted::new(&[]);
        let config = OAuth2Config {
            grant_type: GrantType::AuthorizationCode,
            authorization_url: "https://idp/authorize".into(),
            access_token_url: "https://idp/token".into(),
            callback_url: "http://localhost/cb".into(),
            client_id: "cid".into(),
            ..Default::default()
        };
        let err = OAuth2Resolver::new(&store, &http).resolve("c", &config).await.unwrap_err();
        assert!(matches!(err, NetError::OAuth2(_)));
    }
}
