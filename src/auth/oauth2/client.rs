//! Token endpoint exchanges.
//!
//! Requests are plain `application/x-www-form-urlencoded` POSTs. Sending them
//! is left to a [`TokenHttp`] implementation so they share the proxy and TLS
//! setup of the request that needed the token.

use super::token_store::StoredCredentials;
use super::{AdditionalParam, CredentialsPlacement, GrantType, OAuth2Config, ParamLocation};
use crate::auth::basic::BasicAuth;
use crate::base::neterror::NetError;
use crate::request::HeaderList;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub url: String,
    pub headers: HeaderList,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Sends token requests for the resolver.
#[async_trait]
pub trait TokenHttp: Send + Sync {
    async fn send(&self, request: TokenRequest) -> Result<TokenResponse, NetError>;
}

/// Assemble a token request from grant fields plus additional params.
pub(crate) fn build_request(
    url: &str,
    mut fields: Vec<(String, String)>,
    params: &[AdditionalParam],
    basic: Option<BasicAuth>,
) -> Result<TokenRequest, NetError> {
    let mut headers = HeaderList::new();
    headers.set("content-type", "application/x-www-form-urlencoded");
    headers.set("Accept", "application/json");
    if let Some(basic) = basic {
        basic.apply(&mut headers);
    }

    let mut parsed = Url::parse(url).map_err(|_| NetError::invalid_url())?;
    let mut query_params = Vec::new();
    for param in params.iter().filter(|p| p.is_active()) {
        match param.send_in {
            ParamLocation::Headers => headers.set(param.name.clone(), param.value.clone()),
            ParamLocation::QueryParams => query_params.push(param),
            ParamLocation::Body => fields.push((param.name.clone(), param.value.clone())),
        }
    }
    if !query_params.is_empty() {
        let mut pairs = parsed.query_pairs_mut();
        for param in query_params {
            pairs.append_pair(&param.name, &param.value);
        }
    }

    let body = serde_urlencoded::to_string(&fields).map_err(|_| NetError::HttpBodyError)?;
    Ok(TokenRequest {
        url: parsed.to_string(),
        headers,
        body,
    })
}

fn client_basic(config: &OAuth2Config) -> Option<BasicAuth> {
    (config.credentials_placement == CredentialsPlacement::BasicAuthHeader).then(|| BasicAuth {
        username: config.client_id.clone(),
        password: config.client_secret.clone(),
    })
}

/// The token request for `config`'s grant. `code` and `code_verifier` are
/// only used by the authorization code grant.
pub(crate) fn token_request(
    config: &OAuth2Config,
    code: Option<&str>,
    code_verifier: Option<&str>,
) -> Result<TokenRequest, NetError> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut push = |k: &str, v: &str| fields.push((k.to_string(), v.to_string()));

    match config.grant_type {
        GrantType::ClientCredentials => {
            push("grant_type", "client_credentials");
            push("client_id", &config.client_id);
        }
        GrantType::Password => {
            push("grant_type", "password");
            push("username", &config.username);
            push("password", &config.password);
            push("client_id", &config.client_id);
        }
        GrantType::AuthorizationCode => {
            push("grant_type", "authorization_code");
            push("code", code.unwrap_or_default());
            push("redirect_uri", &config.callback_url);
            push("client_id", &config.client_id);
            if let Some(verifier) = code_verifier {
                push("code_verifier", verifier);
            }
        }
        GrantType::Implicit => {
            return Err(NetError::OAuth2(
                "Implicit flow does not use the token endpoint".into(),
            ))
        }
    }
    if config.credentials_placement == CredentialsPlacement::Body
        && !config.client_secret.is_empty()
    {
        push("client_secret", &config.client_secret);
    }
    if !config.scope.trim().is_empty() {
        push("scope", &config.scope);
    }

    build_request(
        &config.access_token_url,
        fields,
        &config.additional_params.token,
        client_basic(config),
    )
}

pub(crate) fn refresh_request(
    config: &OAuth2Config,
    refresh_token: &str,
) -> Result<TokenRequest, NetError> {
    let mut fields = vec![
        ("grant_type".to_string(), "refresh_token".to_string()),
        ("client_id".to_string(), config.client_id.clone()),
        ("refresh_token".to_string(), refresh_token.to_string()),
    ];
    if !config.client_secret.is_empty() {
        fields.push(("client_secret".to_string(), config.client_secret.clone()));
    }
    build_request(
        config.refresh_url(),
        fields,
        &config.additional_params.refresh,
        None,
    )
}

/// Decode a token endpoint reply. JSON is expected; a form-encoded body
/// (as some providers send regardless of `Accept`) is accepted too.
pub(crate) fn parse_response(response: &TokenResponse) -> Result<StoredCredentials, NetError> {
    let object = match serde_json::from_slice::<Value>(&response.body) {
        Ok(Value::Object(map)) => map,
        _ => {
            let pairs: Vec<(String, String)> =
                serde_urlencoded::from_bytes(&response.body).unwrap_or_default();
            pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect::<Map<String, Value>>()
        }
    };

    if let Some(error) = object.get("error") {
        let description = object
            .get("error_description")
            .and_then(Value::as_str)
            .map(|d| format!(": {}", d))
            .unwrap_or_default();
        let code = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        return Err(NetError::OAuth2(format!("{}{}", code, description)));
    }
    if !(200..300).contains(&response.status) {
        return Err(NetError::OAuth2(format!(
            "Token request failed with status {}: {}",
            response.status,
            String::from_utf8_lossy(&response.body)
        )));
    }

    let credentials: StoredCredentials = serde_json::from_value(Value::Object(object))
        .map_err(|_| NetError::OAuth2("Invalid token response".into()))?;
    if credentials.access_token.as_deref().map_or(true, str::is_empty) {
        return Err(NetError::OAuth2(
            "No access token received from token endpoint".into(),
        ));
    }
    Ok(credentials)
}

/// Credentials from the `#fragment` (implicit grant) of a callback URL.
pub(crate) fn credentials_from_fragment(callback: &str) -> Result<StoredCredentials, NetError> {
    let url = Url::parse(callback).map_err(|_| NetError::invalid_url())?;
    let fragment = url.fragment().unwrap_or_default();
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(fragment).unwrap_or_default();
    let get = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .or_else(|| {
                url.query_pairs()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.into_owned())
            })
    };

    if let Some(error) = get("error") {
        let description = get("error_description").map(|d| format!(": {}", d)).unwrap_or_default();
        return Err(NetError::OAuth2(format!("{}{}", error, description)));
    }
    let Some(access_token) = get("access_token").filter(|t| !t.is_empty()) else {
        return Err(NetError::OAuth2(
            "No access token received from authorization server".into(),
        ));
    };

    let mut extra = Map::new();
    if let Some(state) = get("state") {
        extra.insert("state".to_string(), Value::String(state));
    }
    Ok(StoredCredentials {
        access_token: Some(access_token),
        token_type: Some(get("token_type").unwrap_or_else(|| "Bearer".to_string())),
        expires_in: get("expires_in").and_then(|e| e.parse().ok()),
        scope: get("scope"),
        extra,
        ..Default::default()
    })
}

/// The `code` query parameter of an authorization code callback.
pub(crate) fn code_from_callback(callback: &str) -> Result<String, NetError> {
    let url = Url::parse(callback).map_err(|_| NetError::invalid_url())?;
    let get = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    if let Some(error) = get("error") {
        let description = get("error_description").map(|d| format!(": {}", d)).unwrap_or_default();
        return Err(NetError::OAuth2(format!("{}{}", error, description)));
    }
    get("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| NetError::OAuth2("No authorization code received".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(body: &str) -> Vec<(String, String)> {
        serde_urlencoded::from_str(body).unwrap()
    }

    #[test]
    fn test_client_credentials_in_body() {
        let mut config = OAuth2Config::client_credentials("https://idp/token", "cid", "sec");
        config.scope = "read write".into();
        let req = token_request(&config, None, None).unwrap();

        assert_eq!(
            req.headers.get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(req.headers.get("accept"), Some("application/json"));
        assert!(req.headers.get("authorization").is_none());
        let fields = form(&req.body);
        assert!(fields.contains(&("grant_type".into(), "client_credentials".into())));
        assert!(fields.contains(&("client_secret".into(), "sec".into())));
        assert!(fields.contains(&("scope".into(), "read write".into())));
    }

    #[test]
    fn test_basic_header_placement_omits_secret() {
        let mut config = OAuth2Config::client_credentials("https://idp/token", "cid", "sec");
        config.credentials_placement = CredentialsPlacement::BasicAuthHeader;
        let req = token_request(&config, None, None).unwrap();
        assert_eq!(req.headers.get("authorization"), Some("Basic Y2lkOnNlYw=="));
        assert!(!form(&req.body).iter().any(|(k, _)| k == "client_secret"));
    }

    #[test]
    fn test_additional_params_routing() {
        let mut config = OAuth2Config::client_credentials("https://idp/token", "cid", "sec");
        config.additional_params.token = vec![
            AdditionalParam::new("audience", "api", ParamLocation::Body),
            AdditionalParam::new("X-Tenant", "t1", ParamLocation::Headers),
            AdditionalParam::new("resource", "r", ParamLocation::QueryParams),
            AdditionalParam::new("", "ignored", ParamLocation::Body),
        ];
        let req = token_request(&config, None, None).unwrap();
        assert_eq!(req.url, "https://idp/token?resource=r");
        assert_eq!(req.headers.get("x-tenant"), Some("t1"));
        assert!(form(&req.body).contains(&("audience".into(), "api".into())));
    }

    #[test]
    fn test_authorization_code_with_verifier() {
        let config = OAuth2Config {
            grant_type: GrantType::AuthorizationCode,
            access_token_url: "https://idp/token".into(),
            callback_url: "http://localhost/cb".into(),
            client_id: "cid".into(),
            ..Default::default()
        };
        let req = token_request(&config, Some("the-code"), Some("verifier")).unwrap();
        let fields = form(&req.body);
        assert!(fields.contains(&("code".into(), "the-code".into())));
        assert!(fields.contains(&("redirect_uri".into(), "http://localhost/cb".into())));
        assert!(fields.contains(&("code_verifier".into(), "verifier".into())));
    }

    #[test]
    fn test_refresh_uses_refresh_url() {
        let mut config = OAuth2Config::client_credentials("https://idp/token", "cid", "sec");
        config.refresh_token_url = "https://idp/refresh".into();
        let req = refresh_request(&config, "rt").unwrap();
        assert_eq!(req.url, "https://idp/refresh");
        let fields = form(&req.body);
        assert!(fields.contains(&("grant_type".into(), "refresh_token".into())));
        assert!(fields.contains(&("refresh_token".into(), "rt".into())));
    }

    #[test]
    fn test_parse_json_and_form_responses() {
        let ok = TokenResponse {
            status: 200,
            body: Bytes::from_static(br#"{"access_token":"a","expires_in":60}"#),
        };
        assert_eq!(parse_response(&ok).unwrap().expires_in, Some(60));

        let form_body = TokenResponse {
            status: 200,
            body: Bytes::from_static(b"access_token=b&token_type=bearer"),
        };
        assert_eq!(
            parse_response(&form_body).unwrap().access_token.as_deref(),
            Some("b")
        );

        let denied = TokenResponse {
            status: 400,
            body: Bytes::from_static(
                br#"{"error":"invalid_client","error_description":"bad secret"}"#,
            ),
        };
        assert_eq!(
            parse_response(&denied).unwrap_err(),
            NetError::OAuth2("invalid_client: bad secret".into())
        );

        let server_error = TokenResponse {
            status: 500,
            body: Bytes::from_static(b"oops"),
        };
        assert!(matches!(parse_response(&server_error), Err(NetError::OAuth2(_))));
    }

    #[test]
    fn test_fragment_credentials() {
        let creds = credentials_from_fragment(
            "http://localhost/cb#access_token=tok&expires_in=3600&scope=a&state=xyz",
        )
        .unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("tok"));
        assert_eq!(creds.token_type.as_deref(), Some("Bearer"));
        assert_eq!(creds.expires_in, Some(3600));
        assert_eq!(creds.extra["state"], "xyz");

        assert_eq!(
            credentials_from_fragment("http://localhost/cb#state=x").unwrap_err(),
            NetError::OAuth2("No access token received from authorization server".into())
        );
    }

    #[test]
    fn test_code_from_callback() {
        assert_eq!(code_from_callback("http://cb/?code=abc&state=s").unwrap(), "abc");
        assert_eq!(
            code_from_callback("http://cb/?error=access_denied").unwrap_err(),
            NetError::OAuth2("access_denied".into())
        );
    }
}
