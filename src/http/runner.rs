//! Request execution: interpolation, auth, and the redirect/challenge loop.
//!
//! Each hop runs `Building -> Sent -> Outcome`. The loop is bounded by the
//! redirect cap plus at most one digest and one NTLM retry, and checks the
//! cancellation token before every hop and while a hop is in flight.

use super::redirect;
use super::response::{Artifact, Response};
use super::transaction::{Attempt, HopResponse, Transaction};
use crate::agent::{Agent, AgentCache, AgentClass};
use crate::auth::digest::DigestChallenge;
use crate::auth::oauth2::{
    credentials_variables, AuthorizationHandler, OAuth2Resolver, TokenHttp, TokenRequest,
    TokenResponse, TokenStore,
};
use crate::auth::AuthMode;
use crate::base::neterror::{ErrorKind, NetError};
use crate::base::timeline::{Timeline, MAX_PREVIEW_BYTES};
use crate::config::{EngineConfig, Preferences};
use crate::cookies::CookieJar;
use crate::interpolate::{interpolate_request, resolve_environment_values, Scope, VariableScopes};
use crate::request::PreparedRequest;
use crate::socket::certs::select_client_identity;
use crate::socket::proxy::resolve_proxy;
use crate::socket::tls::TlsOptions;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{SET_COOKIE, WWW_AUTHENTICATE};
use http::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use url::Url;

/// What a hop led to. A final hop's body is spooled to the artifact; the
/// body of any other hop is discarded.
#[derive(Debug)]
pub enum Outcome {
    Final,
    Redirect(Attempt),
    /// Same request again, answering an auth challenge.
    Challenge(Attempt),
}

#[derive(Debug)]
pub struct RunOutput {
    pub response: Response,
    pub timeline: Timeline,
}

/// A failed run. Policy errors carry the response that triggered them.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunError {
    pub error: NetError,
    pub timeline: Timeline,
    pub last_response: Option<Response>,
}

struct Failure {
    error: NetError,
    last_response: Option<Response>,
}

impl From<NetError> for Failure {
    fn from(error: NetError) -> Self {
        Failure {
            error,
            last_response: None,
        }
    }
}

/// Per-request challenge bookkeeping.
#[derive(Debug, Default)]
struct Challenges {
    digest_answered: bool,
    ntlm_answered: bool,
}

pub struct RequestRunner {
    cookies: Arc<CookieJar>,
    agents: Arc<AgentCache>,
    tokens: Arc<TokenStore>,
    prefs: Preferences,
    config: EngineConfig,
    authorization: Option<Arc<dyn AuthorizationHandler>>,
}

impl RequestRunner {
    pub fn new(
        cookies: Arc<CookieJar>,
        agents: Arc<AgentCache>,
        tokens: Arc<TokenStore>,
        prefs: Preferences,
        config: EngineConfig,
    ) -> Self {
        Self {
            cookies,
            agents,
            tokens,
            prefs,
            config,
            authorization: None,
        }
    }

    /// Fresh jar, agent cache and in-memory token store.
    pub fn with_defaults(prefs: Preferences, config: EngineConfig) -> Self {
        let agents = Arc::new(AgentCache::new(config.agent_cache_capacity));
        Self::new(
            Arc::new(CookieJar::new()),
            agents,
            Arc::new(TokenStore::in_memory()),
            prefs,
            config,
        )
    }

    /// Host hook for the browser step of authorization-code and implicit grants.
    pub fn with_authorization_handler(mut self, handler: Arc<dyn AuthorizationHandler>) -> Self {
        self.authorization = Some(handler);
        self
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    pub fn agents(&self) -> &Arc<AgentCache> {
        &self.agents
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one logical request to its final response.
    pub async fn execute(
        &self,
        request: PreparedRequest,
        scopes: VariableScopes,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunError> {
        let timeline = Timeline::new();
        match self.run(request, scopes, cancel, &timeline).await {
            Ok(response) => Ok(RunOutput { response, timeline }),
            Err(failure) => {
                if failure.error.kind() == ErrorKind::Transport {
                    timeline.error(format!("Error: {}", failure.error));
                }
                Err(RunError {
                    error: failure.error,
                    timeline,
                    last_response: failure.last_response,
                })
            }
        }
    }

    async fn run(
        &self,
        request: PreparedRequest,
        scopes: VariableScopes,
        cancel: &CancellationToken,
        timeline: &Timeline,
    ) -> Result<Response, Failure> {
        if cancel.is_cancelled() {
            return Err(NetError::Cancelled.into());
        }
        let tls = TlsOptions::from_preferences(&self.prefs.request)?;
        let (request, mut attempt) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NetError::Cancelled.into()),
            prepared = self.prepare(request, scopes, &tls, timeline) => prepared?,
        };

        let limit = request.redirect_limit(&self.prefs);
        let timeout = request.connect_timeout(&self.prefs);
        let user_cookie = attempt.headers.get("cookie").map(str::to_string);
        let mut redirects = 0usize;
        let mut challenges = Challenges::default();
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(NetError::Cancelled.into());
            }
            self.attach_cookies(&mut attempt, user_cookie.as_deref());
            log_request(&attempt, timeline);

            let agent = self.agent_for(&attempt.url, &request, &tls, timeline).await?;
            let hop = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NetError::Cancelled.into()),
                hop = Transaction::new(agent, timeout).send(&attempt) => hop?,
            };

            if self.prefs.request.store_cookies {
                for value in hop.headers.get_all(SET_COOKIE) {
                    if let Ok(value) = value.to_str() {
                        self.cookies.store_set_cookie(&attempt.url, value);
                    }
                }
            }
            log_response(&hop, timeline);

            let budget = Budget {
                followed: redirects,
                limit,
            };
            let outcome = next_outcome(&request, &attempt, &hop, budget, &mut challenges, timeline);
            let next = match outcome {
                Ok(Outcome::Final) => None,
                Ok(Outcome::Challenge(next)) => Some(next),
                Ok(Outcome::Redirect(next)) => {
                    redirects += 1;
                    Some(next)
                }
                Err(error) => {
                    let last = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(NetError::Cancelled.into()),
                        last = self.finish(&request, hop, started, timeline) => last?,
                    };
                    return Err(Failure {
                        error,
                        last_response: Some(last),
                    });
                }
            };

            attempt = match next {
                Some(next) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(NetError::Cancelled.into()),
                        _ = hop.discard() => {}
                    }
                    next
                }
                None => {
                    return tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(NetError::Cancelled.into()),
                        response = self.finish(&request, hop, started, timeline) => Ok(response?),
                    };
                }
            };
        }
    }

    /// Interpolate, resolve OAuth2, apply static auth, materialise the body
    /// and sign (SigV4, OAuth1). Returns the interpolated request and its first hop.
    async fn prepare(
        &self,
        mut request: PreparedRequest,
        mut scopes: VariableScopes,
        tls: &TlsOptions,
        timeline: &Timeline,
    ) -> Result<(PreparedRequest, Attempt), NetError> {
        request.vars.lift_into(&mut scopes);
        resolve_environment_values(&mut scopes);
        match self
            .tokens
            .credentials_for_collection(&request.collection_uid)
            .await
        {
            Ok(stored) => {
                let vars = credentials_variables(stored.iter().map(|(_, id, c)| (id.as_str(), c)));
                scopes.extend_scope(Scope::OAuth2Credentials, vars);
            }
            Err(e) => tracing::warn!("could not load stored OAuth2 credentials: {}", e),
        }
        interpolate_request(&mut request, &scopes)?;

        let mut url = normalize_url(&request.url);
        let mut headers = request.headers.clone();

        if let AuthMode::OAuth2(config) = &request.auth {
            let fetcher = TokenFetcher {
                runner: self,
                request: &request,
                tls,
                timeline,
            };
            let outcome = OAuth2Resolver::new(&self.tokens, &fetcher)
                .with_handler(self.authorization.as_deref())
                .with_timeline(timeline)
                .resolve(&request.collection_uid, config)
                .await
                .map_err(|e| match e {
                    NetError::OAuth2(_) | NetError::Cancelled => e,
                    other => NetError::OAuth2(other.to_string()),
                })?;
            if let Some(credentials) = &outcome.credentials {
                config.apply_token(credentials, &mut url, &mut headers)?;
            }
        }
        request.auth.apply_static(&mut url, &mut headers)?;

        let mut body = request.body.materialize(&request.collection_path).await?;
        if let Some(content_type) = &body.forced_content_type {
            headers.set("content-type", content_type.clone());
        } else if let Some(content_type) = request.body.default_content_type() {
            headers.set_default("content-type", content_type);
        }

        let mut parsed = Url::parse(&url).map_err(|_| NetError::invalid_url())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NetError::UnknownUrlScheme);
        }
        if let AuthMode::AwsV4(aws) = &request.auth {
            aws.apply(
                &request.method,
                parsed.as_str(),
                &mut headers,
                &body.bytes,
                OffsetDateTime::now_utc(),
            )?;
        }
        if let AuthMode::OAuth1(oauth) = &request.auth {
            oauth.apply(
                &request.method,
                &mut parsed,
                &mut headers,
                &mut body.bytes,
                &request.collection_path,
                OffsetDateTime::now_utc(),
            )?;
        }

        let mut attempt = Attempt::new(request.method.clone(), parsed);
        attempt.headers = headers;
        attempt.body = (!request.body.is_none()).then_some(body.bytes);
        Ok((request, attempt))
    }

    fn attach_cookies(&self, attempt: &mut Attempt, user_cookie: Option<&str>) {
        let user = if attempt.cross_origin { None } else { user_cookie };
        let jar = if self.prefs.request.send_cookies {
            self.cookies.get_cookie_string_for_url(&attempt.url)
        } else {
            String::new()
        };
        let value = match (user.filter(|u| !u.is_empty()), jar.is_empty()) {
            (Some(u), false) => format!("{}; {}", u, jar),
            (Some(u), true) => u.to_string(),
            (None, false) => jar,
            (None, true) => {
                attempt.headers.remove("cookie");
                return;
            }
        };
        attempt.headers.set("Cookie", value);
    }

    async fn agent_for(
        &self,
        url: &Url,
        request: &PreparedRequest,
        tls: &TlsOptions,
        timeline: &Timeline,
    ) -> Result<Arc<Agent>, NetError> {
        let identity =
            select_client_identity(&request.client_certificates, url.as_str(), &request.collection_path)
                .await?;
        let options = tls.clone().with_client_identity(identity);
        let proxy = resolve_proxy(&request.proxy, url)?;
        self.agents.get_or_create_agent(
            AgentClass::for_scheme(url.scheme()),
            &options,
            proxy.as_ref(),
            Some(timeline),
        )
    }

    async fn finish(
        &self,
        request: &PreparedRequest,
        hop: HopResponse,
        started: Instant,
        timeline: &Timeline,
    ) -> Result<Response, NetError> {
        let status = hop.status;
        let headers = hop.headers.clone();
        let mut artifact = Artifact::create(&self.config.artifact_dir, &request.uid).await?;
        let mut head = Vec::new();
        let size = hop
            .spool(artifact.file(), &mut head, MAX_PREVIEW_BYTES + 1)
            .await?;
        if !head.is_empty() {
            timeline.preview("Response body", &head);
        }
        let path = artifact.commit().await?;
        Ok(Response::new(
            status,
            headers,
            started.elapsed().as_millis() as u64,
            path,
            size,
        ))
    }
}

/// Redirects followed so far against the cap.
#[derive(Debug, Clone, Copy)]
struct Budget {
    followed: usize,
    limit: usize,
}

/// Decide what a response leads to. On error the caller keeps the response
/// so it can travel with the failure.
fn next_outcome(
    request: &PreparedRequest,
    attempt: &Attempt,
    hop: &HopResponse,
    budget: Budget,
    challenges: &mut Challenges,
    timeline: &Timeline,
) -> Result<Outcome, NetError> {
    if hop.status == StatusCode::UNAUTHORIZED {
        if let Some(next) = answer_challenge(request, attempt, hop, challenges)? {
            return Ok(Outcome::Challenge(next));
        }
    }

    let Some(location) = redirect::location(hop) else {
        return Ok(Outcome::Final);
    };
    if budget.followed >= budget.limit {
        return Err(NetError::TooManyRedirects(budget.limit));
    }
    let next_url = redirect::resolve_location(&attempt.url, location, timeline)?;
    Ok(Outcome::Redirect(redirect::follow(
        attempt, hop.status, next_url, timeline,
    )))
}

/// Build the retry for a 401 the request's auth mode can answer, once.
fn answer_challenge(
    request: &PreparedRequest,
    attempt: &Attempt,
    hop: &HopResponse,
    challenges: &mut Challenges,
) -> Result<Option<Attempt>, NetError> {
    let offered = hop
        .headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok());

    match &request.auth {
        AuthMode::Digest(creds) if !challenges.digest_answered => {
            for value in offered {
                if let Some(challenge) = DigestChallenge::from_header(value) {
                    let mut challenge = challenge?;
                    let authorization =
                        challenge.authorization(&attempt.method, &attempt.path_and_query(), creds)?;
                    challenges.digest_answered = true;
                    let mut next = attempt.clone();
                    next.headers.set("Authorization", authorization);
                    return Ok(Some(next));
                }
            }
            Ok(None)
        }
        AuthMode::Ntlm(ntlm) if !challenges.ntlm_answered => {
            for value in offered {
                let is_ntlm = value
                    .get(..5)
                    .is_some_and(|p| p.eq_ignore_ascii_case("NTLM "));
                if is_ntlm {
                    let authorization = ntlm.authenticate_header(value)?;
                    challenges.ntlm_answered = true;
                    let mut next = attempt.clone();
                    next.headers.set("Authorization", authorization);
                    return Ok(Some(next));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Token endpoint calls ride the same agents, proxy and client
/// certificates as the request that needs the token.
struct TokenFetcher<'a> {
    runner: &'a RequestRunner,
    request: &'a PreparedRequest,
    tls: &'a TlsOptions,
    timeline: &'a Timeline,
}

#[async_trait]
impl TokenHttp for TokenFetcher<'_> {
    async fn send(&self, token: TokenRequest) -> Result<TokenResponse, NetError> {
        let url = Url::parse(&token.url).map_err(|_| NetError::invalid_url())?;
        let agent = self
            .runner
            .agent_for(&url, self.request, self.tls, self.timeline)
            .await?;
        let mut attempt = Attempt::new("POST", url);
        attempt.headers = token.headers;
        attempt.body = Some(Bytes::from(token.body));

        let timeout = self.request.connect_timeout(&self.runner.prefs);
        let hop = Transaction::new(agent, timeout).send(&attempt).await?;
        tracing::debug!("token endpoint answered {}", hop.status);
        let status = hop.status.as_u16();
        Ok(TokenResponse {
            status,
            body: hop.collect().await?,
        })
    }
}

/// URLs typed without a scheme default to plain HTTP.
fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn log_request(attempt: &Attempt, timeline: &Timeline) {
    timeline.info(format!("Preparing request to {}", attempt.url));
    let now = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    timeline.info(format!("Current time is {}", now));
    timeline.info(format!("{} {}", attempt.method, attempt.url));
    for (name, value) in attempt.headers.iter() {
        timeline.info(format!("{}: {}", name, value));
    }
    if let Some(body) = attempt.body.as_ref().filter(|b| !b.is_empty()) {
        timeline.preview("Request body", body);
    }
}

fn log_response(hop: &HopResponse, timeline: &Timeline) {
    timeline.info(format!(
        "HTTP/1.1 {} {}",
        hop.status.as_u16(),
        hop.status.canonical_reason().unwrap_or("")
    ));
    for (name, value) in hop.headers.iter() {
        timeline.info(format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())));
    }
    timeline.info(format!("Request completed in {} ms", hop.elapsed.as_millis()));
}
