//! A single request/response exchange on an agent connection.

use crate::agent::{Agent, HttpConnection};
use crate::base::neterror::NetError;
use crate::request::HeaderList;
use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, HOST, PROXY_AUTHORIZATION};
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

/// Everything needed to put one hop on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub method: String,
    pub url: Url,
    pub headers: HeaderList,
    pub body: Option<Bytes>,
    /// Set once a redirect has left the first origin.
    pub cross_origin: bool,
}

impl Attempt {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            headers: HeaderList::new(),
            body: None,
            cross_origin: false,
        }
    }

    /// The request target as sent in origin form.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }
}

/// The head of one hop's response.
///
/// The body is still on the connection. It has to be spooled, collected or
/// discarded before the connection goes back to the agent's idle pool.
pub struct HopResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Time until the response head arrived.
    pub elapsed: Duration,
    body: Incoming,
    /// `None` when the server asked to close the connection.
    conn: Option<HttpConnection>,
    agent: Arc<Agent>,
}

impl std::fmt::Debug for HopResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HopResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("elapsed", &self.elapsed)
            .finish_non_exhaustive()
    }
}

impl HopResponse {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        while let Some(frame) = self.body.frame().await {
            let frame = frame.map_err(|_| NetError::HttpBodyError)?;
            if let Ok(data) = frame.into_data() {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.agent.release(conn);
        }
    }

    /// Read the whole body into memory. Meant for small bodies such as
    /// token endpoint replies.
    pub async fn collect(mut self) -> Result<Bytes, NetError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        self.release();
        Ok(buf.freeze())
    }

    /// Read and drop the body so the connection can be reused.
    pub async fn discard(mut self) {
        loop {
            match self.next_chunk().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("dropping connection, body read failed: {}", e);
                    return;
                }
            }
        }
        self.release();
    }

    /// Stream the body into `sink`, keeping its first `keep` bytes in
    /// `head`. Returns the total body size.
    pub async fn spool<W>(mut self, sink: &mut W, head: &mut Vec<u8>, keep: usize) -> Result<u64, NetError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut size = 0u64;
        while let Some(chunk) = self.next_chunk().await? {
            if head.len() < keep {
                let take = (keep - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            sink.write_all(&chunk)
                .await
                .map_err(|e| NetError::ArtifactWrite(e.to_string()))?;
            size += chunk.len() as u64;
        }
        sink.flush()
            .await
            .map_err(|e| NetError::ArtifactWrite(e.to_string()))?;
        self.release();
        Ok(size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Building,
    Sent,
    Done,
}

/// Drives one [`Attempt`] through `Building -> Sent -> Done`.
///
/// A reused keep-alive connection the server already closed is retried
/// once on a fresh connection.
pub struct Transaction {
    agent: Arc<Agent>,
    timeout: Option<Duration>,
    state: State,
}

impl Transaction {
    pub fn new(agent: Arc<Agent>, timeout: Option<Duration>) -> Self {
        Self {
            agent,
            timeout,
            state: State::Building,
        }
    }

    pub async fn send(mut self, attempt: &Attempt) -> Result<HopResponse, NetError> {
        let started = Instant::now();
        let mut retried = false;

        loop {
            debug_assert_eq!(self.state, State::Building);
            let mut conn = self.agent.checkout(&attempt.url, self.timeout).await?;
            let request = self.build(attempt, conn.is_forward_proxy())?;

            self.state = State::Sent;
            let response = match conn.sender.send_request(request).await {
                Ok(response) => response,
                Err(e) if conn.is_reused() && !retried => {
                    tracing::debug!("reused connection failed ({}), retrying on a fresh one", e);
                    retried = true;
                    self.state = State::Building;
                    continue;
                }
                Err(e) => return Err(map_hyper_error(&e)),
            };

            let (parts, body) = response.into_parts();
            self.state = State::Done;
            let conn = keeps_alive(&parts.headers).then_some(conn);
            return Ok(HopResponse {
                status: parts.status,
                headers: parts.headers,
                elapsed: started.elapsed(),
                body,
                conn,
                agent: self.agent,
            });
        }
    }

    fn build(&self, attempt: &Attempt, forward_proxy: bool) -> Result<Request<Full<Bytes>>, NetError> {
        let method = Method::from_bytes(attempt.method.as_bytes())
            .map_err(|_| NetError::InvalidHeader(format!("method {}", attempt.method)))?;
        let target = if forward_proxy {
            let mut absolute = attempt.url.clone();
            absolute.set_fragment(None);
            absolute.to_string()
        } else {
            attempt.path_and_query()
        };

        let mut headers = attempt.headers.to_header_map()?;
        if !headers.contains_key(HOST) {
            let value = HeaderValue::from_str(&host_header(&attempt.url))
                .map_err(|_| NetError::InvalidHeader("host".to_string()))?;
            headers.insert(HOST, value);
        }
        if forward_proxy {
            if let Some(auth) = self.agent.proxy().and_then(|p| p.get_auth_header()) {
                let value = HeaderValue::from_str(&auth)
                    .map_err(|_| NetError::InvalidHeader("proxy-authorization".to_string()))?;
                headers.insert(PROXY_AUTHORIZATION, value);
            }
        }

        let body = attempt.body.clone().unwrap_or_default();
        let mut request = Request::builder()
            .method(method)
            .uri(target)
            .body(Full::new(body))
            .map_err(|_| NetError::invalid_url())?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

/// `host[:port]`, the port only when it is not the scheme default.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn keeps_alive(headers: &HeaderMap) -> bool {
    !headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
}

fn map_hyper_error(e: &hyper::Error) -> NetError {
    if e.is_timeout() {
        NetError::ConnectionTimedOut
    } else if e.is_parse() {
        NetError::InvalidResponse
    } else if e.is_canceled() || e.is_closed() || e.is_incomplete_message() {
        NetError::ConnectionClosed
    } else {
        NetError::ConnectionFailed
    }
}
