//! WebSocket client: one live connection per request id.
//!
//! Each connection is driven by a task that owns the socket. The client
//! keeps a registry entry per request id and talks to the task through a
//! bounded command channel. Everything observable is reported on an event
//! channel handed out by [`WsClient::new`].

use super::connection::{Command, Connection, ConnectionState};
use super::message::{hex_dump, outgoing_text, ChangeKind, Direction, WsEvent, WsEventKind, WsMessage};
use crate::agent::{AgentCache, AgentClass};
use crate::base::neterror::NetError;
use crate::config::{EngineConfig, Preferences};
use crate::http::redirect::{self, CREDENTIAL_HEADERS};
use crate::interpolate::{interpolate_request, resolve_environment_values, VariableScopes};
use crate::request::{HeaderList, PreparedRequest, ProxyMode};
use crate::socket::certs::{select_client_identity, ClientCertificate};
use crate::socket::proxy::resolve_proxy;
use crate::socket::stream::BoxedSocket;
use crate::socket::tls::TlsOptions;
use futures::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Handshake redirects followed before giving up.
pub const MAX_WS_REDIRECTS: usize = 5;
pub const DEFAULT_CLOSE_REASON: &str = "Client initiated close";
const CLEAR_REASON: &str = "Client clearing all connections";
/// How long a close handshake may take before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<BoxedSocket>;

#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Connect plus upgrade. `None` waits forever.
    pub timeout: Option<Duration>,
    pub keep_alive: bool,
    pub keep_alive_interval: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            keep_alive: false,
            keep_alive_interval: Duration::from_secs(10),
        }
    }
}

/// What the socket task needs to open the connection.
struct Handshake {
    request_id: String,
    collection_uid: String,
    url: Url,
    headers: HeaderList,
    proxy: ProxyMode,
    client_certificates: Vec<ClientCertificate>,
    collection_path: PathBuf,
    options: WsOptions,
}

struct Inner {
    agents: Arc<AgentCache>,
    prefs: Preferences,
    queue_capacity: usize,
    connections: Mutex<HashMap<String, Connection>>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<WsEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, request_id: &str, collection_uid: &str, kind: WsEventKind) {
        let event = WsEvent {
            request_id: Some(request_id.to_string()),
            collection_uid: Some(collection_uid.to_string()),
            kind,
        };
        if self.events.send(event).is_err() {
            tracing::trace!("ws event receiver dropped");
        }
    }

    fn emit_changed(&self, request_id: Option<&str>, kind: ChangeKind, active_ids: Vec<String>) {
        let event = WsEvent {
            request_id: request_id.map(str::to_string),
            collection_uid: None,
            kind: WsEventKind::ConnectionsChanged { kind, active_ids },
        };
        if self.events.send(event).is_err() {
            tracing::trace!("ws event receiver dropped");
        }
    }

    fn active_ids(map: &HashMap<String, Connection>) -> Vec<String> {
        let mut ids: Vec<_> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop the registry entry if it still belongs to `generation`.
    fn remove_if_current(&self, request_id: &str, generation: u64, failed: bool) {
        let active = {
            let mut map = self.lock();
            match map.get_mut(request_id) {
                Some(conn) if conn.generation == generation => {
                    conn.finish(failed);
                    map.remove(request_id);
                    Some(Self::active_ids(&map))
                }
                _ => None,
            }
        };
        if let Some(ids) = active {
            self.emit_changed(Some(request_id), ChangeKind::Removed, ids);
        }
    }
}

/// Cheap to clone; clones share connections and the event channel.
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    pub fn new(
        agents: Arc<AgentCache>,
        prefs: Preferences,
        config: &EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WsEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            agents,
            prefs,
            queue_capacity: config.ws_queue_capacity.max(1),
            connections: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Open a connection for `request.uid`, replacing any existing one.
    ///
    /// Returns once the connection is registered; progress arrives as
    /// events. Messages queued meanwhile are sent when it opens.
    pub fn start_connection(
        &self,
        mut request: PreparedRequest,
        mut scopes: VariableScopes,
        options: WsOptions,
    ) -> Result<(), NetError> {
        request.vars.lift_into(&mut scopes);
        resolve_environment_values(&mut scopes);
        interpolate_request(&mut request, &scopes)?;

        let mut url_text = ws_url(&request.url);
        let mut headers = request.headers.clone();
        request.auth.apply_static(&mut url_text, &mut headers)?;
        let url = Url::parse(&url_text).map_err(|_| NetError::invalid_url())?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(NetError::UnknownUrlScheme);
        }

        let request_id = request.uid.clone();
        self.close(&request_id);

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Connection::new(
            request_id.clone(),
            request.collection_uid.clone(),
            generation,
            self.inner.queue_capacity,
        );
        let cancel = conn.cancel_token();
        let active = {
            let mut map = self.inner.lock();
            map.insert(request_id.clone(), conn);
            Inner::active_ids(&map)
        };
        self.inner
            .emit_changed(Some(&request_id), ChangeKind::Added, active);
        self.inner
            .emit(&request_id, &request.collection_uid, WsEventKind::Connecting);
        tracing::debug!("ws {}: connecting to {}", request_id, url);

        let setup = Handshake {
            request_id,
            collection_uid: request.collection_uid,
            url,
            headers,
            proxy: request.proxy,
            client_certificates: request.client_certificates,
            collection_path: request.collection_path,
            options,
        };
        tokio::spawn(drive(self.inner.clone(), setup, generation, cancel));
        Ok(())
    }

    /// Send now if open, otherwise buffer until the connection opens.
    pub fn queue_message(&self, request_id: &str, message: &str) -> Result<(), NetError> {
        let text = outgoing_text(message);
        let mut map = self.inner.lock();
        let conn = map.get_mut(request_id).ok_or(NetError::WsNotOpen)?;
        match conn.state() {
            ConnectionState::Open => conn.command(Command::Send(text)),
            ConnectionState::Connecting => conn.enqueue(text),
            _ => Err(NetError::WsNotOpen),
        }
    }

    /// Send on an open connection. Anything else is reported as an error
    /// event as well as returned.
    pub fn send_message(&self, request_id: &str, message: &str) -> Result<(), NetError> {
        let text = outgoing_text(message);
        let (result, collection_uid) = {
            let map = self.inner.lock();
            match map.get(request_id) {
                Some(conn) => (conn.command(Command::Send(text)), conn.collection_uid.clone()),
                None => (Err(NetError::WsNotOpen), String::new()),
            }
        };
        if let Err(e) = &result {
            let message = match e {
                NetError::WsNotOpen => "WebSocket connection not available or not open".to_string(),
                other => other.to_string(),
            };
            self.inner
                .emit(request_id, &collection_uid, WsEventKind::Error { message });
        }
        result
    }

    /// Close with 1000 and the default reason.
    pub fn close(&self, request_id: &str) {
        self.close_with(request_id, 1000, DEFAULT_CLOSE_REASON);
    }

    /// Close a connection. Unknown or already closed ids are ignored.
    pub fn close_with(&self, request_id: &str, code: u16, reason: &str) {
        let removed = {
            let mut map = self.inner.lock();
            map.remove(request_id).map(|mut conn| {
                conn.begin_close(code, reason);
                Inner::active_ids(&map)
            })
        };
        if let Some(ids) = removed {
            tracing::debug!("ws {}: closing ({} {})", request_id, code, reason);
            self.inner
                .emit_changed(Some(request_id), ChangeKind::Removed, ids);
        }
    }

    pub fn is_connection_active(&self, request_id: &str) -> bool {
        self.inner
            .lock()
            .get(request_id)
            .is_some_and(|c| c.state().is_open())
    }

    pub fn connection_state(&self, request_id: &str) -> Option<ConnectionState> {
        self.inner.lock().get(request_id).map(|c| c.state())
    }

    pub fn active_connection_ids(&self) -> Vec<String> {
        Inner::active_ids(&self.inner.lock())
    }

    /// Close everything. Emits one `Cleared` change if anything was live.
    pub fn clear_all_connections(&self) {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        for (_, mut conn) in drained {
            conn.begin_close(1000, CLEAR_REASON);
        }
        self.inner.emit_changed(None, ChangeKind::Cleared, Vec::new());
    }
}

/// Socket task for one connection.
async fn drive(inner: Arc<Inner>, setup: Handshake, generation: u64, cancel: CancellationToken) {
    let id = setup.request_id.clone();
    let uid = setup.collection_uid.clone();

    let opened = tokio::select! {
        _ = cancel.cancelled() => None,
        result = with_timeout(setup.options.timeout, handshake(&inner, &setup)) => Some(result),
    };
    let (mut stream, url) = match opened {
        None => {
            inner.emit(
                &id,
                &uid,
                WsEventKind::Close {
                    code: 1006,
                    reason: "Connection closed before it was established".to_string(),
                },
            );
            return;
        }
        Some(Err(e)) => {
            tracing::debug!("ws {}: handshake failed: {}", id, e);
            inner.emit(&id, &uid, WsEventKind::Error { message: e.to_string() });
            inner.remove_if_current(&id, generation, true);
            return;
        }
        Some(Ok(opened)) => opened,
    };

    let (tx, mut rx) = mpsc::channel(inner.queue_capacity);
    let queued = {
        let mut map = inner.lock();
        match map.get_mut(&id) {
            Some(conn) if conn.generation == generation => match conn.mark_open(tx.clone()) {
                Ok(queued) => {
                    if setup.options.keep_alive {
                        conn.set_keep_alive(spawn_keep_alive(
                            tx.clone(),
                            setup.options.keep_alive_interval,
                        ));
                    }
                    Some(queued)
                }
                Err(_) => None,
            },
            _ => None,
        }
    };
    drop(tx);
    let Some(queued) = queued else {
        // Closed while the upgrade was in flight.
        let _ = stream.close(None).await;
        return;
    };

    inner.emit(&id, &uid, WsEventKind::Open { url: url.to_string() });
    let mut failed = false;
    for text in queued {
        if let Err(e) = send_text(&inner, &id, &uid, &mut stream, text).await {
            inner.emit(&id, &uid, WsEventKind::Error { message: e.to_string() });
            failed = true;
            break;
        }
    }

    let mut close: Option<(u16, String)> = None;
    let mut deadline: Option<Instant> = None;
    let mut commands_open = true;

    while !failed {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wait_until(deadline) => {
                tracing::debug!("ws {}: close handshake timed out", id);
                break;
            }
            command = rx.recv(), if commands_open => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = send_text(&inner, &id, &uid, &mut stream, text).await {
                        inner.emit(&id, &uid, WsEventKind::Error { message: e.to_string() });
                        failed = true;
                    }
                }
                Some(Command::Ping) => {
                    tracing::trace!("ws {}: keep-alive ping", id);
                    if let Err(e) = stream.send(Message::Ping(Vec::new())).await {
                        tracing::debug!("ws {}: ping failed: {}", id, e);
                    }
                }
                Some(Command::Close { code, reason }) => {
                    commands_open = false;
                    deadline = Some(Instant::now() + CLOSE_GRACE);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    close.get_or_insert((code, reason));
                    let _ = stream.close(Some(frame)).await;
                }
                None => {
                    // Registry entry gone without a close request.
                    commands_open = false;
                    deadline = Some(Instant::now() + CLOSE_GRACE);
                    let _ = stream.close(None).await;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => record_incoming(&inner, &id, &uid, text.as_bytes()),
                Some(Ok(Message::Binary(data))) => record_incoming(&inner, &id, &uid, &data),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    tracing::debug!("ws {}: server closed ({} {})", id, code, reason);
                    close = Some((code, reason));
                    deadline.get_or_insert(Instant::now() + CLOSE_GRACE);
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => break,
                Some(Err(e)) => {
                    inner.emit(&id, &uid, WsEventKind::Error { message: e.to_string() });
                    failed = true;
                }
            },
        }
    }

    let (code, reason) = match close {
        Some(close) => close,
        None => (1006, String::new()),
    };
    inner.emit(&id, &uid, WsEventKind::Close { code, reason });
    inner.remove_if_current(&id, generation, failed);
}

/// Connect through the shared agents and upgrade, following redirects.
async fn handshake(inner: &Inner, setup: &Handshake) -> Result<(WsStream, Url), NetError> {
    let tls = TlsOptions::from_preferences(&inner.prefs.request)?;
    let mut url = setup.url.clone();
    let mut headers = setup.headers.clone();

    for hop in 0..=MAX_WS_REDIRECTS {
        let identity = select_client_identity(
            &setup.client_certificates,
            url.as_str(),
            &setup.collection_path,
        )
        .await?;
        let proxy = resolve_proxy(&setup.proxy, &url)?;
        let agent = inner.agents.get_or_create_agent(
            AgentClass::for_scheme(url.scheme()),
            &tls.clone().with_client_identity(identity),
            proxy.as_ref(),
            None,
        )?;
        let connected = agent.connect(&url, setup.options.timeout, true).await?;
        let request = upgrade_request(&url, &headers)?;

        match tokio_tungstenite::client_async(request, connected.socket).await {
            Ok((stream, response)) => {
                inner.emit(
                    &setup.request_id,
                    &setup.collection_uid,
                    WsEventKind::Upgrade {
                        headers: response.headers().clone(),
                    },
                );
                return Ok((stream, url));
            }
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status();
                let location = response
                    .headers()
                    .get(http::header::LOCATION)
                    .and_then(|v| v.to_str().ok());
                let Some(location) = location.filter(|_| redirect::is_redirect(status)) else {
                    tracing::debug!("ws upgrade refused with {}", status);
                    return Err(NetError::InvalidResponse);
                };
                if hop == MAX_WS_REDIRECTS {
                    return Err(NetError::TooManyRedirects(MAX_WS_REDIRECTS));
                }
                let next = redirect_target(&url, location)?;
                if !redirect::same_origin(&url, &next) {
                    headers.remove_many(&CREDENTIAL_HEADERS);
                }
                inner.emit(
                    &setup.request_id,
                    &setup.collection_uid,
                    WsEventKind::Redirect {
                        url: next.to_string(),
                        headers: headers.to_header_map()?,
                    },
                );
                url = next;
            }
            Err(e) => return Err(map_ws_error(e)),
        }
    }
    Err(NetError::TooManyRedirects(MAX_WS_REDIRECTS))
}

fn upgrade_request(
    url: &Url,
    headers: &HeaderList,
) -> Result<http::Request<()>, NetError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|_| NetError::invalid_url())?;
    for (name, value) in headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| NetError::InvalidHeader(name.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader(name.to_string()))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Resolve a redirect and keep it on a WebSocket scheme.
fn redirect_target(current: &Url, location: &str) -> Result<Url, NetError> {
    let mut next = current.join(location).map_err(|_| NetError::InvalidRedirect)?;
    let scheme = match next.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => other,
    }
    .to_string();
    if next.scheme() != scheme && next.set_scheme(&scheme).is_err() {
        return Err(NetError::InvalidRedirect);
    }
    Ok(next)
}

/// Add a scheme when missing: `ws://` for local hosts, `wss://` otherwise.
/// `http(s)://` is mapped onto the matching WebSocket scheme.
pub fn ws_url(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("http://") {
        return format!("ws://{}", rest);
    }
    if let Some(rest) = raw.strip_prefix("https://") {
        return format!("wss://{}", rest);
    }
    if raw.contains("://") {
        return raw.to_string();
    }
    if raw.contains("localhost") || raw.contains("127.0.0.1") {
        format!("ws://{}", raw)
    } else {
        format!("wss://{}", raw)
    }
}

async fn send_text(
    inner: &Inner,
    id: &str,
    uid: &str,
    stream: &mut WsStream,
    text: String,
) -> Result<(), NetError> {
    let record = WsMessage::new(Direction::Outgoing, text.as_bytes());
    stream
        .send(Message::Text(text))
        .await
        .map_err(map_ws_error)?;
    inner.emit(id, uid, WsEventKind::Message(record));
    Ok(())
}

fn record_incoming(inner: &Inner, id: &str, uid: &str, payload: &[u8]) {
    tracing::trace!("ws {}: received {} bytes\n{}", id, payload.len(), hex_dump(payload));
    inner.emit(
        id,
        uid,
        WsEventKind::Message(WsMessage::new(Direction::Incoming, payload)),
    );
}

fn spawn_keep_alive(
    commands: mpsc::Sender<Command>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if commands.send(Command::Ping).await.is_err() {
                break;
            }
        }
    })
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, NetError>>,
) -> Result<T, NetError> {
    match timeout {
        Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| NetError::ConnectionTimedOut)?,
        _ => fut.await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn map_ws_error(e: tungstenite::Error) -> NetError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            NetError::ConnectionClosed
        }
        tungstenite::Error::Io(e) => NetError::Io(e.to_string()),
        tungstenite::Error::Http(_) | tungstenite::Error::HttpFormat(_) => NetError::InvalidResponse,
        tungstenite::Error::Url(_) => NetError::invalid_url(),
        other => {
            tracing::debug!("ws protocol error: {}", other);
            NetError::WsProtocolError
        }
    }
}
