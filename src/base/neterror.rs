use thiserror::Error;

/// Coarse classification of a [`NetError`], used by the request runner to
/// decide whether a failure is recorded on the timeline and whether the last
/// response travels with the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket, DNS, TLS or protocol failure. Logged as a timeline error.
    Transport,
    /// Redirect/URL/proxy policy violation. Carries the last response.
    Policy,
    /// Token fetch or challenge failure. Aborts before the target request.
    Credential,
    /// Caller-initiated cancellation. Never logged as a timeline error.
    Cancellation,
    /// Local resource failures: artifacts, secret store, websocket queue.
    Resource,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {reason}")]
    NameNotResolvedFor { domain: String, reason: String },
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("SSL certificate error: {0}")]
    SslCertificateError(String),
    #[error("Bad SSL client auth cert: {0}")]
    BadSslClientAuthCert(String),
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("SOCKS connection failed")]
    SocksConnectionFailed,
    #[error("I/O error: {0}")]
    Io(String),

    // Policy Errors
    #[error("{0}")]
    InvalidUrl(String),
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect location")]
    InvalidRedirect,
    #[error("Maximum redirects ({0}) exceeded")]
    TooManyRedirects(usize),
    #[error("{0}")]
    ProxyConfiguration(String),
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    // Credential Errors
    #[error("OAuth2 token request failed: {0}")]
    OAuth2(String),
    #[error("Invalid auth challenge")]
    InvalidAuthChallenge,
    #[error("Missing auth credentials")]
    MissingAuthCredentials,

    // Cancellation
    #[error("Request cancelled")]
    Cancelled,

    // Body / data
    #[error("HTTP body error")]
    HttpBodyError,
    #[error("Invalid UTF-8 in body")]
    InvalidUtf8,
    #[error("JSON parse error")]
    JsonParseError,
    #[error("Failed to write response artifact: {0}")]
    ArtifactWrite(String),
    #[error("Failed to read request body file: {0}")]
    BodyFile(String),

    // WebSocket
    #[error("WebSocket protocol error")]
    WsProtocolError,
    #[error("WebSocket outbound queue is full")]
    WsQueueFull,
    #[error("WebSocket connection is not open")]
    WsNotOpen,

    // Storage
    #[error("Secret store error: {0}")]
    SecretStore(String),
    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),
    #[error("Cookie not found: {0}")]
    CookieNotFound(String),
}

impl NetError {
    /// Negative numeric code, stable across releases.
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionFailed => -104,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::TunnelConnectionFailed => -111,
            NetError::BadSslClientAuthCert(_) => -117,
            NetError::ConnectionTimedOut => -118,
            NetError::SocksConnectionFailed => -120,
            NetError::WsProtocolError => -145,
            NetError::WsQueueFull => -154,
            NetError::Io(_) => -15,
            NetError::Cancelled => -3,

            NetError::SslCertificateError(_) => -200,

            NetError::InvalidUrl(_) => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects(_) => -310,
            NetError::InvalidResponse => -320,
            NetError::InvalidAuthChallenge => -338,
            NetError::MissingAuthCredentials => -341,
            NetError::ProxyConfiguration(_) => -336,

            NetError::OAuth2(_) => -10001,
            NetError::HttpBodyError => -10002,
            NetError::InvalidUtf8 => -10003,
            NetError::JsonParseError => -10004,
            NetError::ArtifactWrite(_) => -10005,
            NetError::BodyFile(_) => -10006,
            NetError::WsNotOpen => -10007,
            NetError::SecretStore(_) => -10008,
            NetError::InvalidHeader(_) => -10009,
            NetError::InvalidCookie(_) => -10010,
            NetError::CookieNotFound(_) => -10011,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::InvalidUrl(_)
            | NetError::UnknownUrlScheme
            | NetError::InvalidRedirect
            | NetError::TooManyRedirects(_)
            | NetError::ProxyConfiguration(_)
            | NetError::InvalidHeader(_) => ErrorKind::Policy,
            NetError::OAuth2(_)
            | NetError::InvalidAuthChallenge
            | NetError::MissingAuthCredentials => ErrorKind::Credential,
            NetError::Cancelled => ErrorKind::Cancellation,
            NetError::ArtifactWrite(_)
            | NetError::BodyFile(_)
            | NetError::WsQueueFull
            | NetError::WsNotOpen
            | NetError::SecretStore(_)
            | NetError::InvalidCookie(_)
            | NetError::CookieNotFound(_) => ErrorKind::Resource,
            _ => ErrorKind::Transport,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetError::Cancelled)
    }

    pub fn connection_failed_to(host: &str, port: u16, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::ConnectionRefused {
            return NetError::ConnectionRefused;
        }
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        }
    }

    pub fn dns_failed(domain: &str, e: std::io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            reason: e.to_string(),
        }
    }

    pub(crate) fn invalid_url() -> Self {
        NetError::InvalidUrl("Invalid URL format".to_string())
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            std::io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            _ => NetError::Io(e.to_string()),
        }
    }
}
