//! One connection attempt: DNS, TCP, proxy tunnel, then TLS.
//!
//! Every step reports to the request's timeline the way `curl -v` does.

use super::proxy::{http_connect, socks5_connect, ProxySettings, ProxyType};
use super::stream::BoxedSocket;
use super::tls::{TlsClient, TlsOptions};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::base::timeline::Timeline;
use boring::ssl::SslRef;
use boring::x509::X509NameRef;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

/// A connected stream, ready for HTTP/1.1 or a WebSocket handshake.
#[derive(Debug)]
pub struct Connected {
    pub socket: BoxedSocket,
    /// Requests go to an HTTP proxy in absolute form instead of a tunnel.
    pub forward_proxy: bool,
}

pub struct ConnectJob<'a> {
    tls: &'a TlsClient,
    proxy: Option<&'a ProxySettings>,
    timeline: Option<&'a Timeline>,
    timeout: Option<Duration>,
    always_tunnel: bool,
}

impl<'a> ConnectJob<'a> {
    pub fn new(tls: &'a TlsClient) -> Self {
        Self {
            tls,
            proxy: None,
            timeline: None,
            timeout: None,
            always_tunnel: false,
        }
    }

    pub fn proxy(mut self, proxy: Option<&'a ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn timeline(mut self, timeline: Option<&'a Timeline>) -> Self {
        self.timeline = timeline;
        self
    }

    /// Bounds DNS, TCP, tunnel and TLS together.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tunnel plain-text targets through HTTP proxies too (WebSocket upgrades).
    pub fn always_tunnel(mut self, yes: bool) -> Self {
        self.always_tunnel = yes;
        self
    }

    pub async fn connect(&self, url: &Url) -> Result<Connected, NetError> {
        let Some(limit) = self.timeout else {
            return self.run(url).await;
        };
        match tokio::time::timeout(limit, self.run(url)).await {
            Ok(result) => result,
            Err(_) => {
                self.error(format!(
                    "Connection timed out after {} ms",
                    limit.as_millis()
                ));
                Err(NetError::ConnectionTimedOut)
            }
        }
    }

    async fn run(&self, url: &Url) -> Result<Connected, NetError> {
        let host = url.host_str().ok_or_else(NetError::invalid_url)?;
        let port = url
            .port_or_known_default()
            .ok_or(NetError::UnknownUrlScheme)?;
        let secure = matches!(url.scheme(), "https" | "wss");

        let (dial_host, dial_port) = match self.proxy {
            Some(p) => p.host_port().ok_or_else(|| {
                NetError::ProxyConfiguration(format!("Invalid proxy URI: {}", p.display_uri()))
            })?,
            None => (host, port),
        };

        let tcp = self.dial(dial_host, dial_port).await?;
        let mut socket = BoxedSocket::new(tcp);
        let mut forward_proxy = false;

        if let Some(proxy) = self.proxy {
            match proxy.proxy_type() {
                ProxyType::Socks5 => socks5_connect(&mut socket, proxy, host, port).await?,
                kind => {
                    if kind == ProxyType::Https {
                        socket = self.handshake(socket, dial_host, false).await?;
                    }
                    if secure || self.always_tunnel {
                        http_connect(&mut socket, proxy, host, port).await?;
                    } else {
                        forward_proxy = true;
                    }
                }
            }
        }

        if secure {
            socket = self.handshake(socket, host, true).await?;
        }

        Ok(Connected {
            socket,
            forward_proxy,
        })
    }

    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, NetError> {
        self.info(format!("Trying {}:{}...", host, port));
        let bare = host.trim_start_matches('[').trim_end_matches(']');

        let addrs: Vec<_> = match tokio::net::lookup_host((bare, port)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                self.error(format!("DNS lookup error for {}: {}", host, e));
                return Err(e).dns_context(host);
            }
        };
        let Some(first) = addrs.first() else {
            self.error(format!("DNS lookup error for {}: no addresses", host));
            return Err(NetError::NameNotResolvedFor {
                domain: host.to_string(),
                reason: "no addresses".to_string(),
            });
        };
        self.info(format!("DNS lookup: {} -> {}", host, first.ip()));

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    self.info(format!(
                        "Connected to {} ({}) port {}",
                        host,
                        addr.ip(),
                        addr.port()
                    ));
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::trace!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"));
        self.error(format!("Error creating connection: {}", err));
        Err(err).connection_context(host, port)
    }

    /// TLS over `socket`. `origin` is false for the hop to an HTTPS proxy,
    /// which is not reported on the timeline.
    async fn handshake(
        &self,
        socket: BoxedSocket,
        host: &str,
        origin: bool,
    ) -> Result<BoxedSocket, NetError> {
        let tls = self.tls;
        let domain = host.trim_start_matches('[').trim_end_matches(']');

        if origin {
            self.tls_entry(format!("ALPN: offers {}", tls.alpn_protocols.join(", ")));
            let c = tls.ca_counts;
            self.tls_entry(format!(
                "CA Certificates: {} root, {} system, {} extra, {} custom",
                c.root, c.system, c.extra, c.custom
            ));
        }

        let mut config = tls
            .connector
            .configure()
            .map_err(|_| NetError::SslProtocolError)?;
        config.set_verify_hostname(tls.reject_unauthorized);
        config.set_use_server_name_indication(TlsOptions::should_set_sni(domain));

        match tokio_boring::connect(config, domain, socket).await {
            Ok(stream) => {
                if origin {
                    self.report_session(stream.ssl());
                }
                Ok(BoxedSocket::secure(stream))
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("CERTIFICATE_VERIFY_FAILED")
                    || message.contains("certificate verify failed")
                {
                    self.error(format!("SSL certificate problem: {}", message));
                    Err(NetError::SslCertificateError(message))
                } else {
                    self.error(format!("SSL handshake failed: {}", message));
                    Err(NetError::SslProtocolError)
                }
            }
        }
    }

    fn report_session(&self, ssl: &SslRef) {
        let cipher = ssl.current_cipher().map(|c| c.name()).unwrap_or("unknown");
        self.tls_entry(format!(
            "SSL connection using {} / {}",
            ssl.version_str(),
            cipher
        ));
        if let Some(alpn) = ssl.selected_alpn_protocol() {
            self.tls_entry(format!(
                "ALPN: server accepted {}",
                String::from_utf8_lossy(alpn)
            ));
        }
        if let Some(cert) = ssl.peer_certificate() {
            self.tls_entry("Server certificate:");
            self.tls_entry(format!(" subject: {}", name_line(cert.subject_name())));
            self.tls_entry(format!(" start date: {}", cert.not_before()));
            self.tls_entry(format!(" expire date: {}", cert.not_after()));
            self.tls_entry(format!(" issuer: {}", name_line(cert.issuer_name())));
        }
        if self.tls.reject_unauthorized {
            self.tls_entry("SSL certificate verify ok.");
        } else {
            self.tls_entry("SSL certificate verification skipped (rejectUnauthorized: false).");
        }
    }

    fn info(&self, message: String) {
        if let Some(tl) = self.timeline {
            tl.info(message);
        }
    }

    fn tls_entry(&self, message: impl Into<String>) {
        if let Some(tl) = self.timeline {
            tl.tls(message);
        }
    }

    fn error(&self, message: String) {
        if let Some(tl) = self.timeline {
            tl.error(message);
        }
    }
}

fn name_line(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
