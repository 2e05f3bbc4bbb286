//! Raw TCP mock servers shared by the integration tests.
#![allow(dead_code)]

use probenet::config::{EngineConfig, Preferences};
use probenet::http::RequestRunner;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    /// Request line plus headers, lower-cased.
    pub head: String,
    pub body: Vec<u8>,
}

impl Seen {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_lowercase());
        self.head
            .lines()
            .find(|l| l.starts_with(&prefix))
            .map(|l| l[prefix.len()..].trim().to_string())
    }
}

pub type Log = Arc<Mutex<Vec<Seen>>>;

/// Read one request, honouring `Content-Length`. `None` on EOF.
pub async fn read_request(socket: &mut TcpStream) -> Option<Seen> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(Seen { head, body })
}

/// Serve HTTP/1.1 on an ephemeral port. `respond` builds the full raw
/// response for each request; connections stay open unless it contains
/// `Connection: close`.
pub async fn serve<F>(respond: F) -> (SocketAddr, Log)
where
    F: Fn(&Seen, usize) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);
    let server_log = log.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let respond = respond.clone();
            let log = server_log.clone();
            tokio::spawn(async move {
                while let Some(seen) = read_request(&mut socket).await {
                    let index = {
                        let mut log = log.lock().unwrap();
                        log.push(seen.clone());
                        log.len() - 1
                    };
                    let response = respond(&seen, index);
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                    if response.to_lowercase().contains("connection: close") {
                        break;
                    }
                }
            });
        }
    });
    (addr, log)
}

pub fn ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

pub fn redirect(status: u16, location: &str) -> String {
    format!(
        "HTTP/1.1 {} Redirect\r\nLocation: {}\r\nContent-Length: 0\r\n\r\n",
        status, location
    )
}

pub fn seen(log: &Log) -> Vec<Seen> {
    log.lock().unwrap().clone()
}

/// Runner writing artifacts under `dir`.
pub fn runner(dir: &std::path::Path, prefs: Preferences) -> RequestRunner {
    RequestRunner::with_defaults(prefs, EngineConfig::default().artifact_dir(dir))
}
