//! Sockets, proxies and TLS.
//!
//! - [`connectjob`]: DNS, TCP, proxy tunnel and TLS for one connection
//! - [`proxy`]: proxy selection plus `CONNECT` and SOCKS5 handshakes
//! - [`matcher`]: `no_proxy` / bypass list matching
//! - [`tls`]: BoringSSL client options
//! - [`certs`]: CA bundles and per-domain client certificates

pub mod certs;
pub mod connectjob;
pub mod matcher;
pub mod proxy;
pub mod stream;
pub mod tls;
