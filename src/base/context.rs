//! Error context helpers.
//!
//! Extension traits that turn bare `io::Error`s into `NetError` variants
//! carrying the host, domain or file involved.

use crate::base::neterror::NetError;
use std::io;
use std::path::Path;

pub trait IoResultExt<T> {
    /// Attach the target of a TCP connect.
    ///
    /// ```ignore
    /// use probenet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    fn dns_context(self, domain: &str) -> Result<T, NetError>;

    /// Failures writing the response body artifact.
    fn artifact_context(self, path: &Path) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }

    fn artifact_context(self, path: &Path) -> Result<T, NetError> {
        self.map_err(|e| NetError::ArtifactWrite(format!("{}: {}", path.display(), e)))
    }
}
