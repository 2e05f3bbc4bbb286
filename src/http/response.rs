//! The final response of a request, its body spooled to an artifact file.

use crate::auth::crypto::random_hex;
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    /// Milliseconds from the first send to the last byte of this response.
    response_time: u64,
    body_path: PathBuf,
    size: u64,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        response_time: u64,
        body_path: PathBuf,
        size: u64,
    ) -> Self {
        Self {
            status,
            headers,
            response_time,
            body_path,
            size,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn response_time(&self) -> u64 {
        self.response_time
    }

    pub fn body_path(&self) -> &Path {
        &self.body_path
    }

    /// Body size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn bytes(&self) -> Result<Bytes, NetError> {
        tokio::fs::read(&self.body_path)
            .await
            .map(Bytes::from)
            .artifact_context(&self.body_path)
    }

    pub async fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.bytes().await?.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    pub async fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.bytes().await?).map_err(|_| NetError::JsonParseError)
    }
}

/// The file one request's body is spooled into.
///
/// Bodies are written to a temporary file and renamed into place, so the
/// artifact of a given request uid is replaced on every run. An artifact
/// dropped before [`Artifact::commit`] removes its temporary file.
pub(crate) struct Artifact {
    path: PathBuf,
    temp: PathBuf,
    file: File,
    committed: bool,
}

impl Artifact {
    pub(crate) async fn create(dir: &Path, uid: &str) -> Result<Self, NetError> {
        tokio::fs::create_dir_all(dir).await.artifact_context(dir)?;
        let stem = if uid.is_empty() {
            format!("response-{}", random_hex(8)?)
        } else {
            sanitize(uid)
        };
        let path = dir.join(format!("{}.bin", stem));
        let temp = dir.join(format!("{}.{}.part", stem, random_hex(4)?));
        let file = File::create(&temp).await.artifact_context(&temp)?;
        Ok(Self {
            path,
            temp,
            file,
            committed: false,
        })
    }

    pub(crate) fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Move the finished body to its final path.
    pub(crate) async fn commit(mut self) -> Result<PathBuf, NetError> {
        self.file.flush().await.artifact_context(&self.temp)?;
        tokio::fs::rename(&self.temp, &self.path)
            .await
            .artifact_context(&self.path)?;
        self.committed = true;
        Ok(self.path.clone())
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(dir: &Path, uid: &str, body: &[u8]) -> PathBuf {
        let mut artifact = Artifact::create(dir, uid).await.unwrap();
        artifact.file().write_all(body).await.unwrap();
        artifact.commit().await.unwrap()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_artifact_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "req/1", br#"{"ok":true}"#).await;
        assert_eq!(path, dir.path().join("req_1.bin"));

        let resp = Response::new(StatusCode::OK, HeaderMap::new(), 12, path, 11);
        assert_eq!(resp.status_text(), "OK");
        assert_eq!(resp.text().await.unwrap(), r#"{"ok":true}"#);
        let value: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_rerun_replaces_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "req-1", b"first").await;
        let path = write(dir.path(), "req-1", b"second").await;
        assert_eq!(files_in(dir.path()), vec!["req-1.bin"]);
        assert_eq!(std::fs::read(path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_uncommitted_artifact_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = Artifact::create(dir.path(), "req-2").await.unwrap();
        artifact.file().write_all(b"partial").await.unwrap();
        drop(artifact);
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let resp = Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            0,
            PathBuf::from("/nonexistent/probenet/body.bin"),
            0,
        );
        assert!(matches!(resp.bytes().await, Err(NetError::ArtifactWrite(_))));
    }
}
