//! `multipart/form-data` bodies (RFC 7578).
//!
//! Text parts carry no part-level content type unless the field sets one;
//! file parts get one guessed from the file extension.

use crate::auth::crypto::random_bytes;
use bytes::{BufMut, Bytes, BytesMut};

/// Dashes before the random digits, as browsers and form-data encoders emit.
const BOUNDARY_PREFIX: &str = "--------------------------";

#[derive(Debug)]
pub struct Form {
    boundary: String,
    parts: Vec<(String, Part)>,
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Form {
    pub fn new() -> Self {
        Self {
            boundary: generate_boundary(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn part(mut self, name: impl Into<String>, part: Part) -> Self {
        self.parts.push((name.into(), part));
        self
    }

    /// The request `Content-Type`, boundary included.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn into_body(self) -> Bytes {
        let mut out = BytesMut::new();
        for (name, part) in &self.parts {
            out.put_slice(b"--");
            out.put_slice(self.boundary.as_bytes());
            out.put_slice(b"\r\n");
            out.put_slice(part.head(name).as_bytes());
            out.put_slice(b"\r\n\r\n");
            out.put_slice(&part.data);
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"--");
        out.put_slice(self.boundary.as_bytes());
        out.put_slice(b"--\r\n");
        out.freeze()
    }
}

#[derive(Debug, Clone)]
pub struct Part {
    data: Bytes,
    content_type: Option<String>,
    file_name: Option<String>,
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(value.into()),
            content_type: None,
            file_name: None,
        }
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            file_name: None,
        }
    }

    pub fn content_type(mut self, mime: impl Into<String>) -> Self {
        self.content_type = Some(mime.into());
        self
    }

    /// Also sets a content type from the extension unless one is set.
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.content_type.is_none() {
            self.content_type = Some(mime_for(&name).to_string());
        }
        self.file_name = Some(name);
        self
    }

    fn head(&self, name: &str) -> String {
        let mut head = format!("Content-Disposition: form-data; name=\"{}\"", quote(name));
        if let Some(file_name) = &self.file_name {
            head.push_str(&format!("; filename=\"{}\"", quote(file_name)));
        }
        if let Some(mime) = &self.content_type {
            head.push_str("\r\nContent-Type: ");
            head.push_str(mime);
        }
        head
    }
}

/// Percent-encode the three characters that would break a quoted string.
fn quote(s: &str) -> String {
    s.replace('"', "%22").replace('\r', "%0D").replace('\n', "%0A")
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

fn generate_boundary() -> String {
    let digits: String = match random_bytes(24) {
        Ok(bytes) => bytes.iter().map(|b| char::from(b'0' + b % 10)).collect(),
        Err(_) => format!("{:024}", std::process::id()),
    };
    format!("{}{}", BOUNDARY_PREFIX, digits)
}
