//! Request bodies and their materialisation to bytes.

use super::item::KeyValue;
use crate::base::neterror::NetError;
use crate::http::multipart::{Form, Part};
use bytes::Bytes;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// The body of a stored request, one variant per editor mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    None,
    Json(String),
    Text(String),
    Xml(String),
    Sparql(String),
    GraphQl {
        query: String,
        /// JSON text, parsed only after interpolation.
        variables: String,
    },
    FormUrlEncoded(Vec<KeyValue>),
    Multipart(Vec<MultipartField>),
    Ws(Vec<WsMessageSpec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
    pub content_type: Option<String>,
    pub enabled: bool,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Text(value.into()),
            content_type: None,
            enabled: true,
        }
    }

    pub fn files(name: impl Into<String>, paths: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Files(paths),
            content_type: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultipartValue {
    Text(String),
    /// Paths relative to the collection directory unless absolute.
    Files(Vec<String>),
}

/// A message queued on a WebSocket request.
#[derive(Debug, Clone, PartialEq)]
pub struct WsMessageSpec {
    pub name: String,
    pub content: String,
    pub enabled: bool,
}

/// Bytes ready for the wire. Cheap to clone for 307/308 resends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializedBody {
    pub bytes: Bytes,
    /// Content type the body dictates regardless of user headers (multipart).
    pub forced_content_type: Option<String>,
}

impl RequestBody {
    pub fn is_none(&self) -> bool {
        matches!(self, RequestBody::None)
    }

    /// Content type applied when the user set none.
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            RequestBody::Json(_) | RequestBody::GraphQl { .. } => Some("application/json"),
            RequestBody::Text(_) => Some("text/plain"),
            RequestBody::Xml(_) => Some("text/xml"),
            RequestBody::Sparql(_) => Some("application/sparql-query"),
            RequestBody::FormUrlEncoded(_) => Some("application/x-www-form-urlencoded"),
            RequestBody::None | RequestBody::Multipart(_) | RequestBody::Ws(_) => None,
        }
    }

    /// Render the body to bytes. File parts are read from disk, resolved
    /// against `collection_path`.
    pub async fn materialize(&self, collection_path: &Path) -> Result<MaterializedBody, NetError> {
        let bytes = match self {
            RequestBody::None | RequestBody::Ws(_) => Bytes::new(),
            RequestBody::Json(s)
            | RequestBody::Text(s)
            | RequestBody::Xml(s)
            | RequestBody::Sparql(s) => Bytes::from(s.clone()),
            RequestBody::GraphQl { query, variables } => {
                let variables: Value = if variables.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(variables).map_err(|_| NetError::JsonParseError)?
                };
                let payload = json!({ "query": query, "variables": variables });
                Bytes::from(payload.to_string())
            }
            RequestBody::FormUrlEncoded(fields) => {
                let pairs: Vec<(&str, &str)> = fields
                    .iter()
                    .filter(|f| f.enabled)
                    .map(|f| (f.name.as_str(), f.value.as_str()))
                    .collect();
                let encoded =
                    serde_urlencoded::to_string(pairs).map_err(|_| NetError::HttpBodyError)?;
                Bytes::from(encoded)
            }
            RequestBody::Multipart(fields) => {
                let form = build_form(fields, collection_path).await?;
                let content_type = form.content_type();
                return Ok(MaterializedBody {
                    bytes: form.into_body(),
                    forced_content_type: Some(content_type),
                });
            }
        };
        Ok(MaterializedBody {
            bytes,
            forced_content_type: None,
        })
    }
}

async fn build_form(fields: &[MultipartField], collection_path: &Path) -> Result<Form, NetError> {
    let mut form = Form::new();
    for field in fields.iter().filter(|f| f.enabled) {
        match &field.value {
            MultipartValue::Text(value) => {
                let mut part = Part::text(value.clone());
                if let Some(ct) = &field.content_type {
                    part = part.content_type(ct.clone());
                }
                form = form.part(field.name.clone(), part);
            }
            MultipartValue::Files(paths) => {
                for raw in paths {
                    let path = resolve_file_path(raw, collection_path);
                    let data = tokio::fs::read(&path)
                        .await
                        .map_err(|e| NetError::BodyFile(format!("{}: {}", path.display(), e)))?;
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let mut part = Part::bytes(data).file_name(file_name);
                    if let Some(ct) = &field.content_type {
                        part = part.content_type(ct.clone());
                    }
                    form = form.part(field.name.clone(), part);
                }
            }
        }
    }
    Ok(form)
}

fn resolve_file_path(raw: &str, collection_path: &Path) -> PathBuf {
    let trimmed = Path::new(raw.trim());
    if trimmed.is_absolute() {
        trimmed.to_path_buf()
    } else {
        collection_path.join(trimmed)
    }
}
