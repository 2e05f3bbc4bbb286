//! Stored request descriptions as handed over by the host.

use super::body::RequestBody;
use crate::auth::AuthMode;
use std::time::Duration;

/// A name/value row that can be switched off in the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub name: String,
    pub value: String,
    pub enabled: bool,
}

impl KeyValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A `:name` path parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    pub name: String,
    pub value: String,
}

impl PathParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestItem {
    pub uid: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<KeyValue>,
    pub params: Vec<PathParam>,
    pub body: RequestBody,
    pub auth: AuthMode,
    /// Request-scoped variables.
    pub vars: Vec<KeyValue>,
    /// Overrides the preference cap when set.
    pub max_redirects: Option<usize>,
    pub timeout: Option<Duration>,
}

impl RequestItem {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uid: String::new(),
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            params: Vec::new(),
            body: RequestBody::None,
            auth: AuthMode::None,
            vars: Vec::new(),
            max_redirects: None,
            timeout: None,
        }
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(KeyValue::new(name, value));
        self
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(PathParam::new(name, value));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push(KeyValue::new(name, value));
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }
}
