use super::body::RequestBody;
use super::collection::ProxyMode;
use super::headers::HeaderList;
use super::item::PathParam;
use crate::auth::AuthMode;
use crate::config::Preferences;
use crate::interpolate::{Scope, VariableScopes};
use crate::socket::certs::ClientCertificate;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Collection, folder and request variables carried into the scopes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiftedVars {
    pub collection: Vec<(String, String)>,
    pub folder: Vec<(String, String)>,
    pub request: Vec<(String, String)>,
}

impl LiftedVars {
    pub fn lift_into(&self, scopes: &mut VariableScopes) {
        let to_values = |vars: &[(String, String)]| {
            vars.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect::<Vec<_>>()
        };
        scopes.extend_scope(Scope::Collection, to_values(&self.collection));
        scopes.extend_scope(Scope::Folder, to_values(&self.folder));
        scopes.extend_scope(Scope::Request, to_values(&self.request));
    }
}

/// A request after collection settings are merged in. The engine mutates
/// this copy freely; the caller's [`RequestItem`](super::item::RequestItem)
/// is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub uid: String,
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub params: Vec<PathParam>,
    pub body: RequestBody,
    pub auth: AuthMode,
    pub vars: LiftedVars,
    pub max_redirects: Option<usize>,
    pub timeout: Option<Duration>,
    pub proxy: ProxyMode,
    pub client_certificates: Vec<ClientCertificate>,
    pub collection_uid: String,
    pub collection_path: PathBuf,
}

impl PreparedRequest {
    /// Standalone request with no collection around it.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uid: String::new(),
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: HeaderList::new(),
            params: Vec::new(),
            body: RequestBody::None,
            auth: AuthMode::None,
            vars: LiftedVars::default(),
            max_redirects: None,
            timeout: None,
            proxy: ProxyMode::Off,
            client_certificates: Vec::new(),
            collection_uid: String::new(),
            collection_path: PathBuf::from("."),
        }
    }

    /// The single redirect cap: the request's own limit, else the preference.
    pub fn redirect_limit(&self, prefs: &Preferences) -> usize {
        self.max_redirects.unwrap_or(prefs.request.max_redirects)
    }

    pub fn connect_timeout(&self, prefs: &Preferences) -> Option<Duration> {
        self.timeout.or_else(|| prefs.request.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_limit_prefers_request() {
        let mut prefs = Preferences::default();
        prefs.request.max_redirects = 9;
        let mut req = PreparedRequest::new("get", "http://x");
        assert_eq!(req.redirect_limit(&prefs), 9);
        req.max_redirects = Some(0);
        assert_eq!(req.redirect_limit(&prefs), 0);
        assert_eq!(req.method, "GET");
    }

    #[test]
    fn test_lift_into_scopes() {
        let vars = LiftedVars {
            collection: vec![("a".into(), "c".into())],
            folder: vec![],
            request: vec![("a".into(), "r".into())],
        };
        let mut scopes = VariableScopes::new();
        vars.lift_into(&mut scopes);
        assert_eq!(crate::interpolate::interpolate("{{a}}", &scopes), "r");
    }
}
