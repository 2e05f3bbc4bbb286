//! Collection-level settings and their merge into a request.

use super::headers::HeaderList;
use super::item::{KeyValue, RequestItem};
use super::prepared::{LiftedVars, PreparedRequest};
use crate::auth::AuthMode;
use crate::config::{Preferences, ProxyConfig, ProxyPreferenceMode};
use crate::socket::certs::ClientCertificate;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionSettings {
    pub uid: String,
    /// Directory the collection lives in; relative file paths resolve here.
    pub path: PathBuf,
    pub headers: Vec<KeyValue>,
    pub auth: AuthMode,
    pub vars: Vec<KeyValue>,
    pub proxy: CollectionProxy,
    pub client_certificates: Vec<ClientCertificate>,
}

/// Folder between the collection root and the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderSettings {
    pub headers: Vec<KeyValue>,
    pub vars: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionProxy {
    pub disabled: bool,
    /// Defer to the preferences' proxy mode.
    pub inherit: bool,
    pub config: ProxyConfig,
}

impl Default for CollectionProxy {
    fn default() -> Self {
        Self {
            disabled: false,
            inherit: true,
            config: ProxyConfig::default(),
        }
    }
}

/// How the request reaches the network.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ProxyMode {
    #[default]
    Off,
    On(ProxyConfig),
    /// Use `HTTP(S)_PROXY` / `NO_PROXY` from the environment.
    System,
}

impl ProxyMode {
    pub fn resolve(collection: &CollectionProxy, prefs: &Preferences) -> Self {
        if collection.disabled {
            return ProxyMode::Off;
        }
        if !collection.inherit {
            return ProxyMode::On(collection.config.clone());
        }
        match prefs.proxy.mode {
            ProxyPreferenceMode::Off => ProxyMode::Off,
            ProxyPreferenceMode::On => ProxyMode::On(prefs.proxy.config.clone()),
            ProxyPreferenceMode::System => ProxyMode::System,
        }
    }
}

/// Build the request the engine will actually run.
///
/// Headers apply collection, then each folder root-first, then the request;
/// disabled or unnamed rows are skipped and a later name replaces an earlier
/// one regardless of case. `Inherit` auth takes the collection's auth.
pub fn merge_collection_settings(
    collection: &CollectionSettings,
    item: &RequestItem,
    folders: &[FolderSettings],
    prefs: &Preferences,
) -> PreparedRequest {
    let mut headers = HeaderList::new();
    let rows = collection
        .headers
        .iter()
        .chain(folders.iter().flat_map(|f| f.headers.iter()))
        .chain(item.headers.iter());
    for h in rows.filter(|h| h.enabled && !h.name.is_empty()) {
        headers.set(h.name.clone(), h.value.clone());
    }

    let auth = match item.auth {
        AuthMode::Inherit => collection.auth.clone(),
        ref other => other.clone(),
    };

    let enabled = |vars: &[KeyValue]| -> Vec<(String, String)> {
        vars.iter()
            .filter(|v| v.enabled && !v.name.is_empty())
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    };

    PreparedRequest {
        uid: item.uid.clone(),
        method: item.method.to_uppercase(),
        url: item.url.trim().to_string(),
        headers,
        params: item.params.clone(),
        body: item.body.clone(),
        auth,
        vars: LiftedVars {
            collection: enabled(&collection.vars),
            folder: folders.iter().flat_map(|f| enabled(&f.vars)).collect(),
            request: enabled(&item.vars),
        },
        max_redirects: item.max_redirects,
        timeout: item.timeout,
        proxy: ProxyMode::resolve(&collection.proxy, prefs),
        client_certificates: collection.client_certificates.clone(),
        collection_uid: collection.uid.clone(),
        collection_path: collection.path.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::basic::BasicAuth;
    use crate::auth::bearer::BearerAuth;

    fn collection() -> CollectionSettings {
        CollectionSettings {
            uid: "c1".into(),
            headers: vec![
                KeyValue::new("X-Collection", "c"),
                KeyValue::new("X-Shared", "collection"),
                KeyValue::new("X-Off", "off").disabled(),
            ],
            auth: AuthMode::Bearer(BearerAuth {
                token: "root-token".into(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_precedence() {
        let folders = vec![FolderSettings {
            headers: vec![KeyValue::new("x-shared", "folder")],
            vars: vec![],
        }];
        let item = RequestItem::new("get", "http://x").header("X-SHARED", "request");
        let prepared =
            merge_collection_settings(&collection(), &item, &folders, &Preferences::default());

        assert_eq!(prepared.headers.get("x-shared"), Some("request"));
        assert_eq!(prepared.headers.get("X-Collection"), Some("c"));
        assert!(!prepared.headers.contains("X-Off"));
        assert_eq!(prepared.method, "GET");
    }

    #[test]
    fn test_inherit_auth_only_when_inherit() {
        let prefs = Preferences::default();
        let inherit = RequestItem::new("GET", "http://x").auth(AuthMode::Inherit);
        let prepared = merge_collection_settings(&collection(), &inherit, &[], &prefs);
        assert!(matches!(prepared.auth, AuthMode::Bearer(ref b) if b.token == "root-token"));

        let own = RequestItem::new("GET", "http://x").auth(AuthMode::Basic(BasicAuth {
            username: "u".into(),
            password: "p".into(),
        }));
        let prepared = merge_collection_settings(&collection(), &own, &[], &prefs);
        assert!(matches!(prepared.auth, AuthMode::Basic(_)));

        let none = RequestItem::new("GET", "http://x");
        let prepared = merge_collection_settings(&collection(), &none, &[], &prefs);
        assert_eq!(prepared.auth, AuthMode::None);
    }

    #[test]
    fn test_proxy_resolution() {
        let mut prefs = Preferences::default();
        prefs.proxy.mode = ProxyPreferenceMode::System;

        let mut proxy = CollectionProxy::default();
        assert_eq!(ProxyMode::resolve(&proxy, &prefs), ProxyMode::System);

        proxy.inherit = false;
        proxy.config.hostname = "corp-proxy".into();
        assert!(matches!(ProxyMode::resolve(&proxy, &prefs), ProxyMode::On(c) if c.hostname == "corp-proxy"));

        proxy.disabled = true;
        assert_eq!(ProxyMode::resolve(&proxy, &prefs), ProxyMode::Off);
    }

    #[test]
    fn test_vars_are_lifted() {
        let mut c = collection();
        c.vars = vec![KeyValue::new("base", "http://api")];
        let folders = vec![FolderSettings {
            headers: vec![],
            vars: vec![KeyValue::new("f", "1"), KeyValue::new("g", "2").disabled()],
        }];
        let item = RequestItem::new("GET", "{{base}}").var("r", "x");
        let prepared = merge_collection_settings(&c, &item, &folders, &Preferences::default());

        assert_eq!(prepared.vars.collection, vec![("base".into(), "http://api".into())]);
        assert_eq!(prepared.vars.folder, vec![("f".into(), "1".into())]);
        assert_eq!(prepared.vars.request, vec![("r".into(), "x".into())]);
    }
}
