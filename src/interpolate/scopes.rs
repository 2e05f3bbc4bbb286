//! Layered variable scopes.
//!
//! Lookup order, highest first: prompt, runtime, oauth2 credentials,
//! request, folder, environment, collection, global. The process
//! environment is always reachable as `process.env.NAME`.

use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Collection,
    Environment,
    Folder,
    Request,
    OAuth2Credentials,
    Runtime,
    Prompt,
}

impl Scope {
    /// Lowest precedence first; later scopes overwrite earlier ones.
    pub const ASCENDING: [Scope; 8] = [
        Scope::Global,
        Scope::Collection,
        Scope::Environment,
        Scope::Folder,
        Scope::Request,
        Scope::OAuth2Credentials,
        Scope::Runtime,
        Scope::Prompt,
    ];
}

#[derive(Debug, Clone, Default)]
pub struct VariableScopes {
    layers: HashMap<Scope, Map<String, Value>>,
    process_env: Map<String, Value>,
}

impl VariableScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    pub fn with_process_env(mut self) -> Self {
        self.process_env = std::env::vars()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        self
    }

    pub fn set(&mut self, scope: Scope, name: impl Into<String>, value: impl Into<Value>) {
        self.layers
            .entry(scope)
            .or_default()
            .insert(name.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, scope: Scope, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(scope, name, value);
        self
    }

    /// Replace a whole scope.
    pub fn set_scope(&mut self, scope: Scope, vars: Map<String, Value>) {
        self.layers.insert(scope, vars);
    }

    /// Merge `vars` into a scope, keeping entries not named in `vars`.
    pub fn extend_scope(&mut self, scope: Scope, vars: impl IntoIterator<Item = (String, Value)>) {
        self.layers.entry(scope).or_default().extend(vars);
    }

    pub fn scope(&self, scope: Scope) -> Option<&Map<String, Value>> {
        self.layers.get(&scope)
    }

    pub fn set_process_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.process_env
            .insert(name.into(), Value::String(value.into()));
    }

    pub fn process_env(&self) -> &Map<String, Value> {
        &self.process_env
    }

    /// Flatten all scopes into one top-level map, higher precedence winning
    /// per top-level key, with `process.env` attached last.
    pub fn combined(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for scope in Scope::ASCENDING {
            if let Some(vars) = self.layers.get(&scope) {
                for (k, v) in vars {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        let mut process = Map::new();
        process.insert("env".to_string(), Value::Object(self.process_env.clone()));
        out.insert("process".to_string(), Value::Object(process));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_higher_scope_wins() {
        let scopes = VariableScopes::new()
            .with(Scope::Collection, "a", "collection")
            .with(Scope::Request, "a", "request")
            .with(Scope::Global, "a", "global");
        assert_eq!(scopes.combined()["a"], json!("request"));
    }

    #[test]
    fn test_prompt_beats_runtime() {
        let scopes = VariableScopes::new()
            .with(Scope::Runtime, "x", 1)
            .with(Scope::Prompt, "x", 2);
        assert_eq!(scopes.combined()["x"], json!(2));
    }

    #[test]
    fn test_process_env_is_nested() {
        let mut scopes = VariableScopes::new();
        scopes.set_process_env("TOKEN", "abc");
        let combined = scopes.combined();
        assert_eq!(combined["process"]["env"]["TOKEN"], json!("abc"));
    }

    #[test]
    fn test_extend_keeps_existing() {
        let mut scopes = VariableScopes::new().with(Scope::Folder, "a", 1);
        scopes.extend_scope(Scope::Folder, vec![("b".to_string(), json!(2))]);
        let folder = scopes.scope(Scope::Folder).unwrap();
        assert_eq!(folder.len(), 2);
    }
}
