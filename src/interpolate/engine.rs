//! Template expansion over a combined variable view.

use super::mock::replace_mock_vars;
use super::parser::parse_placeholders;
use super::scopes::{Scope, VariableScopes};
use serde_json::{Map, Value};

/// Resolved values are re-expanded at most this many levels deep.
pub const MAX_DEPTH: usize = 3;

/// Raised while expanding a value that refers back to a name being expanded.
#[derive(Debug)]
struct Cycle;

/// Expands templates against one snapshot of [`VariableScopes`].
///
/// Build it once per request and reuse it for every field; the combined
/// view is computed up front.
#[derive(Debug, Clone)]
pub struct Interpolator {
    vars: Map<String, Value>,
}

impl Interpolator {
    pub fn new(scopes: &VariableScopes) -> Self {
        Self {
            vars: scopes.combined(),
        }
    }

    pub fn from_map(vars: Map<String, Value>) -> Self {
        Self { vars }
    }

    /// Resolve `name` the way a placeholder would.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        lookup_in_object(&self.vars, name)
    }

    pub fn interpolate(&self, template: &str) -> String {
        self.render_top(template, false)
    }

    /// Like [`interpolate`](Self::interpolate), but every substituted value
    /// is escaped as the inside of a JSON string literal.
    pub fn interpolate_json(&self, template: &str) -> String {
        self.render_top(template, true)
    }

    fn render_top(&self, template: &str, json_escape: bool) -> String {
        replace_mock_vars(&self.render_vars(template, json_escape), json_escape)
    }

    fn render_vars(&self, template: &str, json_escape: bool) -> String {
        let mut stack = Vec::new();
        // Depth 0 never reports a cycle; it falls back to the raw value instead.
        self.expand(template, 0, &mut stack, json_escape)
            .unwrap_or_else(|_| template.to_string())
    }

    fn expand(
        &self,
        template: &str,
        depth: usize,
        stack: &mut Vec<String>,
        json_escape: bool,
    ) -> Result<String, Cycle> {
        let placeholders = parse_placeholders(template);
        if placeholders.is_empty() {
            return Ok(template.to_string());
        }

        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for p in placeholders {
            out.push_str(&template[last..p.span.start]);
            last = p.span.end;

            if stack.iter().any(|n| n == &p.name) {
                return Err(Cycle);
            }

            let Some(value) = self.lookup(&p.name) else {
                out.push_str(&template[p.span.clone()]);
                continue;
            };

            let raw = render_value(value);
            let mut resolved = raw.clone();
            if depth < MAX_DEPTH && raw.contains("{{") {
                stack.push(p.name.clone());
                let nested = self.expand(&raw, depth + 1, stack, false);
                stack.pop();
                match nested {
                    Ok(s) => resolved = s,
                    Err(_) if depth == 0 => {}
                    Err(e) => return Err(e),
                }
            }

            if json_escape && depth == 0 {
                out.push_str(&escape_json_string(&resolved));
            } else {
                out.push_str(&resolved);
            }
        }

        out.push_str(&template[last..]);
        Ok(out)
    }
}

/// Expand `template` against `scopes`.
pub fn interpolate(template: &str, scopes: &VariableScopes) -> String {
    Interpolator::new(scopes).interpolate(template)
}

/// Expand `template` against `scopes` in JSON-escape mode.
pub fn interpolate_json(template: &str, scopes: &VariableScopes) -> String {
    Interpolator::new(scopes).interpolate_json(template)
}

/// Expand `{{process.env.X}}` references inside environment values,
/// against the process environment only.
pub fn resolve_environment_values(scopes: &mut VariableScopes) {
    let Some(env) = scopes.scope(Scope::Environment).cloned() else {
        return;
    };
    let mut process_only = VariableScopes::new();
    for (k, v) in scopes.process_env() {
        if let Value::String(s) = v {
            process_only.set_process_env(k.clone(), s.clone());
        }
    }
    let interp = Interpolator::new(&process_only);

    let resolved = env
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, Value::String(interp.render_vars(&s, false))),
            other => (k, other),
        })
        .collect();
    scopes.set_scope(Scope::Environment, resolved);
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape `s` for use between the quotes of a JSON string.
pub fn escape_json_string(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Resolve a dotted / indexed path. At each level the shortest key that
/// prefixes the remaining path is descended into first, so a nested
/// `user: {name}` wins over a literal `"user.name"` key.
fn lookup_in_object<'v>(obj: &'v Map<String, Value>, rest: &str) -> Option<&'v Value> {
    let mut candidates: Vec<&String> = obj
        .keys()
        .filter(|k| {
            rest == k.as_str()
                || (rest.len() > k.len()
                    && rest.starts_with(k.as_str())
                    && matches!(rest.as_bytes()[k.len()], b'.' | b'['))
        })
        .collect();
    candidates.sort_by_key(|k| k.len());

    for key in candidates {
        let value = &obj[key.as_str()];
        if key.len() == rest.len() {
            return Some(value);
        }
        if let Some(found) = descend(value, &rest[key.len()..]) {
            return Some(found);
        }
    }
    None
}

fn descend<'v>(value: &'v Value, tail: &str) -> Option<&'v Value> {
    if let Some(after) = tail.strip_prefix('.') {
        return match value {
            Value::Object(o) => lookup_in_object(o, after),
            _ => None,
        };
    }
    let after = tail.strip_prefix('[')?;
    let close = after.find(']')?;
    let index: usize = after[..close].trim().parse().ok()?;
    let item = value.as_array()?.get(index)?;
    let remaining = &after[close + 1..];
    if remaining.is_empty() {
        Some(item)
    } else {
        descend(item, remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scopes(vars: Value) -> VariableScopes {
        let mut s = VariableScopes::new();
        if let Value::Object(map) = vars {
            s.set_scope(Scope::Runtime, map);
        }
        s
    }

    #[test]
    fn test_simple_and_missing() {
        let s = scopes(json!({"host": "example.com"}));
        assert_eq!(interpolate("http://{{host}}/{{nope}}", &s), "http://example.com/{{nope}}");
    }

    #[test]
    fn test_request_beats_collection() {
        let s = VariableScopes::new()
            .with(Scope::Collection, "a", "c")
            .with(Scope::Request, "a", "r")
            .with(Scope::Collection, "b", "cb");
        assert_eq!(interpolate("{{a}}-{{b}}", &s), "r-cb");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let s = scopes(json!({"n": 4, "t": true, "o": {"a": 1}, "z": null}));
        assert_eq!(interpolate("{{n}} {{t}} {{o}} {{z}}", &s), r#"4 true {"a":1} null"#);
    }

    #[test]
    fn test_dotted_and_indexed_paths() {
        let s = scopes(json!({
            "user": {
                "name": "Bruno",
                "fav-food": ["egg", "meat"],
                "want.attention": true,
                "deep": [{"id": 7}]
            }
        }));
        assert_eq!(interpolate("{{user.name}}", &s), "Bruno");
        assert_eq!(interpolate("{{user.fav-food[1]}}", &s), "meat");
        assert_eq!(interpolate("{{user.want.attention}}", &s), "true");
        assert_eq!(interpolate("{{user.deep[0].id}}", &s), "7");
        assert_eq!(interpolate("{{user.fav-food[9]}}", &s), "{{user.fav-food[9]}}");
    }

    #[test]
    fn test_nested_path_wins_over_literal_key() {
        let s = scopes(json!({"user.name": "literal", "user": {"name": "nested"}}));
        assert_eq!(interpolate("{{user.name}}", &s), "nested");

        let s = scopes(json!({"user.name": "literal"}));
        assert_eq!(interpolate("{{user.name}}", &s), "literal");
    }

    #[test]
    fn test_whitespace_is_significant() {
        let s = scopes(json!({"user": "x"}));
        assert_eq!(interpolate("{{ user }}", &s), "{{ user }}");
    }

    #[test]
    fn test_process_env() {
        let mut s = VariableScopes::new();
        s.set_process_env("SECRET", "s3cr3t");
        assert_eq!(interpolate("{{process.env.SECRET}}", &s), "s3cr3t");
    }

    #[test]
    fn test_nested_resolution() {
        let s = scopes(json!({
            "url": "{{scheme}}://{{host}}",
            "scheme": "https",
            "host": "{{sub}}.example.com",
            "sub": "api"
        }));
        assert_eq!(interpolate("{{url}}/v1", &s), "https://api.example.com/v1");
    }

    #[test]
    fn test_self_reference_keeps_raw_value() {
        let s = scopes(json!({"recursion": "{{recursion}}"}));
        assert_eq!(interpolate("{{recursion}}", &s), "{{recursion}}");
    }

    #[test]
    fn test_two_level_cycle_keeps_raw_value() {
        let s = scopes(json!({
            "recursion1": "{{recursion2}}",
            "recursion2": "{{recursion1}}"
        }));
        assert_eq!(interpolate("{{recursion1}}", &s), "{{recursion2}}");
    }

    #[test]
    fn test_depth_is_bounded() {
        let s = scopes(json!({
            "a": "{{b}}",
            "b": "{{c}}",
            "c": "{{d}}",
            "d": "{{e}}",
            "e": "end"
        }));
        assert_eq!(interpolate("{{a}}", &s), "{{e}}");
    }

    #[test]
    fn test_json_mode_escapes_values() {
        let s = scopes(json!({"obj": {"a": "b"}, "quote": "say \"hi\"\n"}));
        let out = interpolate_json(r#"{"x": "{{obj}}", "y": "{{quote}}"}"#, &s);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["x"], json!(r#"{"a":"b"}"#));
        assert_eq!(parsed["y"], json!("say \"hi\"\n"));
    }

    #[test]
    fn test_malformed_left_alone() {
        let s = scopes(json!({"a": "1"}));
        assert_eq!(interpolate("{{a", &s), "{{a");
        assert_eq!(interpolate("a}}", &s), "a}}");
    }

    #[test]
    fn test_mock_vars_after_variables() {
        let s = scopes(json!({"n": "{{$randomInt}}", "$timestamp": "fixed"}));
        let n: u32 = interpolate("{{n}}", &s).parse().unwrap();
        assert!(n <= 1000);
        assert_eq!(interpolate("{{$timestamp}}", &s), "fixed");
        assert_eq!(interpolate("{{$unknownThing}}", &s), "{{$unknownThing}}");
    }

    #[test]
    fn test_environment_values_keep_mock_vars() {
        let mut s = VariableScopes::new();
        s.set(Scope::Environment, "id", "{{$guid}}");
        resolve_environment_values(&mut s);
        assert_eq!(
            s.scope(Scope::Environment).unwrap()["id"],
            Value::String("{{$guid}}".into())
        );
    }

    #[test]
    fn test_environment_values_see_process_env_only() {
        let mut s = VariableScopes::new()
            .with(Scope::Environment, "token", "{{process.env.TOKEN}}")
            .with(Scope::Environment, "other", "{{runtimeOnly}}")
            .with(Scope::Runtime, "runtimeOnly", "r");
        s.set_process_env("TOKEN", "t0k");
        resolve_environment_values(&mut s);

        let env = s.scope(Scope::Environment).unwrap();
        assert_eq!(env["token"], json!("t0k"));
        assert_eq!(env["other"], json!("{{runtimeOnly}}"));
    }
}
