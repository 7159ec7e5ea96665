//! Variable scope and placeholder expansion
//!
//! Resolves `${name}` placeholders against layered bindings. Lookup order,
//! highest priority first: job-local vars, context (task-local) vars, global
//! manifest vars, environment.

use crate::error::{ScopeError, ScopeResult};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A set of variable bindings
pub type Vars = HashMap<String, String>;

/// Maximum nesting of placeholders inside substituted values
const MAX_EXPANSION_DEPTH: usize = 16;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid"))
}

/// Layered variable bindings used to expand templated strings
#[derive(Debug, Clone, Default)]
pub struct Scope {
    environment: Arc<Vars>,
    globals: Arc<Vars>,
    context: Vars,
    locals: Vars,
}

impl Scope {
    /// Create a scope whose lowest layer is the given environment
    pub fn new(environment: Arc<Vars>) -> Self {
        Scope {
            environment,
            ..Default::default()
        }
    }

    /// Set the global (manifest-level) layer
    pub fn with_globals(mut self, globals: Arc<Vars>) -> Self {
        self.globals = globals;
        self
    }

    /// Set the context (task-local) layer
    pub fn with_context(mut self, context: Vars) -> Self {
        self.context = context;
        self
    }

    /// Set the job-local layer
    pub fn with_locals(mut self, locals: Vars) -> Self {
        self.locals = locals;
        self
    }

    /// Look a name up through all layers
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.locals
            .get(name)
            .or_else(|| self.context.get(name))
            .or_else(|| self.globals.get(name))
            .or_else(|| self.environment.get(name))
            .map(String::as_str)
    }

    /// Expand all placeholders in a string
    pub fn expand(&self, template: &str) -> ScopeResult<String> {
        self.expand_depth(template, 0)
    }

    fn expand_depth(&self, template: &str, depth: usize) -> ScopeResult<String> {
        if !template.contains("${") {
            return Ok(template.to_string());
        }

        let mut result = String::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder().captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let name = caps[1].trim();
            if name.is_empty() {
                return Err(ScopeError::InvalidSyntax(whole.as_str().to_string()));
            }

            let value = self
                .lookup(name)
                .ok_or_else(|| ScopeError::UnresolvedVariable(name.to_string()))?;

            let value = if value.contains("${") {
                if depth >= MAX_EXPANSION_DEPTH {
                    return Err(ScopeError::RecursiveExpansion(name.to_string()));
                }
                self.expand_depth(value, depth + 1)?
            } else {
                value.to_string()
            };

            result.push_str(&template[last..whole.start()]);
            result.push_str(&value);
            last = whole.end();
        }

        result.push_str(&template[last..]);
        Ok(result)
    }

    /// Expand every string inside a YAML value, recursing into mappings and sequences
    pub fn expand_value(&self, value: &Value) -> ScopeResult<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.expand(s)?)),
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.expand_value(item))
                .collect::<ScopeResult<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut expanded = Mapping::with_capacity(map.len());
                for (key, item) in map {
                    expanded.insert(key.clone(), self.expand_value(item)?);
                }
                Ok(Value::Mapping(expanded))
            }
            Value::Tagged(tagged) => {
                let mut tagged = tagged.clone();
                tagged.value = self.expand_value(&tagged.value)?;
                Ok(Value::Tagged(tagged))
            }
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn layered() -> Scope {
        Scope::new(Arc::new(vars(&[("name", "env"), ("HOME", "/home/me")])))
            .with_globals(Arc::new(vars(&[("name", "global"), ("project", "gantry")])))
            .with_context(vars(&[("name", "context"), ("target", "debug")]))
            .with_locals(vars(&[("name", "local")]))
    }

    #[test]
    fn test_simple_expansion() {
        let scope = Scope::default().with_locals(vars(&[("name", "world")]));
        assert_eq!(scope.expand("Hello, ${name}!").unwrap(), "Hello, world!");
    }

    #[test]
    fn test_no_placeholders_is_identity() {
        let scope = Scope::default();
        for text in ["", "plain", "cost: $5", "{braces}", "$ {spaced}"] {
            assert_eq!(scope.expand(text).unwrap(), text);
        }
    }

    #[test]
    fn test_layer_precedence() {
        let scope = layered();
        assert_eq!(scope.expand("${name}").unwrap(), "local");
        assert_eq!(scope.expand("${target}").unwrap(), "debug");
        assert_eq!(scope.expand("${project}").unwrap(), "gantry");
        assert_eq!(scope.expand("${HOME}").unwrap(), "/home/me");
    }

    #[test]
    fn test_context_shadows_globals_without_locals() {
        let scope = Scope::default()
            .with_globals(Arc::new(vars(&[("mode", "release")])))
            .with_context(vars(&[("mode", "debug")]));
        assert_eq!(scope.lookup("mode"), Some("debug"));
    }

    #[test]
    fn test_unresolved_variable_is_stable() {
        let scope = layered();
        let first = scope.expand("run ${missing}").unwrap_err();
        let second = scope.expand("run ${missing}").unwrap_err();
        assert_eq!(first, ScopeError::UnresolvedVariable("missing".to_string()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_nested_expansion() {
        let scope = Scope::default().with_globals(Arc::new(vars(&[
            ("inner", "value"),
            ("outer", "<${inner}>"),
        ])));
        assert_eq!(scope.expand("Result: ${outer}").unwrap(), "Result: <value>");
    }

    #[test]
    fn test_recursive_expansion_fails() {
        let scope = Scope::default().with_globals(Arc::new(vars(&[("loop", "${loop}")])));
        assert!(matches!(
            scope.expand("${loop}"),
            Err(ScopeError::RecursiveExpansion(_))
        ));
    }

    #[test]
    fn test_empty_placeholder_is_invalid() {
        let scope = Scope::default();
        assert!(matches!(
            scope.expand("Value: ${}"),
            Err(ScopeError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_expand_value_recurses() {
        let scope = Scope::default().with_locals(vars(&[("dir", "src")]));
        let value: Value = serde_yaml::from_str(
            r#"
path: ./${dir}
debounceTime: 500
job:
  plugin: shell
  params:
    command: ls ${dir}
globs: ["${dir}/*.rs", "static"]
"#,
        )
        .unwrap();

        let expanded = scope.expand_value(&value).unwrap();
        assert_eq!(expanded["path"], Value::from("./src"));
        assert_eq!(expanded["debounceTime"].as_u64(), Some(500));
        assert_eq!(expanded["job"]["params"]["command"], Value::from("ls src"));
        assert_eq!(expanded["globs"][0], Value::from("src/*.rs"));
        assert_eq!(expanded["globs"][1], Value::from("static"));
    }

    #[test]
    fn test_expand_value_propagates_errors() {
        let scope = Scope::default();
        let value: Value = serde_yaml::from_str("command: echo ${nope}").unwrap();
        assert_eq!(
            scope.expand_value(&value).unwrap_err(),
            ScopeError::UnresolvedVariable("nope".to_string())
        );
    }
}
