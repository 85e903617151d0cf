//! Variable scopes.
//!
//! A [`VariableScope`] is a flat, ordered string map that is immutable by convention:
//! layers are combined with [`VariableScope::merge`], left to right, the right-hand side
//! winning. Dispatch scopes are built by [`resolve_dispatch_scope`] with the precedence
//! (low → high) ambient < workflow < step-declared < active loop item.
//!
//! Keys carry a scope marker: `vars.request.<name>` for request scope and
//! `vars.workflow.<name>` for workflow scope. Ambient keys are stored as authored and
//! process environment values live under `env.<NAME>`.

use indexmap::IndexMap;

use crate::expr::{ExprValue, TypedBindings};
use crate::resolve::interpolate;

/// Prefix shared by every scoped variable key.
pub const SCOPE_MARKER: &str = "vars.";
/// Prefix of request-scoped keys.
pub const REQUEST_SCOPE_PREFIX: &str = "vars.request.";
/// Prefix of workflow-scoped keys.
pub const WORKFLOW_SCOPE_PREFIX: &str = "vars.workflow.";
/// Prefix of process environment keys.
pub const ENV_PREFIX: &str = "env.";

/// Flat string-keyed variable map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableScope {
    values: IndexMap<String, String>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a scope from `(key, value)` pairs; later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(key, value)| (key.into(), value.into())).collect(),
        }
    }

    /// Builds a scope of process environment values keyed as `env.<NAME>`.
    pub fn from_environment<I>(variables: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::from_pairs(variables.into_iter().map(|(key, value)| (format!("{ENV_PREFIX}{key}"), value)))
    }

    /// Returns a copy with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Returns a new scope holding `self` overlaid by `other`.
    pub fn merge(&self, other: &VariableScope) -> VariableScope {
        let mut values = self.values.clone();
        for (key, value) in &other.values {
            values.insert(key.clone(), value.clone());
        }
        VariableScope { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Resolves a bare `name` highest layer first: request scope (step vars and the loop
    /// item), then workflow scope, then the ambient key as authored.
    ///
    /// Names that already carry a scope marker or the `env.` prefix match exactly.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        if name.starts_with(SCOPE_MARKER) || name.starts_with(ENV_PREFIX) {
            return self.get(name);
        }
        self.get(&request_key(name))
            .or_else(|| self.get(&workflow_key(name)))
            .or_else(|| self.get(name))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries whose key sits in workflow scope.
    pub fn workflow_entries(&self) -> VariableScope {
        VariableScope::from_pairs(
            self.values
                .iter()
                .filter(|(key, _)| key.starts_with(WORKFLOW_SCOPE_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone())),
        )
    }
}

/// Adds the request-scope marker to keys that carry no scope marker.
pub fn scoped_key(key: &str) -> String {
    let key = key.trim();
    if key.starts_with(SCOPE_MARKER) || key.starts_with(ENV_PREFIX) {
        key.to_string()
    } else {
        request_key(key)
    }
}

pub fn request_key(name: &str) -> String {
    format!("{REQUEST_SCOPE_PREFIX}{}", name.trim())
}

pub fn workflow_key(name: &str) -> String {
    let name = name.trim();
    if name.starts_with(WORKFLOW_SCOPE_PREFIX) {
        name.to_string()
    } else {
        format!("{WORKFLOW_SCOPE_PREFIX}{name}")
    }
}

/// Builds the persisted workflow scope from declared workflow variables.
pub fn workflow_scope(vars: &IndexMap<String, String>) -> VariableScope {
    VariableScope::from_pairs(vars.iter().map(|(key, value)| (workflow_key(key), value.clone())))
}

/// The active loop item handed to [`resolve_dispatch_scope`].
#[derive(Debug, Clone, Copy)]
pub struct LoopBinding<'a> {
    pub var: &'a str,
    /// Scope keys the item text is bound under, see [`loop_scope_keys`].
    pub keys: &'a [String],
    pub text: &'a str,
    pub raw: &'a ExprValue,
}

/// Scope keys the loop item is bound under.
pub fn loop_scope_keys(var: &str, promote: bool) -> Vec<String> {
    let mut keys = vec![request_key(var)];
    if promote {
        keys.push(workflow_key(var));
    }
    keys
}

/// Flat variables for a dispatch plus the typed values for the current step's expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchScope {
    pub variables: VariableScope,
    pub typed: TypedBindings,
}

/// Merges the scope layers for one dispatch.
///
/// Step variable values may reference lower layers and the loop item with `{{name}}`.
/// The loop item text is bound under every key the binding carries.
pub fn resolve_dispatch_scope(
    ambient: &VariableScope,
    workflow: &VariableScope,
    step_vars: &IndexMap<String, String>,
    loop_binding: Option<LoopBinding<'_>>,
) -> DispatchScope {
    let base = ambient.merge(workflow);

    let mut loop_layer = VariableScope::new();
    let mut typed = TypedBindings::new();
    if let Some(binding) = loop_binding {
        for key in binding.keys {
            loop_layer = loop_layer.with(key.clone(), binding.text);
        }
        typed.insert(binding.var.to_string(), binding.raw.clone());
    }

    let lookup_scope = base.merge(&loop_layer);
    let step_layer = VariableScope::from_pairs(
        step_vars
            .iter()
            .map(|(key, value)| (scoped_key(key), interpolate(value, &lookup_scope))),
    );

    DispatchScope {
        variables: base.merge(&step_layer).merge(&loop_layer),
        typed,
    }
}

/// Returns the persisted workflow scope after a dispatch: workflow-scoped step variables
/// are carried forward, loop bindings are not.
pub fn persist_workflow_scope(
    workflow: &VariableScope,
    dispatched: &VariableScope,
    step_vars: &IndexMap<String, String>,
) -> VariableScope {
    let declared = step_vars
        .keys()
        .map(|key| scoped_key(key))
        .filter(|key| key.starts_with(WORKFLOW_SCOPE_PREFIX))
        .filter_map(|key| dispatched.get(&key).map(|value| (key.clone(), value.to_string())));
    workflow.merge(&VariableScope::from_pairs(declared))
}
