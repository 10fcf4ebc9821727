//! Template expansion and override merging for scenario documents.
//!
//! A scenario document describes users and clients once, as templates. The
//! functions here turn those templates into concrete records for a single
//! organization:
//!
//! 1. [`expand`] substitutes variables such as `{organization}` into every
//!    string scalar, at any depth.
//! 2. [`expand_and_override`] expands both the templates and an override
//!    mapping, then merges the override into every record.
//!
//! Both are pure: they return new values and leave their inputs untouched.

use serde_json::{Map, Value};

use crate::error::{Result, TestbedError};

/// Placeholder replaced by the organization name.
pub const ORGANIZATION_VAR: &str = "{organization}";

/// Ordered set of `variable → replacement` bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    bindings: Vec<(String, String)>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings for a single organization: `{organization}` → `org`.
    pub fn organization(org: &str) -> Self {
        Self::new().with(ORGANIZATION_VAR, org)
    }

    /// Add a binding. A later binding for the same variable replaces the earlier one.
    pub fn with(mut self, var: impl Into<String>, replacement: impl Into<String>) -> Self {
        let var = var.into();
        let replacement = replacement.into();
        match self.bindings.iter_mut().find(|(v, _)| *v == var) {
            Some(existing) => existing.1 = replacement,
            None => self.bindings.push((var, replacement)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn substitute(&self, s: &str) -> String {
        self.bindings
            .iter()
            .filter(|(var, _)| !var.is_empty())
            .fold(s.to_string(), |acc, (var, replacement)| {
                acc.replace(var.as_str(), replacement)
            })
    }
}

/// Substitute every variable into every string scalar of `node`.
///
/// Replacement is literal (no patterns) and covers all occurrences. Mappings
/// and sequences are walked depth-first; numbers, booleans and null pass
/// through unchanged.
pub fn expand(node: &Value, vars: &Variables) -> Value {
    if vars.is_empty() {
        return node.clone();
    }
    match node {
        Value::String(s) => Value::String(vars.substitute(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Expand `node` and `overrides`, then merge the override keys into the result.
///
/// A sequence receives the override in every element; a mapping receives it
/// directly. Keys set by the override always win; all other keys survive.
///
/// # Errors
///
/// `Config` when `overrides` is not a mapping, when a sequence element is not a
/// mapping, or when `node` is a scalar.
pub fn expand_and_override(node: &Value, overrides: &Value, vars: &Variables) -> Result<Value> {
    let expanded = expand(node, vars);
    let overrides = match expand(overrides, vars) {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(TestbedError::config(format!(
                "override must be a mapping, found {}",
                type_name(&other)
            )));
        }
    };

    match expanded {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(Value::Object(merge(map, &overrides))),
                other => Err(TestbedError::config(format!(
                    "record #{i} must be a mapping, found {}",
                    type_name(&other)
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => Ok(Value::Object(merge(map, &overrides))),
        other => Err(TestbedError::config(format!(
            "cannot apply override to {}",
            type_name(&other)
        ))),
    }
}

fn merge(mut target: Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    for (k, v) in overrides {
        target.insert(k.clone(), v.clone());
    }
    target
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
