//! Template interpolation over configuration values
//!
//! String values may embed `${{ expr }}` markers which are evaluated against
//! the loader's environment snapshot. Sequences and mappings are traversed
//! recursively; every other scalar passes through untouched.
//!
//! A disabled interpolator (read-only loaders) is the identity transform, so
//! that interpolated values are never the ones written back to storage.

mod expr;

pub use expr::{ExprError, display, evaluate, truthy};

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::Result;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{(.+?)\}\}").expect("valid regex"));

/// Evaluates template markers against an environment snapshot
#[derive(Debug, Clone)]
pub struct Interpolator {
    enabled: bool,
    env: Map<String, Value>,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Interpolator {
    /// Create an interpolator with an empty environment
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            env: Map::new(),
        }
    }

    /// Whether markers are evaluated at all
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The environment snapshot expressions are evaluated against
    #[must_use]
    pub const fn env(&self) -> &Map<String, Value> {
        &self.env
    }

    /// Set one top-level environment binding
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.env.insert(name.into(), value);
    }

    /// Interpolate every string inside `source`
    ///
    /// # Errors
    ///
    /// Returns the first expression error encountered; evaluation failures
    /// are never swallowed here
    pub fn interpolate(&self, source: &Value) -> Result<Value> {
        if !self.enabled {
            return Ok(source.clone());
        }
        self.walk(source)
    }

    fn walk(&self, source: &Value) -> Result<Value> {
        match source {
            Value::String(template) => self.render(template).map(Value::String),
            Value::Array(items) => items
                .iter()
                .map(|item| self.walk(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| -> Result<(String, Value)> {
                    Ok((key.clone(), self.walk(value)?))
                })
                .collect::<Result<Map<_, _>>>()
                .map(Value::Object),
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(source.clone()),
        }
    }

    fn render(&self, template: &str) -> Result<String> {
        if !MARKER.is_match(template) {
            return Ok(template.to_string());
        }

        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for captures in MARKER.captures_iter(template) {
            let (Some(whole), Some(expr)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            rendered.push_str(&template[last..whole.start()]);
            rendered.push_str(&display(&evaluate(expr.as_str(), &self.env)?));
            last = whole.end();
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// Decide whether an entry guarded by `condition` is active
    ///
    /// An absent or null condition is truthy. Booleans are taken as-is,
    /// strings are evaluated as expressions and coerced to a boolean.
    ///
    /// # Errors
    ///
    /// Returns error if the condition expression fails to evaluate
    pub fn is_truthy_like(&self, condition: Option<&Value>) -> Result<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        if !self.enabled {
            return Ok(true);
        }
        match condition {
            Value::Null => Ok(true),
            Value::Bool(b) => Ok(*b),
            Value::String(expr) => Ok(truthy(&evaluate(expr, &self.env)?)),
            Value::Number(_) | Value::Array(_) | Value::Object(_) => Ok(truthy(condition)),
        }
    }
}
