//! Variable rendering and guard evaluation on top of minijinja.
//!
//! The environment runs with strict undefined handling, so a reference to a
//! variable that no scope defines is an error instead of an empty string.
//! `is defined` tests and the `default` filter still work on undefined names.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::Value;

use crate::error::{Error, Result};

/// Names minijinja resolves without a context entry.
const BUILTIN_NAMES: &[&str] = &[
    "range", "dict", "namespace", "debug", "loop", "true", "false", "none", "True", "False",
    "None",
];

/// Template renderer shared by the resolver, the executor and guards.
#[derive(Debug)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create an engine with strict undefined handling.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Check if a string contains template expressions
    pub fn has_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Whether any string inside `value` (keys included) is a template
    pub fn value_has_template(value: &Value) -> bool {
        match value {
            Value::String(s) => Self::has_template(s),
            Value::Array(items) => items.iter().any(Self::value_has_template),
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| Self::has_template(k) || Self::value_has_template(v)),
            _ => false,
        }
    }

    /// Render a template string against a variable mapping.
    pub fn render_str(&self, template: &str, vars: &IndexMap<String, Value>) -> Result<String> {
        if !Self::has_template(template) {
            return Ok(template.to_string());
        }
        self.env
            .render_str(template, vars)
            .map_err(|e| self.classify(template, vars, e))
    }

    /// Render every string inside a value.
    ///
    /// A string made of exactly one `{{ expr }}` is evaluated as an
    /// expression and keeps the type of its result, so `"{{ port }}"` stays a
    /// number and a string variable stays a string.
    pub fn render_value(&self, value: &Value, vars: &IndexMap<String, Value>) -> Result<Value> {
        match value {
            Value::String(s) if Self::has_template(s) => match single_expression(s) {
                Some(expr) => self.eval_value(s, expr, vars),
                None => self.render_str(s, vars).map(Value::String),
            },
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, vars))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    rendered.insert(self.render_str(k, vars)?, self.render_value(v, vars)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    /// Evaluate a boolean expression such as a `when` guard.
    ///
    /// Any failure, including references to undefined variables, is a
    /// [`Error::GuardEvaluation`].
    pub fn eval_bool(&self, expression: &str, vars: &IndexMap<String, Value>) -> Result<bool> {
        let expr = strip_braces(expression);
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| Error::guard(expression, e.to_string()))?;
        let value = compiled
            .eval(vars)
            .map_err(|e| Error::guard(expression, e.to_string()))?;
        Ok(value.is_true())
    }

    /// Top-level names the templates inside `value` read from the context
    pub fn referenced_names(&self, value: &Value) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_names(value, &mut names);
        names
    }

    fn collect_names(&self, value: &Value, names: &mut BTreeSet<String>) {
        match value {
            Value::String(s) => self.names_in(s, names),
            Value::Array(items) => items.iter().for_each(|v| self.collect_names(v, names)),
            Value::Object(map) => {
                for (k, v) in map {
                    self.names_in(k, names);
                    self.collect_names(v, names);
                }
            }
            _ => {}
        }
    }

    fn names_in(&self, source: &str, names: &mut BTreeSet<String>) {
        if !Self::has_template(source) {
            return;
        }
        // unparsable templates fail later, when rendered
        if let Ok(tmpl) = self.env.template_from_str(source) {
            names.extend(
                tmpl.undeclared_variables(false)
                    .into_iter()
                    .filter(|name| !BUILTIN_NAMES.contains(&name.as_str())),
            );
        }
    }

    /// Evaluate the expression inside a lone `{{ ... }}` to a typed value
    fn eval_value(&self, source: &str, expr: &str, vars: &IndexMap<String, Value>) -> Result<Value> {
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| self.classify(source, vars, e))?;
        let value = compiled
            .eval(vars)
            .map_err(|e| self.classify(source, vars, e))?;
        if value.is_undefined() {
            return Err(self.undefined(source, vars));
        }
        serde_json::to_value(&value).map_err(|e| Error::template(source, e.to_string()))
    }

    /// Turn a minijinja failure into the engine's error kinds.
    fn classify(&self, template: &str, vars: &IndexMap<String, Value>, err: minijinja::Error) -> Error {
        if err.kind() != ErrorKind::UndefinedError {
            return Error::template(template, err.to_string());
        }
        self.undefined(template, vars)
    }

    fn undefined(&self, template: &str, vars: &IndexMap<String, Value>) -> Error {
        match self.first_undefined(template, vars) {
            Some(name) => Error::UndefinedVariable(name),
            None => Error::UndefinedVariable(template.trim().to_string()),
        }
    }

    /// First top-level name in `template` that `vars` lacks, alphabetically.
    fn first_undefined(&self, template: &str, vars: &IndexMap<String, Value>) -> Option<String> {
        let tmpl = self.env.template_from_str(template).ok()?;
        let mut missing: Vec<String> = tmpl
            .undeclared_variables(false)
            .into_iter()
            .filter(|name| !vars.contains_key(name) && !BUILTIN_NAMES.contains(&name.as_str()))
            .collect();
        missing.sort();
        missing.into_iter().next()
    }
}

/// The expression inside `s` when `s` is one `{{ ... }}` with nothing
/// around it
fn single_expression(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    let inner = inner.strip_prefix('-').unwrap_or(inner);
    let inner = inner.strip_suffix('-').unwrap_or(inner);
    if inner.contains("{{") || inner.contains("}}") || inner.contains("{%") {
        return None;
    }
    Some(inner.trim())
}

fn strip_braces(expression: &str) -> &str {
    single_expression(expression).unwrap_or_else(|| expression.trim())
}
