//! Debug module - Print messages and variable values
//!
//! Runs entirely on the control node and never changes anything.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};
use crate::vars::resolve::resolve_path;

const DEFAULT_MSG: &str = "Hello world!";

/// Parameters of the `debug` module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugArgs {
    /// Message to print (already rendered)
    #[serde(default)]
    pub msg: Option<Value>,
    /// Name (or dotted path) of a variable to print
    #[serde(default)]
    pub var: Option<String>,
}

impl DebugArgs {
    pub(super) fn validate(&self) -> ModuleResult<()> {
        if self.msg.is_some() && self.var.is_some() {
            return Err(ModuleError::InvalidParameter(
                "debug: 'msg' and 'var' are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What `debug` prints: a label and a value
#[derive(Debug, Clone)]
pub struct Printed {
    key: String,
    value: Value,
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[async_trait]
impl Module for DebugArgs {
    type Observed = Printed;
    type Plan = ();

    fn name(&self) -> &'static str {
        "debug"
    }

    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<Printed> {
        if let Some(var) = &self.var {
            let mut parts = var.splitn(2, '.');
            let root = parts.next().unwrap_or_default();
            let value = ctx
                .vars
                .get(root)
                .and_then(|v| match parts.next() {
                    Some(rest) => resolve_path(v, rest),
                    None => Some(v),
                })
                .cloned()
                .unwrap_or_else(|| Value::String("VARIABLE IS NOT DEFINED!".to_string()));
            return Ok(Printed {
                key: var.clone(),
                value,
            });
        }

        Ok(Printed {
            key: "msg".to_string(),
            value: self
                .msg
                .clone()
                .unwrap_or_else(|| Value::String(DEFAULT_MSG.to_string())),
        })
    }

    fn diff(&self, _observed: &Printed) -> ModuleResult<Option<()>> {
        Ok(None)
    }

    async fn apply(&self, _plan: (), _ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        Ok(ModuleOutput::ok(""))
    }

    fn unchanged(&self, observed: &Printed) -> ModuleOutput {
        let msg = if observed.key == "msg" {
            format_value(&observed.value)
        } else {
            format!("{}: {}", observed.key, format_value(&observed.value))
        };
        ModuleOutput::ok(msg).with_data(observed.key.clone(), observed.value.clone())
    }
}
