//! Command module - Run a shell command on the target
//!
//! A command is not idempotent by itself. `creates` and `removes` make it so:
//! the command is skipped when the `creates` path already exists, or when the
//! `removes` path is already gone.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::{Diff, Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};
use crate::connection::ExecuteOptions;

/// Parameters of the `command` (and `shell`) module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandArgs {
    pub cmd: String,
    /// Skip when this path exists
    #[serde(default)]
    pub creates: Option<PathBuf>,
    /// Skip when this path does not exist
    #[serde(default)]
    pub removes: Option<PathBuf>,
    /// Working directory for the command
    #[serde(default)]
    pub chdir: Option<String>,
}

#[async_trait]
impl Module for CommandArgs {
    /// Why the command does not need to run, if it doesn't
    type Observed = Option<String>;
    type Plan = ();

    fn name(&self) -> &'static str {
        "command"
    }

    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<Option<String>> {
        if let Some(creates) = &self.creates {
            if ctx.connection.path_exists(creates).await? {
                return Ok(Some(format!("skipped, {} exists", creates.display())));
            }
        }
        if let Some(removes) = &self.removes {
            if !ctx.connection.path_exists(removes).await? {
                return Ok(Some(format!("skipped, {} does not exist", removes.display())));
            }
        }
        Ok(None)
    }

    fn diff(&self, observed: &Option<String>) -> ModuleResult<Option<()>> {
        Ok(observed.is_none().then_some(()))
    }

    async fn apply(&self, _plan: (), ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        let mut options = ExecuteOptions::new();
        if let Some(dir) = &self.chdir {
            options = options.with_cwd(dir);
        }

        let result = ctx.connection.execute(&self.cmd, Some(options)).await?;
        if !result.success {
            let message = if result.stderr.trim().is_empty() {
                result.stdout.trim().to_string()
            } else {
                result.stderr.trim().to_string()
            };
            return Err(ModuleError::CommandFailed {
                code: result.exit_code,
                message,
            });
        }

        Ok(ModuleOutput::changed(result.stdout.trim_end().to_string()).with_command_output(
            result.stdout,
            result.stderr,
            result.exit_code,
        ))
    }

    fn unchanged(&self, observed: &Option<String>) -> ModuleOutput {
        ModuleOutput::ok(observed.clone().unwrap_or_default())
    }

    fn describe(&self, _plan: &()) -> Option<Diff> {
        Some(Diff::new("", format!("run: {}", self.cmd)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::converge;
    use crate::modules::test_support::Sandbox;
    use serde_json::json;

    fn args(value: serde_json::Value) -> CommandArgs {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_command_captures_output() {
        let sandbox = Sandbox::new();
        let output = converge(&args(json!({"cmd": "echo hello"})), &sandbox.ctx())
            .await
            .unwrap();
        assert!(output.changed);
        assert_eq!(output.msg, "hello");
        assert_eq!(output.rc, Some(0));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let sandbox = Sandbox::new();
        let err = converge(&args(json!({"cmd": "echo broken >&2; exit 3"})), &sandbox.ctx())
            .await
            .unwrap_err();
        match err {
            ModuleError::CommandFailed { code, message } => {
                assert_eq!(code, 3);
                assert_eq!(message, "broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_creates_makes_command_idempotent() {
        let sandbox = Sandbox::new();
        let init = args(json!({"cmd": "touch done.marker", "creates": "/done.marker"}));

        assert!(converge(&init, &sandbox.ctx()).await.unwrap().changed);
        assert!(sandbox.path("/done.marker").exists());

        let second = converge(&init, &sandbox.ctx()).await.unwrap();
        assert!(!second.changed);
        assert!(second.msg.contains("exists"));
    }

    #[tokio::test]
    async fn test_removes_skips_when_missing() {
        let sandbox = Sandbox::new();
        let cleanup = args(json!({"cmd": "exit 1", "removes": "/stale.lock"}));
        let output = converge(&cleanup, &sandbox.ctx()).await.unwrap();
        assert!(!output.changed);
    }

    #[tokio::test]
    async fn test_check_mode_does_not_run() {
        let sandbox = Sandbox::new();
        let ctx = ModuleContext {
            check_mode: true,
            ..sandbox.ctx()
        };
        let output = converge(&args(json!({"cmd": "touch ran"})), &ctx).await.unwrap();
        assert!(output.changed);
        assert!(!sandbox.path("/ran").exists());
    }
}
