//! Running one task on one host.
//!
//! The steps, in order:
//!
//! 1. render the host's variables with the task's own `vars` applied
//! 2. evaluate every `when` guard; a false guard skips the task
//! 3. render the module arguments and parse them into a [`ModuleSpec`]
//! 4. converge the module, bounded by the task's timeout
//! 5. record facts, the registered result and handler notifications
//!
//! Errors that end the host (undefined variables, a lost connection,
//! cancellation) are returned as [`TaskOutcome::fatal`]; everything else
//! fails only the task.

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::host::HostContext;
use super::PlayRun;
use crate::connection::ConnectionError;
use crate::error::Error;
use crate::modules::{ModuleContext, ModuleError, ModuleOutput, ModuleSpec};
use crate::playbook::Task;
use crate::report::{TaskReport, TaskStatus};

/// What running a task left behind
#[derive(Debug)]
pub(crate) struct TaskOutcome {
    pub(crate) report: TaskReport,
    /// An error that ends the host's run
    pub(crate) fatal: Option<Error>,
}

impl TaskOutcome {
    /// Whether the host stops after this task
    pub(crate) fn stops_host(&self) -> bool {
        self.fatal.is_some() || (self.report.is_failed() && !self.report.ignored)
    }
}

enum Attempt {
    Skipped(String),
    Ran(ModuleOutput),
}

/// A failed attempt, with the exit code when a command failed
struct Failure {
    error: Error,
    rc: Option<i32>,
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Self { error, rc: None }
    }
}

/// Run `task` on the host in `ctx`
#[instrument(skip_all, fields(host = %ctx.host, task = %task.display_name()))]
pub(crate) async fn run_task(
    run: &PlayRun,
    ctx: &mut HostContext,
    task: &Task,
    as_handler: bool,
) -> TaskOutcome {
    let mut report = TaskReport::new(task.display_name(), &task.module, TaskStatus::Unchanged);
    report.handler = as_handler;

    let mut fatal = None;
    let registered = match attempt(run, ctx, task).await {
        Ok(Attempt::Skipped(reason)) => {
            debug!(%reason, "Task skipped");
            report.status = TaskStatus::Skipped;
            report.msg = reason;
            registered_result(&report, None, None)
        }
        Ok(Attempt::Ran(output)) => {
            report.status = if output.changed {
                TaskStatus::Changed
            } else {
                TaskStatus::Unchanged
            };
            report.msg = output.msg.clone();
            report.diff = output.diff.clone();
            if !output.facts.is_empty() {
                ctx.vars.set_facts(&output.facts);
            }
            if output.changed {
                if let Err(e) = notify(ctx, task) {
                    fail(&mut report, task, &e);
                }
            }
            info!(status = %report.status, "Task finished");
            registered_result(&report, Some(&output), None)
        }
        Err(Failure { error, rc }) => {
            fail(&mut report, task, &error);
            if error.is_host_fatal() {
                report.ignored = false;
                fatal = Some(error);
            }
            registered_result(&report, None, rc)
        }
    };

    if let Some(name) = &task.register {
        ctx.vars.set_fact(name.clone(), registered);
    }
    TaskOutcome { report, fatal }
}

async fn attempt(run: &PlayRun, ctx: &mut HostContext, task: &Task) -> Result<Attempt, Failure> {
    let vars = ctx.vars.render_for_task(&run.engine, &task.vars)?;

    for guard in &task.when {
        if !run.engine.eval_bool(guard, &vars)? {
            return Ok(Attempt::Skipped(format!("condition '{}' was false", guard)));
        }
    }

    let args = run.engine.render_value(&task.args, &vars)?;
    let spec = ModuleSpec::from_args(&task.module, &args)
        .map_err(|e| Error::module_args(&task.module, e.to_string()))?;

    let module_ctx = ModuleContext {
        host: &ctx.host,
        connection: ctx.connection.as_ref(),
        vars: &vars,
        check_mode: run.config.check_mode,
        apply_timeout: task.timeout.or(run.config.timeout),
    };

    let result = tokio::select! {
        biased;
        _ = run.cancel.cancelled() => return Err(Error::Cancelled.into()),
        result = spec.run(&module_ctx) => result,
    };
    result.map(Attempt::Ran).map_err(|e| module_failure(e, task, &ctx.host))
}

/// Map a module error onto the engine's error kinds
fn module_failure(err: ModuleError, task: &Task, host: &str) -> Failure {
    let rc = match &err {
        ModuleError::CommandFailed { code, .. } => Some(*code),
        _ => None,
    };
    let error = match err {
        ModuleError::Timeout(limit) => Error::Timeout {
            task: task.display_name(),
            host: host.to_string(),
            timeout_secs: limit.as_secs(),
        },
        ModuleError::Connection(e @ ConnectionError::ConnectionFailed(_)) => Error::Connection(e),
        ModuleError::InvalidParameter(msg) => Error::module_args(&task.module, msg),
        ModuleError::NotFound(name) => Error::ModuleNotFound(name),
        other => Error::module_apply(&task.module, host, other.to_string()),
    };
    Failure { error, rc }
}

fn notify(ctx: &mut HostContext, task: &Task) -> crate::error::Result<()> {
    for name in &task.notify {
        let queued = ctx.notifier.notify(name)?;
        debug!(handler = %name, queued, "Notified");
    }
    Ok(())
}

fn fail(report: &mut TaskReport, task: &Task, error: &Error) {
    if task.ignore_errors {
        warn!(error = %error, "Task failed, ignoring");
    } else {
        warn!(error = %error, "Task failed");
    }
    report.status = TaskStatus::Failed;
    report.msg = error.to_string();
    report.error_kind = Some(error.kind().to_string());
    report.ignored = task.ignore_errors;
}

/// The value `register:` stores
fn registered_result(report: &TaskReport, output: Option<&ModuleOutput>, rc: Option<i32>) -> Value {
    let mut result = Map::new();
    result.insert("changed".into(), Value::Bool(report.status == TaskStatus::Changed));
    result.insert("failed".into(), Value::Bool(report.status == TaskStatus::Failed));
    result.insert("skipped".into(), Value::Bool(report.status == TaskStatus::Skipped));
    result.insert("msg".into(), Value::String(report.msg.clone()));

    if let Some(output) = output {
        for (key, value) in &output.data {
            result.insert(key.clone(), value.clone());
        }
        if let Some(stdout) = &output.stdout {
            result.insert("stdout".into(), Value::String(stdout.clone()));
            result.insert(
                "stdout_lines".into(),
                Value::Array(stdout.lines().map(|l| Value::String(l.to_string())).collect()),
            );
        }
        if let Some(stderr) = &output.stderr {
            result.insert("stderr".into(), Value::String(stderr.clone()));
        }
    }
    if let Some(rc) = rc.or_else(|| output.and_then(|o| o.rc)) {
        result.insert("rc".into(), Value::from(rc));
    }
    Value::Object(result)
}
