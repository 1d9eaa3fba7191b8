//! Module system for Steward
//!
//! Modules are the building blocks that perform actual work on targets.
//! Every built-in module follows the same three steps:
//!
//! 1. [`Module::inspect`] observes the target's current state,
//! 2. [`Module::diff`] compares it with the desired state (the module's
//!    parameters) and returns a plan, or `None` when nothing needs to change,
//! 3. [`Module::apply`] carries the plan out.
//!
//! [`converge`] drives these steps. When `diff` returns `None` the result is
//! unchanged and `apply` is never called, which is what makes re-running a
//! playbook safe.
//!
//! Task arguments are parsed into [`ModuleSpec`], a closed set of typed
//! parameter structs, after they are rendered for a host and before anything
//! is dispatched.

pub mod command;
pub mod copy;
pub mod debug;
pub mod fail;
pub mod file;
pub mod lineinfile;
pub mod pause;
pub mod set_fact;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionError};
use crate::vars::Vars;

pub use command::CommandArgs;
pub use copy::CopyArgs;
pub use debug::DebugArgs;
pub use fail::FailArgs;
pub use file::{FileArgs, FileState};
pub use lineinfile::{LineState, LineinfileArgs};
pub use pause::PauseArgs;
pub use set_fact::SetFactArgs;

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Command failed with exit code {code}: {message}")]
    CommandFailed { code: i32, message: String },

    #[error("apply did not finish within {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Explicit failure requested by the task
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Represents a difference between current and desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Description of what will change
    pub before: String,
    /// Description of what it will change to
    pub after: String,
    /// Optional detailed diff (e.g., unified diff for files)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Diff {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
            details: None,
        }
    }

    /// A unified line diff of two versions of a file
    pub fn unified(path: &str, before: &str, after: &str) -> Self {
        let details = similar::TextDiff::from_lines(before, after)
            .unified_diff()
            .context_radius(3)
            .header(&format!("before: {}", path), &format!("after: {}", path))
            .to_string();
        Self {
            before: before.to_string(),
            after: after.to_string(),
            details: Some(details),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Result of a module execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Whether the module changed anything
    pub changed: bool,
    /// Human-readable message about what happened
    pub msg: String,
    /// Optional diff showing what changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Additional data returned by the module
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, Value>,
    /// Facts to record for the host
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub facts: Vars,
    /// Standard output (for command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Standard error (for command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Return code (for command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
}

impl ModuleOutput {
    /// Create a new successful output with no changes
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ..Default::default()
        }
    }

    /// Create a new successful output with changes
    pub fn changed(msg: impl Into<String>) -> Self {
        Self {
            changed: true,
            msg: msg.into(),
            ..Default::default()
        }
    }

    /// Add a diff to the output
    pub fn with_diff(mut self, diff: Option<Diff>) -> Self {
        self.diff = diff;
        self
    }

    /// Add data to the output
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Record facts for the host
    pub fn with_facts(mut self, facts: Vars) -> Self {
        self.facts = facts;
        self
    }

    /// Add stdout/stderr/rc for command outputs
    pub fn with_command_output(mut self, stdout: String, stderr: String, rc: i32) -> Self {
        self.stdout = Some(stdout);
        self.stderr = Some(stderr);
        self.rc = Some(rc);
        self
    }
}

/// Everything a module may look at while running for one host
#[derive(Clone, Copy)]
pub struct ModuleContext<'a> {
    /// Inventory name of the host
    pub host: &'a str,
    /// The host's connection
    pub connection: &'a dyn Connection,
    /// The host's rendered variables
    pub vars: &'a Vars,
    /// Whether to run in check mode (dry run)
    pub check_mode: bool,
    /// Deadline for a single `apply` call
    pub apply_timeout: Option<Duration>,
}

impl fmt::Debug for ModuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("host", &self.host)
            .field("connection", &self.connection.identifier())
            .field("vars", &self.vars.len())
            .field("check_mode", &self.check_mode)
            .field("apply_timeout", &self.apply_timeout)
            .finish()
    }
}

/// The inspect / diff / apply contract every module implements
#[async_trait]
pub trait Module: Send + Sync {
    /// What `inspect` observes on the target
    type Observed: Send + Sync;
    /// What `diff` decides must be done
    type Plan: Send + Sync;

    fn name(&self) -> &'static str;

    /// Observe the target's current state
    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<Self::Observed>;

    /// Compare desired with observed state. `None` means nothing to do.
    fn diff(&self, observed: &Self::Observed) -> ModuleResult<Option<Self::Plan>>;

    /// Carry out a plan
    async fn apply(&self, plan: Self::Plan, ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput>;

    /// Output when `diff` found nothing to do
    fn unchanged(&self, _observed: &Self::Observed) -> ModuleOutput {
        ModuleOutput::ok("")
    }

    /// What a plan would change, for display
    fn describe(&self, _plan: &Self::Plan) -> Option<Diff> {
        None
    }

    /// Modules that only touch the control node still apply in check mode
    fn applies_in_check_mode(&self) -> bool {
        false
    }
}

/// Drive a module through inspect, diff and apply.
pub async fn converge<M: Module>(module: &M, ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
    let observed = module.inspect(ctx).await?;

    let Some(plan) = module.diff(&observed)? else {
        trace!(module = module.name(), host = ctx.host, "Already in desired state");
        return Ok(module.unchanged(&observed));
    };

    let diff = module.describe(&plan);
    if ctx.check_mode && !module.applies_in_check_mode() {
        debug!(module = module.name(), host = ctx.host, "Check mode, not applying");
        return Ok(ModuleOutput::changed(format!("{} would change {}", module.name(), ctx.host))
            .with_diff(diff));
    }

    let apply = module.apply(plan, ctx);
    let output = match ctx.apply_timeout {
        Some(limit) => tokio::time::timeout(limit, apply)
            .await
            .map_err(|_| ModuleError::Timeout(limit))??,
        None => apply.await?,
    };

    Ok(match output.diff {
        Some(_) => output,
        None => output.with_diff(diff),
    })
}

/// A task's module with typed, validated parameters
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleSpec {
    Debug(DebugArgs),
    SetFact(SetFactArgs),
    File(FileArgs),
    Copy(CopyArgs),
    Lineinfile(LineinfileArgs),
    Command(CommandArgs),
    Pause(PauseArgs),
    Fail(FailArgs),
}

impl ModuleSpec {
    /// Names of the built-in modules
    pub const NAMES: &'static [&'static str] = &[
        "debug",
        "set_fact",
        "file",
        "copy",
        "lineinfile",
        "command",
        "shell",
        "pause",
        "fail",
    ];

    /// Whether `name` is a built-in module
    pub fn is_known(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }

    /// Parse rendered task arguments for the module `name`.
    pub fn from_args(name: &str, args: &Value) -> ModuleResult<Self> {
        let spec = match name {
            "debug" => Self::Debug(parse_args(name, free_form(args, "msg"))?),
            "set_fact" => Self::SetFact(parse_args(name, args.clone())?),
            "file" => Self::File(parse_args(name, args.clone())?),
            "copy" => Self::Copy(parse_args(name, args.clone())?),
            "lineinfile" => Self::Lineinfile(parse_args(name, args.clone())?),
            "command" | "shell" => Self::Command(parse_args(name, free_form(args, "cmd"))?),
            "pause" => Self::Pause(parse_args(name, args.clone())?),
            "fail" => Self::Fail(parse_args(name, free_form(args, "msg"))?),
            other => return Err(ModuleError::NotFound(other.to_string())),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Module name
    pub fn name(&self) -> &'static str {
        match self {
            ModuleSpec::Debug(m) => m.name(),
            ModuleSpec::SetFact(m) => m.name(),
            ModuleSpec::File(m) => m.name(),
            ModuleSpec::Copy(m) => m.name(),
            ModuleSpec::Lineinfile(m) => m.name(),
            ModuleSpec::Command(m) => m.name(),
            ModuleSpec::Pause(m) => m.name(),
            ModuleSpec::Fail(m) => m.name(),
        }
    }

    /// Check parameter combinations serde cannot express
    pub fn validate(&self) -> ModuleResult<()> {
        match self {
            ModuleSpec::Debug(m) => m.validate(),
            ModuleSpec::Copy(m) => m.validate(),
            ModuleSpec::Lineinfile(m) => m.validate(),
            ModuleSpec::Pause(m) => m.validate(),
            ModuleSpec::SetFact(_) | ModuleSpec::File(_) | ModuleSpec::Command(_) | ModuleSpec::Fail(_) => {
                Ok(())
            }
        }
    }

    /// Run the module against a host
    pub async fn run(&self, ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        match self {
            ModuleSpec::Debug(m) => converge(m, ctx).await,
            ModuleSpec::SetFact(m) => converge(m, ctx).await,
            ModuleSpec::File(m) => converge(m, ctx).await,
            ModuleSpec::Copy(m) => converge(m, ctx).await,
            ModuleSpec::Lineinfile(m) => converge(m, ctx).await,
            ModuleSpec::Command(m) => converge(m, ctx).await,
            ModuleSpec::Pause(m) => converge(m, ctx).await,
            ModuleSpec::Fail(m) => converge(m, ctx).await,
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(name: &str, args: Value) -> ModuleResult<T> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ModuleError::InvalidParameter(format!("{}: {}", name, e)))
}

/// `command: ls -l` is short for `command: { cmd: "ls -l" }`
fn free_form(args: &Value, key: &str) -> Value {
    match args {
        Value::String(s) => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), Value::String(s.clone()));
            Value::Object(map)
        }
        other => other.clone(),
    }
}

/// Permission bits, written as an octal string (`"0644"`) or a number
/// whose digits are read as octal (`644`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(pub u32);

impl Mode {
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let parsed = match Value::deserialize(deserializer)? {
            Value::String(s) => {
                let digits = s.trim().trim_start_matches("0o");
                u32::from_str_radix(digits, 8).ok()
            }
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::from_str_radix(&n.to_string(), 8).ok()),
            _ => None,
        };
        match parsed {
            Some(bits) if bits <= 0o7777 => Ok(Mode(bits)),
            _ => Err(D::Error::custom("mode must be an octal permission such as \"0644\"")),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
