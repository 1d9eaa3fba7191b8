//! Error types for Steward.
//!
//! This module defines the crate-wide [`Error`] type. Subsystems keep their
//! own narrower error enums ([`InventoryError`], [`ModuleError`],
//! [`ConnectionError`]) which convert into it at the boundary.
//!
//! The engine distinguishes errors by how far they propagate:
//!
//! - [`Error::CycleDetected`] aborts the whole run before any host starts.
//! - [`Error::UndefinedVariable`] ends the affected host's run.
//! - [`Error::GuardEvaluation`], [`Error::ModuleApply`] and [`Error::Timeout`]
//!   fail a single task; whether the host continues depends on the task.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::inventory::InventoryError;
use crate::modules::ModuleError;

/// Result type alias for Steward operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Steward.
#[derive(Error, Debug)]
pub enum Error {
    /// A template referenced a variable no scope defines.
    #[error("Undefined variable: '{0}'")]
    UndefinedVariable(String),

    /// Group containment is not acyclic.
    #[error("Group containment cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// Template syntax or rendering error.
    #[error("Template error in '{template}': {message}")]
    Template {
        template: String,
        message: String,
    },

    /// A `when` expression could not be evaluated.
    #[error("Invalid condition '{expression}': {message}")]
    GuardEvaluation {
        expression: String,
        message: String,
    },

    /// A module reported failure while applying its plan.
    #[error("Module '{module}' failed on host '{host}': {message}")]
    ModuleApply {
        module: String,
        host: String,
        message: String,
    },

    /// An apply call exceeded its deadline.
    #[error("Task '{task}' timed out on host '{host}' after {timeout_secs} seconds")]
    Timeout {
        task: String,
        host: String,
        timeout_secs: u64,
    },

    /// Module name is not one of the built-in kinds.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Invalid module arguments.
    #[error("Invalid arguments for module '{module}': {message}")]
    ModuleArgs {
        module: String,
        message: String,
    },

    /// Module error raised outside of apply (inspection, validation).
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Handler not found.
    #[error("Handler '{0}' not found")]
    HandlerNotFound(String),

    /// The run was cancelled before this host started.
    #[error("Run cancelled")]
    Cancelled,

    /// Error parsing a playbook file.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        path: PathBuf,
        message: String,
    },

    /// Role not found.
    #[error("Role '{0}' not found")]
    RoleNotFound(String),

    /// Inventory loading or lookup error.
    #[error(transparent)]
    Inventory(InventoryError),

    /// Host not found in inventory.
    #[error("Host '{0}' not found in inventory")]
    HostNotFound(String),

    /// Target connection error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a playbook, role or vars file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InventoryError> for Error {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::CycleDetected(cycle) => Error::CycleDetected { cycle },
            InventoryError::HostNotFound(host) => Error::HostNotFound(host),
            other => Error::Inventory(other),
        }
    }
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new guard evaluation error.
    pub fn guard(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GuardEvaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Creates a new module apply error.
    pub fn module_apply(
        module: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ModuleApply {
            module: module.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new module args error.
    pub fn module_args(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleArgs {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new template error.
    pub fn template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error ends the host's run regardless of
    /// the failing task's best-effort flag.
    pub fn is_host_fatal(&self) -> bool {
        matches!(
            self,
            Error::UndefinedVariable(_)
                | Error::CycleDetected { .. }
                | Error::Cancelled
                | Error::Connection(_)
        )
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UndefinedVariable(_) => "undefined_variable",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::GuardEvaluation { .. } => "guard_evaluation",
            Error::ModuleApply { .. } | Error::Module(_) => "module_apply",
            Error::Timeout { .. } => "timeout",
            Error::ModuleArgs { .. } | Error::ModuleNotFound(_) => "module_args",
            Error::HandlerNotFound(_) => "handler_not_found",
            Error::Cancelled => "cancelled",
            Error::Template { .. } => "template",
            Error::Connection(_) => "connection",
            _ => "error",
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ModuleApply { .. } | Error::Timeout { .. } => 2,
            Error::Connection(_) => 3,
            Error::PlaybookParse { .. }
            | Error::CycleDetected { .. }
            | Error::ModuleNotFound(_)
            | Error::RoleNotFound(_) => 4,
            Error::Inventory(_) | Error::HostNotFound(_) => 5,
            Error::Cancelled => 130,
            _ => 1,
        }
    }
}
