//! # Steward - A Small Configuration Management Engine
//!
//! Steward loads an inventory of hosts and groups, resolves each host's
//! variables from twenty precedence-ordered scopes, and runs a playbook of
//! idempotent tasks against every host in parallel. Tasks report
//! `unchanged`, `changed`, `failed` or `skipped`. Handlers notified by
//! changed tasks fire at most once per host, after its regular tasks.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts organized into an acyclic tree of groups with variables
//! - **Variables**: layered scopes merged by [`VarPrecedence`](vars::VarPrecedence)
//! - **Playbooks**: YAML plays holding tasks, handlers and roles
//! - **Modules**: idempotent operations that inspect, plan, then apply
//! - **Handlers**: tasks that run only when notified, once per host
//! - **Connections**: how modules reach a host
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        CLI (clap)                          │
//! └────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │              Executor (tokio, forks semaphore)             │
//! │        one HostContext per host, serial batches            │
//! └────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │   Inventory    │  │   Variable       │  │    Handler       │
//! │  + GroupGraph  │  │   Resolver       │  │    Notifier      │
//! └────────────────┘  └──────────────────┘  └──────────────────┘
//!                               │
//!                               ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │          Modules (inspect / diff / apply) over a           │
//! │                      Connection                            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use steward::prelude::*;
//!
//! # async fn demo() -> steward::Result<()> {
//! let inventory = Inventory::load("inventory.yml")?;
//! let playbook = Playbook::load("site.yml")?;
//!
//! let executor = Executor::new(ExecutorConfig::default(), inventory);
//! let report = executor.run_playbook(&playbook).await?;
//!
//! for (host, stats) in report.summary() {
//!     println!("{host}: {} changed, {} failed", stats.changed, stats.failed);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionProvider, ConnectionResult,
        LocalConnection, LocalConnectionProvider,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::{Executor, ExecutorConfig};
    pub use crate::handlers::HandlerNotifier;
    pub use crate::inventory::{Group, GroupGraph, Host, Inventory};
    pub use crate::modules::{ModuleOutput, ModuleSpec};
    pub use crate::playbook::{Handler, Play, Playbook, Task};
    pub use crate::report::{HostReport, HostState, RunReport, TaskStatus};
    pub use crate::template::TemplateEngine;
    pub use crate::vars::{HashBehaviour, VarPrecedence, VarStore, Vars};
}

// ============================================================================
// Core Types
// ============================================================================

/// Error types and the crate-wide [`Result`] alias.
pub mod error;

/// Variable scopes, precedence and per-host resolution.
pub mod vars;

/// `{{ expr }}` rendering and guard evaluation over minijinja.
pub mod template;

// ============================================================================
// Playbook Components
// ============================================================================

/// Handler notification queue, one per host.
pub mod handlers;

/// Playbook, play, role and task definitions loaded from YAML.
pub mod playbook;

// ============================================================================
// Infrastructure
// ============================================================================

/// How modules reach a host.
pub mod connection;

/// Host and group inventory management.
///
/// The inventory defines the target hosts and their groupings, loaded from
/// YAML, INI or JSON files, directories, or dynamic inventory executables.
pub mod inventory;

// ============================================================================
// Execution Engine
// ============================================================================

/// Runs plays across hosts: parallel up to `forks`, strictly ordered
/// within a host, with `serial` batches and cancellation.
pub mod executor;

/// Built-in idempotent modules.
pub mod modules;

/// Per-host and run-wide outcome reports.
pub mod report;

// ============================================================================
// Configuration
// ============================================================================

/// Layered configuration from files and `STEWARD_*` environment variables.
pub mod config;

pub use error::{Error, Result};

/// Crate version, from Cargo metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
