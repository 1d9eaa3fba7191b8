//! Shared test utilities and fixtures for the Steward test suite.
//!
//! This module provides:
//! - An in-memory [`Connection`] that records commands and keeps files in a map
//! - A [`ConnectionProvider`] handing out one of those per host
//! - Helpers to run a playbook against an inventory in one call
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use steward::connection::{
    CommandResult, Connection, ConnectionError, ConnectionProvider, ConnectionResult,
    ExecuteOptions, FileKind, FileStat, TransferOptions,
};
use steward::executor::{Executor, ExecutorConfig};
use steward::inventory::{Host, Inventory};
use steward::playbook::Playbook;
use steward::report::{HostReport, RunReport, TaskStatus};

// ============================================================================
// Memory Connection
// ============================================================================

/// Something stored at a path of a [`MemoryConnection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File { content: Vec<u8>, mode: u32 },
    Dir { mode: u32 },
}

/// A connection whose filesystem is a map and whose commands are recorded.
///
/// Commands of the form `exit N` fail with code `N` and `echo ...` prints
/// its arguments. Everything else succeeds silently.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    identifier: String,
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
    commands: RwLock<Vec<String>>,
    writes: AtomicUsize,
}

impl MemoryConnection {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Every command executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.read().clone()
    }

    /// How many times `command` ran
    pub fn count(&self, command: &str) -> usize {
        self.commands.read().iter().filter(|c| *c == command).count()
    }

    /// Number of file writes, mode changes, creations and removals
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.nodes.read().get(path.as_ref()) {
            Some(Node::File { content, .. }) => Some(String::from_utf8_lossy(content).into_owned()),
            _ => None,
        }
    }

    pub fn put_file(&self, path: impl Into<PathBuf>, content: &str) {
        self.nodes.write().insert(
            path.into(),
            Node::File {
                content: content.as_bytes().to_vec(),
                mode: 0o644,
            },
        );
    }

    /// A copy of the whole filesystem
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Node> {
        self.nodes.read().clone()
    }

    fn mutated(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(parent) if parent == Path::new("/") || parent.as_os_str().is_empty() => true,
            Some(parent) => matches!(self.nodes.read().get(parent), Some(Node::Dir { .. })),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        _options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.commands.write().push(command.to_string());

        if let Some(code) = command.strip_prefix("exit ").and_then(|c| c.trim().parse().ok()) {
            return Ok(CommandResult::failure(code, String::new(), format!("exited {}", code)));
        }
        if let Some(text) = command.strip_prefix("echo ") {
            return Ok(CommandResult::success(format!("{}\n", text), String::new()));
        }
        Ok(CommandResult::success(String::new(), String::new()))
    }

    async fn read_file(&self, path: &Path) -> ConnectionResult<Vec<u8>> {
        match self.nodes.read().get(path) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            _ => Err(ConnectionError::NotFound(path.to_path_buf())),
        }
    }

    async fn write_file(
        &self,
        path: &Path,
        content: &[u8],
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        if options.create_dirs {
            if let Some(parent) = path.parent() {
                self.create_dir(parent, None).await?;
            }
        } else if !self.parent_exists(path) {
            return Err(ConnectionError::NotFound(path.parent().unwrap_or(path).to_path_buf()));
        }

        let mut nodes = self.nodes.write();
        let mode = match (options.mode, nodes.get(path)) {
            (Some(mode), _) => mode,
            (None, Some(Node::File { mode, .. })) => *mode,
            (None, _) => 0o644,
        };
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                content: content.to_vec(),
                mode,
            },
        );
        drop(nodes);
        self.mutated();
        Ok(())
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<Option<FileStat>> {
        Ok(self.nodes.read().get(path).map(|node| match node {
            Node::File { content, mode } => FileStat {
                kind: FileKind::File,
                size: content.len() as u64,
                mode: *mode,
                mtime: 0,
            },
            Node::Dir { mode } => FileStat {
                kind: FileKind::Directory,
                size: 0,
                mode: *mode,
                mtime: 0,
            },
        }))
    }

    async fn remove(&self, path: &Path) -> ConnectionResult<()> {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|p, _| !p.starts_with(path));
        let removed = nodes.len() != before;
        drop(nodes);
        if removed {
            self.mutated();
        }
        Ok(())
    }

    async fn create_dir(&self, path: &Path, mode: Option<u32>) -> ConnectionResult<()> {
        let mut nodes = self.nodes.write();
        let mut created = false;
        for dir in path.ancestors() {
            if dir == Path::new("/") || dir.as_os_str().is_empty() {
                break;
            }
            match nodes.get(dir) {
                Some(Node::Dir { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(ConnectionError::InvalidPath(dir.to_path_buf()));
                }
                None => {
                    let mode = if dir == path { mode.unwrap_or(0o755) } else { 0o755 };
                    nodes.insert(dir.to_path_buf(), Node::Dir { mode });
                    created = true;
                }
            }
        }
        drop(nodes);
        if created {
            self.mutated();
        }
        Ok(())
    }

    async fn set_mode(&self, path: &Path, mode: u32) -> ConnectionResult<()> {
        match self.nodes.write().get_mut(path) {
            Some(Node::File { mode: current, .. }) | Some(Node::Dir { mode: current }) => {
                *current = mode;
            }
            None => return Err(ConnectionError::NotFound(path.to_path_buf())),
        }
        self.mutated();
        Ok(())
    }
}

// ============================================================================
// Memory Provider
// ============================================================================

/// Hands out one [`MemoryConnection`] per host and keeps them for inspection
#[derive(Debug, Default)]
pub struct MemoryProvider {
    connections: RwLock<HashMap<String, Arc<MemoryConnection>>>,
    unreachable: HashSet<String>,
    connects: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A provider that refuses to connect to the given hosts
    pub fn with_unreachable(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            unreachable: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        })
    }

    /// The host's connection, created on first use
    pub fn connection(&self, host: &str) -> Arc<MemoryConnection> {
        if let Some(conn) = self.connections.read().get(host) {
            return Arc::clone(conn);
        }
        Arc::clone(
            self.connections
                .write()
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(MemoryConnection::new(host))),
        )
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        if self.unreachable.contains(&host.name) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{} is unreachable",
                host.name
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let conn: Arc<dyn Connection> = self.connection(&host.name);
        Ok(conn)
    }
}

// ============================================================================
// Run Helpers
// ============================================================================

pub const WEB_INVENTORY: &str = r#"
all:
  children:
    web:
      hosts:
        web1:
        web2:
    db:
      hosts:
        db1:
"#;

pub fn inventory(yaml: &str) -> Inventory {
    Inventory::from_yaml(yaml).expect("inventory parses")
}

pub fn playbook(yaml: &str) -> Playbook {
    Playbook::parse(yaml, None).expect("playbook parses")
}

/// Run a playbook with the memory provider
pub async fn run_with(
    playbook: &Playbook,
    inventory: &Inventory,
    provider: &Arc<MemoryProvider>,
    config: ExecutorConfig,
) -> RunReport {
    Executor::new(config, inventory.clone())
        .with_provider(Arc::clone(provider) as Arc<dyn ConnectionProvider>)
        .run_playbook(playbook)
        .await
        .expect("run completes")
}

pub async fn run(playbook_yaml: &str, inventory_yaml: &str) -> (RunReport, Arc<MemoryProvider>) {
    let provider = MemoryProvider::new();
    let report = run_with(
        &playbook(playbook_yaml),
        &inventory(inventory_yaml),
        &provider,
        ExecutorConfig::default(),
    )
    .await;
    (report, provider)
}

/// The first play's report for `host`
pub fn host<'a>(report: &'a RunReport, name: &str) -> &'a HostReport {
    report.plays[0]
        .host(name)
        .unwrap_or_else(|| panic!("no report for {}", name))
}

/// Task statuses of a host, in run order
pub fn statuses(host: &HostReport) -> Vec<TaskStatus> {
    host.tasks.iter().map(|t| t.status).collect()
}

/// Task names of a host, in run order
pub fn task_names(host: &HostReport) -> Vec<&str> {
    host.tasks.iter().map(|t| t.task.as_str()).collect()
}
