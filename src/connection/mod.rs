//! Connection layer between modules and their targets.
//!
//! Modules never touch a host directly: they go through the [`Connection`]
//! trait to run commands and inspect or change files. The executor asks a
//! [`ConnectionProvider`] for one connection per host at the start of the
//! host's run.
//!
//! # Transports
//!
//! - **Local**: [`LocalConnection`] runs on the control node, optionally
//!   rooted at a directory (the `steward_root` host variable) so every host
//!   of a run sees its own filesystem tree.
//!
//! # Example
//!
//! ```rust,no_run
//! use steward::connection::{Connection, LocalConnection};
//! use std::path::Path;
//!
//! # async fn demo() -> steward::connection::ConnectionResult<()> {
//! let conn = LocalConnection::rooted("web1", "/tmp/sandbox/web1");
//! conn.write_file(Path::new("/etc/motd"), b"hello\n", None).await?;
//! let result = conn.execute("cat etc/motd", None).await?;
//! assert_eq!(result.stdout, "hello\n");
//! # Ok(())
//! # }
//! ```

pub mod local;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::inventory::Host;

pub use local::{LocalConnection, LocalConnectionProvider};

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Command could not be started or waited on (a non-zero exit code is
    /// not an error here).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Reading or writing a file failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// The command did not finish in time.
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    /// A path escapes the connection's root or is otherwise unusable.
    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// A path the operation needs does not exist.
    #[error("No such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Exit status and captured output of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandResult {
    pub fn success(stdout: String, stderr: String) -> Self {
        Self::with_code(0, stdout, stderr)
    }

    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self::with_code(exit_code, stdout, stderr)
    }

    fn with_code(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
        }
    }
}

/// How to run a command. `cwd` is resolved inside the connection's root.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    /// Seconds before the command is killed
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(self, cwd: impl Into<String>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..self
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(self, secs: u64) -> Self {
        Self {
            timeout: Some(secs),
            ..self
        }
    }
}

/// How to write a file
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Permission bits for the written file; kept as-is when `None`
    pub mode: Option<u32>,
    /// Create missing parent directories instead of failing
    pub create_dirs: bool,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_dirs(self) -> Self {
        Self {
            create_dirs: true,
            ..self
        }
    }
}

/// What kind of filesystem object a path is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// File statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    /// File size in bytes
    pub size: u64,
    /// Permission bits
    pub mode: u32,
    /// Last modification time (Unix timestamp)
    pub mtime: i64,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// A target that modules inspect and change
#[async_trait]
pub trait Connection: Send + Sync + std::fmt::Debug {
    /// Get the connection identifier (usually the host name)
    fn identifier(&self) -> &str;

    /// Execute a shell command
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Read a whole file
    async fn read_file(&self, path: &Path) -> ConnectionResult<Vec<u8>>;

    /// Write a whole file, replacing what was there
    async fn write_file(
        &self,
        path: &Path,
        content: &[u8],
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// File stats, or `None` when nothing exists at `path`
    async fn stat(&self, path: &Path) -> ConnectionResult<Option<FileStat>>;

    /// Remove a file or a directory tree. Removing nothing is not an error.
    async fn remove(&self, path: &Path) -> ConnectionResult<()>;

    /// Create a directory and its parents
    async fn create_dir(&self, path: &Path, mode: Option<u32>) -> ConnectionResult<()>;

    /// Change permission bits
    async fn set_mode(&self, path: &Path, mode: u32) -> ConnectionResult<()>;

    /// Check if a path exists
    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// Read a file as UTF-8 text, or `None` when it does not exist
    async fn read_to_string(&self, path: &Path) -> ConnectionResult<Option<String>> {
        match self.stat(path).await? {
            Some(stat) if stat.is_file() => {
                let bytes = self.read_file(path).await?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Some(_) => Err(ConnectionError::TransferFailed(format!(
                "{} is not a regular file",
                path.display()
            ))),
            None => Ok(None),
        }
    }
}

/// Hands out the connection for each host of a run
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Connections already handed out, keyed by host name
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a connection from the pool
    pub fn get(&self, host: &str) -> Option<Arc<dyn Connection>> {
        self.connections.read().get(host).cloned()
    }

    /// Get the pooled connection or create and pool a new one
    pub fn get_or_insert_with<F>(&self, host: &str, create: F) -> Arc<dyn Connection>
    where
        F: FnOnce() -> Arc<dyn Connection>,
    {
        if let Some(conn) = self.get(host) {
            return conn;
        }
        self.connections
            .write()
            .entry(host.to_string())
            .or_insert_with(create)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}
