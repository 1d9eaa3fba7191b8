//! Local connection module
//!
//! Runs commands and file operations on the control node. A connection can
//! be rooted at a directory: absolute target paths are then resolved inside
//! that directory and commands start there.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionPool, ConnectionProvider,
    ConnectionResult, ExecuteOptions, FileKind, FileStat, TransferOptions,
};
use crate::inventory::Host;

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    /// Identifier for this connection
    identifier: String,
    /// Directory standing in for `/`
    root: Option<PathBuf>,
}

impl LocalConnection {
    /// Create a local connection working on the real filesystem
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            root: None,
        }
    }

    /// Create a local connection confined to `root`
    pub fn rooted(identifier: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Map a target path onto the local filesystem
    fn target(&self, path: &Path) -> ConnectionResult<PathBuf> {
        let Some(root) = &self.root else {
            return Ok(path.to_path_buf());
        };

        let mut mapped = root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => mapped.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => return Err(ConnectionError::InvalidPath(path.to_path_buf())),
            }
        }
        Ok(mapped)
    }

    /// Build the command with options
    fn build_command(&self, command: &str, options: &ExecuteOptions) -> ConnectionResult<Command> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);

        match (&options.cwd, &self.root) {
            (Some(cwd), _) => {
                cmd.current_dir(self.target(Path::new(cwd))?);
            }
            (None, Some(root)) => {
                cmd.current_dir(root);
            }
            (None, None) => {}
        }

        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

fn transfer_error(action: &str, path: &Path, err: std::io::Error) -> ConnectionError {
    ConnectionError::TransferFailed(format!("Failed to {} {}: {}", action, path.display(), err))
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(host = %self.identifier, command = %command, "Executing local command");

        let child = self.build_command(command, &options)?.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        let output = match options.timeout {
            Some(timeout_secs) => {
                match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => return Err(ConnectionError::Timeout(timeout_secs)),
                }
            }
            None => child.wait_with_output().await,
        }
        .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn read_file(&self, path: &Path) -> ConnectionResult<Vec<u8>> {
        let target = self.target(path)?;
        match tokio::fs::read(&target).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConnectionError::NotFound(path.to_path_buf())),
            Err(e) => Err(transfer_error("read", path, e)),
        }
    }

    async fn write_file(
        &self,
        path: &Path,
        content: &[u8],
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        let target = self.target(path)?;
        debug!(dst = %target.display(), size = %content.len(), "Writing content locally");

        if options.create_dirs {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| transfer_error("create directory", parent, e))?;
            }
        }

        tokio::fs::write(&target, content)
            .await
            .map_err(|e| transfer_error("write", path, e))?;

        if let Some(mode) = options.mode {
            self.set_mode(path, mode).await?;
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<Option<FileStat>> {
        let target = self.target(path)?;
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(transfer_error("stat", path, e)),
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        Ok(Some(FileStat {
            kind,
            size: metadata.len(),
            mode: permission_bits(&metadata),
            mtime,
        }))
    }

    async fn remove(&self, path: &Path) -> ConnectionResult<()> {
        let target = self.target(path)?;
        let result = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(&target).await,
            Ok(_) => tokio::fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(transfer_error("remove", path, e)),
            _ => Ok(()),
        }
    }

    async fn create_dir(&self, path: &Path, mode: Option<u32>) -> ConnectionResult<()> {
        let target = self.target(path)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| transfer_error("create directory", path, e))?;
        if let Some(mode) = mode {
            self.set_mode(path, mode).await?;
        }
        Ok(())
    }

    async fn set_mode(&self, path: &Path, mode: u32) -> ConnectionResult<()> {
        let target = self.target(path)?;
        apply_mode(&target, mode)
            .await
            .map_err(|e| transfer_error("set permissions on", path, e))
    }
}

#[cfg(unix)]
async fn apply_mode(target: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn apply_mode(_target: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Gives every host a local connection, rooted at its `steward_root`
/// variable when the host sets one
#[derive(Debug, Default)]
pub struct LocalConnectionProvider {
    pool: ConnectionPool,
}

impl LocalConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionProvider for LocalConnectionProvider {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        Ok(self.pool.get_or_insert_with(&host.name, || {
            let conn = match host.root_dir() {
                Some(root) => LocalConnection::rooted(host.name.clone(), root),
                None => LocalConnection::new(host.name.clone()),
            };
            Arc::new(conn)
        }))
    }
}
