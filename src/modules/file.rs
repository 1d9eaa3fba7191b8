//! File module - Manage files, directories and their permissions

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::{Diff, Mode, Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};
use crate::connection::{FileKind, FileStat, TransferOptions};

/// Desired state of a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// The path must already be a regular file
    #[default]
    File,
    /// The path is a directory (created with parents)
    Directory,
    /// The path exists; an empty file is created if missing
    Touch,
    /// Nothing exists at the path
    Absent,
}

impl FileState {
    pub fn as_str(self) -> &'static str {
        match self {
            FileState::File => "file",
            FileState::Directory => "directory",
            FileState::Touch => "touch",
            FileState::Absent => "absent",
        }
    }
}

/// Parameters of the `file` module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileArgs {
    #[serde(alias = "dest", alias = "name")]
    pub path: PathBuf,
    #[serde(default)]
    pub state: FileState,
    #[serde(default)]
    pub mode: Option<Mode>,
}

/// Planned change to a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePlan {
    CreateDir,
    Touch,
    SetMode { from: u32 },
    Remove(FileKind),
}

impl FileArgs {
    fn mode_change(&self, stat: &FileStat) -> Option<FilePlan> {
        match self.mode {
            Some(mode) if mode.bits() != stat.mode => Some(FilePlan::SetMode { from: stat.mode }),
            _ => None,
        }
    }

    fn wrong_kind(&self, stat: &FileStat) -> ModuleError {
        ModuleError::ExecutionFailed(format!(
            "{} exists but is a {:?}, not a {}",
            self.path.display(),
            stat.kind,
            self.state.as_str()
        ))
    }
}

#[async_trait]
impl Module for FileArgs {
    type Observed = Option<FileStat>;
    type Plan = FilePlan;

    fn name(&self) -> &'static str {
        "file"
    }

    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<Option<FileStat>> {
        Ok(ctx.connection.stat(&self.path).await?)
    }

    fn diff(&self, observed: &Option<FileStat>) -> ModuleResult<Option<FilePlan>> {
        match (self.state, observed) {
            (FileState::Absent, None) => Ok(None),
            (FileState::Absent, Some(stat)) => Ok(Some(FilePlan::Remove(stat.kind))),

            (FileState::Directory, None) => Ok(Some(FilePlan::CreateDir)),
            (FileState::Directory, Some(stat)) if stat.is_dir() => Ok(self.mode_change(stat)),

            (FileState::Touch, None) => Ok(Some(FilePlan::Touch)),
            (FileState::Touch, Some(stat)) if stat.is_file() => Ok(self.mode_change(stat)),

            (FileState::File, None) => Err(ModuleError::ExecutionFailed(format!(
                "file {} does not exist",
                self.path.display()
            ))),
            (FileState::File, Some(stat)) if stat.is_file() => Ok(self.mode_change(stat)),

            (_, Some(stat)) => Err(self.wrong_kind(stat)),
        }
    }

    async fn apply(&self, plan: FilePlan, ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        let conn = ctx.connection;
        let mode = self.mode.map(Mode::bits);
        let path = self.path.display();

        let msg = match plan {
            FilePlan::CreateDir => {
                conn.create_dir(&self.path, mode).await?;
                format!("created directory {}", path)
            }
            FilePlan::Touch => {
                let options = TransferOptions {
                    mode,
                    create_dirs: false,
                };
                conn.write_file(&self.path, b"", Some(options)).await?;
                format!("created {}", path)
            }
            FilePlan::SetMode { .. } => {
                if let Some(mode) = mode {
                    conn.set_mode(&self.path, mode).await?;
                }
                format!("set mode of {} to {:04o}", path, mode.unwrap_or_default())
            }
            FilePlan::Remove(_) => {
                conn.remove(&self.path).await?;
                format!("removed {}", path)
            }
        };
        Ok(ModuleOutput::changed(msg).with_data("path", path.to_string().into()))
    }

    fn unchanged(&self, _observed: &Option<FileStat>) -> ModuleOutput {
        ModuleOutput::ok(format!("{} is already {}", self.path.display(), self.state.as_str()))
            .with_data("path", self.path.display().to_string().into())
    }

    fn describe(&self, plan: &FilePlan) -> Option<Diff> {
        let diff = match plan {
            FilePlan::CreateDir => Diff::new("absent", "directory"),
            FilePlan::Touch => Diff::new("absent", "file"),
            FilePlan::SetMode { from } => Diff::new(
                format!("mode {:04o}", from),
                format!("mode {}", self.mode.map(|m| m.to_string()).unwrap_or_default()),
            ),
            FilePlan::Remove(kind) => Diff::new(format!("{:?}", kind).to_lowercase(), "absent"),
        };
        Some(diff)
    }
}
