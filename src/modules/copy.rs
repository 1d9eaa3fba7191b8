//! Copy module - Put content into a file on the target
//!
//! Content comes from the `content` parameter or from `src`, a file on the
//! control node. The file is rewritten only when its bytes differ; a mode
//! mismatch alone only changes the permissions.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::{Diff, Mode, Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};
use crate::connection::TransferOptions;

/// Parameters of the `copy` module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyArgs {
    pub dest: PathBuf,
    #[serde(default)]
    pub content: Option<String>,
    /// File on the control node to copy from
    #[serde(default)]
    pub src: Option<PathBuf>,
    #[serde(default)]
    pub mode: Option<Mode>,
}

impl CopyArgs {
    pub(super) fn validate(&self) -> ModuleResult<()> {
        match (&self.content, &self.src) {
            (Some(_), Some(_)) => Err(ModuleError::InvalidParameter(
                "copy: 'content' and 'src' are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ModuleError::InvalidParameter(
                "copy: one of 'content' or 'src' is required".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn desired(&self) -> ModuleResult<Vec<u8>> {
        match (&self.content, &self.src) {
            (Some(content), _) => Ok(content.clone().into_bytes()),
            (None, Some(src)) => tokio::fs::read(src).await.map_err(|e| {
                ModuleError::ExecutionFailed(format!("cannot read src {}: {}", src.display(), e))
            }),
            (None, None) => Err(ModuleError::InvalidParameter(
                "copy: one of 'content' or 'src' is required".to_string(),
            )),
        }
    }
}

/// The destination as found, next to the wanted content
#[derive(Debug, Clone)]
pub struct CopyObserved {
    desired: Vec<u8>,
    current: Option<Vec<u8>>,
    mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum CopyPlan {
    Write { before: Option<Vec<u8>>, content: Vec<u8> },
    SetMode { from: u32 },
}

#[async_trait]
impl Module for CopyArgs {
    type Observed = CopyObserved;
    type Plan = CopyPlan;

    fn name(&self) -> &'static str {
        "copy"
    }

    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<CopyObserved> {
        let desired = self.desired().await?;
        let conn = ctx.connection;
        let (current, mode) = match conn.stat(&self.dest).await? {
            Some(stat) if stat.is_file() => (Some(conn.read_file(&self.dest).await?), Some(stat.mode)),
            Some(_) => {
                return Err(ModuleError::ExecutionFailed(format!(
                    "dest {} exists and is not a regular file",
                    self.dest.display()
                )))
            }
            None => (None, None),
        };
        Ok(CopyObserved {
            desired,
            current,
            mode,
        })
    }

    fn diff(&self, observed: &CopyObserved) -> ModuleResult<Option<CopyPlan>> {
        if observed.current.as_deref() != Some(observed.desired.as_slice()) {
            return Ok(Some(CopyPlan::Write {
                before: observed.current.clone(),
                content: observed.desired.clone(),
            }));
        }
        match (self.mode, observed.mode) {
            (Some(wanted), Some(actual)) if wanted.bits() != actual => {
                Ok(Some(CopyPlan::SetMode { from: actual }))
            }
            _ => Ok(None),
        }
    }

    async fn apply(&self, plan: CopyPlan, ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        let dest = self.dest.display().to_string();
        match plan {
            CopyPlan::Write { content, .. } => {
                let options = TransferOptions {
                    mode: self.mode.map(Mode::bits),
                    create_dirs: true,
                };
                ctx.connection
                    .write_file(&self.dest, &content, Some(options))
                    .await?;
                Ok(ModuleOutput::changed(format!("wrote {} bytes to {}", content.len(), dest))
                    .with_data("dest", dest.into()))
            }
            CopyPlan::SetMode { .. } => {
                if let Some(mode) = self.mode {
                    ctx.connection.set_mode(&self.dest, mode.bits()).await?;
                }
                Ok(ModuleOutput::changed(format!("set mode of {}", dest)).with_data("dest", dest.into()))
            }
        }
    }

    fn unchanged(&self, _observed: &CopyObserved) -> ModuleOutput {
        let dest = self.dest.display().to_string();
        ModuleOutput::ok(format!("{} is up to date", dest)).with_data("dest", dest.into())
    }

    fn describe(&self, plan: &CopyPlan) -> Option<Diff> {
        let dest = self.dest.display().to_string();
        match plan {
            CopyPlan::Write { before, content } => {
                let before = before
                    .as_deref()
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default();
                Some(Diff::unified(&dest, &before, &String::from_utf8_lossy(content)))
            }
            CopyPlan::SetMode { from } => Some(Diff::new(
                format!("mode {:04o}", from),
                format!("mode {}", self.mode.map(|m| m.to_string()).unwrap_or_default()),
            )),
        }
    }
}
