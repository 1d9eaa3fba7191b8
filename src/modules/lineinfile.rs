//! Line-in-file module - Manage single lines in text files
//!
//! With `regexp`, the last matching line is replaced by `line` (or, for
//! `state: absent`, every matching line is removed). Without it, `line` is
//! appended unless the file already contains it verbatim.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;

use super::{Diff, Mode, Module, ModuleContext, ModuleError, ModuleOutput, ModuleResult};
use crate::connection::TransferOptions;

/// Desired state for a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineState {
    #[default]
    Present,
    Absent,
}

/// Parameters of the `lineinfile` module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineinfileArgs {
    #[serde(alias = "dest", alias = "name")]
    pub path: PathBuf,
    #[serde(default)]
    pub line: Option<String>,
    #[serde(default)]
    pub regexp: Option<String>,
    #[serde(default)]
    pub state: LineState,
    /// Create the file when it is missing
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub mode: Option<Mode>,
}

impl LineinfileArgs {
    pub(super) fn validate(&self) -> ModuleResult<()> {
        if self.state == LineState::Present && self.line.is_none() {
            return Err(ModuleError::InvalidParameter(
                "lineinfile: 'line' is required with state=present".to_string(),
            ));
        }
        if self.state == LineState::Absent && self.line.is_none() && self.regexp.is_none() {
            return Err(ModuleError::InvalidParameter(
                "lineinfile: state=absent needs 'line' or 'regexp'".to_string(),
            ));
        }
        self.compiled_regexp()?;
        Ok(())
    }

    fn compiled_regexp(&self) -> ModuleResult<Option<Regex>> {
        self.regexp
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ModuleError::InvalidParameter(format!("lineinfile: bad regexp: {}", e)))
    }

    /// The file's new content, or `None` when it needs no change
    fn edit(&self, current: Option<&str>) -> ModuleResult<Option<String>> {
        let regexp = self.compiled_regexp()?;

        let Some(current) = current else {
            return match (self.state, &self.line) {
                (LineState::Present, Some(line)) if self.create => Ok(Some(format!("{}\n", line))),
                (LineState::Present, _) => Err(ModuleError::ExecutionFailed(format!(
                    "{} does not exist and create is false",
                    self.path.display()
                ))),
                (LineState::Absent, _) => Ok(None),
            };
        };

        let mut lines: Vec<&str> = current.lines().collect();

        match self.state {
            LineState::Present => {
                let line = self.line.as_deref().unwrap_or_default();
                let matched = regexp
                    .as_ref()
                    .and_then(|re| lines.iter().rposition(|l| re.is_match(l)));
                match matched {
                    Some(index) if lines[index] == line => return Ok(None),
                    Some(index) => lines[index] = line,
                    None if lines.contains(&line) => return Ok(None),
                    None => lines.push(line),
                }
            }
            LineState::Absent => {
                let before = lines.len();
                lines.retain(|l| match (&regexp, &self.line) {
                    (Some(re), _) => !re.is_match(l),
                    (None, Some(line)) => *l != line.as_str(),
                    (None, None) => true,
                });
                if lines.len() == before {
                    return Ok(None);
                }
            }
        }

        let mut updated = lines.join("\n");
        if !lines.is_empty() {
            updated.push('\n');
        }
        Ok(Some(updated))
    }
}

#[derive(Debug, Clone)]
pub struct LinePlan {
    before: String,
    after: String,
}

#[async_trait]
impl Module for LineinfileArgs {
    /// Current file content, if the file exists
    type Observed = Option<String>;
    type Plan = LinePlan;

    fn name(&self) -> &'static str {
        "lineinfile"
    }

    async fn inspect(&self, ctx: &ModuleContext<'_>) -> ModuleResult<Option<String>> {
        Ok(ctx.connection.read_to_string(&self.path).await?)
    }

    fn diff(&self, observed: &Option<String>) -> ModuleResult<Option<LinePlan>> {
        Ok(self.edit(observed.as_deref())?.map(|after| LinePlan {
            before: observed.clone().unwrap_or_default(),
            after,
        }))
    }

    async fn apply(&self, plan: LinePlan, ctx: &ModuleContext<'_>) -> ModuleResult<ModuleOutput> {
        let options = TransferOptions {
            mode: self.mode.map(Mode::bits),
            create_dirs: self.create,
        };
        ctx.connection
            .write_file(&self.path, plan.after.as_bytes(), Some(options))
            .await?;
        let msg = match self.state {
            LineState::Present => "line added or replaced",
            LineState::Absent => "line removed",
        };
        Ok(ModuleOutput::changed(msg).with_data("path", self.path.display().to_string().into()))
    }

    fn unchanged(&self, _observed: &Option<String>) -> ModuleOutput {
        ModuleOutput::ok("").with_data("path", self.path.display().to_string().into())
    }

    fn describe(&self, plan: &LinePlan) -> Option<Diff> {
        Some(Diff::unified(
            &self.path.display().to_string(),
            &plan.before,
            &plan.after,
        ))
    }
}
