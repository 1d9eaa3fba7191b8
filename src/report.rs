//! Run results.
//!
//! Every task a host runs leaves a [`TaskReport`]; hosts collect them in a
//! [`HostReport`] together with the host's final [`HostState`]. A
//! [`RunReport`] covers a whole playbook and is what the CLI prints, either
//! as a recap or serialized as JSON or YAML.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::modules::Diff;

/// Outcome of a single task on a single host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Unchanged,
    Changed,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Unchanged => "ok",
            TaskStatus::Changed => "changed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// What happened when a task ran on one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Display name of the task
    pub task: String,
    pub module: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Error kind for failed tasks (`timeout`, `module_apply`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Failed, but the task ignores errors
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    /// Ran as a handler
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub handler: bool,
}

impl TaskReport {
    pub fn new(task: impl Into<String>, module: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task: task.into(),
            module: module.into(),
            status,
            msg: String::new(),
            diff: None,
            error_kind: None,
            ignored: false,
            handler: false,
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// Where a host is in its run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum HostState {
    Pending,
    Running { task: usize },
    HandlersPending,
    HandlersRunning,
    Done,
    /// Stopped early by a failed task, a host-fatal error or cancellation
    Aborted,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostState::Done | HostState::Aborted)
    }
}

/// Task counts for one host, or summed over hosts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub unchanged: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Failed tasks that ignore errors
    pub ignored: usize,
    pub aborted: usize,
}

impl HostStats {
    pub fn merge(&mut self, other: &HostStats) {
        self.unchanged += other.unchanged;
        self.changed += other.changed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.ignored += other.ignored;
        self.aborted += other.aborted;
    }
}

/// One host's results for one play
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    #[serde(flatten)]
    pub state: HostState,
    pub tasks: Vec<TaskReport>,
    /// Host-fatal error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostReport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: HostState::Pending,
            tasks: Vec::new(),
            error: None,
        }
    }

    /// A host that never started
    pub fn aborted(host: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            state: HostState::Aborted,
            error: Some(error.into()),
            ..Self::new(host)
        }
    }

    pub fn stats(&self) -> HostStats {
        let mut stats = HostStats::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Unchanged => stats.unchanged += 1,
                TaskStatus::Changed => stats.changed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
                TaskStatus::Failed if task.ignored => stats.ignored += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        if self.state == HostState::Aborted {
            stats.aborted = 1;
        }
        stats
    }

    /// Whether the host ended in failure
    pub fn is_failed(&self) -> bool {
        self.state == HostState::Aborted || self.tasks.iter().any(|t| t.is_failed() && !t.ignored)
    }

    /// Status of the task with this display name, if it ran
    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.task == task).map(|t| t.status)
    }
}

/// Results of one play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayReport {
    pub name: String,
    pub hosts: Vec<HostReport>,
}

impl PlayReport {
    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == name)
    }
}

/// Results of a whole playbook run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub playbook: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub check_mode: bool,
    /// The run was cancelled before it finished
    #[serde(default)]
    pub cancelled: bool,
    pub plays: Vec<PlayReport>,
}

impl RunReport {
    pub fn new(playbook: impl Into<String>, check_mode: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            playbook: playbook.into(),
            started: Utc::now(),
            finished: None,
            check_mode,
            cancelled: false,
            plays: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished = Some(Utc::now());
    }

    /// Per-host totals across every play, in first-seen host order
    pub fn summary(&self) -> IndexMap<String, HostStats> {
        let mut summary: IndexMap<String, HostStats> = IndexMap::new();
        for host in self.plays.iter().flat_map(|p| p.hosts.iter()) {
            summary.entry(host.host.clone()).or_default().merge(&host.stats());
        }
        summary
    }

    /// Run-wide totals
    pub fn totals(&self) -> HostStats {
        let mut totals = HostStats::default();
        for stats in self.summary().values() {
            totals.merge(stats);
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        self.plays
            .iter()
            .flat_map(|p| p.hosts.iter())
            .any(HostReport::is_failed)
    }

    /// Process exit code for this run: 130 when cancelled, 2 when any host
    /// failed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            130
        } else if self.has_failures() {
            2
        } else {
            0
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished.map(|f| f - self.started)
    }
}
